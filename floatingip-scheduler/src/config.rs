use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::{Error, Result};

pub const DEFAULT_LOG_FILTER: &str = "floatingip_scheduler=info,floatingip_common=info";

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub log: LogArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    /// One JSON object per event, for log shippers
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct LogArgs {
    #[arg(long, global = true, env = "FLOATINGIP_LOG_FORMAT", value_enum, default_value_t)]
    pub log_format: LogFormat,

    /// Directives in `RUST_LOG` syntax
    #[arg(long, global = true, env = "RUST_LOG", default_value = DEFAULT_LOG_FILTER)]
    pub log_filter: String,
}

impl LogArgs {
    pub fn env_filter(&self) -> Result<EnvFilter> {
        EnvFilter::try_new(&self.log_filter)
            .map_err(|e| Error::Other(format!("invalid log filter {:?}: {e}", self.log_filter)))
    }
}

#[derive(Clone, Subcommand, Debug)]
pub enum Commands {
    /// Assign floating IPs to pods that request one
    Controller(ControllerArgs),
}

#[derive(Parser, Debug, Clone)]
pub struct ControllerArgs {
    /// Address of the IPAM gRPC service
    #[arg(long, env = "IPAM_ADDRESS", default_value = "http://127.0.0.1:9000")]
    pub ipam_address: String,

    /// Metrics listener for the controller
    #[arg(long, default_value = "0.0.0.0:9090")]
    pub metrics_address: SocketAddr,

    /// Maximum number of pods reconciled at once
    #[arg(long, default_value_t = 10)]
    pub concurrency: u16,

    /// Seconds to wait for the pod and ConfigMap caches to sync
    #[arg(long, default_value_t = 30)]
    pub store_timeout_secs: u64,
}

impl ControllerArgs {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }
}
