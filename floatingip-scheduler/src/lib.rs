pub mod allocations;
pub mod assigner;
pub mod config;
pub mod controller;
pub mod http;
pub mod kubernetes;
pub mod metrics;

#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(
        "no floating ip pool among ConfigMaps {referenced:?} referenced by pod {namespace}/{pod}"
    )]
    NoEligiblePool {
        namespace: String,
        pod: String,
        referenced: Vec<String>,
    },

    #[error(
        "acquire ip for pod {namespace}/{pod} from pools {pools:?} timed out after {timeout:?}"
    )]
    AcquireTimeout {
        namespace: String,
        pod: String,
        pools: Vec<String>,
        timeout: Duration,
    },

    #[error("acquire ip for pod {namespace}/{pod} from pools {pools:?} failed: {source}")]
    Acquire {
        namespace: String,
        pod: String,
        pools: Vec<String>,
        #[source]
        source: tonic::Status,
    },

    #[error("invalid ipam response for pod {namespace}/{pod}: {reason}")]
    InvalidResponse {
        namespace: String,
        pod: String,
        reason: String,
    },

    #[error("failed to build floating ip patch for pod {namespace}/{pod}: {source}")]
    PatchConstruction {
        namespace: String,
        pod: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to patch floating ip {ip} onto pod {namespace}/{pod}: {source}")]
    Patch {
        namespace: String,
        pod: String,
        ip: String,
        #[source]
        source: Box<Error>,
    },

    #[error("kube error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0}")]
    TonicTransport(#[from] tonic::transport::Error),

    #[error("failed to create store: {0}")]
    StoreCreation(String),

    #[error("reconcile panicked: {0}")]
    Panicked(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        let label = match self {
            Error::NoEligiblePool { .. } => "no_eligible_pool",
            Error::AcquireTimeout { .. } => "acquire_timeout",
            Error::Acquire { .. } => "acquire",
            Error::InvalidResponse { .. } => "invalid_response",
            Error::PatchConstruction { .. } => "patch_construction",
            Error::Patch { .. } => "patch",
            Error::KubeError(_) => "kube",
            Error::IoError(_) => "io",
            Error::TonicTransport(_) => "tonic_transport",
            Error::StoreCreation(_) => "store_creation",
            Error::Panicked(_) => "panicked",
            Error::Other(_) => "other",
        };
        label.to_owned()
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
