use clap::Parser;
use floatingip_scheduler::config::{Cli, Commands, ControllerArgs, LogArgs, LogFormat};
use floatingip_scheduler::{Error, Result, controller, http};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_subscriber(&cli.log)?;
    let Commands::Controller(args) = cli.command;
    run_controller(args).await
}

fn setup_subscriber(log: &LogArgs) -> Result<()> {
    let (json, text) = match log.log_format {
        LogFormat::Json => (Some(tracing_subscriber::fmt::layer().json()), None),
        LogFormat::Text => (None, Some(tracing_subscriber::fmt::layer())),
    };
    tracing_subscriber::registry()
        .with(log.env_filter()?)
        .with(json)
        .with(text)
        .try_init()
        .map_err(|e| Error::Other(format!("failed to install log subscriber: {e}")))
}

/// Runs the pod controller next to its metrics listener until a shutdown
/// signal arrives or either task ends.
async fn run_controller(args: ControllerArgs) -> Result<()> {
    let cancel = CancellationToken::new();
    let ready = CancellationToken::new();
    info!(
        ipam_address = %args.ipam_address,
        concurrency = args.concurrency,
        "starting floating ip controller"
    );

    let mut metrics_handle = tokio::spawn(http::serve_metrics(
        args.metrics_address,
        ready.child_token(),
        cancel.child_token(),
    ));
    let mut controller_handle =
        tokio::spawn(controller::start(args, ready, cancel.child_token()));

    tokio::select! {
        h = &mut metrics_handle => {
            exit("metrics", h);
            cancel.cancel();
            exit("controller", controller_handle.await);
        }
        h = &mut controller_handle => {
            exit("controller", h);
            cancel.cancel();
            exit("metrics", metrics_handle.await);
        }
        signal = shutdown_signal() => {
            if let Err(e) = signal {
                error!(%e, "failed to listen for shutdown signals");
            }
            cancel.cancel();
            let (metrics, controller) = tokio::join!(metrics_handle, controller_handle);
            exit("metrics", metrics);
            exit("controller", controller);
        }
    }
    info!("Exiting...");
    Ok(())
}

async fn shutdown_signal() -> std::io::Result<()> {
    let mut terminate =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res?;
            info!("captured ctrl_c signal");
        },
        _ = terminate.recv() => {
            info!("captured terminate signal");
        },
    }
    Ok(())
}

fn exit(task: &str, out: Result<Result<()>, JoinError>) {
    match out {
        Ok(Ok(_)) => info!("{task} exited"),
        Ok(Err(e)) => error!("{task} failed with error: {e}"),
        Err(e) => error!("{task} task failed to complete: {e}"),
    }
}
