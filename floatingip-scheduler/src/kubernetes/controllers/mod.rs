mod context;
mod controller;
mod metrics;

use std::sync::Arc;
use std::time::Duration;

use floatingip_api::ipam::v1::ipam_service_client::IpamServiceClient;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::{
    Api, Client,
    runtime::{Config, Controller},
};
use tokio_util::sync::CancellationToken;
use tonic::transport::Endpoint;
use tracing::info;

use crate::{
    Result,
    allocations::PoolAllocations,
    assigner::FloatingIpAssigner,
    config::ControllerArgs,
    kubernetes::{
        controllers::{
            context::Context,
            controller::{error_policy, reconcile_pod},
            metrics::ControllerMetrics,
        },
        create_store_and_subscriber,
    },
};

const DEFAULT_REQUEUE_DURATION: Duration = Duration::from_secs(300);
const ERROR_REQUEUE_DURATION: Duration = Duration::from_secs(5);

/// Runs the pod controller until `cancel` fires. `ready` is cancelled once
/// the pod and ConfigMap caches have synced.
pub async fn start_pod_controller(
    client: Client,
    args: &ControllerArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let channel = Endpoint::from_shared(args.ipam_address.clone())?.connect_lazy();
    let ipam = IpamServiceClient::new(channel);

    let ((pods, pod_subscriber), (config_maps, _)) = tokio::try_join!(
        create_store_and_subscriber(Api::<Pod>::all(client.clone()), args.store_timeout()),
        create_store_and_subscriber(Api::<ConfigMap>::all(client.clone()), args.store_timeout()),
    )?;
    let context = Arc::new(Context {
        assigner: FloatingIpAssigner::new(config_maps, ipam, client),
        allocations: PoolAllocations::new(),
        metrics: ControllerMetrics::new("pod"),
    });
    ready.cancel();
    info!("starting pod controller");

    Controller::for_shared_stream(pod_subscriber, pods)
        .with_config(Config::default().concurrency(args.concurrency))
        .graceful_shutdown_on(async move { cancel.cancelled().await })
        .run(reconcile_pod, error_policy, context)
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
    Ok(())
}
