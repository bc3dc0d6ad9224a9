use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use floatingip_common::allocation::IpAllocation;
use futures::FutureExt;
use k8s_openapi::api::core::v1::Pod;
use kube::{ResourceExt, runtime::controller::Action};
use tracing::{info, warn};

use crate::assigner::{Assignment, IpamClient, PodPatcher, PoolLister};
use crate::kubernetes::controllers::context::Context;
use crate::kubernetes::controllers::{DEFAULT_REQUEUE_DURATION, ERROR_REQUEUE_DURATION};
use crate::{Error, Result};

#[tracing::instrument(skip(pod, ctx), fields(pod_name = %pod.name_any()))]
pub(crate) async fn reconcile_pod<L, C, P>(
    pod: Arc<Pod>,
    ctx: Arc<Context<L, C, P>>,
) -> Result<Action>
where
    L: PoolLister + Send + Sync + 'static,
    C: IpamClient + Send + Sync + 'static,
    P: PodPatcher + Send + Sync + 'static,
{
    let _measure = ctx.metrics.count_and_measure();
    AssertUnwindSafe(apply_pod(&pod, &ctx))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(Error::Panicked(panic_message(panic.as_ref()))))
}

async fn apply_pod<L, C, P>(pod: &Pod, ctx: &Context<L, C, P>) -> Result<Action>
where
    L: PoolLister,
    C: IpamClient,
    P: PodPatcher,
{
    let name = pod.name_any();
    let Some(namespace) = pod.namespace() else {
        warn!("failed to find namespace on Pod {}", name);
        return Ok(Action::await_change());
    };

    if pod.metadata.deletion_timestamp.is_some() {
        if let Some(allocation) = IpAllocation::from_pod(pod)
            && ctx.allocations.release(&allocation)
        {
            info!(
                "released floating ip {} of deleted pod {}/{}",
                allocation.key(),
                namespace,
                name
            );
        }
        return Ok(Action::await_change());
    }

    // Already assigned, possibly before a restart.
    if let Some(allocation) = IpAllocation::from_pod(pod) {
        ctx.allocations.record(allocation);
        return Ok(Action::await_change());
    }

    let outcome = ctx.assigner.assign(pod).await;
    ctx.metrics.count_assignment(&outcome);
    if let Assignment::Patched(allocation) = outcome? {
        ctx.allocations.record(allocation);
    }
    Ok(Action::await_change())
}

pub(crate) fn error_policy<L, C, P>(
    pod: Arc<Pod>,
    error: &Error,
    ctx: Arc<Context<L, C, P>>,
) -> Action {
    ctx.metrics.count_failure(error);
    warn!(
        %error,
        "failed to reconcile Pod {}/{}",
        pod.namespace().unwrap_or_default(),
        pod.name_any()
    );
    match error {
        // Needs a pool or volume change, not a quick retry.
        Error::NoEligiblePool { .. } => Action::requeue(DEFAULT_REQUEUE_DURATION),
        _ => Action::requeue(ERROR_REQUEUE_DURATION),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".into()
    }
}
