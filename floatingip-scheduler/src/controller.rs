use tokio_util::sync::CancellationToken;

use crate::{Result, config::ControllerArgs, kubernetes::controllers::start_pod_controller};

pub async fn start(
    args: ControllerArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let client = kube::Client::try_default().await?;
    start_pod_controller(client, &args, ready, cancel).await
}
