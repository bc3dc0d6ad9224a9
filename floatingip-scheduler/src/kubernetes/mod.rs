pub mod controllers;

use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use floatingip_common::{ANNOTATION_CM_FLOATING_IP, TRUE_STR, ipam::Ipam};
use futures::StreamExt;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::api::{Patch, PatchParams};
use kube::runtime::reflector::{ReflectHandle, Store};
use kube::runtime::{WatchStreamExt, reflector, watcher};
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::{debug, error, trace};

use crate::assigner::{PodPatcher, PoolLister};
use crate::{Error, Result};

/// Starts a shared reflector for `api` and waits up to `timeout` for its
/// initial listing.
pub async fn create_store_and_subscriber<K>(
    api: Api<K>,
    timeout: Duration,
) -> Result<(Store<K>, ReflectHandle<K>)>
where
    K: Resource + Send + Clone + Debug + DeserializeOwned + Sync + 'static,
    <K as Resource>::DynamicType: Default + Eq + Send + DeserializeOwned + Hash + Clone,
{
    let (store, writer) = reflector::store_shared(1000);
    let subscriber: ReflectHandle<K> = writer
        .subscribe()
        .ok_or_else(|| Error::StoreCreation("failed to create subscriber".into()))?;

    let stream = watcher(api, watcher::Config::default())
        .default_backoff()
        .reflect_shared(writer)
        .for_each(|res| async move {
            match res {
                Ok(ev) => trace!("received event: {:?}", ev),
                Err(e) => {
                    error!(%e, "unexpected error with stream")
                }
            }
        });

    tokio::spawn(stream);
    tokio::time::timeout(timeout, store.wait_until_ready())
        .await
        .map_err(|_| Error::StoreCreation("timed out waiting for store".into()))?
        .map_err(|e| Error::StoreCreation(e.to_string()))?;
    Ok((store, subscriber))
}

/// Whether the ConfigMap is marked as a floating IP pool and carries a
/// readable pool definition.
pub fn is_floating_ip_pool(cm: &ConfigMap) -> bool {
    let marked = cm
        .annotations()
        .get(ANNOTATION_CM_FLOATING_IP)
        .is_some_and(|v| v == TRUE_STR);
    if !marked {
        return false;
    }
    if Ipam::from_config_map(cm).is_none() {
        debug!(
            "ConfigMap {}/{} is marked as a floating ip pool without a valid definition",
            cm.namespace().unwrap_or_default(),
            cm.name_any()
        );
        return false;
    }
    true
}

impl PoolLister for Store<ConfigMap> {
    fn list_pools(&self) -> Vec<Arc<ConfigMap>> {
        self.state()
            .into_iter()
            .filter(|cm| is_floating_ip_pool(cm))
            .collect()
    }
}

impl PodPatcher for Client {
    fn patch_metadata(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> impl Future<Output = Result<()>> + Send {
        let pods: Api<Pod> = Api::namespaced(self.clone(), namespace);
        let name = name.to_owned();
        async move {
            pods.patch(&name, &PatchParams::default(), &Patch::Merge(&patch))
                .await?;
            Ok(())
        }
    }
}
