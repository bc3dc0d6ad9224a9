//! In-memory collaborators for exercising the assigner and the controller.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use floatingip_api::ipam::v1::{AcquireIpRequest, AcquireIpResponse, IpamInfo};
use floatingip_common::{
    ANNOTATION_CM_FLOATING_IP, ANNOTATION_POD_NEED_FLOATING_IP, CONFIG_MAP_FLOATING_IP_KEY,
    TRUE_STR,
};
use k8s_openapi::api::core::v1::{ConfigMap, ConfigMapVolumeSource, Pod, PodSpec, Volume};
use kube::api::ObjectMeta;

use crate::assigner::{IpamClient, PodPatcher, PoolLister};
use crate::{Error, Result};

pub(crate) const POOL_BLOB: &str = r#"{"range":{"rangeStart":"192.168.10.10","rangeEnd":"192.168.10.100","subnet":"192.168.10.0/24","gateway":"192.168.10.1"}}"#;

pub(crate) fn pool_config_map(namespace: &str, name: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_CM_FLOATING_IP.to_string(),
                TRUE_STR.to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            CONFIG_MAP_FLOATING_IP_KEY.to_string(),
            POOL_BLOB.to_string(),
        )])),
        ..Default::default()
    }
}

/// A pod requesting a floating IP with one ConfigMap volume per name.
pub(crate) fn floating_ip_pod(namespace: &str, name: &str, config_maps: &[&str]) -> Pod {
    let volumes = config_maps
        .iter()
        .map(|cm| Volume {
            name: format!("{cm}-volume"),
            config_map: Some(ConfigMapVolumeSource {
                name: cm.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })
        .collect();
    Pod {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some(namespace.into()),
            annotations: Some(BTreeMap::from([(
                ANNOTATION_POD_NEED_FLOATING_IP.to_string(),
                TRUE_STR.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(PodSpec {
            volumes: Some(volumes),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub(crate) fn ipam_info(ip: &str, pool: &str) -> IpamInfo {
    IpamInfo {
        ip: ip.into(),
        subnet: "192.168.10.0/24".into(),
        gateway: "192.168.10.1".into(),
        config_map: pool.into(),
        routes: Vec::new(),
        vlan: String::new(),
    }
}

#[derive(Clone, Default)]
pub(crate) struct TestPools(Vec<Arc<ConfigMap>>);

impl TestPools {
    pub(crate) fn new(pools: impl IntoIterator<Item = ConfigMap>) -> Self {
        Self(pools.into_iter().map(Arc::new).collect())
    }
}

impl PoolLister for TestPools {
    fn list_pools(&self) -> Vec<Arc<ConfigMap>> {
        self.0.clone()
    }
}

#[derive(Clone)]
pub(crate) struct TestIpam {
    info: IpamInfo,
    failure: Option<&'static str>,
    delay: Option<Duration>,
    requests: Arc<Mutex<Vec<AcquireIpRequest>>>,
}

impl TestIpam {
    pub(crate) fn replying(info: IpamInfo) -> Self {
        Self {
            info,
            failure: None,
            delay: None,
            requests: Arc::default(),
        }
    }

    pub(crate) fn failing(message: &'static str) -> Self {
        Self {
            failure: Some(message),
            ..Self::replying(IpamInfo::default())
        }
    }

    pub(crate) fn delayed(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    pub(crate) fn requests(&self) -> Vec<AcquireIpRequest> {
        self.requests.lock().unwrap().clone()
    }
}

impl IpamClient for TestIpam {
    async fn acquire(
        &self,
        request: AcquireIpRequest,
    ) -> Result<AcquireIpResponse, tonic::Status> {
        self.requests.lock().unwrap().push(request);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(message) => Err(tonic::Status::unavailable(message)),
            None => Ok(AcquireIpResponse {
                ipaminfo: Some(self.info.clone()),
            }),
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct TestPatcher {
    fail: bool,
    panic_for: Option<&'static str>,
    patches: Arc<Mutex<Vec<(String, String, serde_json::Value)>>>,
}

impl TestPatcher {
    pub(crate) fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// Panics while patching the named pod, like a collaborator bug would.
    pub(crate) fn panicking_for(pod: &'static str) -> Self {
        Self {
            panic_for: Some(pod),
            ..Default::default()
        }
    }

    pub(crate) fn patches(&self) -> Vec<(String, String, serde_json::Value)> {
        self.patches.lock().unwrap().clone()
    }
}

impl PodPatcher for TestPatcher {
    async fn patch_metadata(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> Result<()> {
        if self.panic_for == Some(name) {
            panic!("patch of {name} crashed");
        }
        self.patches
            .lock()
            .unwrap()
            .push((namespace.to_owned(), name.to_owned(), patch));
        if self.fail {
            return Err(Error::Other(format!("pod {namespace}/{name} not found")));
        }
        Ok(())
    }
}
