use std::collections::BTreeMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use floatingip_api::ipam::v1::{
    AcquireIpRequest, AcquireIpResponse, IpamInfo, ipam_service_client::IpamServiceClient,
};
use floatingip_common::{
    ANNOTATION_POD_CONFIG_MAP, ANNOTATION_POD_FLOATING_IP, ANNOTATION_POD_GATEWAY,
    ANNOTATION_POD_NEED_FLOATING_IP, ANNOTATION_POD_ROUTES, ANNOTATION_POD_SUBNET,
    ANNOTATION_POD_VLAN, NO_VLAN, TRUE_STR, allocation::IpAllocation, ip, ipam::Route,
};
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use kube::ResourceExt;
use serde::Serialize;
use tonic::transport::Channel;
use tracing::{debug, info};

use crate::{Error, Result};

/// Upper bound on a single IPAM acquire call.
pub const ACQUIRE_IP_TIMEOUT: Duration = Duration::from_secs(5);

/// Read-only view of the cached floating IP pools.
pub trait PoolLister {
    fn list_pools(&self) -> Vec<Arc<ConfigMap>>;
}

pub trait IpamClient {
    fn acquire(
        &self,
        request: AcquireIpRequest,
    ) -> impl Future<Output = Result<AcquireIpResponse, tonic::Status>> + Send;
}

pub trait PodPatcher {
    /// Applies `patch` to the pod as a JSON merge patch.
    fn patch_metadata(
        &self,
        namespace: &str,
        name: &str,
        patch: serde_json::Value,
    ) -> impl Future<Output = Result<()>> + Send;
}

impl IpamClient for IpamServiceClient<Channel> {
    fn acquire(
        &self,
        request: AcquireIpRequest,
    ) -> impl Future<Output = Result<AcquireIpResponse, tonic::Status>> + Send {
        let mut client = self.clone();
        async move {
            client
                .acquire_ip(request)
                .await
                .map(tonic::Response::into_inner)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assignment {
    /// The pod did not ask for a floating IP.
    Skipped,
    /// The pod was annotated with this allocation.
    Patched(IpAllocation),
}

/// Acquires a floating IP for a pod and records it in the pod annotations.
///
/// Makes exactly one acquire attempt per call. Retrying is up to the caller.
pub struct FloatingIpAssigner<L, C, P> {
    pools: L,
    ipam: C,
    patcher: P,
}

impl<L, C, P> FloatingIpAssigner<L, C, P>
where
    L: PoolLister,
    C: IpamClient,
    P: PodPatcher,
{
    pub fn new(pools: L, ipam: C, patcher: P) -> Self {
        Self {
            pools,
            ipam,
            patcher,
        }
    }

    pub async fn assign(&self, pod: &Pod) -> Result<Assignment> {
        let name = pod.name_any();
        let namespace = pod.namespace().unwrap_or_default();

        if !needs_floating_ip(pod) {
            debug!("pod {}/{} does not request a floating ip", namespace, name);
            return Ok(Assignment::Skipped);
        }

        let pools = self.eligible_pools(pod, &namespace);
        if pools.is_empty() {
            return Err(Error::NoEligiblePool {
                namespace,
                pod: name,
                referenced: volume_config_maps(pod).collect(),
            });
        }

        info!(
            "acquiring floating ip for pod {}/{} from pools {:?}",
            namespace, name, pools
        );
        let request = AcquireIpRequest {
            podname: name.clone(),
            namespace: namespace.clone(),
            config_maps: pools.clone(),
        };
        let response = match tokio::time::timeout(ACQUIRE_IP_TIMEOUT, self.ipam.acquire(request))
            .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => {
                return Err(Error::Acquire {
                    namespace,
                    pod: name,
                    pools,
                    source,
                });
            }
            Err(_) => {
                return Err(Error::AcquireTimeout {
                    namespace,
                    pod: name,
                    pools,
                    timeout: ACQUIRE_IP_TIMEOUT,
                });
            }
        };

        let invalid = |reason: String| Error::InvalidResponse {
            namespace: namespace.clone(),
            pod: name.clone(),
            reason,
        };
        let info = response
            .ipaminfo
            .ok_or_else(|| invalid("response carries no ipam info".into()))?;
        let allocation = allocation_from_info(&info, &namespace, &name).map_err(invalid)?;
        let routes = routes_from_info(&info).map_err(invalid)?;

        let patch = floating_ip_patch(&allocation, &routes, &info.vlan).map_err(|source| {
            Error::PatchConstruction {
                namespace: namespace.clone(),
                pod: name.clone(),
                source,
            }
        })?;
        self.patcher
            .patch_metadata(&namespace, &name, patch)
            .await
            .map_err(|source| Error::Patch {
                namespace: namespace.clone(),
                pod: name.clone(),
                ip: info.ip.clone(),
                source: Box::new(source),
            })?;

        info!(
            "assigned floating ip {} from pool {} to pod {}/{}",
            info.ip, allocation.pool, namespace, name
        );
        Ok(Assignment::Patched(allocation))
    }

    /// Pools referenced by the pod's ConfigMap volumes that are known floating
    /// IP pools in the pod's namespace, in volume order.
    fn eligible_pools(&self, pod: &Pod, namespace: &str) -> Vec<String> {
        let cached: ahash::HashSet<(String, String)> = self
            .pools
            .list_pools()
            .iter()
            .map(|cm| (cm.namespace().unwrap_or_default(), cm.name_any()))
            .collect();

        let mut pools: Vec<String> = Vec::new();
        for name in volume_config_maps(pod) {
            if pools.contains(&name) || !cached.contains(&(namespace.to_owned(), name.clone())) {
                continue;
            }
            debug!(
                "pod {}/{} references floating ip pool {}",
                namespace,
                pod.name_any(),
                name
            );
            pools.push(name);
        }
        pools
    }
}

fn needs_floating_ip(pod: &Pod) -> bool {
    pod.annotations()
        .get(ANNOTATION_POD_NEED_FLOATING_IP)
        .is_some_and(|v| v == TRUE_STR)
}

fn volume_config_maps(pod: &Pod) -> impl Iterator<Item = String> + '_ {
    pod.spec
        .iter()
        .flat_map(|spec| spec.volumes.iter().flatten())
        .filter_map(|volume| volume.config_map.as_ref())
        .map(|cm| cm.name.clone())
        .filter(|name| !name.is_empty())
}

fn allocation_from_info(
    info: &IpamInfo,
    namespace: &str,
    pod_name: &str,
) -> Result<IpAllocation, String> {
    let ip: IpAddr = info
        .ip
        .parse()
        .map_err(|_| format!("invalid ip {:?}", info.ip))?;
    if ip.is_unspecified() {
        return Err(format!("unspecified ip {:?}", info.ip));
    }
    let subnet = ip::parse_cidr(&info.subnet).map_err(|e| e.to_string())?;
    let gateway: IpAddr = info
        .gateway
        .parse()
        .map_err(|_| format!("invalid gateway {:?}", info.gateway))?;
    if info.config_map.is_empty() {
        return Err("missing pool name".into());
    }

    Ok(IpAllocation {
        ip: Some(ip),
        subnet: Some(subnet),
        gateway: Some(gateway),
        namespace: namespace.to_owned(),
        pool: info.config_map.clone(),
        pod_name: pod_name.to_owned(),
    })
}

fn routes_from_info(info: &IpamInfo) -> Result<Vec<Route>, String> {
    info.routes
        .iter()
        .map(|route| {
            let dst = ip::parse_cidr(&route.dst).map_err(|e| e.to_string())?;
            let gw = if route.gw.is_empty() {
                None
            } else {
                Some(
                    route
                        .gw
                        .parse()
                        .map_err(|_| format!("invalid route gateway {:?}", route.gw))?,
                )
            };
            Ok(Route { dst, gw })
        })
        .collect()
}

#[derive(Serialize)]
struct FloatingIpPatch<'a> {
    metadata: PatchMetadata<'a>,
}

#[derive(Serialize)]
struct PatchMetadata<'a> {
    annotations: BTreeMap<&'a str, String>,
}

/// Builds the merge patch carrying the allocation annotations.
///
/// Routes are embedded as JSON text and only when present. The vlan is left
/// out when empty or [`NO_VLAN`].
fn floating_ip_patch(
    allocation: &IpAllocation,
    routes: &[Route],
    vlan: &str,
) -> Result<serde_json::Value, serde_json::Error> {
    let mut annotations = BTreeMap::new();
    if let Some(ip) = allocation.ip {
        annotations.insert(ANNOTATION_POD_FLOATING_IP, ip.to_string());
    }
    if let Some(subnet) = &allocation.subnet {
        annotations.insert(ANNOTATION_POD_SUBNET, ip::format_cidr(subnet));
    }
    if let Some(gateway) = allocation.gateway {
        annotations.insert(ANNOTATION_POD_GATEWAY, gateway.to_string());
    }
    annotations.insert(ANNOTATION_POD_CONFIG_MAP, allocation.pool.clone());
    if !routes.is_empty() {
        annotations.insert(ANNOTATION_POD_ROUTES, serde_json::to_string(routes)?);
    }
    if !vlan.is_empty() && vlan != NO_VLAN {
        annotations.insert(ANNOTATION_POD_VLAN, vlan.to_owned());
    }

    serde_json::to_value(FloatingIpPatch {
        metadata: PatchMetadata { annotations },
    })
}
