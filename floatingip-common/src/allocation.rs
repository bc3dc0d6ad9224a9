use std::net::IpAddr;

use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::Pod;
use kube::ResourceExt;

use crate::{
    ANNOTATION_POD_CONFIG_MAP, ANNOTATION_POD_FLOATING_IP, ANNOTATION_POD_GATEWAY,
    ANNOTATION_POD_SUBNET, ip,
};

/// A floating IP handed to a pod.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IpAllocation {
    pub ip: Option<IpAddr>,
    pub subnet: Option<IpNetwork>,
    pub gateway: Option<IpAddr>,
    pub namespace: String,
    /// Name of the pool (ConfigMap) the address came from.
    pub pool: String,
    pub pod_name: String,
}

impl IpAllocation {
    /// Rebuilds the allocation recorded in the pod annotations.
    ///
    /// Returns `None` unless address, subnet, gateway and pool annotations are
    /// all present and parse. An empty pool name or an unspecified address
    /// counts as absent, so the result can always be keyed.
    pub fn from_pod(pod: &Pod) -> Option<Self> {
        let annotations = pod.annotations();
        let ip = annotations.get(ANNOTATION_POD_FLOATING_IP)?;
        let gateway = annotations.get(ANNOTATION_POD_GATEWAY)?;
        let subnet = annotations.get(ANNOTATION_POD_SUBNET)?;
        let pool = annotations
            .get(ANNOTATION_POD_CONFIG_MAP)
            .filter(|pool| !pool.is_empty())?;

        let subnet = ip::parse_cidr(subnet).ok()?;
        let ip: IpAddr = ip.parse().ok().filter(|ip: &IpAddr| !ip.is_unspecified())?;
        let gateway: IpAddr = gateway.parse().ok()?;

        Some(Self {
            ip: Some(ip),
            subnet: Some(subnet),
            gateway: Some(gateway),
            namespace: pod.namespace().unwrap_or_default(),
            pool: pool.to_owned(),
            pod_name: pod.name_any(),
        })
    }

    /// The allocation key, the address in text form.
    ///
    /// Panics when the address is unset or unspecified; callers must only key
    /// fully populated allocations.
    pub fn key(&self) -> String {
        match self.ip {
            Some(ip) if !ip.is_unspecified() => ip.to_string(),
            _ => panic!("key (ip) of IpAllocation {self:?} is not set"),
        }
    }

    pub fn belongs_to(&self, namespace: &str, pod_name: &str) -> bool {
        self.namespace == namespace && self.pod_name == pod_name
    }
}
