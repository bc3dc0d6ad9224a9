use std::cmp::Ordering;
use std::net::IpAddr;

use ipnetwork::IpNetwork;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::ResourceExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{CONFIG_MAP_FLOATING_IP_KEY, NO_VLAN, ip, scope_key};

/// Inclusive address range a pool hands out from.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub range_start: IpAddr,
    pub range_end: IpAddr,
    #[serde(
        serialize_with = "crate::serialize_cidr",
        deserialize_with = "crate::deserialize_cidr"
    )]
    pub subnet: IpNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<IpAddr>,
}

impl Range {
    pub fn contains(&self, addr: IpAddr) -> bool {
        ip::compare(addr, self.range_start) != Ordering::Less
            && ip::compare(addr, self.range_end) != Ordering::Greater
    }

    /// Number of addresses in the range, zero when start is after end.
    pub fn size(&self) -> u128 {
        let diff = ip::difference(self.range_end, self.range_start);
        if diff < 0 {
            0
        } else {
            diff.unsigned_abs().saturating_add(1)
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    #[serde(
        serialize_with = "crate::serialize_cidr",
        deserialize_with = "crate::deserialize_cidr"
    )]
    pub dst: IpNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gw: Option<IpAddr>,
}

/// Floating IP pool described by a ConfigMap.
///
/// The scope (namespace and pool name) always comes from the ConfigMap
/// metadata, never from the payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ipam {
    pub range: Range,
    #[serde(default)]
    pub routes: Vec<Route>,
    #[serde(default = "no_vlan")]
    pub vlan: String,
    #[serde(skip)]
    pub namespace: String,
    #[serde(skip)]
    pub name: String,
}

fn no_vlan() -> String {
    NO_VLAN.to_owned()
}

impl Ipam {
    /// Decodes the pool definition stored under [`CONFIG_MAP_FLOATING_IP_KEY`].
    ///
    /// A missing key and a malformed payload both yield `None`.
    pub fn from_config_map(cm: &ConfigMap) -> Option<Self> {
        let blob = cm
            .data
            .as_ref()
            .and_then(|data| data.get(CONFIG_MAP_FLOATING_IP_KEY));
        Self::decode(
            &cm.namespace().unwrap_or_default(),
            &cm.name_any(),
            blob.map(String::as_str),
        )
    }

    pub fn decode(namespace: &str, name: &str, blob: Option<&str>) -> Option<Self> {
        let blob = blob?;
        let mut ipam: Ipam = match serde_json::from_str(blob) {
            Ok(ipam) => ipam,
            Err(e) => {
                debug!(%e, "failed to decode pool definition {}/{}", namespace, name);
                return None;
            }
        };
        if ipam.vlan.is_empty() {
            ipam.vlan = no_vlan();
        }
        ipam.namespace = namespace.to_owned();
        ipam.name = name.to_owned();
        Some(ipam)
    }

    /// Panics if the pool was never scoped.
    pub fn key(&self) -> String {
        scope_key(&self.namespace, &self.name)
    }

    pub fn vlan(&self) -> Option<&str> {
        (self.vlan != NO_VLAN).then_some(self.vlan.as_str())
    }
}
