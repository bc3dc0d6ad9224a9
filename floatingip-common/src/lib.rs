pub mod allocation;
pub mod ip;
pub mod ipam;
pub mod registry;

use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Pod annotation requesting a floating IP. Only [`TRUE_STR`] enables it.
pub const ANNOTATION_POD_NEED_FLOATING_IP: &str = "wocloud.cn/floatingip";
pub const ANNOTATION_POD_FLOATING_IP: &str = "wocloud.cn/floating-ip";
pub const ANNOTATION_POD_SUBNET: &str = "wocloud.cn/floating-subnet";
pub const ANNOTATION_POD_GATEWAY: &str = "wocloud.cn/floating-gateway";
pub const ANNOTATION_POD_CONFIG_MAP: &str = "wocloud.cn/floating-configmap";
pub const ANNOTATION_POD_ROUTES: &str = "wocloud.cn/floating-routes";
pub const ANNOTATION_POD_VLAN: &str = "wocloud.cn/floating-vlan";

/// ConfigMap annotation marking the ConfigMap as a floating IP pool.
pub const ANNOTATION_CM_FLOATING_IP: &str = "wocloud.cn/floatingip";
/// Key in `ConfigMap.data` holding the pool definition.
pub const CONFIG_MAP_FLOATING_IP_KEY: &str = "ipam";

pub const TRUE_STR: &str = "true";
/// Vlan value used when a pool does not define one.
pub const NO_VLAN: &str = "novlan";

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid CIDR address: {0}")]
    InvalidCidr(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Composite key shared by pools and allocation sets.
///
/// Panics when either part is empty.
pub fn scope_key(namespace: &str, name: &str) -> String {
    if namespace.is_empty() || name.is_empty() {
        panic!("scope key requires namespace and pool name, got namespace={namespace:?} name={name:?}");
    }
    format!("{namespace}_{name}")
}

pub(crate) fn serialize_cidr<S>(
    value: &ipnetwork::IpNetwork,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    ip::format_cidr(value).serialize(serializer)
}

pub(crate) fn deserialize_cidr<'de, D>(deserializer: D) -> Result<ipnetwork::IpNetwork, D::Error>
where
    D: Deserializer<'de>,
{
    let buf = String::deserialize(deserializer)?;
    ip::parse_cidr(&buf).map_err(|e| serde::de::Error::custom(e.to_string()))
}
