//! Address arithmetic.
//!
//! Every operation converts addresses to a `u128` first so that IPv4 and IPv6
//! values order consistently and carries roll across octet boundaries. IPv4
//! mapped IPv6 addresses are treated as their IPv4 form.
use std::cmp::Ordering;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use ipnetwork::IpNetwork;

use crate::{Error, Result};

fn ip_to_int(ip: IpAddr) -> u128 {
    match ip.to_canonical() {
        IpAddr::V4(v4) => u128::from(v4.to_bits()),
        IpAddr::V6(v6) => v6.to_bits(),
    }
}

// re-encodes in the (canonical) family of `like`, None if the value does not fit
fn int_to_ip(value: u128, like: IpAddr) -> Option<IpAddr> {
    match like.to_canonical() {
        IpAddr::V4(_) => u32::try_from(value)
            .ok()
            .map(|bits| IpAddr::V4(Ipv4Addr::from_bits(bits))),
        IpAddr::V6(_) => Some(IpAddr::V6(Ipv6Addr::from_bits(value))),
    }
}

/// Total order over addresses.
pub fn compare(a: IpAddr, b: IpAddr) -> Ordering {
    ip_to_int(a).cmp(&ip_to_int(b))
}

/// `a - b`, saturating at the bounds of `i128`.
pub fn difference(a: IpAddr, b: IpAddr) -> i128 {
    let (a, b) = (ip_to_int(a), ip_to_int(b));
    if a >= b {
        i128::try_from(a - b).unwrap_or(i128::MAX)
    } else {
        i128::try_from(b - a).map(|d| -d).unwrap_or(i128::MIN)
    }
}

/// Address after `ip`, or `None` for the all-ones address of its family.
pub fn next_ip(ip: IpAddr) -> Option<IpAddr> {
    ip_to_int(ip)
        .checked_add(1)
        .and_then(|value| int_to_ip(value, ip))
}

/// Address before `ip`, or `None` for the unspecified address of its family.
pub fn prev_ip(ip: IpAddr) -> Option<IpAddr> {
    ip_to_int(ip)
        .checked_sub(1)
        .and_then(|value| int_to_ip(value, ip))
}

/// Parses `address/prefix`, keeping the address exactly as written.
///
/// `10.2.3.1/24` yields a network whose `ip()` is `10.2.3.1`, not `10.2.3.0`.
/// A bare address without a prefix is rejected.
pub fn parse_cidr(s: &str) -> Result<IpNetwork> {
    let invalid = || Error::InvalidCidr(s.to_owned());
    let (addr, prefix) = s.split_once('/').ok_or_else(invalid)?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let addr: IpAddr = addr.parse().map_err(|_| invalid())?;
    let prefix: u8 = prefix.parse().map_err(|_| invalid())?;
    IpNetwork::new(addr, prefix).map_err(|_| invalid())
}

/// Canonical text form, the inverse of [`parse_cidr`].
pub fn format_cidr(network: &IpNetwork) -> String {
    format!("{}/{}", network.ip(), network.prefix())
}
