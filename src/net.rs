//! Local interface and broadcast address enumeration.
//!
//! The Announcer and Link Registry need to know "which IPs are mine" (to
//! filter them out of relay/discovery targets, spec §3 invariant 4) and
//! "what addresses should I broadcast to" (spec §4.2). Both are rebuilt on
//! every tick rather than cached, since interfaces can change at runtime
//! (spec §9).

use std::net::Ipv4Addr;

/// All local IPv4 addresses, across every non-loopback interface.
pub fn local_ipv4s() -> Vec<Ipv4Addr> {
    match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|i| !i.is_loopback())
            .filter_map(|i| match i.ip() {
                std::net::IpAddr::V4(v4) => Some(v4),
                std::net::IpAddr::V6(_) => None,
            })
            .collect(),
        Err(e) => {
            tracing::error!("failed to enumerate local interfaces: {e}");
            Vec::new()
        }
    }
}

/// Broadcast address for each local IPv4/netmask pair, plus the universal
/// `255.255.255.255` fallback (spec §4.2).
pub fn broadcast_addresses() -> Vec<Ipv4Addr> {
    let mut addrs: Vec<Ipv4Addr> = match if_addrs::get_if_addrs() {
        Ok(ifaces) => ifaces
            .into_iter()
            .filter(|i| !i.is_loopback())
            .filter_map(|i| match i {
                if_addrs::Interface {
                    addr: if_addrs::IfAddr::V4(v4),
                    ..
                } => v4.broadcast.or_else(|| broadcast_of(v4.ip, v4.netmask)),
                _ => None,
            })
            .collect(),
        Err(e) => {
            tracing::error!("failed to enumerate local interfaces: {e}");
            Vec::new()
        }
    };
    addrs.push(Ipv4Addr::new(255, 255, 255, 255));
    addrs.sort();
    addrs.dedup();
    addrs
}

fn broadcast_of(ip: Ipv4Addr, netmask: Ipv4Addr) -> Option<Ipv4Addr> {
    let ip_bits = u32::from(ip);
    let mask_bits = u32::from(netmask);
    if mask_bits == 0 {
        return None;
    }
    Some(Ipv4Addr::from(ip_bits | !mask_bits))
}

/// The /24 network prefix (first three octets) that a local interface sits
/// in, for the subnet scanner (spec §4.4).
pub fn local_prefixes() -> Vec<[u8; 3]> {
    local_ipv4s()
        .into_iter()
        .map(|ip| {
            let o = ip.octets();
            [o[0], o[1], o[2]]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_of_slash_24() {
        let bcast = broadcast_of(Ipv4Addr::new(192, 168, 1, 42), Ipv4Addr::new(255, 255, 255, 0));
        assert_eq!(bcast, Some(Ipv4Addr::new(192, 168, 1, 255)));
    }

    #[test]
    fn broadcast_addresses_always_includes_fallback() {
        let addrs = broadcast_addresses();
        assert!(addrs.contains(&Ipv4Addr::new(255, 255, 255, 255)));
    }
}
