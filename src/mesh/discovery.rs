//! Announcer (component A, spec §4.2) and Discovery Listener (component D,
//! spec §4.3): link-local UDP hello exchange. Socket setup follows the
//! reuse-address/reuse-port/broadcast pattern used for link-local UDP
//! elsewhere in this codebase's lineage, converted to a `tokio::net::
//! UdpSocket` via `UdpSocket::from_std`.

use super::config::{DISCOVERY_MAGIC, PROTOCOL_VERSION};
use super::MeshHandle;
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    device_id: String,
    tcp_port: u16,
    flask_port: u16,
    version: String,
}

fn bind_broadcast_socket(port: u16) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port).into())?;
    socket.set_nonblocking(true)?;
    Ok(UdpSocket::from_std(std::net::UdpSocket::from(socket))?)
}

/// Emit a hello datagram every `discovery_interval_secs` to every broadcast
/// address derived from every local interface, rebuilt each tick since
/// interfaces can change (spec §4.2, §9).
pub async fn run_announcer(mesh: MeshHandle, http_port: u16) -> anyhow::Result<()> {
    let socket = bind_broadcast_socket(0)
        .map_err(|e| anyhow::anyhow!("announcer: failed to open broadcast socket: {e}"))?;
    let interval = Duration::from_secs(mesh.config.discovery_interval_secs);
    let udp_port = mesh.config.udp_port;
    let tcp_port = mesh.config.tcp_port;

    loop {
        let hello = Hello {
            device_id: mesh.self_device_id.to_string(),
            tcp_port,
            flask_port: http_port,
            version: PROTOCOL_VERSION.to_string(),
        };
        let mut payload = DISCOVERY_MAGIC.to_vec();
        match serde_json::to_vec(&hello) {
            Ok(json) => payload.extend_from_slice(&json),
            Err(e) => {
                tracing::error!(error = %e, "announcer: failed to encode hello");
                tokio::time::sleep(interval).await;
                continue;
            }
        }

        for addr in crate::net::broadcast_addresses() {
            let target = SocketAddrV4::new(addr, udp_port);
            if let Err(e) = socket.send_to(&payload, target).await {
                tracing::debug!(target = %target, error = %e, "announcer: send failed");
            }
        }

        tokio::time::sleep(interval).await;
    }
}

/// Bind UDP on the discovery port with address + port reuse enabled and
/// process incoming hellos forever (spec §4.3).
pub async fn run_listener(mesh: MeshHandle) -> anyhow::Result<()> {
    let socket = bind_broadcast_socket(mesh.config.udp_port).map_err(|e| {
        anyhow::anyhow!(
            "failed to bind UDP discovery port {}: {e}",
            mesh.config.udp_port
        )
    })?;
    tracing::info!(port = mesh.config.udp_port, "discovery listener: listening");

    let recv_timeout = Duration::from_secs(mesh.config.udp_recv_timeout_secs);
    let mut buf = [0u8; 2048];
    loop {
        let recv = tokio::time::timeout(recv_timeout, socket.recv_from(&mut buf)).await;
        let (n, from) = match recv {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => {
                tracing::debug!(error = %e, "discovery listener: recv error");
                continue;
            }
            Err(_) => continue, // timeout: loop again so cancellation can be observed
        };

        let sender_ip = match from.ip() {
            std::net::IpAddr::V4(v4) => v4,
            std::net::IpAddr::V6(_) => continue,
        };

        if mesh.local_ips().contains(&sender_ip) {
            continue; // drop hellos from ourselves
        }

        let datagram = &buf[..n];
        if !datagram.starts_with(DISCOVERY_MAGIC) {
            continue;
        }
        let payload = &datagram[DISCOVERY_MAGIC.len()..];
        match serde_json::from_slice::<Hello>(payload) {
            Ok(_hello) => {
                mesh.registry.register(sender_ip);
            }
            Err(e) => {
                tracing::debug!(error = %e, "discovery listener: malformed hello payload");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hello_round_trips_through_json() {
        let hello = Hello {
            device_id: "DEVICE-AAAAAAAA".to_string(),
            tcp_port: 5555,
            flask_port: 5000,
            version: PROTOCOL_VERSION.to_string(),
        };
        let json = serde_json::to_vec(&hello).unwrap();
        let mut datagram = DISCOVERY_MAGIC.to_vec();
        datagram.extend_from_slice(&json);

        assert!(datagram.starts_with(DISCOVERY_MAGIC));
        let parsed: Hello = serde_json::from_slice(&datagram[DISCOVERY_MAGIC.len()..]).unwrap();
        assert_eq!(parsed.device_id, "DEVICE-AAAAAAAA");
    }

    #[tokio::test]
    async fn two_sockets_exchange_hellos_on_loopback() {
        // Bind two discovery sockets on distinct ports and confirm a
        // directly-addressed hello (bypassing broadcast, which loopback
        // interfaces often don't deliver in CI) parses cleanly.
        let a = bind_broadcast_socket(0).unwrap();
        let b = bind_broadcast_socket(0).unwrap();
        let b_addr = b.local_addr().unwrap();

        let hello = Hello {
            device_id: "DEVICE-BBBBBBBB".to_string(),
            tcp_port: 5555,
            flask_port: 5000,
            version: PROTOCOL_VERSION.to_string(),
        };
        let mut payload = DISCOVERY_MAGIC.to_vec();
        payload.extend_from_slice(&serde_json::to_vec(&hello).unwrap());
        a.send_to(&payload, b_addr).await.unwrap();

        let mut buf = [0u8; 2048];
        let (n, _) = tokio::time::timeout(Duration::from_secs(2), b.recv_from(&mut buf))
            .await
            .unwrap()
            .unwrap();
        assert!(buf[..n].starts_with(DISCOVERY_MAGIC));
    }
}
