//! Transport (component T, spec §4.6): inbound TCP accept loop and
//! outbound relay. Also hosts `ingest_and_relay`, the shared entry point
//! used by the inbound loop, the keepalive-induced TCP contact, and the
//! `/api/broadcast` HTTP handler, so "receive a packet" always goes through
//! one path regardless of where it came from.

use super::event::IngestOutcome;
use super::packet::{encode_line, parse_frame, Frame, Packet};
use super::MeshHandle;
use std::net::Ipv4Addr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Ingest `packet` (as if received from `received_from_ip`, or none if
/// locally originated) and, if it was fresh and `may_relay`, fan it out to
/// every currently known peer (spec §4.7 step 7).
pub async fn ingest_and_relay(mesh: &MeshHandle, packet: Packet, received_from_ip: Option<String>, may_relay: bool) {
    let outcome = mesh
        .events
        .ingest(&packet, received_from_ip.as_deref());

    if !matches!(outcome, IngestOutcome::Fresh) || !may_relay {
        return;
    }

    let relayed = packet.relayed_by(&mesh.self_device_id);
    let targets = mesh.known_peers();
    if targets.is_empty() {
        return;
    }

    let target_strs: Vec<String> = targets.iter().map(|ip| ip.to_string()).collect();
    mesh.events
        .record_relay_edges(&packet.event_id, relayed.hop_count, &target_strs);

    let tcp_port = mesh.config.tcp_port;
    let relay_timeout = Duration::from_secs(mesh.config.relay_timeout_secs);
    for ip in targets {
        let relayed = relayed.clone();
        tokio::spawn(async move {
            if let Err(e) = send_to(ip, tcp_port, &relayed, relay_timeout).await {
                tracing::debug!(peer = %ip, error = %e, "relay send failed");
            }
        });
    }
}

/// Open a short-lived TCP connection, send one JSON line, close (spec
/// §4.6 outbound relay / keepalive).
pub async fn send_to(
    ip: Ipv4Addr,
    port: u16,
    packet: &Packet,
    timeout: Duration,
) -> std::io::Result<()> {
    let addr = (ip, port);
    let mut stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;
    let line = encode_line(packet);
    tokio::time::timeout(timeout, stream.write_all(line.as_bytes()))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))??;
    Ok(())
}

/// Bind TCP on the service port and accept connections forever, spawning
/// one task per connection (spec §4.6 inbound server).
pub async fn run_inbound_server(mesh: MeshHandle) -> anyhow::Result<()> {
    let addr = ("0.0.0.0", mesh.config.tcp_port);
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("failed to bind TCP service port {}: {e}", mesh.config.tcp_port)
    })?;
    tracing::info!(port = mesh.config.tcp_port, "transport: listening");

    loop {
        match listener.accept().await {
            Ok((stream, remote)) => {
                let mesh = mesh.clone();
                let remote_ip = match remote.ip() {
                    std::net::IpAddr::V4(v4) => v4,
                    std::net::IpAddr::V6(_) => continue,
                };
                mesh.registry.register(remote_ip);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(mesh, stream, remote_ip).await {
                        tracing::debug!(peer = %remote_ip, error = %e, "connection error");
                    }
                });
            }
            Err(e) => {
                tracing::debug!(error = %e, "accept failed");
            }
        }
    }
}

async fn handle_connection(
    mesh: MeshHandle,
    mut stream: TcpStream,
    remote_ip: Ipv4Addr,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break; // zero-length read: peer closed the connection
        }
        buf.extend_from_slice(&chunk[..n]);

        while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match parse_frame(line) {
                Frame::Alert(packet) => {
                    ingest_and_relay(&mesh, packet, Some(remote_ip.to_string()), true).await;
                }
                Frame::Keepalive { .. } => {
                    // event_id is null; Event Core's contract is to drop it.
                    // The value was the TCP contact itself, already
                    // registered above.
                }
                Frame::Unknown => {
                    tracing::warn!(peer = %remote_ip, line = %line, "malformed frame, dropping");
                }
            }
        }
    }
    Ok(())
}
