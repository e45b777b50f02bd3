//! Reaper (component R, spec §4.5): evicts Link Registry entries older
//! than the liveness TTL, every `PEER_TIMEOUT / 2` seconds.

use super::MeshHandle;
use std::time::Duration;

pub async fn run_reaper(mesh: MeshHandle) {
    let interval = Duration::from_secs(mesh.config.peer_timeout_secs / 2);
    loop {
        mesh.registry.expire();
        tokio::time::sleep(interval).await;
    }
}
