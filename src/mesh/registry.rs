//! Link Registry (component L, spec §4.1): the node's authoritative view of
//! currently reachable peers. Guarded by its own lock, independent of the
//! event table and hop log locks (spec §5) — no task ever holds this lock
//! across an I/O call or while holding another region's lock.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::RwLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs()
}

struct Inner {
    last_seen: HashMap<Ipv4Addr, u64>,
    manual: Vec<Ipv4Addr>,
}

pub struct LinkRegistry {
    inner: RwLock<Inner>,
    peer_timeout: Duration,
}

impl LinkRegistry {
    pub fn new(peer_timeout: Duration) -> Self {
        Self {
            inner: RwLock::new(Inner {
                last_seen: HashMap::new(),
                manual: Vec::new(),
            }),
            peer_timeout,
        }
    }

    /// Record contact with `ip` at the current time. Logs a one-time
    /// "discovered" message on first observation.
    pub fn register(&self, ip: Ipv4Addr) {
        let mut inner = self.inner.write().expect("link registry lock poisoned");
        let first_time = !inner.last_seen.contains_key(&ip);
        inner.last_seen.insert(ip, now_secs());
        if first_time {
            tracing::info!(peer = %ip, "discovered");
        }
    }

    /// Add a manually configured peer. Idempotent; also seeds `last_seen`.
    pub fn add_manual(&self, ip: Ipv4Addr) {
        let mut inner = self.inner.write().expect("link registry lock poisoned");
        if !inner.manual.contains(&ip) {
            inner.manual.push(ip);
        }
        inner.last_seen.insert(ip, now_secs());
    }

    /// Remove a manually configured peer. Idempotent.
    pub fn remove_manual(&self, ip: Ipv4Addr) {
        let mut inner = self.inner.write().expect("link registry lock poisoned");
        inner.manual.retain(|&p| p != ip);
    }

    /// Whether `ip` is known at all, auto-discovered or manual, regardless of
    /// liveness timeout.
    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        let inner = self.inner.read().expect("link registry lock poisoned");
        inner.last_seen.contains_key(&ip) || inner.manual.contains(&ip)
    }

    /// The alive union of auto-discovered and manual peers, minus `local_ips`
    /// (spec §4.1, invariant 4 / testable property 7).
    pub fn known(&self, local_ips: &[Ipv4Addr]) -> Vec<Ipv4Addr> {
        let inner = self.inner.read().expect("link registry lock poisoned");
        let now = now_secs();
        let timeout = self.peer_timeout.as_secs();

        let mut result: Vec<Ipv4Addr> = inner
            .last_seen
            .iter()
            .filter(|(_, &seen)| now.saturating_sub(seen) < timeout)
            .map(|(&ip, _)| ip)
            .chain(inner.manual.iter().copied())
            .filter(|ip| !local_ips.contains(ip))
            .collect();
        result.sort();
        result.dedup();
        result
    }

    /// Evict entries whose `last_seen` is older than the peer timeout.
    /// Manual peers are never evicted by age (spec §4.1: "treated as always
    /// alive"), only by explicit `remove_manual`.
    pub fn expire(&self) {
        let mut inner = self.inner.write().expect("link registry lock poisoned");
        let now = now_secs();
        let timeout = self.peer_timeout.as_secs();
        let manual: std::collections::HashSet<Ipv4Addr> = inner.manual.iter().copied().collect();
        let expired: Vec<Ipv4Addr> = inner
            .last_seen
            .iter()
            .filter(|(ip, &seen)| !manual.contains(ip) && now.saturating_sub(seen) >= timeout)
            .map(|(&ip, _)| ip)
            .collect();
        for ip in &expired {
            inner.last_seen.remove(ip);
            tracing::info!(peer = %ip, "evicted (liveness TTL expired)");
        }
    }

    /// Snapshot for the HTTP surface: discovered (auto) peers with their
    /// last-seen age, and manually added peers.
    pub fn snapshot(&self) -> (Vec<(Ipv4Addr, u64)>, Vec<Ipv4Addr>) {
        let inner = self.inner.read().expect("link registry lock poisoned");
        let now = now_secs();
        let manual: std::collections::HashSet<Ipv4Addr> = inner.manual.iter().copied().collect();
        let discovered = inner
            .last_seen
            .iter()
            .filter(|(ip, _)| !manual.contains(ip))
            .map(|(&ip, &seen)| (ip, now.saturating_sub(seen)))
            .collect();
        (discovered, inner.manual.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_then_known_excludes_local_ips() {
        let reg = LinkRegistry::new(Duration::from_secs(30));
        let peer = Ipv4Addr::new(10, 0, 0, 2);
        let me = Ipv4Addr::new(10, 0, 0, 1);
        reg.register(peer);
        reg.register(me);
        let known = reg.known(&[me]);
        assert_eq!(known, vec![peer]);
    }

    #[test]
    fn manual_peers_survive_timeout() {
        let reg = LinkRegistry::new(Duration::from_secs(0));
        let peer = Ipv4Addr::new(10, 0, 0, 5);
        reg.add_manual(peer);
        // last_seen is "now", but peer_timeout=0 means everything ages out
        // immediately for auto peers; manual peers are still returned.
        let known = reg.known(&[]);
        assert!(known.contains(&peer));
    }

    #[test]
    fn remove_manual_is_idempotent() {
        let reg = LinkRegistry::new(Duration::from_secs(30));
        let peer = Ipv4Addr::new(10, 0, 0, 9);
        reg.add_manual(peer);
        reg.remove_manual(peer);
        reg.remove_manual(peer);
        let known = reg.known(&[]);
        assert!(!known.contains(&peer));
    }

    #[test]
    fn expire_evicts_stale_auto_peers_but_not_manual() {
        let reg = LinkRegistry::new(Duration::from_secs(0));
        let auto_peer = Ipv4Addr::new(10, 0, 0, 2);
        let manual_peer = Ipv4Addr::new(10, 0, 0, 3);
        reg.register(auto_peer);
        reg.add_manual(manual_peer);
        std::thread::sleep(Duration::from_millis(10));
        reg.expire();
        let known = reg.known(&[]);
        assert!(!known.contains(&auto_peer));
        assert!(known.contains(&manual_peer));
    }
}
