//! Event Core (component E, spec §4.7): dedupe, state transitions, trust
//! calculation, hop-graph recording, relay decisions. This is the heart of
//! the system.

use crate::mesh::packet::Packet;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Trust {
    Low,
    Medium,
    High,
}

impl Trust {
    /// Pure function of (authorized_node, |cross_checks \ {origin}|),
    /// recomputed on any mutation (spec §4.7).
    pub fn compute(authorized_node: bool, independent_cross_checks: usize) -> Trust {
        if authorized_node {
            return Trust::High;
        }
        if independent_cross_checks >= 9 {
            Trust::High
        } else if independent_cross_checks >= 2 {
            Trust::Medium
        } else {
            Trust::Low
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub packet: Packet,
    pub devices_reached: HashSet<String>,
    pub cross_checks: HashSet<String>,
    pub pending_verify: bool,
    pub dismissed: bool,
    pub authorized_node: bool,
    pub trust: Trust,
    pub max_hop: u32,
    pub first_seen: i64,
}

impl EventRecord {
    pub fn independent_cross_checks(&self) -> usize {
        self.cross_checks
            .iter()
            .filter(|d| **d != self.packet.device_id)
            .count()
    }

    fn recompute_trust(&mut self) {
        self.trust = Trust::compute(self.authorized_node, self.independent_cross_checks());
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HopEdge {
    pub from_device: String,
    pub to_device: String,
    pub hop: u32,
    pub timestamp: i64,
    pub from_ip: Option<String>,
    pub to_ip: Option<String>,
}

/// Outcome of `Ingest`, telling the caller whether (and what) to relay.
#[derive(Debug, Clone)]
pub enum IngestOutcome {
    /// Not a valid alert frame (no event_id) - nothing happened.
    NotAnAlert,
    /// Already known; only `devices_reached` was augmented. Never relay.
    Duplicate,
    /// Newly created. If `may_relay`, the caller should build the relay
    /// packet itself via `Packet::relayed_by` and send to `Known()`.
    Fresh,
}

pub enum VerifyOutcome {
    Verified { trust: Trust, cross_checks: usize },
    SelfVerification,
    Unknown,
}

pub enum SimpleOutcome {
    Ok,
    Unknown,
}

/// The in-memory event table, hop log, and the operations that mutate them
/// under a single exclusive critical section (spec §4.7, §5).
pub struct EventCore {
    self_device_id: String,
    events: RwLock<HashMap<String, EventRecord>>,
    hops: RwLock<HashMap<String, Vec<HopEdge>>>,
}

impl EventCore {
    pub fn new(self_device_id: String) -> Self {
        Self {
            self_device_id,
            events: RwLock::new(HashMap::new()),
            hops: RwLock::new(HashMap::new()),
        }
    }

    pub fn self_device_id(&self) -> &str {
        &self.self_device_id
    }

    /// `Ingest(packet, received_from_ip, may_relay)` (spec §4.7). The
    /// `sender_device_id` is the *current* `device_id` on the packet before
    /// any rewrite - i.e. the last hop's identifier.
    pub fn ingest(
        &self,
        packet: &Packet,
        received_from_ip: Option<&str>,
    ) -> IngestOutcome {
        if packet.event_id.is_empty() {
            return IngestOutcome::NotAnAlert;
        }

        let from_peer = received_from_ip.is_some();
        let sender_device_id = packet.device_id.clone();

        if from_peer {
            self.record_inbound_hop(packet, received_from_ip);
        }

        let mut events = self.events.write().expect("event table lock poisoned");
        if let Some(existing) = events.get_mut(&packet.event_id) {
            existing.devices_reached.insert(sender_device_id);
            return IngestOutcome::Duplicate;
        }

        let mut devices_reached = HashSet::new();
        devices_reached.insert(self.self_device_id.clone());
        if from_peer {
            devices_reached.insert(sender_device_id);
        }

        let mut record = EventRecord {
            packet: packet.clone(),
            devices_reached,
            cross_checks: HashSet::new(),
            pending_verify: from_peer,
            dismissed: false,
            authorized_node: packet.is_authorized_node,
            trust: Trust::Low,
            max_hop: packet.hop_count,
            first_seen: now_secs(),
        };
        record.recompute_trust();
        events.insert(packet.event_id.clone(), record);
        tracing::info!(event_id = %packet.event_id, kind = %packet.kind, "new event");
        IngestOutcome::Fresh
    }

    /// Record a hop edge scoped to one event. Edges are deduplicated by
    /// `(from_device, to_device)`; a later timestamp for the same pair is
    /// discarded (spec §3, testable property 5).
    fn record_hop_for(
        &self,
        event_id: &str,
        from_device: &str,
        to_device: &str,
        hop: u32,
        from_ip: Option<&str>,
        to_ip: Option<&str>,
    ) {
        let mut hops = self.hops.write().expect("hop log lock poisoned");
        let edges = hops.entry(event_id.to_string()).or_default();
        if edges
            .iter()
            .any(|e| e.from_device == from_device && e.to_device == to_device)
        {
            return;
        }
        edges.push(HopEdge {
            from_device: from_device.to_string(),
            to_device: to_device.to_string(),
            hop,
            timestamp: now_secs(),
            from_ip: from_ip.map(str::to_string),
            to_ip: to_ip.map(str::to_string),
        });
    }

    /// Record the relay edges from self to every target IP, labeled
    /// `PEER@<ip>` per spec §4.7 step 7, event-scoped.
    pub fn record_relay_edges(&self, event_id: &str, hop: u32, target_ips: &[String]) {
        for ip in target_ips {
            let to_device = format!("PEER@{ip}");
            self.record_hop_for(event_id, &self.self_device_id, &to_device, hop, None, Some(ip));
        }
    }

    /// Record the inbound hop edge for a freshly ingested packet, scoped to
    /// its event_id. Must be called before `ingest` only when the event is
    /// genuinely new or duplicate - called unconditionally is fine since
    /// dedup is per-(from,to) regardless of event freshness.
    pub fn record_inbound_hop(&self, packet: &Packet, from_ip: Option<&str>) {
        self.record_hop_for(
            &packet.event_id,
            &packet.device_id,
            &self.self_device_id,
            packet.hop_count,
            from_ip,
            None,
        );
    }

    pub fn get(&self, event_id: &str) -> Option<EventRecord> {
        self.events
            .read()
            .expect("event table lock poisoned")
            .get(event_id)
            .cloned()
    }

    pub fn all(&self) -> Vec<(String, EventRecord)> {
        let mut out: Vec<_> = self
            .events
            .read()
            .expect("event table lock poisoned")
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| b.1.first_seen.cmp(&a.1.first_seen));
        out
    }

    pub fn pending_verifications(&self) -> Vec<(String, EventRecord)> {
        let mut out: Vec<_> = self
            .events
            .read()
            .expect("event table lock poisoned")
            .iter()
            .filter(|(_, v)| v.pending_verify && !v.dismissed)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        out.sort_by(|a, b| a.1.first_seen.cmp(&b.1.first_seen));
        out
    }

    /// Human confirmation (spec §4.7 verification lifecycle). Refuses to
    /// verify an event this device originated.
    pub fn verify(&self, event_id: &str) -> VerifyOutcome {
        let mut events = self.events.write().expect("event table lock poisoned");
        let Some(record) = events.get_mut(event_id) else {
            return VerifyOutcome::Unknown;
        };
        if record.packet.device_id == self.self_device_id {
            return VerifyOutcome::SelfVerification;
        }
        record.cross_checks.insert(self.self_device_id.clone());
        record.pending_verify = false;
        record.dismissed = false;
        record.recompute_trust();
        VerifyOutcome::Verified {
            trust: record.trust,
            cross_checks: record.independent_cross_checks(),
        }
    }

    /// Peer push of `{verified_by, trust}` (spec §6 /sync).
    pub fn sync_from_peer(&self, event_id: &str, verified_by: &str) -> SimpleOutcome {
        let mut events = self.events.write().expect("event table lock poisoned");
        let Some(record) = events.get_mut(event_id) else {
            return SimpleOutcome::Unknown;
        };
        record.cross_checks.insert(verified_by.to_string());
        record.recompute_trust();
        SimpleOutcome::Ok
    }

    pub fn dismiss(&self, event_id: &str) -> SimpleOutcome {
        let mut events = self.events.write().expect("event table lock poisoned");
        let Some(record) = events.get_mut(event_id) else {
            return SimpleOutcome::Unknown;
        };
        record.pending_verify = false;
        record.dismissed = true;
        SimpleOutcome::Ok
    }

    pub fn authorize(&self, event_id: &str) -> SimpleOutcome {
        let mut events = self.events.write().expect("event table lock poisoned");
        let Some(record) = events.get_mut(event_id) else {
            return SimpleOutcome::Unknown;
        };
        record.authorized_node = true;
        record.pending_verify = false;
        record.trust = Trust::High;
        SimpleOutcome::Ok
    }

    /// Clear both the event table and hop log (spec §6 DELETE /api/events).
    pub fn clear_all(&self) {
        self.events.write().expect("event table lock poisoned").clear();
        self.hops.write().expect("hop log lock poisoned").clear();
    }

    pub fn hop_edges(&self, event_id: Option<&str>) -> Vec<(String, HopEdge)> {
        let hops = self.hops.read().expect("hop log lock poisoned");
        match event_id {
            Some(id) => hops
                .get(id)
                .into_iter()
                .flatten()
                .map(|e| (id.to_string(), e.clone()))
                .collect(),
            None => hops
                .iter()
                .flat_map(|(id, edges)| edges.iter().map(move |e| (id.clone(), e.clone())))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(event_id: &str, device_id: &str) -> Packet {
        Packet {
            event_id: event_id.to_string(),
            kind: "FIRE".to_string(),
            timestamp: 1_700_000_000,
            device_id: device_id.to_string(),
            hop_count: 0,
            is_authorized_node: false,
            description: String::new(),
            location: String::new(),
        }
    }

    #[test]
    fn trust_thresholds_match_spec() {
        assert_eq!(Trust::compute(false, 0), Trust::Low);
        assert_eq!(Trust::compute(false, 1), Trust::Low);
        assert_eq!(Trust::compute(false, 2), Trust::Medium);
        assert_eq!(Trust::compute(false, 8), Trust::Medium);
        assert_eq!(Trust::compute(false, 9), Trust::High);
        assert_eq!(Trust::compute(true, 0), Trust::High);
    }

    #[test]
    fn fresh_event_then_duplicate_only_augments_reached() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        let p = packet("E1", "DEVICE-A0000001");
        assert!(matches!(core.ingest(&p, None), IngestOutcome::Fresh));
        assert!(matches!(core.ingest(&p, Some("10.0.0.2")), IngestOutcome::Duplicate));
        let record = core.get("E1").unwrap();
        assert!(record.devices_reached.contains("DEVICE-A0000001"));
    }

    #[test]
    fn originating_node_cannot_verify_own_event() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        let mut p = packet("E2", "DEVICE-SELF0000");
        p.device_id = "DEVICE-SELF0000".to_string();
        core.ingest(&p, None);
        assert!(matches!(core.verify("E2"), VerifyOutcome::SelfVerification));
    }

    #[test]
    fn trust_excludes_origin_from_cross_checks() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        let p = packet("E3", "DEVICE-ORIGIN01");
        core.ingest(&p, None);
        core.sync_from_peer("E3", "DEVICE-ORIGIN01");
        let record = core.get("E3").unwrap();
        assert_eq!(record.trust, Trust::Low);
    }

    #[test]
    fn authorize_forces_high_and_clears_pending() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        let p = packet("E4", "DEVICE-ORIGIN01");
        core.ingest(&p, Some("10.0.0.2"));
        assert!(matches!(core.authorize("E4"), SimpleOutcome::Ok));
        let record = core.get("E4").unwrap();
        assert_eq!(record.trust, Trust::High);
        assert!(!record.pending_verify);
        assert!(record.authorized_node);
    }

    #[test]
    fn hop_edges_dedupe_by_from_to_pair() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        core.record_relay_edges("E5", 1, &["10.0.0.2".to_string()]);
        core.record_relay_edges("E5", 1, &["10.0.0.2".to_string()]);
        let edges = core.hop_edges(Some("E5"));
        assert_eq!(edges.len(), 1);
    }

    #[test]
    fn unknown_event_verify_returns_unknown() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        assert!(matches!(core.verify("NOPE"), VerifyOutcome::Unknown));
        assert!(matches!(core.dismiss("NOPE"), SimpleOutcome::Unknown));
        assert!(matches!(core.authorize("NOPE"), SimpleOutcome::Unknown));
    }

    #[test]
    fn dismiss_is_idempotent() {
        let core = EventCore::new("DEVICE-SELF0000".to_string());
        let p = packet("E6", "DEVICE-ORIGIN01");
        core.ingest(&p, Some("10.0.0.2"));
        core.dismiss("E6");
        core.dismiss("E6");
        let record = core.get("E6").unwrap();
        assert!(record.dismissed);
    }
}
