//! Request/response shapes for the HTTP surface (spec §6, §12).

use crate::mesh::event::{EventRecord, Trust};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize)]
pub struct EventView {
    pub event_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    pub device_id: String,
    pub hop_count: u32,
    pub devices_reached_count: usize,
    pub devices_reached: Vec<String>,
    pub cross_checks: Vec<String>,
    pub pending_verify: bool,
    pub dismissed: bool,
    pub trust: Trust,
    pub authorized_node: bool,
    pub first_seen: i64,
    pub description: String,
    pub location: String,
}

impl EventView {
    pub fn from_record(event_id: &str, record: &EventRecord) -> Self {
        Self {
            event_id: event_id.to_string(),
            kind: record.packet.kind.clone(),
            timestamp: record.packet.timestamp,
            device_id: record.packet.device_id.clone(),
            hop_count: record.max_hop,
            devices_reached_count: record.devices_reached.len(),
            devices_reached: record.devices_reached.iter().cloned().collect(),
            cross_checks: record.cross_checks.iter().cloned().collect(),
            pending_verify: record.pending_verify,
            dismissed: record.dismissed,
            trust: record.trust,
            authorized_node: record.authorized_node,
            first_seen: record.first_seen,
            description: record.packet.description.clone(),
            location: record.packet.location.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub event_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub device_id: Option<String>,
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub is_authorized_node: bool,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub verified_by: String,
    #[allow(dead_code)]
    pub trust: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AddPeerRequest {
    pub ip: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PeersResponse {
    pub active_connections: usize,
    pub known_peers: usize,
    pub discovered_peers: Vec<DiscoveredPeer>,
    pub manual_peers: Vec<ManualPeer>,
    pub device_id: String,
    pub my_ips: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct DiscoveredPeer {
    pub ip: String,
    pub last_seen_ago: u64,
    pub source: &'static str,
}

#[derive(Debug, Serialize)]
pub struct ManualPeer {
    pub ip: String,
    pub source: &'static str,
}

#[derive(Debug, Serialize)]
pub struct DeviceResponse {
    pub device_id: String,
    pub my_ips: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct HopsResponse {
    pub nodes: Vec<String>,
    pub edges: Vec<HopEdgeView>,
    pub events: std::collections::BTreeMap<String, HopEventMeta>,
    pub self_id: String,
}

/// Per-event metadata attached to `/api/hops`, mirroring
/// `original_source/server.py`'s `get_hops` (`events_meta[eid] = {...}`).
#[derive(Debug, Serialize)]
pub struct HopEventMeta {
    #[serde(rename = "type")]
    pub kind: String,
    pub trust: Trust,
    pub confirmed_by_count: usize,
}

#[derive(Debug, Serialize)]
pub struct HopEdgeView {
    pub event_id: String,
    pub from_device: String,
    pub to_device: String,
    pub hop: u32,
    pub timestamp: i64,
}

fn clean_label(raw: &str) -> String {
    raw.trim_start_matches("PEER@")
        .trim_start_matches("DEVICE-")
        .to_string()
}

impl HopsResponse {
    /// `events_table` is consulted to populate each referenced event_id's
    /// `{type, trust, confirmed_by_count}` (spec §6; `original_source/
    /// server.py`'s `get_hops`). An event_id that shows up in the hop log but
    /// has since been cleared from the event table is simply omitted.
    pub fn build(
        self_id: &str,
        edges: Vec<(String, crate::mesh::event::HopEdge)>,
        events_table: &[(String, EventRecord)],
    ) -> Self {
        let mut nodes = std::collections::BTreeSet::new();
        let mut event_ids = std::collections::BTreeSet::new();
        nodes.insert(clean_label(self_id));

        let views = edges
            .into_iter()
            .map(|(event_id, edge)| {
                nodes.insert(clean_label(&edge.from_device));
                nodes.insert(clean_label(&edge.to_device));
                event_ids.insert(event_id.clone());
                HopEdgeView {
                    event_id,
                    from_device: clean_label(&edge.from_device),
                    to_device: clean_label(&edge.to_device),
                    hop: edge.hop,
                    timestamp: edge.timestamp,
                }
            })
            .collect();

        let events = event_ids
            .into_iter()
            .filter_map(|event_id| {
                let record = events_table.iter().find(|(id, _)| *id == event_id)?.1.clone();
                Some((
                    event_id,
                    HopEventMeta {
                        kind: record.packet.kind.clone(),
                        trust: record.trust,
                        confirmed_by_count: record.independent_cross_checks(),
                    },
                ))
            })
            .collect();

        Self {
            nodes: nodes.into_iter().collect(),
            edges: views,
            events,
            self_id: clean_label(self_id),
        }
    }
}
