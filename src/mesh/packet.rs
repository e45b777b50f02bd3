//! Wire shapes for the alert protocol (spec §3, §6) and the tagged frame
//! parser (spec §9 design note c): rather than relying on the accident of
//! `event_id` being absent to recognize a keepalive, frames are parsed into
//! an explicit `Frame` enum up front.

use serde::{Deserialize, Serialize};

pub const DESCRIPTION_MAX: usize = 280;
pub const LOCATION_MAX: usize = 100;

/// An alert packet, as carried over the wire and stored as the origin copy
/// in an event record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Packet {
    pub event_id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: i64,
    pub device_id: String,
    #[serde(default)]
    pub hop_count: u32,
    #[serde(default)]
    pub is_authorized_node: bool,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub location: String,
}

impl Packet {
    pub fn truncate_fields(&mut self) {
        truncate_in_place(&mut self.description, DESCRIPTION_MAX);
        truncate_in_place(&mut self.location, LOCATION_MAX);
    }

    /// A copy ready to hand to the next hop: hop_count incremented, device_id
    /// rewritten to the relaying node (spec §4.7 step 7).
    pub fn relayed_by(&self, relaying_device_id: &str) -> Self {
        let mut next = self.clone();
        next.hop_count += 1;
        next.device_id = relaying_device_id.to_string();
        next
    }
}

fn truncate_in_place(s: &mut String, max_chars: usize) {
    if s.chars().count() > max_chars {
        *s = s.chars().take(max_chars).collect();
    }
}

/// Wire representation of a keepalive ping (spec §6): `event_id` is
/// explicitly null, which the parser below treats as a distinct tagged
/// variant rather than an edge case of `Packet`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeepaliveFrame {
    #[serde(rename = "type")]
    pub kind: String,
    pub device_id: String,
    pub event_id: Option<()>,
    #[serde(default)]
    pub hop_count: u32,
    pub timestamp: i64,
}

impl KeepaliveFrame {
    pub fn new(device_id: &str, timestamp: i64) -> Self {
        Self {
            kind: "KEEPALIVE".to_string(),
            device_id: device_id.to_string(),
            event_id: None,
            hop_count: 0,
            timestamp,
        }
    }
}

/// A parsed wire line, tagged by shape rather than by accident of a missing
/// field.
#[derive(Debug, Clone)]
pub enum Frame {
    Alert(Packet),
    Keepalive { device_id: String },
    Unknown,
}

/// Parse one newline-delimited JSON line into a tagged frame. Any JSON that
/// fails to parse, or that parses but has neither a usable `event_id` nor a
/// `KEEPALIVE` shape, becomes `Frame::Unknown` rather than an error — the
/// transport layer logs and discards it (spec §7).
pub fn parse_frame(line: &str) -> Frame {
    let value: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Frame::Unknown,
    };

    let event_id_is_present_and_non_null = value
        .get("event_id")
        .map(|v| !v.is_null())
        .unwrap_or(false);

    if event_id_is_present_and_non_null {
        return match serde_json::from_value::<Packet>(value) {
            Ok(packet) => Frame::Alert(packet),
            Err(_) => Frame::Unknown,
        };
    }

    if let Some(device_id) = value.get("device_id").and_then(|v| v.as_str()) {
        return Frame::Keepalive {
            device_id: device_id.to_string(),
        };
    }

    Frame::Unknown
}

/// Serialize a packet as one newline-terminated JSON line, ready to write to
/// a TCP stream (spec §4.6).
pub fn encode_line(packet: &Packet) -> String {
    let mut line = serde_json::to_string(packet).expect("Packet serialization cannot fail");
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet() -> Packet {
        Packet {
            event_id: "E1".to_string(),
            kind: "FIRE".to_string(),
            timestamp: 1_700_000_000,
            device_id: "DEVICE-AAAAAAAA".to_string(),
            hop_count: 0,
            is_authorized_node: false,
            description: String::new(),
            location: String::new(),
        }
    }

    #[test]
    fn parses_alert_frame() {
        let packet = sample_packet();
        let line = encode_line(&packet);
        match parse_frame(line.trim_end()) {
            Frame::Alert(p) => assert_eq!(p, packet),
            other => panic!("expected Alert, got {other:?}"),
        }
    }

    #[test]
    fn parses_keepalive_frame_with_null_event_id() {
        let frame = KeepaliveFrame::new("DEVICE-BBBBBBBB", 1_700_000_000);
        let line = serde_json::to_string(&frame).unwrap();
        match parse_frame(&line) {
            Frame::Keepalive { device_id } => assert_eq!(device_id, "DEVICE-BBBBBBBB"),
            _ => panic!("expected Keepalive"),
        }
    }

    #[test]
    fn malformed_json_is_unknown() {
        assert!(matches!(parse_frame("{not json"), Frame::Unknown));
    }

    #[test]
    fn missing_event_id_and_device_id_is_unknown() {
        assert!(matches!(parse_frame("{\"foo\": 1}"), Frame::Unknown));
    }

    #[test]
    fn relayed_by_increments_hop_and_rewrites_device() {
        let packet = sample_packet();
        let next = packet.relayed_by("DEVICE-CCCCCCCC");
        assert_eq!(next.hop_count, 1);
        assert_eq!(next.device_id, "DEVICE-CCCCCCCC");
        assert_eq!(next.event_id, packet.event_id);
    }

    #[test]
    fn truncates_long_fields() {
        let mut packet = sample_packet();
        packet.description = "x".repeat(500);
        packet.location = "y".repeat(200);
        packet.truncate_fields();
        assert_eq!(packet.description.chars().count(), DESCRIPTION_MAX);
        assert_eq!(packet.location.chars().count(), LOCATION_MAX);
    }
}
