//! The mesh protocol: peer discovery (Announcer + Discovery Listener +
//! Keepalive + Subnet Scanner + Reaper), the flood-and-dedupe gossip
//! transport, and the event core that ties them together.
//!
//! # Components
//!
//! - **Link Registry** (`registry`): tracks known peers with liveness TTL.
//! - **Announcer** / **Discovery Listener** (`discovery`): link-local UDP
//!   hello exchange.
//! - **Keepalive / Subnet Scanner** (`keepalive`): secondary peer-discovery
//!   paths for networks that block UDP broadcast.
//! - **Reaper** (`reaper`): evicts stale Link Registry entries.
//! - **Transport** (`transport`): inbound TCP accept loop and outbound
//!   relay.
//! - **Event Core** (`event`): dedupe, trust, hop-graph recording.

pub mod config;
pub mod discovery;
pub mod event;
pub mod keepalive;
pub mod packet;
pub mod reaper;
pub mod registry;
pub mod transport;

use self::config::MeshConfig;
use self::event::EventCore;
use self::registry::LinkRegistry;
use std::net::Ipv4Addr;
use std::sync::Arc;

/// Shared handle passed to every mesh task and to the HTTP surface. Cloning
/// is cheap (it's all `Arc`s); each field is independently locked per spec
/// §5's disjoint-region concurrency model.
#[derive(Clone)]
pub struct MeshHandle {
    pub self_device_id: Arc<str>,
    pub config: Arc<MeshConfig>,
    pub registry: Arc<LinkRegistry>,
    pub events: Arc<EventCore>,
}

impl MeshHandle {
    pub fn new(self_device_id: String, config: MeshConfig) -> Self {
        let registry = Arc::new(LinkRegistry::new(config.peer_timeout()));
        let events = Arc::new(EventCore::new(self_device_id.clone()));
        Self {
            self_device_id: Arc::from(self_device_id),
            config: Arc::new(config),
            registry,
            events,
        }
    }

    pub fn local_ips(&self) -> Vec<Ipv4Addr> {
        crate::net::local_ipv4s()
    }

    /// The alive-union relay target set, minus local IPs (spec §4.1).
    pub fn known_peers(&self) -> Vec<Ipv4Addr> {
        self.registry.known(&self.local_ips())
    }
}
