//! MeshSentinel node library.
//!
//! An offline-first peer-to-peer community safety alert mesh node: triple-
//! layer peer discovery, flood-and-dedupe gossip with hop-graph recording,
//! and an alert state model with human-verification and trust computation.
//! See `SPEC_FULL.md` for the complete design.

pub mod cluster;
pub mod config;
pub mod device;
pub mod emergency;
pub mod error;
pub mod http;
pub mod mesh;
pub mod net;
