//! HTTP Surface (component H, spec §6, §12): read/write endpoints
//! consumed by the dashboard. Permissive CORS is applied once at the
//! router level so no handler has to think about it.

pub mod dto;

use crate::cluster;
use crate::emergency;
use crate::error::NodeError;
use crate::mesh::event::{SimpleOutcome, VerifyOutcome};
use crate::mesh::packet::Packet;
use crate::mesh::transport;
use crate::mesh::MeshHandle;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use dto::*;
use serde::Deserialize;
use serde_json::json;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tower_http::cors::CorsLayer;

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Shared state handed to every handler. Cloning is cheap - it's all
/// `Arc`s, mirroring `MeshHandle`.
#[derive(Clone)]
pub struct AppState {
    pub mesh: MeshHandle,
    pub cluster: Arc<cluster::Client>,
    pub sync_client: reqwest::Client,
    pub http_port: u16,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/events", get(list_events).delete(clear_events))
        .route("/api/pending-verifications", get(pending_verifications))
        .route("/api/broadcast", post(broadcast))
        .route("/api/events/{id}/verify", post(verify_event))
        .route("/api/events/{id}/sync", post(sync_event))
        .route("/api/events/{id}/dismiss", post(dismiss_event))
        .route("/api/events/{id}/authorize", post(authorize_event))
        .route("/api/peers", get(list_peers).post(add_peer))
        .route("/api/peers/{ip}", delete(remove_peer))
        .route("/api/device", get(device_info))
        .route("/api/hops", get(hops))
        .route("/api/scan", post(trigger_scan))
        .route("/api/emergency-contacts", get(emergency_contacts))
        .route("/api/cluster", post(cluster_events))
        .route("/api/cluster/status", get(cluster_status))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ---------------------------------------------------------------- events --

async fn list_events(State(state): State<AppState>) -> Json<Vec<EventView>> {
    let events = state.mesh.events.all();
    Json(
        events
            .iter()
            .map(|(id, record)| EventView::from_record(id, record))
            .collect(),
    )
}

async fn pending_verifications(State(state): State<AppState>) -> Json<Vec<EventView>> {
    let events = state.mesh.events.pending_verifications();
    Json(
        events
            .iter()
            .map(|(id, record)| EventView::from_record(id, record))
            .collect(),
    )
}

async fn clear_events(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.mesh.events.clear_all();
    Json(json!({ "status": "ok" }))
}

async fn broadcast(
    State(state): State<AppState>,
    Json(req): Json<BroadcastRequest>,
) -> Result<Json<serde_json::Value>, NodeError> {
    let event_id = req.event_id.ok_or(NodeError::MissingField("event_id"))?;
    let kind = req.kind.ok_or(NodeError::MissingField("type"))?;
    let device_id = req.device_id.ok_or(NodeError::MissingField("device_id"))?;

    let mut packet = Packet {
        event_id: event_id.clone(),
        kind,
        timestamp: req.timestamp.unwrap_or_else(now_secs),
        device_id,
        hop_count: 0,
        is_authorized_node: req.is_authorized_node,
        description: req.description,
        location: req.location,
    };
    packet.truncate_fields();

    transport::ingest_and_relay(&state.mesh, packet, None, true).await;
    Ok(Json(json!({ "status": "ok", "event_id": event_id })))
}

async fn verify_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, NodeError> {
    match state.mesh.events.verify(&id) {
        VerifyOutcome::SelfVerification => Err(NodeError::SelfVerification),
        VerifyOutcome::Unknown => Err(NodeError::UnknownEvent(id)),
        VerifyOutcome::Verified { trust, cross_checks } => {
            rebroadcast_on_verify(&state, &id).await;
            push_sync(&state, &id, trust, cross_checks);
            Ok(Json(json!({
                "status": "ok",
                "trust": trust,
                "cross_checks": cross_checks,
            })))
        }
    }
}

/// Verification lifecycle side effect: re-broadcast the original packet
/// with an incremented hop count and rewritten device_id (spec §4.7). Peers
/// see this as a duplicate via the event-table dedupe, so it never loops;
/// the `/sync` push (below) is what actually carries the updated trust.
async fn rebroadcast_on_verify(state: &AppState, event_id: &str) {
    let Some(record) = state.mesh.events.get(event_id) else {
        return;
    };
    let relayed = record.packet.relayed_by(&state.mesh.self_device_id);
    let targets = state.mesh.known_peers();
    let tcp_port = state.mesh.config.tcp_port;
    let timeout = std::time::Duration::from_secs(state.mesh.config.relay_timeout_secs);
    for ip in targets {
        let relayed = relayed.clone();
        tokio::spawn(async move {
            if let Err(e) = transport::send_to(ip, tcp_port, &relayed, timeout).await {
                tracing::debug!(peer = %ip, error = %e, "verify rebroadcast failed");
            }
        });
    }
}

/// Asynchronously POST `{verified_by, trust, cross_checks}` to every known
/// peer's `/sync` endpoint so dashboards converge promptly (spec §4.7).
/// Per-peer failures are logged at debug and never surfaced to the caller.
fn push_sync(state: &AppState, event_id: &str, trust: crate::mesh::event::Trust, cross_checks: usize) {
    let client = state.sync_client.clone();
    let self_device_id = state.mesh.self_device_id.to_string();
    let targets = state.mesh.known_peers();
    let http_port = state.http_port;
    let event_id = event_id.to_string();
    tokio::spawn(async move {
        let body = json!({
            "verified_by": self_device_id,
            "trust": trust,
            "cross_checks": cross_checks,
        });
        for ip in targets {
            let url = format!("http://{ip}:{http_port}/api/events/{event_id}/sync");
            if let Err(e) = client.post(&url).json(&body).send().await {
                tracing::debug!(peer = %ip, error = %e, "sync push failed");
            }
        }
    });
}

async fn sync_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SyncRequest>,
) -> Result<Json<serde_json::Value>, NodeError> {
    match state.mesh.events.sync_from_peer(&id, &req.verified_by) {
        SimpleOutcome::Ok => Ok(Json(json!({ "status": "ok" }))),
        SimpleOutcome::Unknown => Err(NodeError::UnknownEvent(id)),
    }
}

async fn dismiss_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, NodeError> {
    match state.mesh.events.dismiss(&id) {
        SimpleOutcome::Ok => Ok(Json(json!({ "status": "ok", "dismissed": true }))),
        SimpleOutcome::Unknown => Err(NodeError::UnknownEvent(id)),
    }
}

async fn authorize_event(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, NodeError> {
    match state.mesh.events.authorize(&id) {
        SimpleOutcome::Ok => Ok(Json(json!({ "status": "ok", "trust": "HIGH" }))),
        SimpleOutcome::Unknown => Err(NodeError::UnknownEvent(id)),
    }
}

// ----------------------------------------------------------------- peers --

async fn list_peers(State(state): State<AppState>) -> Json<PeersResponse> {
    let (discovered, manual) = state.mesh.registry.snapshot();
    let local_ips = state.mesh.local_ips();
    let known = state.mesh.registry.known(&local_ips);
    Json(PeersResponse {
        active_connections: known.len(),
        known_peers: known.len(),
        discovered_peers: discovered
            .into_iter()
            .map(|(ip, age)| DiscoveredPeer {
                ip: ip.to_string(),
                last_seen_ago: age,
                source: "auto",
            })
            .collect(),
        manual_peers: manual
            .into_iter()
            .map(|ip| ManualPeer {
                ip: ip.to_string(),
                source: "manual",
            })
            .collect(),
        device_id: state.mesh.self_device_id.to_string(),
        my_ips: local_ips.iter().map(Ipv4Addr::to_string).collect(),
    })
}

async fn add_peer(
    State(state): State<AppState>,
    Json(req): Json<AddPeerRequest>,
) -> Result<Json<serde_json::Value>, NodeError> {
    let ip = req
        .ip
        .filter(|s| !s.trim().is_empty())
        .ok_or(NodeError::MissingField("ip"))?;
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| NodeError::BadRequest(format!("not an IPv4 address: {ip}")))?;
    state.mesh.registry.add_manual(ip);
    let known = state.mesh.registry.known(&state.mesh.local_ips());
    Ok(Json(json!({ "status": "ok", "known_peers": known.len() })))
}

async fn remove_peer(
    State(state): State<AppState>,
    Path(ip): Path<String>,
) -> Result<Json<serde_json::Value>, NodeError> {
    let ip: Ipv4Addr = ip
        .parse()
        .map_err(|_| NodeError::BadRequest(format!("not an IPv4 address: {ip}")))?;
    if !state.mesh.registry.contains(ip) {
        return Err(NodeError::UnknownPeer(ip.to_string()));
    }
    state.mesh.registry.remove_manual(ip);
    let known = state.mesh.registry.known(&state.mesh.local_ips());
    Ok(Json(json!({ "status": "ok", "known_peers": known.len() })))
}

async fn device_info(State(state): State<AppState>) -> Json<DeviceResponse> {
    Json(DeviceResponse {
        device_id: state.mesh.self_device_id.to_string(),
        my_ips: state.mesh.local_ips().iter().map(Ipv4Addr::to_string).collect(),
    })
}

#[derive(Debug, Deserialize)]
struct HopsQuery {
    #[serde(default)]
    event_id: Option<String>,
}

async fn hops(State(state): State<AppState>, Query(q): Query<HopsQuery>) -> Json<HopsResponse> {
    let edges = state.mesh.events.hop_edges(q.event_id.as_deref());
    let events_table = state.mesh.events.all();
    Json(HopsResponse::build(&state.mesh.self_device_id, edges, &events_table))
}

async fn trigger_scan(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let mesh = state.mesh.clone();
    tokio::spawn(async move {
        crate::mesh::keepalive::scan_once(&mesh).await;
    });
    (StatusCode::ACCEPTED, Json(json!({ "status": "scanning" })))
}

async fn emergency_contacts() -> Json<Vec<emergency::EmergencyContact>> {
    Json(emergency::contacts())
}

async fn cluster_events(State(state): State<AppState>) -> Json<cluster::ClusterResponse> {
    let events = state.mesh.events.all();
    Json(state.cluster.cluster(&events).await)
}

async fn cluster_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let available = state.cluster.health().await;
    let age = state.cluster.cache_age_secs();
    Json(json!({
        "ollama_available": available,
        "cached": age.is_some(),
        "cache_age_secs": age,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OllamaConfig;
    use crate::mesh::config::MeshConfig;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        let mesh = MeshHandle::new("DEVICE-SELF0000".to_string(), MeshConfig::default());
        AppState {
            mesh,
            cluster: Arc::new(cluster::Client::new(OllamaConfig::default())),
            sync_client: reqwest::Client::new(),
            http_port: 5000,
        }
    }

    #[tokio::test]
    async fn broadcast_then_list_events_round_trips() {
        let app = router(test_state());
        let body = json!({
            "event_id": "E1",
            "type": "FIRE",
            "device_id": "DEVICE-A0000001",
        });
        let response = app
            .clone()
            .oneshot(
                Request::post("/api/broadcast")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(Request::get("/api/events").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let events: Vec<EventView> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_id, "E1");
    }

    #[tokio::test]
    async fn broadcast_missing_field_is_400() {
        let app = router(test_state());
        let body = json!({ "event_id": "E1" });
        let response = app
            .oneshot(
                Request::post("/api/broadcast")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_own_alert_is_400() {
        let state = test_state();
        let app = router(state.clone());
        let body = json!({
            "event_id": "E2",
            "type": "FIRE",
            "device_id": "DEVICE-SELF0000",
        });
        app.clone()
            .oneshot(
                Request::post("/api/broadcast")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::post("/api/events/E2/verify")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn verify_unknown_event_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::post("/api/events/NOPE/verify")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn dismiss_is_idempotent_over_http() {
        let state = test_state();
        let app = router(state.clone());
        let body = json!({
            "event_id": "E3",
            "type": "FIRE",
            "device_id": "DEVICE-A0000001",
        });
        app.clone()
            .oneshot(
                Request::post("/api/broadcast")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(
                    Request::post("/api/events/E3/dismiss")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }
    }

    #[tokio::test]
    async fn add_peer_requires_ip_field() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::post("/api/peers")
                    .header("content-type", "application/json")
                    .body(Body::from(json!({}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn remove_unknown_peer_is_404() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::delete("/api/peers/10.0.0.99")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn emergency_contacts_returns_static_table() {
        let app = router(test_state());
        let response = app
            .oneshot(
                Request::get("/api/emergency-contacts")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
