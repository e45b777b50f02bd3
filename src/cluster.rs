//! LLM clustering collaborator (spec §6, §13): an optional HTTP call to an
//! Ollama-compatible endpoint that groups currently open events into
//! human-readable clusters. Any failure falls through to a deterministic
//! rule-based grouping so the feature degrades gracefully rather than
//! failing the request.

use crate::config::OllamaConfig;
use crate::mesh::event::EventRecord;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub cluster_id: String,
    pub label: String,
    pub severity: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub summary: String,
    pub event_ids: Vec<String>,
    pub recommended_action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterResponse {
    pub clusters: Vec<Cluster>,
    pub source: &'static str, // "llm" or "fallback"
}

#[derive(Debug, Deserialize)]
struct RawCluster {
    #[serde(default)]
    cluster_id: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    event_ids: Vec<String>,
    #[serde(default)]
    recommended_action: Option<String>,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

struct CacheEntry {
    key: Vec<String>,
    at: Instant,
    response: ClusterResponse,
}

pub struct Client {
    http: reqwest::Client,
    config: OllamaConfig,
    cache: Mutex<Option<CacheEntry>>,
}

impl Client {
    pub fn new(config: OllamaConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            http,
            config,
            cache: Mutex::new(None),
        }
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.port)
    }

    /// Check whether the Ollama endpoint is reachable (`GET /api/tags`).
    pub async fn health(&self) -> bool {
        self.http
            .get(format!("{}/api/tags", self.base_url()))
            .timeout(Duration::from_secs(2))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    /// Cluster the given open events, using the cache if the event-id set
    /// hasn't changed in the last `CACHE_TTL`.
    pub async fn cluster(&self, events: &[(String, EventRecord)]) -> ClusterResponse {
        let mut sorted_ids: Vec<String> = events.iter().map(|(id, _)| id.clone()).collect();
        sorted_ids.sort();

        if let Some(entry) = self.cache.lock().expect("cluster cache poisoned").as_ref() {
            if entry.key == sorted_ids && entry.at.elapsed() < CACHE_TTL {
                return entry.response.clone();
            }
        }

        let response = match self.try_llm_cluster(events).await {
            Some(clusters) => ClusterResponse {
                clusters,
                source: "llm",
            },
            None => fallback_cluster(events),
        };

        *self.cache.lock().expect("cluster cache poisoned") = Some(CacheEntry {
            key: sorted_ids,
            at: Instant::now(),
            response: response.clone(),
        });

        response
    }

    pub fn cache_age_secs(&self) -> Option<u64> {
        self.cache
            .lock()
            .expect("cluster cache poisoned")
            .as_ref()
            .map(|e| e.at.elapsed().as_secs())
    }

    async fn try_llm_cluster(&self, events: &[(String, EventRecord)]) -> Option<Vec<Cluster>> {
        let prompt = build_prompt(events);
        let request = GenerateRequest {
            model: &self.config.model,
            prompt,
            stream: false,
        };

        let response = self
            .http
            .post(format!("{}/api/generate", self.base_url()))
            .json(&request)
            .send()
            .await
            .ok()?;

        if !response.status().is_success() {
            return None;
        }

        let body: GenerateResponse = response.json().await.ok()?;
        let raw_clusters = extract_json_array(&body.response)?;
        let event_ids: Vec<&String> = events.iter().map(|(id, _)| id).collect();

        let clusters = raw_clusters
            .into_iter()
            .map(|raw| resolve_cluster(raw, &event_ids))
            .collect::<Vec<_>>();

        if clusters.is_empty() {
            None
        } else {
            Some(clusters)
        }
    }
}

fn build_prompt(events: &[(String, EventRecord)]) -> String {
    let mut prompt = String::from(
        "You are triaging community safety alerts. Group the following events into \
         clusters. Respond with ONLY a JSON array, each element shaped as \
         {\"cluster_id\", \"label\", \"severity\", \"type\", \"summary\", \"event_ids\", \
         \"recommended_action\"}.\n\nEvents:\n",
    );
    for (id, record) in events {
        prompt.push_str(&format!(
            "- id={id} type={} location={} description={}\n",
            record.packet.kind, record.packet.location, record.packet.description
        ));
    }
    prompt
}

/// Strip markdown code fences and extract the first balanced `[ ... ]`
/// array from the model's free-form response (spec §13).
fn extract_json_array(text: &str) -> Option<Vec<RawCluster>> {
    let stripped = text.replace("```json", "").replace("```", "");
    let start = stripped.find('[')?;
    let end = stripped.rfind(']')?;
    if end < start {
        return None;
    }
    serde_json::from_str(&stripped[start..=end]).ok()
}

/// First 8 `char`s of `s`, not its first 8 bytes — a plain byte slice can
/// land mid-codepoint for a non-ASCII event id and panic.
fn char_prefix8(s: &str) -> String {
    s.chars().take(8).collect()
}

/// Expand 8-char event-id prefixes against the live event table; ids that
/// can't be resolved (even as a prefix) are dropped from the cluster.
fn resolve_cluster(raw: RawCluster, known_ids: &[&String]) -> Cluster {
    let event_ids = raw
        .event_ids
        .into_iter()
        .filter_map(|candidate| {
            if known_ids.iter().any(|id| **id == candidate) {
                Some(candidate)
            } else {
                let candidate_prefix = char_prefix8(&candidate);
                known_ids
                    .iter()
                    .find(|id| id.chars().count() >= 8 && char_prefix8(id) == candidate_prefix)
                    .map(|id| (*id).clone())
            }
        })
        .collect();

    Cluster {
        cluster_id: raw.cluster_id.unwrap_or_else(|| "cluster".to_string()),
        label: raw.label.unwrap_or_else(|| "Untitled cluster".to_string()),
        severity: raw.severity.unwrap_or_else(|| "unknown".to_string()),
        kind: raw.kind.unwrap_or_else(|| "UNKNOWN".to_string()),
        summary: raw.summary.unwrap_or_default(),
        event_ids,
        recommended_action: raw.recommended_action.unwrap_or_default(),
    }
}

/// Deterministic fallback: group by `(type, location[:20])` (spec §13, S6).
fn fallback_cluster(events: &[(String, EventRecord)]) -> ClusterResponse {
    let mut groups: HashMap<(String, String), Vec<String>> = HashMap::new();
    for (id, record) in events {
        let location_prefix: String = record.packet.location.chars().take(20).collect();
        let key = (record.packet.kind.clone(), location_prefix);
        groups.entry(key).or_default().push(id.clone());
    }

    let clusters = groups
        .into_iter()
        .enumerate()
        .map(|(i, ((kind, location), event_ids))| Cluster {
            cluster_id: format!("fallback-{i}"),
            label: format!("{kind} near {location}"),
            severity: "unknown".to_string(),
            kind: kind.clone(),
            summary: format!("{} event(s) of type {kind} near {location}", event_ids.len()),
            event_ids,
            recommended_action: "Review individually".to_string(),
        })
        .collect();

    ClusterResponse {
        clusters,
        source: "fallback",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::event::Trust;
    use crate::mesh::packet::Packet;

    fn record(kind: &str, location: &str) -> EventRecord {
        EventRecord {
            packet: Packet {
                event_id: "E1".to_string(),
                kind: kind.to_string(),
                timestamp: 0,
                device_id: "DEVICE-A".to_string(),
                hop_count: 0,
                is_authorized_node: false,
                description: String::new(),
                location: location.to_string(),
            },
            devices_reached: Default::default(),
            cross_checks: Default::default(),
            pending_verify: false,
            dismissed: false,
            authorized_node: false,
            trust: Trust::Low,
            max_hop: 0,
            first_seen: 0,
        }
    }

    #[test]
    fn fallback_groups_by_type_and_location_prefix() {
        let events = vec![
            ("E1".to_string(), record("FIRE", "Main St Apartments")),
            ("E2".to_string(), record("FIRE", "Main St Apartments Annex")),
            ("E3".to_string(), record("MEDICAL", "Main St Apartments")),
        ];
        let response = fallback_cluster(&events);
        assert_eq!(response.source, "fallback");
        assert_eq!(response.clusters.len(), 2);
    }

    #[test]
    fn extract_json_array_strips_markdown_fences() {
        let text = "```json\n[{\"cluster_id\":\"c1\",\"event_ids\":[]}]\n```";
        let parsed = extract_json_array(text).unwrap();
        assert_eq!(parsed.len(), 1);
    }

    #[test]
    fn extract_json_array_returns_none_on_garbage() {
        assert!(extract_json_array("not json at all").is_none());
    }
}
