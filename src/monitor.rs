//! Client for the media-server monitoring API.
//!
//! Thin collaborator around the synchronizer: it owns the HTTP details
//! (base URL, API key header, timeouts) and exposes GET-like producers the
//! engine can poll. The engine imposes nothing on it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client as HttpClient;
use serde::Deserialize;

use crate::config::ServerConfig;
use crate::fingerprint;
use crate::sync::Producer;

/// Sessions a bounded prefix of which feeds the activity fingerprint.
const FINGERPRINT_PREFIX: usize = 5;

/// One playing/paused session on the media server.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// "playing", "paused", "buffering" — opaque to us.
    pub state: String,
    pub title: String,
    pub user: String,
    /// Transcode progress etc.; ticks every second, so fingerprints must
    /// ignore it.
    #[serde(default)]
    pub progress_percent: u8,
}

/// Snapshot of everything currently playing.
#[derive(Debug, Clone, Deserialize)]
pub struct Activity {
    pub sessions: Vec<Session>,
}

/// One finished playback from the server's watch history.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryEntry {
    pub id: u64,
    pub title: String,
    pub user: String,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub started_at: DateTime<Utc>,
}

/// A page of recent history plus the server-side total.
#[derive(Debug, Clone, Deserialize)]
pub struct HistoryPage {
    pub records_total: u64,
    pub entries: Vec<HistoryEntry>,
}

/// Activity change detection.
///
/// Two snapshots fingerprint equal when the session count and the ordered
/// (session_id, state) pairs of the first five sessions match. Progress
/// counters and anything past the prefix are deliberately ignored — a
/// stream ticking forward is not a change worth re-rendering.
pub fn activity_fingerprint(activity: &Activity) -> String {
    fingerprint::prefix_ids(&activity.sessions, FINGERPRINT_PREFIX, |s| {
        format!("{}:{}", s.session_id, s.state)
    })
}

/// History change detection.
///
/// Equal when the server-side total and the ids of the first five entries
/// match. Older pages shifting underneath are invisible by design.
pub fn history_fingerprint(page: &HistoryPage) -> String {
    if page.entries.is_empty() && page.records_total == 0 {
        return fingerprint::EMPTY_FINGERPRINT.to_string();
    }
    let mut ids: Vec<String> = page
        .entries
        .iter()
        .take(FINGERPRINT_PREFIX)
        .map(|e| e.id.to_string())
        .collect();
    ids.insert(0, page.records_total.to_string());
    fingerprint::prefix_ids(&ids, FINGERPRINT_PREFIX + 1, |id| id.clone())
}

pub struct MonitorClient {
    http_client: HttpClient,
    base_url: String,
    api_key: String,
}

impl MonitorClient {
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    /// Everything playing right now.
    pub async fn get_activity(&self) -> Result<Activity> {
        self.get_json("/api/activity").await
    }

    /// The most recent `length` history entries.
    pub async fn get_history(&self, length: usize) -> Result<HistoryPage> {
        self.get_json(&format!("/api/history?length={}", length))
            .await
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()
            .with_context(|| format!("Server rejected {}", url))?;

        response
            .json()
            .await
            .with_context(|| format!("Could not parse response from {}", url))
    }
}

/// Polls the activity endpoint.
pub struct ActivityProducer(pub Arc<MonitorClient>);

#[async_trait]
impl Producer<Activity> for ActivityProducer {
    async fn produce(&self) -> Result<Activity> {
        self.0.get_activity().await
    }
}

/// Polls a bounded page of watch history.
pub struct HistoryProducer {
    pub client: Arc<MonitorClient>,
    pub page_length: usize,
}

#[async_trait]
impl Producer<HistoryPage> for HistoryProducer {
    async fn produce(&self) -> Result<HistoryPage> {
        self.client.get_history(self.page_length).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(id: &str, state: &str, progress: u8) -> Session {
        Session {
            session_id: id.to_string(),
            state: state.to_string(),
            title: "Some Movie".to_string(),
            user: "alice".to_string(),
            progress_percent: progress,
        }
    }

    #[test]
    fn test_activity_parses_from_json() {
        let json = r#"{
            "sessions": [
                {
                    "session_id": "ab12",
                    "state": "playing",
                    "title": "Some Movie",
                    "user": "alice",
                    "progress_percent": 42
                },
                {
                    "session_id": "cd34",
                    "state": "paused",
                    "title": "Some Show S01E02",
                    "user": "bob"
                }
            ]
        }"#;

        let activity: Activity = serde_json::from_str(json).unwrap();
        assert_eq!(activity.sessions.len(), 2);
        assert_eq!(activity.sessions[0].session_id, "ab12");
        assert_eq!(activity.sessions[0].progress_percent, 42);
        // progress_percent defaults when absent
        assert_eq!(activity.sessions[1].progress_percent, 0);
    }

    #[test]
    fn test_history_parses_from_json() {
        let json = r#"{
            "records_total": 1234,
            "entries": [
                { "id": 9, "title": "Some Movie", "user": "alice", "started_at": 1700000000 }
            ]
        }"#;

        let page: HistoryPage = serde_json::from_str(json).unwrap();
        assert_eq!(page.records_total, 1234);
        assert_eq!(page.entries[0].id, 9);
        assert_eq!(page.entries[0].started_at.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_activity_fingerprint_ignores_progress() {
        let before = Activity {
            sessions: vec![session("ab12", "playing", 10)],
        };
        let after = Activity {
            sessions: vec![session("ab12", "playing", 90)],
        };
        assert_eq!(activity_fingerprint(&before), activity_fingerprint(&after));
    }

    #[test]
    fn test_activity_fingerprint_sees_state_changes() {
        let playing = Activity {
            sessions: vec![session("ab12", "playing", 10)],
        };
        let paused = Activity {
            sessions: vec![session("ab12", "paused", 10)],
        };
        assert_ne!(activity_fingerprint(&playing), activity_fingerprint(&paused));
    }

    #[test]
    fn test_activity_fingerprint_sees_session_count() {
        let one = Activity {
            sessions: vec![session("ab12", "playing", 0)],
        };
        let two = Activity {
            sessions: vec![
                session("ab12", "playing", 0),
                session("cd34", "playing", 0),
            ],
        };
        assert_ne!(activity_fingerprint(&one), activity_fingerprint(&two));
    }

    #[test]
    fn test_empty_activity_uses_sentinel() {
        let idle = Activity { sessions: vec![] };
        assert_eq!(activity_fingerprint(&idle), fingerprint::EMPTY_FINGERPRINT);
    }

    #[test]
    fn test_history_fingerprint_tracks_total_and_prefix() {
        let entry = |id: u64| HistoryEntry {
            id,
            title: "x".to_string(),
            user: "alice".to_string(),
            started_at: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        };

        let a = HistoryPage {
            records_total: 10,
            entries: vec![entry(1), entry(2)],
        };
        let same = HistoryPage {
            records_total: 10,
            entries: vec![entry(1), entry(2)],
        };
        let grown = HistoryPage {
            records_total: 11,
            entries: vec![entry(3), entry(1)],
        };

        assert_eq!(history_fingerprint(&a), history_fingerprint(&same));
        assert_ne!(history_fingerprint(&a), history_fingerprint(&grown));
    }

    #[test]
    fn test_empty_history_uses_sentinel() {
        let empty = HistoryPage {
            records_total: 0,
            entries: vec![],
        };
        assert_eq!(history_fingerprint(&empty), fingerprint::EMPTY_FINGERPRINT);
    }
}
