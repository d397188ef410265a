//! Durable session state.

use std::collections::BTreeMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_core::{SessionId, TimelineEntry, UsageStats};

use crate::error::{Result, StoreError};

/// Current snapshot format version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// A persisted async-data cache entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedData {
    /// Resolved value.
    pub value: Value,
    /// Tick at which the value was recorded.
    pub tick: u64,
    /// Dependency array the value was fetched with.
    #[serde(default)]
    pub deps: Vec<Value>,
}

/// JSON-safe representation of a session at rest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Format version, [`SNAPSHOT_VERSION`] when written by this build.
    pub version: u32,
    /// Owning session.
    pub session_id: SessionId,
    /// Ticks completed.
    pub tick: u64,
    /// Conversation record, `null` when not captured.
    pub timeline: Option<Vec<TimelineEntry>>,
    /// Persisted shared-state values by key.
    #[serde(default)]
    pub shared_state: BTreeMap<String, Value>,
    /// Persisted async-data cache entries by key.
    #[serde(default)]
    pub data_cache: BTreeMap<String, CachedData>,
    /// Accumulated usage.
    #[serde(default)]
    pub usage: UsageStats,
    /// RFC 3339 creation time.
    pub timestamp: String,
}

impl SessionSnapshot {
    /// Empty snapshot for a session, stamped now.
    pub fn new(session_id: SessionId) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            session_id,
            tick: 0,
            timeline: Some(Vec::new()),
            shared_state: BTreeMap::new(),
            data_cache: BTreeMap::new(),
            usage: UsageStats::default(),
            timestamp: Utc::now().to_rfc3339(),
        }
    }

    /// Encode to JSON text.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from JSON text, rejecting versions newer than this build.
    pub fn from_json(text: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(text)?;
        snapshot.check_version()?;
        Ok(snapshot)
    }

    /// Fail when the snapshot was written by a newer format.
    pub fn check_version(&self) -> Result<()> {
        if self.version > SNAPSHOT_VERSION {
            return Err(StoreError::UnsupportedVersion {
                found: self.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(())
    }
}

/// Listing entry returned by [`SessionStore::list`](crate::SessionStore::list).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotSummary {
    /// Session id.
    pub session_id: SessionId,
    /// Ticks completed.
    pub tick: u64,
    /// When the snapshot was written.
    pub timestamp: String,
}

impl From<&SessionSnapshot> for SnapshotSummary {
    fn from(s: &SessionSnapshot) -> Self {
        Self {
            session_id: s.session_id.clone(),
            tick: s.tick,
            timestamp: s.timestamp.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    fn sample() -> SessionSnapshot {
        let mut s = SessionSnapshot::new(SessionId::from("sess_1"));
        s.tick = 3;
        let _ = s.shared_state.insert("count".into(), json!(4));
        let _ = s.data_cache.insert(
            "user".into(),
            CachedData {
                value: json!({"name": "ada"}),
                tick: 1,
                deps: vec![json!(42)],
            },
        );
        s.timeline = Some(vec![TimelineEntry::user(1, "hi")]);
        s
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let v = serde_json::to_value(sample()).unwrap();
        assert_eq!(v["sessionId"], "sess_1");
        assert_eq!(v["sharedState"]["count"], 4);
        assert_eq!(v["dataCache"]["user"]["deps"], json!([42]));
        assert_eq!(v["version"], SNAPSHOT_VERSION);
    }

    #[test]
    fn text_round_trip_is_identical() {
        let s = sample();
        let back = SessionSnapshot::from_json(&s.to_json().unwrap()).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn null_timeline_is_accepted() {
        let mut v = serde_json::to_value(sample()).unwrap();
        v["timeline"] = Value::Null;
        let back = SessionSnapshot::from_json(&v.to_string()).unwrap();
        assert!(back.timeline.is_none());
    }

    #[test]
    fn newer_version_is_rejected() {
        let mut v = serde_json::to_value(sample()).unwrap();
        v["version"] = json!(SNAPSHOT_VERSION + 1);
        assert_matches!(
            SessionSnapshot::from_json(&v.to_string()),
            Err(StoreError::UnsupportedVersion { .. })
        );
    }
}
