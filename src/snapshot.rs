//! Decoding of the per-run status payload carried by each stream message.

use serde::{Deserialize, Deserializer};
use thiserror::Error;

/// Longest payload prefix kept in a decode error.
const PREVIEW_LEN: usize = 100;

#[derive(Error, Debug)]
#[error("malformed snapshot payload {preview:?}: {source}")]
pub struct SnapshotError {
    pub preview: String,
    #[source]
    pub source: serde_json::Error,
}

/// Last known server-reported state of a counter.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Snapshot {
    #[serde(rename = "basecount")]
    pub base_count: f64,
    /// Server-estimated throughput in counts per second, used only for smoothing.
    #[serde(default)]
    pub rate: f64,
    #[serde(deserialize_with = "deserialize_active")]
    pub active: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            base_count: 0.0,
            rate: 0.0,
            active: true,
        }
    }
}

impl Snapshot {
    pub fn decode(raw: &str) -> Result<Self, SnapshotError> {
        serde_json::from_str(raw).map_err(|source| SnapshotError {
            preview: preview(raw),
            source,
        })
    }

    /// Value this snapshot predicts `elapsed_ms` after it was received.
    pub fn extrapolate(&self, elapsed_ms: i64) -> f64 {
        self.rate * (elapsed_ms as f64 / 1000.0) + self.base_count
    }
}

fn preview(raw: &str) -> String {
    match raw.char_indices().nth(PREVIEW_LEN) {
        Some((idx, _)) => format!("{}…", &raw[..idx]),
        None => raw.to_string(),
    }
}

/// The server reports `active` as 0/1 more often than as a JSON boolean.
#[derive(Deserialize)]
#[serde(untagged)]
enum ActiveFlag {
    Bool(bool),
    Number(f64),
    Text(String),
}

fn deserialize_active<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    match ActiveFlag::deserialize(deserializer)? {
        ActiveFlag::Bool(b) => Ok(b),
        ActiveFlag::Number(n) => Ok(n != 0.0),
        ActiveFlag::Text(s) => match s.trim() {
            "true" | "1" => Ok(true),
            "false" | "0" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "invalid active flag: {other:?}"
            ))),
        },
    }
}
