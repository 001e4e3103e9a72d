//! The accumulating, string-encoded status payload.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::warn;

use crate::error::StatusError;

/// Decoded form of the opaque `webhookData` string.
///
/// Unknown top-level keys are carried through untouched so the payload can
/// round-trip between processes without losing caller-provided context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_name: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,

    #[serde(default)]
    pub status_data: BTreeMap<String, bool>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl StatusPayload {
    /// Decode a payload string. Blank input is an empty payload.
    pub fn parse(raw: &str) -> Result<Self, StatusError> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(raw).map_err(StatusError::Malformed)
    }

    /// Record the outcome of `phase`, overwriting only that key.
    pub fn record(&mut self, phase: &str, success: bool) {
        self.status_data.insert(phase.to_string(), success);
    }

    pub fn encode(&self) -> Result<String, StatusError> {
        serde_json::to_string(self).map_err(StatusError::Encode)
    }
}

/// Merge one phase result into an encoded payload and re-encode it.
///
/// Existing phase keys are preserved; the named phase is overwritten.
pub fn merge_status(payload: &str, phase: &str, success: bool) -> Result<String, StatusError> {
    let mut decoded = StatusPayload::parse(payload)?;
    decoded.record(phase, success);
    decoded.encode()
}

/// Like [`merge_status`], but an unreadable payload is logged and replaced
/// by a fresh one so the phase mark is never lost.
#[must_use]
pub fn mark_status(payload: &str, phase: &str, success: bool) -> String {
    merge_status(payload, phase, success).unwrap_or_else(|e| {
        warn!(error = %e, phase, "Replacing unreadable status payload");
        let mut fresh = StatusPayload::default();
        fresh.record(phase, success);
        fresh.encode().unwrap_or_default()
    })
}
