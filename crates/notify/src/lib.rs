//! Deployment status reporting.
//!
//! A deployment attempt accumulates per-phase results in an opaque,
//! string-encoded payload (`webhookData`). Each time a phase finishes the
//! payload is merged and the merged view is posted to the caller's webhook.
//!
//! # Usage
//!
//! ```no_run
//! use notify::{Phase, StatusTracker};
//!
//! # async fn run() {
//! let mut tracker = StatusTracker::new("https://hooks.example.com/deploy", "{}");
//! tracker.record(Phase::CreatedKanikoJob, true).await;
//! assert!(tracker.payload().contains("CREATED_KANIKO_JOB"));
//! # }
//! ```
//!
//! Delivery is best effort: failures are logged and never returned to the
//! caller, and a blank endpoint disables delivery while merging still happens.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod channels;
pub mod error;
pub mod events;
pub mod payload;

pub use channels::webhook::WebhookChannel;
pub use channels::NotifyChannel;
pub use error::{ChannelError, StatusError};
pub use events::{Phase, StatusUpdate, DEPLOYMENT_FAILED, STATUS_UPDATE_TYPE};
pub use payload::{mark_status, merge_status, StatusPayload};

use std::sync::Arc;
use tracing::{debug, error, warn};

/// Merges phase results and dispatches them to every enabled channel.
pub struct StatusReporter {
    channels: Vec<Arc<dyn NotifyChannel>>,
}

impl StatusReporter {
    /// Reporter that posts to a single webhook endpoint.
    #[must_use]
    pub fn for_endpoint(endpoint: &str) -> Self {
        Self::with_channels(vec![Arc::new(WebhookChannel::new(endpoint))])
    }

    #[must_use]
    pub fn with_channels(channels: Vec<Arc<dyn NotifyChannel>>) -> Self {
        Self { channels }
    }

    /// Reporter that merges but never sends.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { channels: vec![] }
    }

    #[must_use]
    pub fn has_channels(&self) -> bool {
        self.channels.iter().any(|c| c.enabled())
    }

    /// Merge `phase` into `payload`, deliver the update and return the new payload.
    ///
    /// A payload that fails to decode is logged and replaced by an empty one.
    pub async fn report(&self, payload: &str, phase: &str, success: bool) -> String {
        let mut decoded = StatusPayload::parse(payload).unwrap_or_else(|e| {
            warn!(error = %e, "Discarding unreadable status payload");
            StatusPayload::default()
        });
        decoded.record(phase, success);

        let update = StatusUpdate::new(&decoded, phase, success);
        self.dispatch(&update).await;

        decoded.encode().unwrap_or_else(|e| {
            error!(error = %e, "Failed to encode status payload");
            payload.to_string()
        })
    }

    async fn dispatch(&self, update: &StatusUpdate) {
        for channel in &self.channels {
            let channel_name = channel.name();

            if !channel.enabled() {
                debug!(channel = channel_name, "Channel disabled, skipping");
                continue;
            }

            match channel.send(update).await {
                Ok(()) => debug!(channel = channel_name, "Status update sent"),
                Err(e) => {
                    error!(
                        channel = channel_name,
                        error = %e,
                        "Failed to send status update"
                    );
                }
            }
        }
    }
}

/// Holds the running payload of one deployment attempt.
pub struct StatusTracker {
    reporter: StatusReporter,
    payload: String,
}

impl StatusTracker {
    #[must_use]
    pub fn new(endpoint: &str, payload: &str) -> Self {
        Self::with_reporter(StatusReporter::for_endpoint(endpoint), payload)
    }

    #[must_use]
    pub fn with_reporter(reporter: StatusReporter, payload: &str) -> Self {
        Self {
            reporter,
            payload: payload.to_string(),
        }
    }

    /// Record a phase outcome and report it.
    pub async fn record(&mut self, phase: Phase, success: bool) {
        self.payload = self
            .reporter
            .report(&self.payload, phase.as_str(), success)
            .await;
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_reporter_still_merges() {
        let reporter = StatusReporter::disabled();
        assert!(!reporter.has_channels());

        let merged = reporter
            .report(r#"{"statusData":{"A":true}}"#, "B", false)
            .await;
        assert_eq!(merged, r#"{"statusData":{"A":true,"B":false}}"#);
    }

    #[tokio::test]
    async fn blank_endpoint_disables_delivery() {
        let reporter = StatusReporter::for_endpoint("  ");
        assert!(!reporter.has_channels());
    }

    #[tokio::test]
    async fn unreadable_payload_is_replaced() {
        let reporter = StatusReporter::disabled();
        let merged = reporter.report("not-json", "B", true).await;
        assert_eq!(merged, r#"{"statusData":{"B":true}}"#);
    }

    #[tokio::test]
    async fn tracker_accumulates() {
        let mut tracker = StatusTracker::with_reporter(StatusReporter::disabled(), "");
        tracker.record(Phase::CreatedKanikoJob, true).await;
        tracker.record(Phase::KanikoJobExecuted, false).await;

        let decoded = StatusPayload::parse(tracker.payload()).unwrap();
        assert_eq!(decoded.status_data.get("CREATED_KANIKO_JOB"), Some(&true));
        assert_eq!(decoded.status_data.get("KANIKO_JOB_EXECUTED"), Some(&false));
    }

    #[test]
    fn failed_update_uses_failure_tag() {
        let mut payload = StatusPayload::default();
        payload.record("BUILD", false);
        let update = StatusUpdate::new(&payload, "BUILD", false);
        assert_eq!(update.kind, STATUS_UPDATE_TYPE);
        assert_eq!(update.data.status, DEPLOYMENT_FAILED);
    }
}
