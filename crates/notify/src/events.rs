//! Deployment phases and the webhook body they are reported in.

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::payload::StatusPayload;

/// Wire value of the `type` field on every status update.
pub const STATUS_UPDATE_TYPE: &str = "DEPLOYMENT_STATUS_UPDATE";

/// Wire value of `status` when a phase failed.
pub const DEPLOYMENT_FAILED: &str = "DEPLOYMENT_FAILED";

/// Progress milestones of a single deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The reconciler accepted the build request and submitted the agent job
    DeploymentJobCreated,
    /// Registry secret, Dockerfile config and build job were created
    CreatedKanikoJob,
    /// The build job reached a terminal state
    KanikoJobExecuted,
    /// The application resource was created or updated
    CreatedApplicationCrd,
    /// Workload, network and secret children were upserted
    CreatedKubernetesResources,
    /// The whole deployment finished
    DeploymentCompleted,
}

impl Phase {
    /// Tag used as the `statusData` key and as the success `status`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::DeploymentJobCreated => "DEPLOYMENT_JOB_CREATED",
            Self::CreatedKanikoJob => "CREATED_KANIKO_JOB",
            Self::KanikoJobExecuted => "KANIKO_JOB_EXECUTED",
            Self::CreatedApplicationCrd => "CREATED_APPLICATION_CRD",
            Self::CreatedKubernetesResources => "CREATED_KUBERNETES_RESOURCES",
            Self::DeploymentCompleted => "DEPLOYMENT_COMPLETED",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AsRef<str> for Phase {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Body POSTed to the webhook endpoint.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub data: StatusUpdateData,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateData {
    pub queue_name: Value,
    pub status_data: BTreeMap<String, bool>,
    pub state: Value,
    pub status: String,
}

impl StatusUpdate {
    /// Build the update for `phase` from an already merged payload.
    #[must_use]
    pub fn new(payload: &StatusPayload, phase: &str, success: bool) -> Self {
        let status = if success {
            phase.to_string()
        } else {
            DEPLOYMENT_FAILED.to_string()
        };

        Self {
            kind: STATUS_UPDATE_TYPE,
            data: StatusUpdateData {
                queue_name: payload.queue_name.clone().unwrap_or(Value::Null),
                status_data: payload.status_data.clone(),
                state: payload.state.clone().unwrap_or(Value::Null),
                status,
            },
        }
    }
}
