use crate::credentials::{CredentialError, CredentialResolver};
use crate::tasks::config::ControllerConfig;
use kube::Client;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Missing object key")]
    MissingObjectKey,

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Credential error: {0}")]
    CredentialError(#[from] CredentialError),

    #[error("Unknown source code provider '{0}'")]
    UnknownSourceProvider(String),

    #[error("Invalid {kind} manifest: {source}")]
    InvalidManifest {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Finalizer error: {0}")]
    FinalizerError(String),
}

/// Shared state handed to every reconciliation
pub(crate) struct Context {
    pub client: Client,
    pub config: Arc<ControllerConfig>,
    pub resolver: CredentialResolver,
}

pub const BUILD_REQUEST_FINALIZER_NAME: &str = "finalizers.deployments.platform/build-request";
pub const APPLICATION_FINALIZER_NAME: &str = "finalizers.deployments.platform/application";

impl Error {
    /// Bad request content rather than a cluster fault; retrying cannot help.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::CredentialError(_)
                | Self::UnknownSourceProvider(_)
                | Self::InvalidManifest { .. }
                | Self::InvalidInput(_)
                | Self::SerializationError(_)
        )
    }
}
