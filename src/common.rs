use std::path::PathBuf;

use indexmap::IndexMap;
use thiserror::Error;

/// Ordered tag mapping attached to metrics and spans.
pub type Tags = IndexMap<String, String>;

/// Errors that could occur while building or installing a statsd recorder/exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// There was an issue when creating the necessary Tokio runtime to launch the exporter.
    #[error("failed to create Tokio runtime for exporter: {0}")]
    FailedToCreateRuntime(String),

    /// The given push gateway endpoint is not a valid socket address.
    #[error("push gateway endpoint is not valid: {0}")]
    InvalidPushGatewayEndpoint(String),

    /// No push gateway was configured before building the exporter.
    #[error("attempted to build exporter with no exporters enabled")]
    MissingExporterConfiguration,

    /// Installing the recorder did not succeed.
    #[error("failed to install exporter as global recorder: {0}")]
    FailedToSetGlobalRecorder(String),
}

/// Errors raised while resolving the agent configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The container metadata file exists but is not valid JSON.
    #[error("container metadata file {path:?} is not valid JSON: {source}")]
    InvalidMetadata {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// The explicitly configured agent URI could not be used.
    #[error("agent URI {uri:?} is not valid: {reason}")]
    InvalidAgentUri { uri: String, reason: String },
}
