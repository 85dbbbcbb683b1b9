//! Resolution of the address the Datadog agent listens on.
//!
//! Sources are consulted in order:
//!
//! 1. the ECS container metadata file, whose `HostPrivateIPv4Address` points at the agent
//!    running on the host (tracing port 9126),
//! 2. an explicit agent URI such as `http://datadog-agent:8126`,
//! 3. `localhost:8126`.
//!
//! The statsd port is always one below the tracing port.
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, warn};
use url::{Host, Url};

use crate::common::ConfigError;

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_TRACING_PORT: u16 = 8126;
/// Tracing port of the agent when reached through the ECS host address.
pub const ECS_TRACING_PORT: u16 = 9126;

/// Host and tracing port of the agent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentEndpoint {
    host: String,
    port: u16,
}

#[derive(Deserialize)]
struct ContainerMetadata {
    #[serde(rename = "HostPrivateIPv4Address")]
    host_private_ipv4_address: Option<String>,
}

impl AgentEndpoint {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Resolves the endpoint from an optional metadata file path and an optional agent URI.
    ///
    /// A metadata file that cannot be read, or that lacks a host address, falls through to the
    /// next source. Metadata that is not JSON and URIs that do not name a host are errors.
    pub fn resolve(
        metadata_file: Option<&Path>,
        agent_uri: Option<&str>,
    ) -> Result<Self, ConfigError> {
        if let Some(path) = metadata_file {
            match fs::read_to_string(path) {
                Ok(contents) => {
                    if let Some(endpoint) = Self::from_metadata(path, &contents)? {
                        debug!(host = %endpoint.host, "using agent address from container metadata");
                        return Ok(endpoint);
                    }
                }
                Err(e) => warn!(
                    path = %path.display(),
                    "failed to read container metadata file: {}", e
                ),
            }
        }

        if let Some(uri) = agent_uri {
            let endpoint = Self::from_uri(uri)?;
            debug!(host = %endpoint.host, port = endpoint.port, "using agent address from URI");
            return Ok(endpoint);
        }

        Ok(Self::default())
    }

    /// Extracts the host address from container metadata contents, if present.
    pub fn from_metadata(path: &Path, contents: &str) -> Result<Option<Self>, ConfigError> {
        let metadata: ContainerMetadata =
            serde_json::from_str(contents).map_err(|source| ConfigError::InvalidMetadata {
                path: path.to_path_buf(),
                source,
            })?;

        Ok(metadata
            .host_private_ipv4_address
            .filter(|host| !host.is_empty())
            .map(|host| Self::new(host, ECS_TRACING_PORT)))
    }

    /// Parses an agent URI. A URI without an explicit port uses its scheme's default port, or
    /// the default tracing port if the scheme has none.
    pub fn from_uri(uri: &str) -> Result<Self, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidAgentUri {
            uri: uri.to_string(),
            reason,
        };

        let parsed = Url::parse(uri).map_err(|e| invalid(e.to_string()))?;
        let host = match parsed.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => return Err(invalid("missing host".to_string())),
        };
        let port = parsed.port_or_known_default().unwrap_or(DEFAULT_TRACING_PORT);
        if port == 0 {
            return Err(invalid("port must be non-zero".to_string()));
        }

        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn tracing_port(&self) -> u16 {
        self.port
    }

    /// The dogstatsd port sits right below the tracing port.
    pub fn statsd_port(&self) -> u16 {
        self.port.saturating_sub(1)
    }
}

impl Default for AgentEndpoint {
    fn default() -> Self {
        Self::new(DEFAULT_HOST, DEFAULT_TRACING_PORT)
    }
}
