use std::env;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::common::{ConfigError, Tags};
use crate::endpoint::AgentEndpoint;

pub const SERVICE_ENV: &str = "SERVICE_NAME";
pub const VERSION_ENV: &str = "_GIT_REVISION";
pub const ENVIRONMENT_ENV: &str = "RAILS_ENV";
pub const REPOSITORY_URL_ENV: &str = "DD_GIT_REPOSITORY_URL";
pub const AGENT_URI_ENV: &str = "DD_AGENT_URI";
pub const METADATA_FILE_ENV: &str = "ECS_CONTAINER_METADATA_FILE";
pub const DISABLED_ENV: &str = "DEGICA_DATADOG_DISABLED";

/// Deployment environments that report to Datadog without an explicit agent URI.
const REPORTING_ENVIRONMENTS: [&str; 2] = ["production", "staging"];

/// Datadog settings derived from the environment.
///
/// Built once at startup and handed to [`Statsd`](crate::Statsd) and
/// [`Tracing`](crate::Tracing).
#[derive(Clone, Debug)]
pub struct Config {
    service: Option<String>,
    version: Option<String>,
    environment: Option<String>,
    repository_url: Option<String>,
    agent_uri: Option<String>,
    metadata_file: Option<PathBuf>,
    disabled: bool,
    endpoint: AgentEndpoint,
}

impl Config {
    /// Reads the configuration from the process environment.
    ///
    /// ## Errors
    ///
    /// Fails if the container metadata file is not valid JSON or the agent URI cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, which maps a variable name to its value.
    /// Empty values are treated as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let mut config = Config {
            service: get(SERVICE_ENV),
            version: get(VERSION_ENV),
            environment: get(ENVIRONMENT_ENV),
            repository_url: get(REPOSITORY_URL_ENV),
            agent_uri: get(AGENT_URI_ENV),
            metadata_file: get(METADATA_FILE_ENV).map(PathBuf::from),
            disabled: get(DISABLED_ENV).is_some_and(|v| is_truthy(&v)),
            endpoint: AgentEndpoint::default(),
        };

        if config.enabled() {
            config.endpoint =
                AgentEndpoint::resolve(config.metadata_file.as_deref(), config.agent_uri.as_deref())?;
        }
        debug!(
            enabled = config.enabled(),
            host = config.agent_host(),
            tracing_port = config.tracing_port(),
            statsd_port = config.statsd_port(),
            "resolved datadog configuration"
        );

        Ok(config)
    }

    /// Whether anything should be reported at all.
    ///
    /// Reporting happens in production and staging, or anywhere an agent URI is configured,
    /// unless the disable flag is set.
    pub fn enabled(&self) -> bool {
        if self.disabled {
            return false;
        }
        let reporting_env = self
            .environment
            .as_deref()
            .is_some_and(|env| REPORTING_ENVIRONMENTS.contains(&env));
        reporting_env || self.agent_uri.is_some()
    }

    pub fn service(&self) -> Option<&str> {
        self.service.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn environment(&self) -> Option<&str> {
        self.environment.as_deref()
    }

    pub fn repository_url(&self) -> Option<&str> {
        self.repository_url.as_deref()
    }

    pub fn metadata_file(&self) -> Option<&Path> {
        self.metadata_file.as_deref()
    }

    pub fn endpoint(&self) -> &AgentEndpoint {
        &self.endpoint
    }

    pub fn agent_host(&self) -> &str {
        self.endpoint.host()
    }

    pub fn tracing_port(&self) -> u16 {
        self.endpoint.tracing_port()
    }

    pub fn statsd_port(&self) -> u16 {
        self.endpoint.statsd_port()
    }

    /// Tags attached to every metric: service, env, version and the source code linking tags.
    /// Unset values are left out.
    pub fn default_tags(&self) -> Tags {
        [
            ("service", self.service()),
            ("env", self.environment()),
            ("version", self.version()),
            ("git.commit.sha", self.version()),
            ("git.repository_url", self.repository_url()),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k.to_string(), v.to_string())))
        .collect()
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
