//! Standardised interactions with Datadog.
//!
//! ## Basics
//!
//! `degica-datadog` works out where the Datadog agent listens from the environment a service
//! runs in, attaches the standard tags (service, env, version and source code linking) to
//! everything reported, and provides small helpers for metrics and spans.
//!
//! ## Configuration
//!
//! [`Config::from_env`] reads:
//!
//! - `SERVICE_NAME`, `RAILS_ENV`, `_GIT_REVISION` and `DD_GIT_REPOSITORY_URL` for the tags,
//! - `ECS_CONTAINER_METADATA_FILE` and `DD_AGENT_URI` for the agent address,
//! - `DEGICA_DATADOG_DISABLED` to switch reporting off.
//!
//! Reporting is enabled in production and staging, or wherever `DD_AGENT_URI` is set. When it
//! is disabled every helper is a no-op.
//!
//! ## Usage
//!
//! ```ignore
//! let config = Config::from_env()?;
//!
//! // Pushes dogstatsd lines to the agent, and installs the recorder for the `metrics` macros.
//! let statsd = Statsd::install(&config)?;
//!
//! let charge = statsd.with_timing("payments.charge", &[("method", "konbini")], || {
//!     gateway.charge(&payment)
//! });
//! statsd.increment("payments.captured", &[("method", "konbini")]);
//!
//! // `tracer` is the tracer client, exposed through the `Tracer` trait.
//! let tracing = Tracing::new(config, tracer);
//! tracing.init(&statsd);
//! tracing.span("payments.capture", SpanOptions::new(), || capture(&payment));
//! tracing.span_tags(&[("payment.id", &payment.id)]);
//! ```
mod common;
pub use self::common::{BuildError, ConfigError, Tags};

mod builder;
pub use self::builder::{StatsdBuilder, DEFAULT_MAX_BUFFER_SIZE, DEFAULT_PUSH_INTERVAL};

mod config;
pub use self::config::Config;

pub mod endpoint;
pub use self::endpoint::AgentEndpoint;

pub mod formatting;
mod recorder;
pub use self::recorder::{StatsdHandle, StatsdRecorder};

mod path;
pub use self::path::path_group;

mod statsd;
pub use self::statsd::Statsd;

pub mod tags;
pub use self::tags::{flatten_for_span, merge_tags};

pub mod trace;
pub use self::trace::{SpanOptions, SpanPipeline, Tracer, TracerSettings, Tracing};
