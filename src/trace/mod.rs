//! Span enrichment on top of the tracer client.
//!
//! The tracer itself (span storage, sampling, flushing, the agent protocol) is external. It is
//! plugged in through the [`Tracer`] trait, which names the capabilities this crate relies on.
mod pipeline;

pub use self::pipeline::{
    group_http_client_resource, group_subdomain_services, is_health_check, is_newrelic_reporter,
    is_static_asset, tag_aws_services, SpanMut, SpanPipeline,
};

use tracing::debug;

use crate::common::Tags;
use crate::config::Config;
use crate::recorder::StatsdHandle;
use crate::statsd::Statsd;
use crate::tags::merge_tags;

/// Partial flushing kicks in once a trace holds this many finished spans.
pub const PARTIAL_FLUSH_MIN_SPANS: usize = 2_000;

/// Value of the `component` tag on spans started through [`Tracing::span`].
pub const COMPONENT: &str = "degica_datadog";

/// A live span that can be tagged.
pub trait SpanTags {
    fn set_tag(&self, key: &str, value: &str);
}

/// Capabilities required from the tracer client.
pub trait Tracer {
    type Span: SpanTags;

    /// Applies the settings; called once at startup.
    fn configure(&self, settings: TracerSettings);

    /// Runs `f` inside a new span.
    fn trace<T, F>(&self, name: &str, options: SpanOptions, f: F) -> T
    where
        F: FnOnce() -> T;

    /// The innermost active span of the current trace.
    fn active_span(&self) -> Option<Self::Span>;

    /// The root span of the current trace.
    fn active_root_span(&self) -> Option<Self::Span>;
}

/// Options of a new span.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SpanOptions {
    pub service: Option<String>,
    pub resource: Option<String>,
    pub tags: Tags,
}

impl SpanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn resource<R: Into<String>>(mut self, resource: R) -> Self {
        self.resource = Some(resource.into());
        self
    }

    #[must_use]
    pub fn tag<K: Into<String>, V: Into<String>>(mut self, key: K, value: V) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Everything the tracer is configured with.
pub struct TracerSettings {
    pub service: Option<String>,
    pub env: Option<String>,
    pub version: Option<String>,
    /// Global span tags, for source code linking.
    pub tags: Tags,
    pub agent_host: String,
    pub agent_port: u16,
    /// Runtime metrics are reported through this client when set.
    pub runtime_metrics: Option<StatsdHandle>,
    pub partial_flush: bool,
    pub partial_flush_min_spans: usize,
    /// Rules run over finished spans before they are flushed.
    pub before_flush: SpanPipeline,
}

/// Tracing entry point.
pub struct Tracing<T> {
    config: Config,
    tracer: T,
}

impl<T: Tracer> Tracing<T> {
    pub fn new(config: Config, tracer: T) -> Self {
        Self { config, tracer }
    }

    pub fn tracer(&self) -> &T {
        &self.tracer
    }

    /// Configures the tracer. Does nothing when reporting is disabled.
    ///
    /// Returns whether the tracer was configured.
    pub fn init(&self, statsd: &Statsd) -> bool {
        if !self.config.enabled() {
            debug!("datadog reporting disabled, not configuring tracer");
            return false;
        }

        self.tracer.configure(self.settings(statsd));
        true
    }

    /// The settings [`init`](Tracing::init) configures the tracer with.
    pub fn settings(&self, statsd: &Statsd) -> TracerSettings {
        let config = &self.config;
        let mut tags = Tags::new();
        if let Some(version) = config.version() {
            tags.insert("git.commit.sha".to_string(), version.to_string());
        }
        if let Some(url) = config.repository_url() {
            tags.insert("git.repository_url".to_string(), url.to_string());
        }

        TracerSettings {
            service: config.service().map(str::to_string),
            env: config.environment().map(str::to_string),
            version: config.version().map(str::to_string),
            tags,
            agent_host: config.agent_host().to_string(),
            agent_port: config.tracing_port(),
            runtime_metrics: statsd.client().cloned(),
            partial_flush: true,
            partial_flush_min_spans: PARTIAL_FLUSH_MIN_SPANS,
            before_flush: SpanPipeline::standard(),
        }
    }

    /// Runs `f` in a new span, with the service and default span tags filled in.
    pub fn span<R, F>(&self, name: &str, mut options: SpanOptions, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        self.enrich_span_options(&mut options);
        self.tracer.trace(name, options, f)
    }

    /// Sets tags on the active span.
    pub fn span_tags(&self, tags: &[(&str, &str)]) {
        if !self.config.enabled() {
            return;
        }
        if let Some(span) = self.tracer.active_span() {
            set_tags(&span, tags);
        }
    }

    /// Sets tags on the root span of the active trace.
    pub fn root_span_tags(&self, tags: &[(&str, &str)]) {
        if !self.config.enabled() {
            return;
        }
        if let Some(span) = self.tracer.active_root_span() {
            set_tags(&span, tags);
        }
    }

    /// Sets the configured service and merges in the default span tags, which win over tags
    /// already present.
    pub fn enrich_span_options(&self, options: &mut SpanOptions) {
        options.service = self.config.service().map(str::to_string);

        let defaults = self.default_span_tags();
        let tags = options.tags.iter().map(|(k, v)| (k.as_str(), v.as_str()));
        options.tags = merge_tags(tags, &defaults);
    }

    pub fn default_span_tags(&self) -> Tags {
        let mut tags = self.config.default_tags();
        tags.insert("component".to_string(), COMPONENT.to_string());
        tags.insert("span.kind".to_string(), "internal".to_string());
        tags.insert("operation".to_string(), "custom_span".to_string());
        tags
    }
}

fn set_tags<S: SpanTags>(span: &S, tags: &[(&str, &str)]) {
    for (k, v) in tags {
        span.set_tag(k, v);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::{SpanOptions, SpanTags, Tracer, TracerSettings, Tracing};
    use crate::common::Tags;
    use crate::config::tests::config_from;
    use crate::config::Config;
    use crate::statsd::Statsd;

    #[derive(Clone, Default)]
    struct RecordedSpan(Rc<RefCell<Tags>>);

    impl SpanTags for RecordedSpan {
        fn set_tag(&self, key: &str, value: &str) {
            self.0.borrow_mut().insert(key.to_string(), value.to_string());
        }
    }

    #[derive(Default)]
    struct FakeTracer {
        configured: RefCell<Option<TracerSettings>>,
        started: RefCell<Vec<(String, SpanOptions)>>,
        active: Option<RecordedSpan>,
        root: Option<RecordedSpan>,
    }

    impl Tracer for FakeTracer {
        type Span = RecordedSpan;

        fn configure(&self, settings: TracerSettings) {
            *self.configured.borrow_mut() = Some(settings);
        }

        fn trace<T, F>(&self, name: &str, options: SpanOptions, f: F) -> T
        where
            F: FnOnce() -> T,
        {
            self.started.borrow_mut().push((name.to_string(), options));
            f()
        }

        fn active_span(&self) -> Option<RecordedSpan> {
            self.active.clone()
        }

        fn active_root_span(&self) -> Option<RecordedSpan> {
            self.root.clone()
        }
    }

    fn production() -> Config {
        config_from(&[
            ("SERVICE_NAME", "payments"),
            ("RAILS_ENV", "production"),
            ("_GIT_REVISION", "abc123"),
            ("DD_GIT_REPOSITORY_URL", "https://github.com/degica/payments"),
        ])
    }

    fn with_spans() -> FakeTracer {
        FakeTracer {
            active: Some(RecordedSpan::default()),
            root: Some(RecordedSpan::default()),
            ..Default::default()
        }
    }

    #[test]
    fn test_enrich_adds_service() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        let mut options = SpanOptions::new();
        tracing.enrich_span_options(&mut options);
        assert_eq!(options.service.as_deref(), Some("payments"));
    }

    #[test]
    fn test_enrich_adds_default_tags() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        let mut options = SpanOptions::new();
        tracing.enrich_span_options(&mut options);
        assert_eq!(options.tags, tracing.default_span_tags());
        assert_eq!(
            options.tags.get("component").map(String::as_str),
            Some("degica_datadog")
        );
        assert_eq!(
            options.tags.get("git.repository_url").map(String::as_str),
            Some("https://github.com/degica/payments")
        );
    }

    #[test]
    fn test_enrich_merges_provided_tags() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        let mut options = SpanOptions::new().tag("foo", "bar");
        tracing.enrich_span_options(&mut options);

        let mut expected = tracing.default_span_tags();
        expected.insert("foo".to_string(), "bar".to_string());
        assert_eq!(options.tags, expected);
    }

    #[test]
    fn test_enrich_default_tags_win() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        let mut options = SpanOptions::new().tag("env", "test");
        tracing.enrich_span_options(&mut options);
        assert_eq!(options.tags, tracing.default_span_tags());
    }

    #[test]
    fn test_span_delegates_enriched_options() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        let value = tracing.span("capture", SpanOptions::new().resource("Capture"), || 7);
        assert_eq!(value, 7);

        let started = tracing.tracer().started.borrow();
        let (name, options) = &started[0];
        assert_eq!(name, "capture");
        assert_eq!(options.resource.as_deref(), Some("Capture"));
        assert_eq!(options.service.as_deref(), Some("payments"));
        assert_eq!(
            options.tags.get("operation").map(String::as_str),
            Some("custom_span")
        );
    }

    #[test]
    fn test_span_tags() {
        let tracing = Tracing::new(production(), with_spans());
        tracing.span_tags(&[("order.id", "42")]);
        tracing.root_span_tags(&[("merchant", "m_1")]);

        let tracer = tracing.tracer();
        let active = tracer.active.as_ref().unwrap().0.borrow();
        let root = tracer.root.as_ref().unwrap().0.borrow();
        assert_eq!(active.get("order.id").map(String::as_str), Some("42"));
        assert_eq!(root.get("merchant").map(String::as_str), Some("m_1"));
        assert!(root.get("order.id").is_none());
    }

    #[test]
    fn test_span_tags_disabled() {
        let config = config_from(&[("RAILS_ENV", "development")]);
        let tracing = Tracing::new(config, with_spans());
        tracing.span_tags(&[("order.id", "42")]);
        tracing.root_span_tags(&[("merchant", "m_1")]);

        let tracer = tracing.tracer();
        assert!(tracer.active.as_ref().unwrap().0.borrow().is_empty());
        assert!(tracer.root.as_ref().unwrap().0.borrow().is_empty());
    }

    #[test]
    fn test_span_tags_without_active_span() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        tracing.span_tags(&[("order.id", "42")]);
        tracing.root_span_tags(&[("merchant", "m_1")]);
    }

    #[test]
    fn test_init() {
        let tracing = Tracing::new(production(), FakeTracer::default());
        assert!(tracing.init(&Statsd::disabled()));

        let configured = tracing.tracer().configured.borrow();
        let settings = configured.as_ref().unwrap();
        assert_eq!(settings.service.as_deref(), Some("payments"));
        assert_eq!(settings.env.as_deref(), Some("production"));
        assert_eq!(settings.version.as_deref(), Some("abc123"));
        assert_eq!(
            settings.tags.get("git.commit.sha").map(String::as_str),
            Some("abc123")
        );
        assert_eq!(settings.agent_host, "localhost");
        assert_eq!(settings.agent_port, 8126);
        assert!(settings.partial_flush);
        assert_eq!(settings.partial_flush_min_spans, 2_000);
        assert_eq!(settings.before_flush.len(), 6);
        assert!(settings.runtime_metrics.is_none());
    }

    #[test]
    fn test_init_disabled() {
        let config = config_from(&[("RAILS_ENV", "test")]);
        let tracing = Tracing::new(config, FakeTracer::default());
        assert!(!tracing.init(&Statsd::disabled()));
        assert!(tracing.tracer().configured.borrow().is_none());
    }
}
