//! Convenience wrappers for reporting metrics.
//!
//! Every call is a no-op when reporting is disabled, so call sites never need to check.
use std::fmt::Display;
use std::future::Future;

use quanta::{Clock, Instant};

use crate::builder::StatsdBuilder;
use crate::common::BuildError;
use crate::config::Config;
use crate::recorder::StatsdHandle;

/// Metric reporting entry point.
#[derive(Clone)]
pub struct Statsd {
    client: Option<StatsdHandle>,
    clock: Clock,
}

impl Statsd {
    /// Starts a statsd exporter for `config`, or returns a disabled instance if reporting is
    /// off.
    ///
    /// ## Errors
    ///
    /// If the exporter cannot be built or started.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        if !config.enabled() {
            return Ok(Self::disabled());
        }
        let recorder = StatsdBuilder::from_config(config)?.spawn()?;
        Ok(Self::new(recorder.handle()))
    }

    /// Like [`from_config`](Statsd::from_config), but also installs the recorder as the global
    /// `metrics` recorder. Can succeed at most once per process.
    ///
    /// ## Errors
    ///
    /// If the exporter cannot be started or a global recorder is already installed.
    pub fn install(config: &Config) -> Result<Self, BuildError> {
        if !config.enabled() {
            return Ok(Self::disabled());
        }
        let handle = StatsdBuilder::from_config(config)?.install()?;
        Ok(Self::new(handle))
    }

    pub fn new(client: StatsdHandle) -> Self {
        Self {
            client: Some(client),
            clock: Clock::new(),
        }
    }

    pub fn disabled() -> Self {
        Self {
            client: None,
            clock: Clock::new(),
        }
    }

    /// Replaces the clock used for timings.
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn enabled(&self) -> bool {
        self.client.is_some()
    }

    pub fn client(&self) -> Option<&StatsdHandle> {
        self.client.as_ref()
    }

    /// Records how long `f` takes, in milliseconds, as a histogram and returns its result.
    ///
    /// Datadog derives `.count`, `.max`, `.median`, `.avg` and `.95percentile` from it. The
    /// timing is reported even if `f` panics.
    pub fn with_timing<T, F>(&self, name: &str, tags: &[(&str, &str)], f: F) -> T
    where
        F: FnOnce() -> T,
    {
        let _timing = self.start_timing(name, tags);
        f()
    }

    /// Async version of [`with_timing`](Statsd::with_timing). A future dropped before
    /// completion is still reported.
    pub async fn with_timing_async<T, F>(&self, name: &str, tags: &[(&str, &str)], fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let _timing = self.start_timing(name, tags);
        fut.await
    }

    fn start_timing<'a>(&'a self, name: &'a str, tags: &'a [(&'a str, &'a str)]) -> Timing<'a> {
        Timing {
            statsd: self,
            name,
            tags,
            start: self.client.as_ref().map(|_| self.clock.now()),
        }
    }

    /// Records a count. Use a negative amount to decrement. Recorded amounts are summed up.
    pub fn count(&self, name: &str, amount: i64, tags: &[(&str, &str)]) {
        if let Some(client) = &self.client {
            client.count(name, amount, tags);
        }
    }

    pub fn increment(&self, name: &str, tags: &[(&str, &str)]) {
        self.count(name, 1, tags);
    }

    /// Records the current value of something, e.g. the depth of a queue. The metric is the
    /// last recorded value.
    pub fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Some(client) = &self.client {
            client.gauge(name, value, tags);
        }
    }

    /// Records a value for a distribution, e.g. a file size or a risk score, with percentiles
    /// computed server side.
    pub fn distribution(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Some(client) = &self.client {
            client.distribution(name, value, tags);
        }
    }

    pub fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        if let Some(client) = &self.client {
            client.histogram(name, value, tags);
        }
    }

    /// Records an item for a set size metric: a gauge counting unique items over time.
    pub fn set<T: Display>(&self, name: &str, item: T, tags: &[(&str, &str)]) {
        if let Some(client) = &self.client {
            client.set(name, item, tags);
        }
    }
}

/// Reports the elapsed time when dropped.
struct Timing<'a> {
    statsd: &'a Statsd,
    name: &'a str,
    tags: &'a [(&'a str, &'a str)],
    start: Option<Instant>,
}

impl Drop for Timing<'_> {
    fn drop(&mut self) {
        if let Some(start) = self.start {
            let elapsed = self.statsd.clock.now().duration_since(start);
            let millis = elapsed.as_secs_f64() * 1_000.0;
            self.statsd.histogram(self.name, millis, self.tags);
        }
    }
}
