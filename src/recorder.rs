use std::fmt::Display;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use metrics::{
    Counter, CounterFn, Gauge, GaugeFn, Histogram, HistogramFn, Key, KeyName, Metadata, Recorder,
    SharedString, Unit,
};
use tracing::warn;

use crate::common::Tags;
use crate::formatting::{sanitize_set_member, tags_to_labels, write_metric_line, MetricType};
use crate::tags::merge_tags;

#[derive(Debug)]
pub(crate) struct Inner {
    pub prefix: Option<String>,
    pub default_tags: Tags,
    pub max_buffer_size: usize,
    pub buffer: Mutex<Buffer>,
}

/// Lines waiting for the next push.
#[derive(Debug, Default)]
pub(crate) struct Buffer {
    lines: String,
    dropped: usize,
}

impl Inner {
    fn write<'a, T, I>(&self, mtype: MetricType, name: &str, value: T, tags: I)
    where
        T: Display,
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let labels = tags_to_labels(&merge_tags(tags, &self.default_tags));
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        let start = buffer.lines.len();
        write_metric_line(
            &mut buffer.lines,
            self.prefix.as_deref(),
            name,
            mtype,
            &labels,
            value,
        );

        if buffer.lines.len() > self.max_buffer_size {
            buffer.lines.truncate(start);
            if buffer.dropped == 0 {
                warn!(
                    max_buffer_size = self.max_buffer_size,
                    "statsd buffer is full, dropping metrics until the next push"
                );
            }
            buffer.dropped += 1;
        }
    }

    fn render(&self) -> String {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
        if buffer.dropped > 0 {
            warn!(dropped = buffer.dropped, "dropped statsd lines while the buffer was full");
            buffer.dropped = 0;
        }
        mem::take(&mut buffer.lines)
    }
}

/// A [`Recorder`] that renders every observation as a dogstatsd line, tagged with the default
/// tags.
pub struct StatsdRecorder {
    inner: Arc<Inner>,
}

impl StatsdRecorder {
    pub fn handle(&self) -> StatsdHandle {
        StatsdHandle {
            inner: self.inner.clone(),
        }
    }
}

impl From<Inner> for StatsdRecorder {
    fn from(inner: Inner) -> Self {
        StatsdRecorder {
            inner: Arc::new(inner),
        }
    }
}

impl Recorder for StatsdRecorder {
    fn describe_counter(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}
    fn describe_gauge(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}
    fn describe_histogram(&self, _k: KeyName, _u: Option<Unit>, _d: SharedString) {}

    fn register_counter(&self, key: &Key, _metadata: &Metadata<'_>) -> Counter {
        Counter::from_arc(Arc::new(KeyWriter::new(key, &self.inner)))
    }

    fn register_gauge(&self, key: &Key, _metadata: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(KeyWriter::new(key, &self.inner)))
    }

    fn register_histogram(&self, key: &Key, _metadata: &Metadata<'_>) -> Histogram {
        Histogram::from_arc(Arc::new(KeyWriter::new(key, &self.inner)))
    }
}

/// Writes the observations of one `metrics` key.
struct KeyWriter {
    name: String,
    labels: Vec<(String, String)>,
    inner: Arc<Inner>,
}

impl KeyWriter {
    fn new(key: &Key, inner: &Arc<Inner>) -> Self {
        Self {
            name: key.name().to_string(),
            labels: key
                .labels()
                .map(|l| (l.key().to_string(), l.value().to_string()))
                .collect(),
            inner: inner.clone(),
        }
    }

    fn write<T: Display>(&self, mtype: MetricType, value: T) {
        self.inner.write(
            mtype,
            &self.name,
            value,
            self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())),
        );
    }
}

impl CounterFn for KeyWriter {
    fn increment(&self, value: u64) {
        self.write(MetricType::Count, value);
    }

    // Statsd has no absolute counters; report the value as a gauge.
    fn absolute(&self, value: u64) {
        self.write(MetricType::Gauge, value);
    }
}

impl GaugeFn for KeyWriter {
    // Dogstatsd has no relative gauges, so relative changes go out as counts.
    fn increment(&self, value: f64) {
        self.write(MetricType::Count, value);
    }

    fn decrement(&self, value: f64) {
        self.write(MetricType::Count, -value);
    }

    fn set(&self, value: f64) {
        self.write(MetricType::Gauge, value);
    }
}

impl HistogramFn for KeyWriter {
    fn record(&self, value: f64) {
        self.write(MetricType::Histogram, value);
    }
}

/// Handle for writing to and draining a [`StatsdRecorder`].
///
/// Writes land in an in-memory buffer; the push gateway task periodically drains it with
/// [`render`](StatsdHandle::render) and sends the lines to the agent.
#[derive(Clone, Debug)]
pub struct StatsdHandle {
    inner: Arc<Inner>,
}

impl StatsdHandle {
    pub fn count(&self, name: &str, amount: i64, tags: &[(&str, &str)]) {
        self.inner.write(MetricType::Count, name, amount, tags.iter().copied());
    }

    pub fn gauge(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.inner.write(MetricType::Gauge, name, value, tags.iter().copied());
    }

    pub fn histogram(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.inner.write(MetricType::Histogram, name, value, tags.iter().copied());
    }

    pub fn distribution(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.inner.write(MetricType::Distribution, name, value, tags.iter().copied());
    }

    pub fn set<T: Display>(&self, name: &str, item: T, tags: &[(&str, &str)]) {
        let member = sanitize_set_member(&item.to_string());
        self.inner.write(MetricType::Set, name, member, tags.iter().copied());
    }

    /// Drains the buffered lines into a payload in the dogstatsd datagram format.
    pub fn render(&self) -> String {
        self.inner.render()
    }
}

#[cfg(test)]
mod tests {
    use metrics::{Key, Label, Level, Metadata, Recorder};
    use tracing_test::traced_test;

    use crate::builder::StatsdBuilder;

    static METADATA: Metadata = Metadata::new(module_path!(), Level::INFO, Some(module_path!()));

    #[test]
    fn test_render() {
        let recorder = StatsdBuilder::new().build_recorder();
        let handle = recorder.handle();

        let key = Key::from_name("basic.counter");
        let counter1 = recorder.register_counter(&key, &METADATA);
        counter1.increment(42);
        assert_eq!(handle.render(), "basic.counter:42|c\n");

        // each render call drains the buffer
        assert_eq!(handle.render(), "");

        let labels = vec![Label::new("wutang", "forever")];
        let key = Key::from_parts("basic.gauge", labels);
        let gauge1 = recorder.register_gauge(&key, &METADATA);
        gauge1.set(-3.44);
        gauge1.decrement(2.0);
        assert_eq!(
            handle.render(),
            "basic.gauge:-3.44|g|#wutang:forever\nbasic.gauge:-2|c|#wutang:forever\n"
        );

        let key = Key::from_name("basic.histogram");
        let histogram1 = recorder.register_histogram(&key, &METADATA);
        histogram1.record(12.0);
        assert_eq!(handle.render(), "basic.histogram:12|h\n");
    }

    #[test]
    #[traced_test]
    fn test_full_buffer_drops_lines() {
        let handle = StatsdBuilder::new()
            .set_max_buffer_size(24)
            .build_recorder()
            .handle();

        handle.count("first", 1, &[]);
        handle.count("second", 1, &[]);
        for _ in 0..1_000 {
            handle.count("third", 1, &[]);
        }
        assert!(logs_contain("statsd buffer is full"));
        assert_eq!(handle.render(), "first:1|c\nsecond:1|c\n");
        assert!(logs_contain("dropped=1000"));

        // a drained buffer accepts lines again
        handle.count("third", 1, &[]);
        assert_eq!(handle.render(), "third:1|c\n");
    }

    #[test]
    fn test_default_tags_override_key_labels() {
        let recorder = StatsdBuilder::new()
            .add_global_tag("env", "production")
            .build_recorder();

        let key = Key::from_parts(
            "jobs.done",
            vec![Label::new("env", "test"), Label::new("queue", "mailers")],
        );
        recorder.register_counter(&key, &METADATA).increment(1);
        assert_eq!(
            recorder.handle().render(),
            "jobs.done:1|c|#env:production,queue:mailers\n"
        );
    }

    #[test]
    fn test_handle_writes() {
        let handle = StatsdBuilder::new()
            .set_global_prefix("degica")
            .add_global_tag("service", "payments")
            .build_recorder()
            .handle();

        handle.count("refunds", -2, &[("reason", "fraud")]);
        handle.distribution("risk.score", 0.25, &[]);
        handle.set("customers", "cus_1|x", &[]);
        assert_eq!(
            handle.render(),
            concat!(
                "degica.refunds:-2|c|#reason:fraud,service:payments\n",
                "degica.risk.score:0.25|d|#service:payments\n",
                "degica.customers:cus_1_x|s|#service:payments\n",
            )
        );
    }
}
