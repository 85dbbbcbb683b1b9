use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use tokio::{net::UdpSocket, runtime};
use tracing::{debug, error};

use crate::common::{BuildError, Tags};
use crate::config::Config;
use crate::recorder::{Buffer, Inner, StatsdHandle, StatsdRecorder};

use std::net::{SocketAddr, ToSocketAddrs};

type ExporterFuture = Pin<Box<dyn Future<Output = io::Result<()>> + Send + 'static>>;

/// How often buffered lines are pushed to the agent unless configured otherwise.
pub const DEFAULT_PUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on the bytes buffered between two pushes unless configured otherwise.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Clone)]
enum ExporterConfig {
    PushGateway {
        endpoint: SocketAddr,
        interval: Duration,
    },

    Unconfigured,
}

impl ExporterConfig {
    fn as_type_str(&self) -> &'static str {
        match self {
            Self::PushGateway { .. } => "push-gateway",
            Self::Unconfigured => "unconfigured",
        }
    }
}

/// Builder for creating and installing a statsd recorder/exporter.
pub struct StatsdBuilder {
    exporter_config: ExporterConfig,
    prefix: Option<String>,
    global_tags: Option<Tags>,
    max_packet_size: usize,
    max_buffer_size: usize,
}

impl StatsdBuilder {
    /// Creates a new [`StatsdBuilder`].
    pub fn new() -> Self {
        Self {
            exporter_config: ExporterConfig::Unconfigured,
            prefix: None,
            global_tags: None,
            max_packet_size: 1432,
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
        }
    }

    /// Creates a builder pushing to the agent's statsd port, with the configuration's default
    /// tags as global tags.
    ///
    /// ## Errors
    ///
    /// If the agent host does not resolve to a socket address.
    pub fn from_config(config: &Config) -> Result<Self, BuildError> {
        let builder = config
            .default_tags()
            .into_iter()
            .fold(Self::new(), |builder, (k, v)| builder.add_global_tag(k, v));

        builder.with_push_gateway(
            (config.agent_host(), config.statsd_port()),
            DEFAULT_PUSH_INTERVAL,
        )
    }

    /// Configures the exporter to push periodic requests to a statsd agent
    ///
    /// ## Errors
    ///
    /// If the given endpoint cannot be parsed into a valid SocketAddr, an error variant will be
    /// returned describing the error.
    pub fn with_push_gateway<T>(
        mut self,
        endpoint: T,
        interval: Duration,
    ) -> Result<Self, BuildError>
    where
        T: ToSocketAddrs,
    {
        let endpoint = endpoint
            .to_socket_addrs()
            .map_err(|e| BuildError::InvalidPushGatewayEndpoint(e.to_string()))?
            .next() // just use the first address we resolve to
            .ok_or_else(|| {
                BuildError::InvalidPushGatewayEndpoint(
                    "to_socket_addrs returned an empty iterator".to_string(),
                )
            })?;

        self.exporter_config = ExporterConfig::PushGateway { endpoint, interval };

        Ok(self)
    }

    /// Adds a global tag to this exporter.
    ///
    /// Global tags are applied to all metrics and take precedence over tags supplied with the
    /// metric itself.  If this method is called multiple times, the latest value for a given
    /// tag key will be used.
    #[must_use]
    pub fn add_global_tag<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let tags = self.global_tags.get_or_insert_with(Tags::new);
        tags.insert(key.into(), value.into());
        self
    }

    /// Sets the maximum size of packets going out to the gateway.
    ///
    /// Defaults to 1432 bytes
    #[must_use]
    pub fn set_max_packet_size(mut self, size: usize) -> Self {
        self.max_packet_size = size;
        self
    }

    /// Sets how many bytes of metric lines may be buffered between two pushes. Lines past the
    /// limit are dropped until the next push drains the buffer.
    ///
    /// Defaults to [`DEFAULT_MAX_BUFFER_SIZE`].
    #[must_use]
    pub fn set_max_buffer_size(mut self, size: usize) -> Self {
        self.max_buffer_size = size;
        self
    }

    /// Adds a global prefix for every metric name.
    #[must_use]
    pub fn set_global_prefix<P>(mut self, prefix: P) -> Self
    where
        P: Into<String>,
    {
        self.prefix = Some(prefix.into());
        self
    }

    /// Builds the recorder and exporter and installs the recorder globally, so that the
    /// `metrics` macros report through it as well.
    ///
    /// The exporter is only started once the recorder is installed.
    ///
    /// ## Errors
    ///
    /// If there is an error while either building the recorder and exporter, or installing the
    /// recorder, an error variant will be returned describing the error.
    pub fn install(self) -> Result<StatsdHandle, BuildError> {
        let thread_name = self.thread_name();
        let (recorder, exporter) = self.build()?;
        let handle = recorder.handle();

        metrics::set_global_recorder(recorder)
            .map_err(|e| BuildError::FailedToSetGlobalRecorder(e.to_string()))?;
        run_exporter(thread_name, exporter)?;

        Ok(handle)
    }

    /// Builds the recorder and exporter and starts the exporter.
    ///
    /// When called from within a Tokio runtime, the exporter future is spawned directly
    /// into the runtime.  Otherwise, a new single-threaded Tokio runtime is created
    /// on a background thread, and the exporter is spawned there.
    ///
    /// ## Errors
    ///
    /// If there is an error while building the recorder and exporter, or while creating the
    /// background runtime.
    pub fn spawn(self) -> Result<StatsdRecorder, BuildError> {
        let thread_name = self.thread_name();
        let (recorder, exporter) = self.build()?;
        run_exporter(thread_name, exporter)?;

        Ok(recorder)
    }

    fn thread_name(&self) -> String {
        format!(
            "degica-datadog-statsd-{}",
            self.exporter_config.as_type_str()
        )
    }

    /// Builds the recorder and exporter and returns them both.
    ///
    /// In most cases, users should prefer [`install`][StatsdBuilder::install] or
    /// [`spawn`][StatsdBuilder::spawn].  If the exporter needs to be scheduled in a particular
    /// way, this method provides the flexibility to do so.
    ///
    /// ## Errors
    ///
    /// If no push gateway was configured.
    pub fn build(self) -> Result<(StatsdRecorder, ExporterFuture), BuildError> {
        let max_packet_size = self.max_packet_size;
        let exporter_config = self.exporter_config.clone();
        let recorder = self.build_recorder();
        let handle = recorder.handle();

        match exporter_config {
            ExporterConfig::Unconfigured => Err(BuildError::MissingExporterConfiguration),
            ExporterConfig::PushGateway { endpoint, interval } => {
                let exporter = async move {
                    let client = UdpSocket::bind(bind_address(&endpoint)).await?;
                    debug!(%endpoint, "pushing statsd metrics");

                    loop {
                        // Sleep for `interval` amount of time, and then do a push.
                        tokio::time::sleep(interval).await;

                        let output = handle.render();
                        if output.is_empty() {
                            continue;
                        }
                        if let Err(e) = send_all(&client, output, &endpoint, max_packet_size).await
                        {
                            error!("error sending request to push gateway: {:?}", e);
                        }
                    }
                };

                Ok((recorder, Box::pin(exporter)))
            }
        }
    }

    /// Builds the recorder and returns it.
    pub fn build_recorder(self) -> StatsdRecorder {
        let inner = Inner {
            prefix: self.prefix,
            default_tags: self.global_tags.unwrap_or_default(),
            max_buffer_size: self.max_buffer_size,
            buffer: Mutex::new(Buffer::default()),
        };

        StatsdRecorder::from(inner)
    }
}

impl Default for StatsdBuilder {
    fn default() -> Self {
        StatsdBuilder::new()
    }
}

fn run_exporter(thread_name: String, exporter: ExporterFuture) -> Result<(), BuildError> {
    let exporter = log_exporter_failure(exporter);

    if let Ok(handle) = runtime::Handle::try_current() {
        handle.spawn(exporter);
        return Ok(());
    }

    let runtime = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

    thread::Builder::new()
        .name(thread_name)
        .spawn(move || runtime.block_on(exporter))
        .map_err(|e| BuildError::FailedToCreateRuntime(e.to_string()))?;

    Ok(())
}

// The push loop only returns on failure; metrics recorded afterwards stay buffered up to the
// buffer limit.
async fn log_exporter_failure(exporter: ExporterFuture) {
    if let Err(e) = exporter.await {
        error!("statsd exporter stopped: {}", e);
    }
}

fn bind_address(endpoint: &SocketAddr) -> &'static str {
    match endpoint {
        SocketAddr::V4(_) => "0.0.0.0:0",
        SocketAddr::V6(_) => "[::]:0",
    }
}

// Packets are split along new lines because that's how the dogstatsd protocol works
// so we look for \n in the buffer and try to put them together at that delimiter.
fn split_in_packets(buf: &[u8], max_packet_size: usize) -> Vec<(usize, usize)> {
    let mut n_pos_iter = buf.iter();
    let mut last_sent = 0;
    let mut packets = vec![];
    let mut acc = 0;
    let mut previous_acc = acc;

    while let Some(next_send_candidate) = n_pos_iter.position(|&c| c == b'\n') {
        acc += next_send_candidate + 1;
        match acc.cmp(&max_packet_size) {
            std::cmp::Ordering::Less => (), // check if there's a bigger opportunity
            std::cmp::Ordering::Equal => {
                // we can't be any bigger so save this position
                packets.push((last_sent, last_sent + acc));
                last_sent += acc;
                acc = 0;
            }
            std::cmp::Ordering::Greater => {
                // we gone over, if we have a previous accumulator that has something,
                // flush it out.
                if previous_acc != 0 {
                    packets.push((last_sent, last_sent + previous_acc));
                    last_sent += previous_acc;
                    acc = next_send_candidate + 1;
                }

                // if the currently evaluated row is already too big on its own
                // we just flush it out and start with a new accumulator
                if next_send_candidate + 1 > max_packet_size {
                    packets.push((last_sent, last_sent + acc));
                    last_sent += acc;
                    acc = 0;
                }
            }
        }
        previous_acc = acc;
    }

    if acc != 0 {
        // we finished without pushing the tail, flush what we've accumulated so the next
        // packet doesn't go over the max size
        packets.push((last_sent, last_sent + acc));
        last_sent += acc;
    }
    // trailing bytes without a final newline
    if last_sent < buf.len() {
        packets.push((last_sent, buf.len()));
    }

    packets
}

async fn send_all(
    client: &UdpSocket,
    body: String,
    endpoint: &SocketAddr,
    max_packet_size: usize,
) -> io::Result<()> {
    let buf = body.as_bytes();

    let mut sent = 0;
    let packets = split_in_packets(buf, max_packet_size);
    for (start, end) in packets {
        match client.send_to(&buf[start..end], endpoint).await {
            Ok(nsent) => {
                if nsent != (end - start) {
                    error!(
                        "Somehow this UDP socket sent less bytes ({}) than it was asked ({})",
                        nsent,
                        end - start
                    );
                }
                sent += nsent;
            }
            Err(e) => {
                // skip this packet and keep sending the other ones
                error!("error encountered while sending {:?}", e);
            }
        }
    }
    if sent != buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            "sent different size than received",
        ));
    }
    Ok(())
}
