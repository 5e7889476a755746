//! Call-site helpers for reporting counters and timers, built on cadence.
//!
//! ## Initializing the Client
//!
//! Metrics can be used without initializing a client. In that case, all helpers and the
//! [`metric!`] macro become a noop. Only when configured, metrics will actually be reported.
//!
//! To report to a remote aggregator over UDP, use [`init`]:
//!
//! ```no_run
//! tally_client::init(tally_client::ClientConfig {
//!     namespace: "myapp",
//!     host: "127.0.0.1:8125",
//! })
//! .expect("failed to initialize metrics client");
//! ```
//!
//! To feed an aggregator in the same process, use [`init_local`].
//!
//! ## Recording Metrics
//!
//! The free functions take a plain metric name. The name is prefixed with the namespace of the
//! client, so with the namespace `myapp` the following reports `myapp.logins:1|c`:
//!
//! ```
//! tally_client::incr("logins");
//!
//! let mut timing = tally_client::start_timing("render");
//! // render something
//! timing.done();
//!
//! let rows = tally_client::timed("db.query", || 42);
//! ```
//!
//! For type safe metric names, define a [`CounterMetric`] or [`TimerMetric`] and use the
//! [`metric!`] macro:
//!
//! ```
//! use tally_client::{metric, CounterMetric};
//!
//! struct MyCounter;
//!
//! impl CounterMetric for MyCounter {
//!     fn name(&self) -> &'static str {
//!         "counter"
//!     }
//! }
//!
//! metric!(counter(MyCounter) += 1);
//! ```
//!
//! Reporting never fails from the perspective of the caller. Errors while sending are logged.

#![warn(missing_docs)]

use std::cell::RefCell;
use std::fmt;
use std::io;
use std::net::{Ipv4Addr, ToSocketAddrs, UdpSocket};
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence::prelude::*;
use cadence::{Metric, MetricBuilder, MetricSink, QueuingMetricSink, StatsdClient, UdpMetricSink};
use parking_lot::RwLock;
use tally_metrics::Aggregator;

/// Maximum number of metric events that can be queued before we start dropping them.
const METRICS_MAX_QUEUE_SIZE: usize = 100_000;

/// An error returned by [`init`].
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The host could not be resolved.
    #[error("failed to resolve metrics host")]
    Resolve(#[source] io::Error),
    /// The host resolved to no addresses.
    #[error("metrics host resolved to no addresses")]
    NoAddress,
    /// The local socket could not be created.
    #[error("failed to bind metrics socket")]
    Socket(#[source] io::Error),
    /// The sink could not be created.
    #[error("failed to create metrics sink")]
    Sink(#[from] cadence::MetricError),
}

/// Client configuration used for [`init`].
#[derive(Debug)]
pub struct ClientConfig<'a, A> {
    /// Prefix which is prepended to all metric names, separated by a dot.
    pub namespace: &'a str,
    /// Host of the aggregator, resolved once during initialization.
    pub host: A,
}

/// Client object to store globally.
#[derive(Debug)]
pub struct MetricsClient {
    /// The raw statsd client.
    pub statsd_client: StatsdClient,
}

impl Deref for MetricsClient {
    type Target = StatsdClient;

    fn deref(&self) -> &StatsdClient {
        &self.statsd_client
    }
}

impl MetricsClient {
    /// Sends a metric, logging failures.
    #[inline(always)]
    pub fn send_metric<'a, T>(&'a self, metric: MetricBuilder<'a, '_, T>)
    where
        T: Metric + From<String>,
    {
        if let Err(error) = metric.try_send() {
            tally_log::debug!(
                error = &error as &dyn std::error::Error,
                maximum_capacity = METRICS_MAX_QUEUE_SIZE,
                "failed to send a metric",
            );
        }
    }
}

/// A sink that feeds every emitted metric into an in-process [`Aggregator`].
struct AggregatorSink(AssertUnwindSafe<Arc<Aggregator>>);

impl fmt::Debug for AggregatorSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AggregatorSink").finish()
    }
}

impl MetricSink for AggregatorSink {
    fn emit(&self, metric: &str) -> io::Result<usize> {
        let stats = self.0.ingest_payload(metric.as_bytes());
        if stats.discarded > 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "aggregator rejected metric",
            ));
        }
        Ok(metric.len())
    }
}

static METRICS_CLIENT: RwLock<Option<Arc<MetricsClient>>> = RwLock::new(None);

thread_local! {
    static CURRENT_CLIENT: RefCell<Option<Arc<MetricsClient>>> = RefCell::new(METRICS_CLIENT.read().clone());
}

/// Set a new client, replacing the current one.
pub fn set_client(client: MetricsClient) {
    let client = Arc::new(client);
    *METRICS_CLIENT.write() = Some(client.clone());
    CURRENT_CLIENT.with(|cell| cell.replace(Some(client)));
}

/// Disable the client again.
///
/// Threads that already hold the previous client keep reporting until they are restarted.
pub fn disable() {
    *METRICS_CLIENT.write() = None;
    CURRENT_CLIENT.with(|cell| cell.replace(None));
}

/// Tell the metrics system to report to a remote aggregator over UDP.
///
/// Metrics are queued and sent from a background thread.
pub fn init<A: ToSocketAddrs>(config: ClientConfig<'_, A>) -> Result<(), ClientError> {
    let addr = config
        .host
        .to_socket_addrs()
        .map_err(ClientError::Resolve)?
        .next()
        .ok_or(ClientError::NoAddress)?;

    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).map_err(ClientError::Socket)?;
    socket.set_nonblocking(true).map_err(ClientError::Socket)?;

    let udp_sink = UdpMetricSink::from(addr, socket)?;
    let sink = QueuingMetricSink::with_capacity(udp_sink, METRICS_MAX_QUEUE_SIZE);

    tally_log::info!("reporting metrics to {addr}");
    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(config.namespace, sink),
    });

    Ok(())
}

/// Tell the metrics system to report into the given aggregator.
///
/// The aggregator must not be flushed from within a metric call.
pub fn init_local(aggregator: Arc<Aggregator>, namespace: &str) {
    let sink = AggregatorSink(AssertUnwindSafe(aggregator));
    set_client(MetricsClient {
        statsd_client: StatsdClient::from_sink(namespace, sink),
    });
}

/// Invoke a callback with the current client.
///
/// If no client is configured the callback is not invoked. For the most part the helper
/// functions or the [`metric!`] macro should be used instead.
#[inline(always)]
pub fn with_client<F, R>(f: F) -> R
where
    F: FnOnce(&MetricsClient) -> R,
    R: Default,
{
    CURRENT_CLIENT.with(|client| {
        if let Some(client) = client.borrow().as_deref() {
            f(client)
        } else {
            R::default()
        }
    })
}

/// Set a test client for the period of the called function (only affects the current thread).
///
/// Returns all metrics emitted while `f` ran in the wire format.
pub fn with_capturing_test_client(f: impl FnOnce()) -> Vec<String> {
    let (rx, sink) = cadence::SpyMetricSink::new();
    let test_client = MetricsClient {
        statsd_client: StatsdClient::from_sink("", sink),
    };

    CURRENT_CLIENT.with(|cell| {
        let old_client = cell.replace(Some(Arc::new(test_client)));
        f();
        cell.replace(old_client);
    });

    rx.iter()
        .map(|x| String::from_utf8_lossy(&x).into_owned())
        .collect()
}

/// Converts a duration to whole milliseconds, rounding half up.
fn duration_millis(duration: Duration) -> u64 {
    let millis = (duration.as_nanos() + 500_000) / 1_000_000;
    u64::try_from(millis).unwrap_or(u64::MAX)
}

/// Adds `delta` to a counter.
///
/// Does nothing if `name` is empty or `delta` is zero.
pub fn add(name: &str, delta: i64) {
    if name.is_empty() || delta == 0 {
        return;
    }

    with_client(|client| client.send_metric(client.count_with_tags(name, delta)));
}

/// Increments a counter by one.
pub fn incr(name: &str) {
    add(name, 1);
}

/// Records a duration with a timer.
///
/// The duration is reported in whole milliseconds. Does nothing if `name` is empty or `elapsed`
/// is zero.
pub fn timing(name: &str, elapsed: Duration) {
    if name.is_empty() || elapsed.is_zero() {
        return;
    }

    let millis = duration_millis(elapsed);
    with_client(|client| client.send_metric(client.time_with_tags(name, millis)));
}

/// A running measurement started by [`start_timing`].
#[derive(Debug)]
#[must_use = "call `done` to record the timing"]
pub struct Timing {
    name: String,
    start: Option<Instant>,
}

impl Timing {
    /// Records the time elapsed since the timing started.
    ///
    /// Only the first call records a value, subsequent calls do nothing.
    pub fn done(&mut self) {
        if let Some(start) = self.start.take() {
            timing(&self.name, start.elapsed());
        }
    }

    /// Returns `true` if the timing has been recorded.
    pub fn is_done(&self) -> bool {
        self.start.is_none()
    }
}

/// Starts measuring time for a timer.
///
/// Call [`Timing::done`] to record the elapsed time.
pub fn start_timing(name: impl Into<String>) -> Timing {
    Timing {
        name: name.into(),
        start: Some(Instant::now()),
    }
}

/// Runs `f` and increments the counter `name` afterwards.
pub fn counted<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let rv = f();
    incr(name);
    rv
}

/// Runs `f` and records its duration with the timer `name`.
pub fn timed<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let rv = f();
    timing(name, start.elapsed());
    rv
}

/// A metric for capturing timings.
///
/// Timings are a positive number of milliseconds between a start and end time. Examples include
/// time taken to render a web page or time taken for a database call to return.
///
/// ## Example
///
/// ```
/// use tally_client::{metric, TimerMetric};
///
/// enum MyTimer {
///     ProcessA,
///     ProcessB,
/// }
///
/// impl TimerMetric for MyTimer {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::ProcessA => "process_a",
///             Self::ProcessB => "process_b",
///         }
///     }
/// }
///
/// # fn process_a() {}
///
/// // measure time by explicitly setting a std::timer::Duration
/// # use std::time::Instant;
/// let start_time = Instant::now();
/// process_a();
/// metric!(timer(MyTimer::ProcessA) = start_time.elapsed());
///
/// // measure time implicitly by enclosing a code block in a metric
/// metric!(timer(MyTimer::ProcessB), {
///     process_a();
/// });
/// ```
pub trait TimerMetric {
    /// Returns the timer metric name that will be reported.
    fn name(&self) -> &'static str;
}

/// A metric for capturing counters.
///
/// Counters are simple values incremented or decremented by a client. Examples of counter uses
/// include number of logins to a system or requests received.
///
/// ## Example
///
/// ```
/// use tally_client::{metric, CounterMetric};
///
/// enum MyCounter {
///     TotalRequests,
///     TotalBytes,
/// }
///
/// impl CounterMetric for MyCounter {
///     fn name(&self) -> &'static str {
///         match self {
///             Self::TotalRequests => "total_requests",
///             Self::TotalBytes => "total_bytes",
///         }
///     }
/// }
///
/// # let buffer = &[(), ()];
///
/// // add to the counter
/// metric!(counter(MyCounter::TotalRequests) += 1);
/// metric!(counter(MyCounter::TotalBytes) += buffer.len() as i64);
///
/// // subtract from the counter
/// metric!(counter(MyCounter::TotalRequests) -= 1);
/// ```
pub trait CounterMetric {
    /// Returns the counter metric name that will be reported.
    fn name(&self) -> &'static str;
}

/// Emits a metric.
///
/// See [crate-level documentation](self) for examples.
#[macro_export]
macro_rules! metric {
    // counter increment
    (counter($id:expr) += $value:expr $(,)?) => {
        $crate::add($crate::CounterMetric::name(&$id), $value)
    };

    // counter decrement
    (counter($id:expr) -= $value:expr $(,)?) => {
        $crate::add($crate::CounterMetric::name(&$id), -($value))
    };

    // timer value
    (timer($id:expr) = $value:expr $(,)?) => {
        $crate::timing($crate::TimerMetric::name(&$id), $value)
    };

    // timed block
    (timer($id:expr), $block:block) => {{
        let now = std::time::Instant::now();
        let rv = {$block};
        $crate::metric!(timer($id) = now.elapsed());
        rv
    }};
}
