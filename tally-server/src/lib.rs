//! The Tally server.
//!
//! The server receives statsd-style samples over UDP, aggregates them in a shared
//! [`Aggregator`](tally_metrics::Aggregator) and flushes the aggregated statistics to a
//! [`Sink`] in regular intervals.
//!
//! # Services
//!
//! - [`UdpListener`] receives datagrams on `server.host:server.port`. Each datagram may contain
//!   multiple newline-separated samples. Malformed lines are discarded and never reported back.
//! - [`FlushService`] flushes the aggregator every `aggregator.flush_interval` seconds and hands
//!   non-empty batches to the sink. On shutdown, it performs a final flush.
//! - [`GraphiteSink`] writes batches to a carbon receiver using the plaintext protocol. When no
//!   graphite host is configured, the [`DiscardSink`] drops all batches instead.
//!
//! Failures to deliver a batch are logged and the batch is dropped. There is no retry.
#![warn(missing_docs)]

mod flush;
mod listener;
mod service;
mod sink;
mod statsd;

use std::sync::Arc;

use tally_config::Config;

pub use crate::flush::FlushService;
pub use crate::listener::UdpListener;
pub use crate::service::{
    ServerError, ServiceState, create_runtime, sink_from_config, wait_for_shutdown,
};
pub use crate::sink::{DiscardSink, GraphiteSink, Sink, SinkError};

/// Runs the server until a shutdown signal is received.
///
/// This blocks the current thread. It creates a runtime, binds the UDP listener and starts the
/// flush service. After `SIGINT` or `SIGTERM`, the listener stops and the aggregator is flushed
/// one last time before this function returns.
pub fn run(config: Config) -> Result<(), ServerError> {
    let config = Arc::new(config);
    let runtime = create_runtime("tally-worker")?;

    runtime.block_on(async move {
        let sink = sink_from_config(&config);
        let state = ServiceState::start(config.clone(), sink).await?;

        let aggregator = config.aggregator_config();
        tally_log::info!("tally server listening on udp://{}", state.local_addr());
        match config.graphite_addr() {
            Some(addr) => tally_log::info!("flushing to graphite at {addr}"),
            None => tally_log::info!("flushing to nowhere"),
        }
        tally_log::info!(
            "flush interval: {}s, percentile threshold: {}",
            aggregator.flush_interval,
            aggregator.percentile_threshold()
        );

        wait_for_shutdown().await;
        tally_log::info!("shutting down");
        state.shutdown().await;

        Ok(())
    })
}
