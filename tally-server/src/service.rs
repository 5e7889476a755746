use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tally_config::Config;
use tally_metrics::Aggregator;
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::flush::FlushService;
use crate::listener::UdpListener;
use crate::sink::{DiscardSink, GraphiteSink, Sink};

/// Indicates the type of failure of the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The tokio runtime could not be created.
    #[error("could not create the runtime")]
    Runtime(#[source] io::Error),

    /// Binding the UDP listener failed.
    #[error("could not bind the udp listener to {addr}")]
    Bind {
        /// The configured listen address.
        addr: SocketAddr,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
}

/// Constructs a multi-threaded tokio [`Runtime`] with all drivers enabled.
pub fn create_runtime(name: &str) -> Result<Runtime, ServerError> {
    tokio::runtime::Builder::new_multi_thread()
        .thread_name(name)
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)
}

/// Creates the sink for flushed batches from the configuration.
///
/// Without a graphite host, batches are discarded.
pub fn sink_from_config(config: &Config) -> Arc<dyn Sink> {
    match config.graphite_addr() {
        Some(addr) => Arc::new(GraphiteSink::new(addr, config.graphite_connect_timeout())),
        None => {
            tally_log::warn!("graphite is not configured, flushed statistics will be discarded");
            Arc::new(DiscardSink)
        }
    }
}

/// Running server state.
///
/// Holds the shared aggregator and the handles of the listener and flush tasks.
#[derive(Debug)]
pub struct ServiceState {
    local_addr: SocketAddr,
    aggregator: Arc<Aggregator>,
    stop_listener: CancellationToken,
    stop_flusher: CancellationToken,
    listener: JoinHandle<()>,
    flusher: JoinHandle<()>,
}

impl ServiceState {
    /// Binds the listener and spawns the listener and flush tasks on the current runtime.
    pub async fn start(config: Arc<Config>, sink: Arc<dyn Sink>) -> Result<Self, ServerError> {
        let aggregator = Arc::new(Aggregator::new(config.aggregator_config().clone()));

        let addr = config.listen_addr();
        let listener = UdpListener::bind(addr, aggregator.clone(), config.max_datagram_size())
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let stop_listener = CancellationToken::new();
        let stop_flusher = CancellationToken::new();
        let flush_service = FlushService::new(aggregator.clone(), sink);

        let listener = tokio::spawn(listener.run(stop_listener.clone()));
        let flusher = tokio::spawn(flush_service.run(stop_flusher.clone()));

        Ok(Self {
            local_addr,
            aggregator,
            stop_listener,
            stop_flusher,
            listener,
            flusher,
        })
    }

    /// Returns the address the UDP listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the shared aggregator.
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Stops receiving datagrams and waits for the final flush to complete.
    pub async fn shutdown(self) {
        // The listener stops first so that the final flush sees every received sample.
        self.stop_listener.cancel();
        if let Err(error) = self.listener.await {
            tally_log::error!(error = &error as &dyn std::error::Error, "udp listener failed");
        }

        self.stop_flusher.cancel();
        if let Err(error) = self.flusher.await {
            tally_log::error!(error = &error as &dyn std::error::Error, "flush service failed");
        }
    }
}

/// Completes when the process receives `SIGINT` or `SIGTERM`.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
                return;
            }
            Err(error) => tally_log::warn!(
                error = &error as &dyn std::error::Error,
                "could not register SIGTERM handler"
            ),
        }
    }

    if let Err(error) = tokio::signal::ctrl_c().await {
        tally_log::error!(
            error = &error as &dyn std::error::Error,
            "could not listen for shutdown signal"
        );
    }
}
