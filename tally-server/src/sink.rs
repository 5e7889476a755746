use std::io;
use std::time::Duration;

use async_trait::async_trait;
use tally_metrics::FlushBatch;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

/// An error returned by a [`Sink`].
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// The connection to the backend could not be established.
    #[error("could not connect to {addr}")]
    Connect {
        /// The address of the backend.
        addr: String,
        /// The underlying error.
        #[source]
        source: io::Error,
    },
    /// Connecting to the backend took longer than the configured timeout.
    #[error("timed out connecting to {0}")]
    Timeout(String),
    /// Writing the batch failed.
    #[error("could not write batch")]
    Write(#[source] io::Error),
}

/// Destination of flushed batches.
///
/// A sink receives each non-empty batch exactly once. Failed deliveries are not retried.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Delivers a batch to the backend.
    async fn send(&self, batch: &FlushBatch) -> Result<(), SinkError>;
}

/// Writes batches to a graphite carbon receiver using the plaintext protocol.
///
/// A new TCP connection is opened for every batch.
#[derive(Debug)]
pub struct GraphiteSink {
    addr: String,
    connect_timeout: Duration,
}

impl GraphiteSink {
    /// Creates a sink writing to `addr` (`host:port`).
    pub fn new(addr: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            connect_timeout,
        }
    }

    /// Returns the address of the carbon receiver.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn connect(&self) -> Result<TcpStream, SinkError> {
        match tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(source)) => Err(SinkError::Connect {
                addr: self.addr.clone(),
                source,
            }),
            Err(_) => Err(SinkError::Timeout(self.addr.clone())),
        }
    }
}

#[async_trait]
impl Sink for GraphiteSink {
    async fn send(&self, batch: &FlushBatch) -> Result<(), SinkError> {
        let mut stream = self.connect().await?;

        let payload = batch.to_plaintext();
        stream
            .write_all(payload.as_bytes())
            .await
            .map_err(SinkError::Write)?;
        stream.shutdown().await.map_err(SinkError::Write)?;

        tally_log::trace!(
            lines = batch.len(),
            bytes = payload.len(),
            "wrote batch to {}",
            self.addr
        );
        Ok(())
    }
}

/// Drops all batches.
///
/// Used when no backend is configured.
#[derive(Debug, Default)]
pub struct DiscardSink;

#[async_trait]
impl Sink for DiscardSink {
    async fn send(&self, batch: &FlushBatch) -> Result<(), SinkError> {
        tally_log::debug!(lines = batch.len(), "discarding flushed batch");
        Ok(())
    }
}
