use std::sync::Arc;
use std::time::Duration;

use tally_client::metric;
use tally_metrics::Aggregator;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::sink::Sink;
use crate::statsd::{ServerCounters, ServerTimers};

/// Flushes the aggregator in regular intervals and hands every batch to a [`Sink`].
///
/// When shut down, the service performs one last flush so that samples received since the
/// previous tick are not lost.
pub struct FlushService {
    aggregator: Arc<Aggregator>,
    sink: Arc<dyn Sink>,
    interval: Duration,
}

impl FlushService {
    /// Creates a new flush service.
    pub fn new(aggregator: Arc<Aggregator>, sink: Arc<dyn Sink>) -> Self {
        let interval = aggregator.config().flush_interval().max(Duration::from_millis(1));
        Self {
            aggregator,
            sink,
            interval,
        }
    }

    async fn flush(&self) {
        let batch = metric!(timer(ServerTimers::FlushDuration), { self.aggregator.flush() });

        if batch.is_empty() {
            tally_log::trace!("nothing to flush");
            return;
        }

        tally_log::debug!(lines = batch.len(), timestamp = %batch.timestamp(), "flushing batch");

        let result = metric!(timer(ServerTimers::SinkDuration), {
            self.sink.send(&batch).await
        });

        match result {
            Ok(()) => metric!(counter(ServerCounters::LinesFlushed) += batch.len() as i64),
            Err(error) => {
                metric!(counter(ServerCounters::FlushFailed) += 1);
                tally_log::warn!(
                    error = &error as &dyn std::error::Error,
                    lines = batch.len(),
                    "dropping flushed batch"
                );
            }
        }
    }

    /// Runs the flush cycle until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.flush().await,
            }
        }

        tally_log::debug!("performing final flush");
        self.flush().await;
    }
}
