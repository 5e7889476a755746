//! Core functionality of sample aggregation.
//!
//! The [`Aggregator`] accumulates counters and timers between two flushes. Ingestion and
//! flushing may happen concurrently from any number of threads: every sample is applied
//! atomically and every flush swaps out the accumulated state in a single step, so each sample
//! is reported by exactly one flush.

use std::collections::BTreeMap;
use std::mem;

use parking_lot::Mutex;

use crate::graphite::{FlushBatch, GraphiteLine};
use crate::protocol::{CounterType, Sample, SampleValue, TimerType};
use crate::time::UnixTimestamp;

mod config;
mod summary;

pub use self::config::*;
pub use self::summary::*;

/// Outcome of [`Aggregator::ingest_payload`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IngestStats {
    /// Number of samples parsed and applied.
    pub accepted: usize,
    /// Number of malformed lines that were skipped.
    pub discarded: usize,
}

/// Sizes of the state currently held by an [`Aggregator`].
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct AggregatorStats {
    /// Number of known counter keys, including counters at zero.
    pub counters: usize,
    /// Number of timer keys with pending durations.
    pub timers: usize,
    /// Total number of pending durations across all timers.
    pub durations: usize,
}

/// Accumulated state between two flushes.
///
/// Both families are keyed independently, so a key can be a counter and a timer at the same time.
#[derive(Debug, Default)]
struct State {
    counters: BTreeMap<String, CounterType>,
    timers: BTreeMap<String, Vec<TimerType>>,
}

impl State {
    fn apply(&mut self, sample: Sample) {
        match sample.value {
            SampleValue::Counter {
                delta,
                sampling_rate,
            } => {
                *self.counters.entry(sample.key).or_insert(0.0) += delta * (1.0 / sampling_rate);
            }
            SampleValue::Timer(duration) => {
                self.timers.entry(sample.key).or_default().push(duration);
            }
        }
    }

    /// Takes all reportable values and resets the state for the next interval.
    ///
    /// Counter keys remain in the map at zero. Timer keys remain with an empty list.
    fn take(&mut self) -> Snapshot {
        let counters = self
            .counters
            .iter_mut()
            .filter(|(_, total)| **total != 0.0)
            .map(|(key, total)| (key.clone(), mem::replace(total, 0.0)))
            .collect();

        let timers = self
            .timers
            .iter_mut()
            .filter(|(_, durations)| !durations.is_empty())
            .map(|(key, durations)| (key.clone(), mem::take(durations)))
            .collect();

        Snapshot { counters, timers }
    }
}

/// Values taken out of the [`State`] by one flush, in ascending key order.
struct Snapshot {
    counters: Vec<(String, CounterType)>,
    timers: Vec<(String, Vec<TimerType>)>,
}

/// An aggregator for counter and timer [`Sample`]s.
///
/// Counters are summed up after correcting each delta by its sampling rate. Timers collect every
/// duration. On [`flush`](Self::flush), all non-zero counters and all timers with at least one
/// duration are rendered into a [`FlushBatch`] and the state is reset.
///
/// # Example
///
/// ```
/// use tally_metrics::{Aggregator, AggregatorConfig, UnixTimestamp};
///
/// let aggregator = Aggregator::new(AggregatorConfig::default());
/// aggregator.ingest_payload(b"hits:1|c\nhits:1|c|@0.5");
///
/// let batch = aggregator.flush_at(UnixTimestamp::from_secs(1700000000));
/// assert_eq!(batch.to_plaintext(), "stats.hits 3.0 1700000000\n");
/// ```
#[derive(Debug)]
pub struct Aggregator {
    config: AggregatorConfig,
    state: Mutex<State>,
}

impl Aggregator {
    /// Creates a new aggregator with empty state.
    pub fn new(config: AggregatorConfig) -> Self {
        Self {
            config,
            state: Mutex::new(State::default()),
        }
    }

    /// Returns the configuration of this aggregator.
    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Applies a single sample.
    ///
    /// Zero deltas and zero durations are stored like any other value.
    pub fn ingest(&self, sample: Sample) {
        self.state.lock().apply(sample);
    }

    /// Parses a payload of newline-separated samples and applies all valid ones.
    ///
    /// Malformed lines are skipped without affecting the rest of the payload. All valid samples
    /// of the payload are applied under a single lock, so a concurrent flush observes either all
    /// or none of them.
    pub fn ingest_payload(&self, payload: &[u8]) -> IngestStats {
        let mut stats = IngestStats::default();
        let mut samples = Vec::new();

        for result in Sample::parse_all(payload) {
            match result {
                Ok(sample) => samples.push(sample),
                Err(error) => {
                    stats.discarded += 1;
                    tally_log::debug!(
                        error = &error as &dyn std::error::Error,
                        "discarding malformed sample"
                    );
                }
            }
        }

        stats.accepted = samples.len();
        if !samples.is_empty() {
            let mut state = self.state.lock();
            for sample in samples {
                state.apply(sample);
            }
        }

        stats
    }

    /// Returns the current size of the aggregator's state.
    pub fn stats(&self) -> AggregatorStats {
        let state = self.state.lock();
        AggregatorStats {
            counters: state.counters.len(),
            timers: state.timers.values().filter(|d| !d.is_empty()).count(),
            durations: state.timers.values().map(Vec::len).sum(),
        }
    }

    /// Ends the current interval and returns its statistics, stamped with the current time.
    pub fn flush(&self) -> FlushBatch {
        self.flush_at(UnixTimestamp::now())
    }

    /// Ends the current interval and returns its statistics, stamped with `timestamp`.
    ///
    /// Counter lines are emitted first, followed by five summary lines per timer, each family in
    /// ascending key order. An interval without reportable values yields an empty batch.
    pub fn flush_at(&self, timestamp: UnixTimestamp) -> FlushBatch {
        let Snapshot { counters, timers } = self.state.lock().take();

        let percentile = self.config.percentile_threshold();
        let mut lines = Vec::with_capacity(counters.len() + timers.len() * 5);

        for (key, total) in &counters {
            lines.push(GraphiteLine::counter(key, *total, timestamp));
        }

        for (key, mut durations) in timers {
            if let Some(summary) = TimerSummary::compute(&mut durations, percentile) {
                summary.write_lines(&key, timestamp, &mut lines);
            }
        }

        FlushBatch::new(timestamp, lines)
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(AggregatorConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    const TS: UnixTimestamp = UnixTimestamp::from_secs(999994711);

    fn rendered(batch: &FlushBatch) -> Vec<String> {
        batch.lines().iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_counter_round_trip() {
        let aggregator = Aggregator::default();
        aggregator.ingest(Sample::counter("foo", 42.0));

        let batch = aggregator.flush_at(TS);
        assert_eq!(rendered(&batch), ["stats.foo 42.0 999994711"]);
    }

    #[test]
    fn test_counter_accumulates() {
        let aggregator = Aggregator::default();
        aggregator.ingest(Sample::counter("foo", 1.0));
        aggregator.ingest(Sample::counter("foo", 2.5));

        let batch = aggregator.flush_at(TS);
        assert_eq!(rendered(&batch), ["stats.foo 3.5 999994711"]);
    }

    #[test]
    fn test_counter_sampling_rate() {
        let aggregator = Aggregator::default();
        aggregator.ingest_payload(b"foo:10|c|@0.1");

        let batch = aggregator.flush_at(TS);
        assert_eq!(rendered(&batch), ["stats.foo 100.0 999994711"]);
    }

    #[test]
    fn test_counter_sampling_rate_repeated() {
        let aggregator = Aggregator::default();
        for _ in 0..10 {
            aggregator.ingest_payload(b"k:1|c|@0.1");
        }

        let batch = aggregator.flush_at(TS);
        assert_eq!(rendered(&batch), ["stats.k 100.0 999994711"]);
    }

    #[test]
    fn test_counter_unusable_sample_rate_defaults_to_one() {
        let aggregator = Aggregator::default();
        let stats = aggregator.ingest_payload(b"neg:1|c|@-0.5\nzero:1|c|@0\nword:1|c|@abc");
        assert_eq!(
            stats,
            IngestStats {
                accepted: 3,
                discarded: 0,
            }
        );

        let batch = aggregator.flush_at(TS);
        assert_eq!(
            rendered(&batch),
            [
                "stats.neg 1.0 999994711",
                "stats.word 1.0 999994711",
                "stats.zero 1.0 999994711",
            ]
        );
    }

    #[test]
    fn test_counter_zero_suppressed() {
        let aggregator = Aggregator::default();
        aggregator.ingest(Sample::counter("zero", 0.0));
        aggregator.ingest(Sample::counter("cancel", 2.0));
        aggregator.ingest(Sample::counter("cancel", -2.0));

        assert!(aggregator.flush_at(TS).is_empty());
        // Both keys are retained at zero.
        assert_eq!(aggregator.stats().counters, 2);
    }

    #[test]
    fn test_reset_idempotence() {
        let aggregator = Aggregator::default();
        aggregator.ingest_payload(b"foo:1|c\nbar:5|ms");

        assert_eq!(aggregator.flush_at(TS).len(), 6);
        assert!(aggregator.flush_at(TS).is_empty());
    }

    #[test]
    fn test_counter_reports_only_new_interval() {
        let aggregator = Aggregator::default();
        aggregator.ingest(Sample::counter("foo", 5.0));
        aggregator.flush_at(TS);

        aggregator.ingest(Sample::counter("foo", 2.0));
        let batch = aggregator.flush_at(TS);
        assert_eq!(rendered(&batch), ["stats.foo 2.0 999994711"]);
    }

    #[test]
    fn test_timer_single() {
        let aggregator = Aggregator::default();
        aggregator.ingest_payload(b"k:1337|ms");

        let batch = aggregator.flush_at(TS);
        insta::assert_snapshot!(batch.to_plaintext(), @r###"
        stats.timers.k.lower 1337.0 999994711
        stats.timers.k.count 1 999994711
        stats.timers.k.mean 1337.0 999994711
        stats.timers.k.upper 1337.0 999994711
        stats.timers.k.upper_100 1337.0 999994711
        "###);
    }

    #[test]
    fn test_timer_zero_duration_emitted() {
        let aggregator = Aggregator::default();
        aggregator.ingest(Sample::timer("k", 0.0));

        let batch = aggregator.flush_at(TS);
        assert_eq!(batch.len(), 5);
        assert_eq!(
            batch.lines()[2].to_string(),
            "stats.timers.k.mean 0.0 999994711"
        );
    }

    #[test]
    fn test_timer_percentile_100() {
        let aggregator = Aggregator::default();
        for duration in 1..=10 {
            aggregator.ingest(Sample::timer("k", f64::from(duration)));
        }

        let batch = aggregator.flush_at(TS);
        assert_eq!(
            rendered(&batch),
            [
                "stats.timers.k.lower 1.0 999994711",
                "stats.timers.k.count 10 999994711",
                "stats.timers.k.mean 4.5 999994711",
                "stats.timers.k.upper 10.0 999994711",
                "stats.timers.k.upper_100 10.0 999994711",
            ]
        );
    }

    #[test]
    fn test_timer_percentile_90() {
        let aggregator = Aggregator::new(AggregatorConfig {
            percentile_threshold: 90,
            ..Default::default()
        });
        for duration in (1..=10).rev() {
            aggregator.ingest(Sample::timer("k", f64::from(duration)));
        }

        let batch = aggregator.flush_at(TS);
        assert_eq!(
            rendered(&batch),
            [
                "stats.timers.k.lower 1.0 999994711",
                "stats.timers.k.count 10 999994711",
                "stats.timers.k.mean 4.0 999994711",
                "stats.timers.k.upper 10.0 999994711",
                "stats.timers.k.upper_90 9.0 999994711",
            ]
        );
    }

    #[test]
    fn test_malformed_lines_isolated() {
        tally_log::init_test!();

        let aggregator = Aggregator::default();
        aggregator.ingest(Sample::counter("good", 1.0));

        let stats = aggregator.ingest_payload(b"good:2|c\nbroken:3\nnot a sample\ngood:4|c");
        assert_eq!(
            stats,
            IngestStats {
                accepted: 2,
                discarded: 2,
            }
        );

        let batch = aggregator.flush_at(TS);
        assert_eq!(rendered(&batch), ["stats.good 7.0 999994711"]);
    }

    #[test]
    fn test_same_key_both_families() {
        let aggregator = Aggregator::default();
        aggregator.ingest_payload(b"req:1|c\nreq:20|ms");

        let batch = aggregator.flush_at(TS);
        assert_eq!(
            rendered(&batch),
            [
                "stats.req 1.0 999994711",
                "stats.timers.req.lower 20.0 999994711",
                "stats.timers.req.count 1 999994711",
                "stats.timers.req.mean 20.0 999994711",
                "stats.timers.req.upper 20.0 999994711",
                "stats.timers.req.upper_100 20.0 999994711",
            ]
        );
    }

    #[test]
    fn test_ordering_and_shared_timestamp() {
        let aggregator = Aggregator::default();
        aggregator.ingest_payload(b"t.b:1|ms\nc.b:1|c\nt.a:1|ms\nc.a:1|c");

        let batch = aggregator.flush();
        let timestamp = batch.timestamp();
        assert!(batch.lines().iter().all(|line| line.timestamp == timestamp));

        let paths: Vec<&str> = batch
            .lines()
            .iter()
            .map(|line| line.path.as_str())
            .filter(|path| !path.starts_with("stats.timers.") || path.ends_with(".lower"))
            .collect();

        assert_eq!(
            paths,
            [
                "stats.c.a",
                "stats.c.b",
                "stats.timers.t.a.lower",
                "stats.timers.t.b.lower",
            ]
        );
    }

    #[test]
    fn test_stats() {
        let aggregator = Aggregator::default();
        aggregator.ingest_payload(b"a:1|c\nb:1|ms\nb:2|ms\nc:3|ms");

        assert_eq!(
            aggregator.stats(),
            AggregatorStats {
                counters: 1,
                timers: 2,
                durations: 3,
            }
        );

        aggregator.flush_at(TS);
        assert_eq!(
            aggregator.stats(),
            AggregatorStats {
                counters: 1,
                timers: 0,
                durations: 0,
            }
        );
    }
}
