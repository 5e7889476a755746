use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tally_metrics::{Aggregator, AggregatorConfig, FlushBatch, StatValue};

const THREADS: usize = 4;
const ROUNDS: usize = 2_000;

/// Sums the flushed values of all lines with the given path.
fn sum_path(batches: &[FlushBatch], path: &str) -> f64 {
    batches
        .iter()
        .flat_map(|batch| batch.lines())
        .filter(|line| line.path == path)
        .map(|line| match line.value {
            StatValue::Float(value) => value,
            StatValue::Count(count) => count as f64,
        })
        .sum()
}

#[test]
fn test_concurrent_ingest_and_flush() {
    let aggregator = Aggregator::new(AggregatorConfig::default());
    let done = AtomicBool::new(false);

    let mut batches = thread::scope(|scope| {
        let flusher = scope.spawn(|| {
            let mut batches = Vec::new();
            while !done.load(Ordering::Acquire) {
                batches.push(aggregator.flush());
                thread::yield_now();
            }
            batches
        });

        let writers: Vec<_> = (0..THREADS)
            .map(|_| {
                scope.spawn(|| {
                    for _ in 0..ROUNDS {
                        aggregator.ingest_payload(b"hits:1|c\nsampled:1|c|@0.5\nlatency:3|ms");
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }

        done.store(true, Ordering::Release);
        flusher.join().unwrap()
    });

    // Everything ingested after the flusher's last iteration.
    batches.push(aggregator.flush());

    let total = (THREADS * ROUNDS) as f64;
    assert_eq!(sum_path(&batches, "stats.hits"), total);
    assert_eq!(sum_path(&batches, "stats.sampled"), total * 2.0);
    assert_eq!(sum_path(&batches, "stats.timers.latency.count"), total);

    // No timer summary was emitted without any durations.
    assert!(
        batches
            .iter()
            .flat_map(|batch| batch.lines())
            .filter(|line| line.path == "stats.timers.latency.lower")
            .all(|line| line.value == StatValue::Float(3.0))
    );
}

#[test]
fn test_payload_is_applied_atomically() {
    let aggregator = Aggregator::new(AggregatorConfig::default());

    thread::scope(|scope| {
        scope.spawn(|| {
            for _ in 0..ROUNDS {
                aggregator.ingest_payload(b"left:1|c\nright:1|c");
            }
        });

        scope.spawn(|| {
            for _ in 0..ROUNDS {
                let batch = aggregator.flush();
                let left = sum_path(std::slice::from_ref(&batch), "stats.left");
                let right = sum_path(std::slice::from_ref(&batch), "stats.right");
                assert_eq!(left, right);
            }
        });
    });
}
