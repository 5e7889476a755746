//! Aggregation of counters and timers into periodic statistics.
//!
//! Clients submit [`Sample`]s in a line-oriented text protocol. The [`Aggregator`] accumulates
//! them over a flush interval and, on every flush, renders the interval's statistics into a
//! [`FlushBatch`] of plaintext lines ready to be written to a time series backend.
//!
//! ## Protocol
//!
//! One sample per line, multiple lines can be sent in a single payload:
//!
//! ```text
//! <key>:<value>|<type>[|@<sample_rate>]
//! ```
//!
//! Timers use the type `ms`, all other types are counted. See [`Sample`] for the details.
//!
//! ## Output
//!
//! Each non-zero counter is flushed as its sampling-corrected total:
//!
//! ```text
//! stats.endpoint.hits 100.0 1615889449
//! ```
//!
//! Each timer with at least one duration is flushed as five statistics:
//!
//! ```text
//! stats.timers.endpoint.response_time.lower 12.0 1615889449
//! stats.timers.endpoint.response_time.count 3 1615889449
//! stats.timers.endpoint.response_time.mean 13.0 1615889449
//! stats.timers.endpoint.response_time.upper 57.0 1615889449
//! stats.timers.endpoint.response_time.upper_100 57.0 1615889449
//! ```
//!
//! ## Example
//!
//! ```
//! use tally_metrics::{Aggregator, AggregatorConfig};
//!
//! let aggregator = Aggregator::new(AggregatorConfig::default());
//! aggregator.ingest_payload(b"endpoint.hits:1|c\nendpoint.response_time:57|ms");
//!
//! let batch = aggregator.flush();
//! assert_eq!(batch.len(), 6);
//! ```

#![warn(missing_docs)]

mod aggregator;
mod graphite;
mod protocol;
mod time;

pub use self::aggregator::*;
pub use self::graphite::*;
pub use self::protocol::*;
pub use self::time::*;
