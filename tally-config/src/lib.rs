//! Configuration for the Tally CLI and server.
//!
//! The configuration lives in a folder, by default `.tally` in the current working directory,
//! containing a `config.yml` file. All sections and keys are optional:
//!
//! ```yaml
//! server:
//!   host: 127.0.0.1
//!   port: 8125
//!   max_datagram_size: 8192
//! graphite:
//!   host: carbon.example.com
//!   port: 2003
//!   connect_timeout: 5
//! aggregator:
//!   flush_interval: 10
//!   percentile_threshold: 100
//! client:
//!   statsd: 127.0.0.1:8125
//!   namespace: tally
//! logging:
//!   level: info
//!   format: auto
//! ```
//!
//! Individual values can be overridden from the command line or the environment through
//! [`OverridableConfig`].

#![warn(missing_docs)]

mod config;

pub use crate::config::*;
