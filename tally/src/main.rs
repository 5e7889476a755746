//! Tally is a statsd-style aggregation server. Applications send counters and timers over UDP,
//! Tally aggregates them in memory and flushes summary statistics to graphite in regular
//! intervals.
//!
//! # Workspace Crates
//!
//! Tally is split into the following workspace crates:
//!
//!  - `tally`: Main entry point and command line interface.
//!  - [`tally-client`]: Call-site helpers for reporting counters and timers.
//!  - [`tally-config`]: Static configuration for the CLI and server.
//!  - [`tally-log`]: Logging setup and test logger.
//!  - [`tally-metrics`]: Sample parsing, aggregation and the flush output format.
//!  - [`tally-server`]: UDP listener, flush scheduler and graphite sink.
//!
//! [`tally-client`]: ../tally_client/index.html
//! [`tally-config`]: ../tally_config/index.html
//! [`tally-log`]: ../tally_log/index.html
//! [`tally-metrics`]: ../tally_metrics/index.html
//! [`tally-server`]: ../tally_server/index.html

mod cli;
mod setup;

use std::process;

pub fn main() {
    let exit_code = match cli::execute() {
        Ok(()) => 0,
        Err(err) => {
            tally_log::ensure_error(&err);
            1
        }
    };

    process::exit(exit_code);
}
