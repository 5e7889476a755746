//! Logging for Tally.
//!
//! # Setup
//!
//! To enable logging, invoke the [`init`] function with a [`LogConfig`]. The configuration is
//! usually part of the `logging` section of the config file:
//!
//! ```yaml
//! logging:
//!   level: info
//!   format: auto
//! ```
//!
//! Workspace crates log at the configured level, all other crates at `INFO`. Setting the
//! `RUST_LOG` environment variable overrides both.
//!
//! # Logging
//!
//! The basic use of the log crate is through the five logging macros: [`error!`], [`warn!`],
//! [`info!`], [`debug!`] and [`trace!`] where `error!` represents the highest-priority log
//! messages and `trace!` the lowest.
//!
//! ## Conventions
//!
//! Log messages should start lowercase and end without punctuation. Prefer short and precise log
//! messages over verbose text. Choose the log level according to these rules:
//!
//! - [`error!`] for bugs and invalid behavior. This is usually a fatal startup failure such as a
//!   socket that cannot be bound.
//! - [`warn!`] for undesirable behavior that is handled, such as a flush that could not be
//!   delivered.
//! - [`info!`] for messages relevant to the average user, such as the listen address.
//! - [`debug!`] for messages usually relevant to debugging, such as discarded samples.
//! - [`trace!`] for full auxiliary information.
//!
//! ## Errors
//!
//! To log errors with their causes, pass them as a field or wrap them in [`LogError`]:
//!
//! ```
//! if let Err(error) = std::env::var("FOO") {
//!     tally_log::error!(
//!         error = &error as &dyn std::error::Error,
//!         "env failed"
//!     );
//! }
//! ```
//!
//! # Testing
//!
//! For unit testing, there is a separate initialization macro [`init_test!`] that should be called
//! at the beginning of test method. It writes to the output captured by the test runner. The
//! calling crate logs at `TRACE`, the rest of the workspace at `DEBUG`, unless `RUST_LOG` is set.
//!
//! ```
//! #[test]
//! fn test_something() {
//!     tally_log::init_test!();
//! }
//! ```

#![warn(missing_docs)]

/// All crates of the workspace, which log at the configured level.
#[cfg(any(feature = "init", feature = "test"))]
const CRATE_NAMES: &[&str] = &[
    "tally",
    "tally_client",
    "tally_config",
    "tally_log",
    "tally_metrics",
    "tally_server",
];

#[cfg(feature = "init")]
mod setup;
#[cfg(feature = "init")]
pub use setup::*;

#[cfg(feature = "test")]
pub use test::*;

mod utils;
pub use utils::*;

// Expose the minimal log facade.
#[doc(inline)]
pub use tracing::{debug, error, info, trace, warn};
