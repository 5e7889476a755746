//! Plaintext output of flushed statistics.
//!
//! Every statistic is emitted as one line of the graphite plaintext protocol:
//!
//! ```text
//! <path> <value> <timestamp>
//! ```
//!
//! Counters are written to `stats.<key>`, timer summaries to `stats.timers.<key>.<stat>`.

use std::fmt;

use crate::time::UnixTimestamp;

/// Path prefix of all flushed counters.
pub const COUNTER_PREFIX: &str = "stats";

/// Path prefix of all flushed timer summaries.
pub const TIMER_PREFIX: &str = "stats.timers";

/// The value of a single flushed statistic.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StatValue {
    /// A real number, always rendered with a fractional part.
    Float(f64),
    /// A number of samples, rendered as integer.
    Count(u64),
}

/// Writes a float in shortest round-trip form.
///
/// Integral values keep a trailing `.0`. Values below `1e-4` or from `1e16` in magnitude use
/// scientific notation with a signed exponent of at least two digits, e.g. `1e-05` or `1.5e+17`.
fn write_float(f: &mut fmt::Formatter<'_>, value: f64) -> fmt::Result {
    let repr = format!("{value:?}");
    let Some((mantissa, exponent)) = repr.split_once('e') else {
        return f.write_str(&repr);
    };

    let (sign, digits) = match exponent.strip_prefix('-') {
        Some(digits) => ('-', digits),
        None => ('+', exponent),
    };
    write!(f, "{mantissa}e{sign}{digits:0>2}")
}

impl fmt::Display for StatValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Float(value) => write_float(f, *value),
            Self::Count(count) => count.fmt(f),
        }
    }
}

/// One line of flush output.
#[derive(Clone, Debug, PartialEq)]
pub struct GraphiteLine {
    /// The dotted path of the statistic.
    pub path: String,
    /// The flushed value.
    pub value: StatValue,
    /// The timestamp of the flush that produced this line.
    pub timestamp: UnixTimestamp,
}

impl GraphiteLine {
    /// Creates the line of a flushed counter total.
    pub fn counter(key: &str, total: f64, timestamp: UnixTimestamp) -> Self {
        Self {
            path: format!("{COUNTER_PREFIX}.{key}"),
            value: StatValue::Float(total),
            timestamp,
        }
    }

    /// Creates the line of one statistic of a timer summary.
    pub fn timer(key: &str, stat: &str, value: StatValue, timestamp: UnixTimestamp) -> Self {
        Self {
            path: format!("{TIMER_PREFIX}.{key}.{stat}"),
            value,
            timestamp,
        }
    }
}

impl fmt::Display for GraphiteLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.path, self.value, self.timestamp)
    }
}

/// The output of a single flush.
///
/// All lines of a batch share the same timestamp. Counter lines come first, followed by the
/// summaries of all timers, each group in ascending key order.
#[derive(Clone, Debug, PartialEq)]
pub struct FlushBatch {
    timestamp: UnixTimestamp,
    lines: Vec<GraphiteLine>,
}

impl FlushBatch {
    pub(crate) fn new(timestamp: UnixTimestamp, lines: Vec<GraphiteLine>) -> Self {
        Self { timestamp, lines }
    }

    /// The timestamp of the flush.
    pub fn timestamp(&self) -> UnixTimestamp {
        self.timestamp
    }

    /// Returns `true` if the flush interval did not produce any statistics.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Returns the number of lines in this batch.
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Returns all lines of this batch.
    pub fn lines(&self) -> &[GraphiteLine] {
        &self.lines
    }

    /// Consumes the batch and returns its lines.
    pub fn into_lines(self) -> Vec<GraphiteLine> {
        self.lines
    }

    /// Renders the batch in the plaintext protocol, terminating every line with `\n`.
    pub fn to_plaintext(&self) -> String {
        use std::fmt::Write;

        let mut output = String::new();
        for line in &self.lines {
            // Writing into a `String` cannot fail.
            let _ = writeln!(output, "{line}");
        }
        output
    }
}
