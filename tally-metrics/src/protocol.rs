use std::fmt;
use std::iter::FusedIterator;

/// Type used for counter deltas and accumulated counter totals.
pub type CounterType = f64;

/// Type used for timer durations, in milliseconds.
pub type TimerType = f64;

/// Type used for the sampling rate of counters.
pub type SampleRate = f64;

/// The type of a [`Sample`], determining how it is aggregated.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SampleKind {
    /// Counts instances of an event.
    ///
    /// Counter deltas of a flush interval are summed up, after correcting each delta by its
    /// sampling rate. The default delta is `1`.
    Counter,
    /// Collects durations in milliseconds.
    ///
    /// All durations of a flush interval are kept and summarized into percentile statistics when
    /// the interval is flushed.
    Timer,
}

impl SampleKind {
    /// Returns the conventional type code for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            SampleKind::Counter => "c",
            SampleKind::Timer => "ms",
        }
    }
}

impl fmt::Display for SampleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SampleKind {
    type Err = MalformedSample;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // Every type code other than `ms` counts, which includes `c`, `g` and `h` sent by
        // generic statsd clients.
        match s {
            "" => Err(MalformedSample::MissingType),
            "ms" => Ok(Self::Timer),
            _ => Ok(Self::Counter),
        }
    }
}

/// The typed value of a [`Sample`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SampleValue {
    /// A counter delta and the fraction of events it represents.
    Counter {
        /// The reported delta.
        delta: CounterType,
        /// The fraction of events this delta represents, conventionally in `(0, 1]`. Defaults to
        /// `1`.
        sampling_rate: SampleRate,
    },
    /// A duration in milliseconds.
    Timer(TimerType),
}

impl SampleValue {
    /// Returns the kind of this value.
    pub fn kind(&self) -> SampleKind {
        match self {
            Self::Counter { .. } => SampleKind::Counter,
            Self::Timer(_) => SampleKind::Timer,
        }
    }
}

/// A line of the wire protocol could not be parsed into a [`Sample`].
///
/// Malformed samples are never fatal. The aggregator discards them and continues with the next
/// line.
#[derive(Clone, Copy, Debug, Eq, PartialEq, thiserror::Error)]
pub enum MalformedSample {
    /// The payload is not valid UTF-8.
    #[error("sample is not valid utf-8")]
    InvalidUtf8,
    /// There is no `:` separating the key from the value.
    #[error("missing ':' between key and value")]
    MissingDelimiter,
    /// The key is empty or contains characters that cannot be flushed.
    #[error("invalid sample key")]
    InvalidKey,
    /// The `|<type>` field is missing or empty.
    #[error("missing type code")]
    MissingType,
    /// The value is not a finite number, or a negative duration.
    #[error("invalid sample value")]
    InvalidValue,
}

/// Validates a sample key.
///
/// Keys cannot be empty, must not contain the wire delimiters and must not contain whitespace or
/// control characters, which would break the line format of flushed statistics.
fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .bytes()
            .all(|b| !matches!(b, b':' | b'|') && !b.is_ascii_whitespace() && !b.is_ascii_control())
}

/// Parses a numeric value, substituting `default` for a blank value.
fn parse_number(string: &str, default: f64) -> Result<f64, MalformedSample> {
    let string = string.trim();
    if string.is_empty() {
        return Ok(default);
    }

    match string.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(MalformedSample::InvalidValue),
    }
}

/// Parses the optional `@<rate>` field of a counter.
///
/// Returns `None` unless the field is `@` followed by a positive decimal. The counter then keeps
/// a sampling rate of `1`.
fn parse_sample_rate(field: &str) -> Option<SampleRate> {
    let raw = field.strip_prefix('@')?;
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return None;
    }

    raw.parse::<SampleRate>()
        .ok()
        .filter(|rate| *rate > 0.0 && rate.is_finite())
}

/// A single sample submitted by a client.
///
/// Samples are transient: they are produced by parsing one line of the wire protocol, handed to
/// the [`Aggregator`](crate::Aggregator) and dropped.
///
/// # Submission Protocol
///
/// ```text
/// <key>:<value>|<type>[|@<sample_rate>]
/// ```
///
/// The type `ms` submits a timer, any other type code (conventionally `c`) submits a counter. A
/// blank counter value defaults to `1`, a blank timer value to `0`. The sample rate is only
/// evaluated for counters. Example submissions:
///
/// ```text
/// endpoint.hits:1|c
/// endpoint.hits:1|c|@0.1
/// endpoint.response_time:57|ms
/// ```
///
/// To parse a submission payload, use [`Sample::parse_all`].
#[derive(Clone, Debug, PartialEq)]
pub struct Sample {
    /// The metric key, shared by all samples of the same metric.
    pub key: String,
    /// The typed value.
    pub value: SampleValue,
}

impl Sample {
    /// Creates a counter sample with a sampling rate of `1`.
    pub fn counter(key: impl Into<String>, delta: CounterType) -> Self {
        Self::sampled_counter(key, delta, 1.0)
    }

    /// Creates a counter sample that represents only a fraction of the counted events.
    pub fn sampled_counter(
        key: impl Into<String>,
        delta: CounterType,
        sampling_rate: SampleRate,
    ) -> Self {
        Self {
            key: key.into(),
            value: SampleValue::Counter {
                delta,
                sampling_rate,
            },
        }
    }

    /// Creates a timer sample from a duration in milliseconds.
    pub fn timer(key: impl Into<String>, duration: TimerType) -> Self {
        Self {
            key: key.into(),
            value: SampleValue::Timer(duration),
        }
    }

    /// Returns the kind of this sample.
    pub fn kind(&self) -> SampleKind {
        self.value.kind()
    }

    fn parse_str(string: &str) -> Result<Self, MalformedSample> {
        let (key, rest) = string
            .split_once(':')
            .ok_or(MalformedSample::MissingDelimiter)?;

        if !is_valid_key(key) {
            return Err(MalformedSample::InvalidKey);
        }

        let mut fields = rest.split('|');
        let raw_value = fields.next().unwrap_or_default();
        let kind: SampleKind = fields.next().ok_or(MalformedSample::MissingType)?.parse()?;

        let value = match kind {
            SampleKind::Timer => {
                let duration = parse_number(raw_value, 0.0)?;
                if duration < 0.0 {
                    return Err(MalformedSample::InvalidValue);
                }
                SampleValue::Timer(duration)
            }
            SampleKind::Counter => {
                let delta = parse_number(raw_value, 1.0)?;
                let sampling_rate = fields.next().and_then(parse_sample_rate);
                SampleValue::Counter {
                    delta,
                    sampling_rate: sampling_rate.unwrap_or(1.0),
                }
            }
        };

        Ok(Self {
            key: key.to_owned(),
            value,
        })
    }

    /// Parses a single sample from the raw protocol.
    ///
    /// See [`Sample`] for more information on the protocol.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::Sample;
    ///
    /// let sample = Sample::parse(b"response_time:57|ms").expect("sample should parse");
    /// ```
    pub fn parse(slice: &[u8]) -> Result<Self, MalformedSample> {
        let string = std::str::from_utf8(slice).or(Err(MalformedSample::InvalidUtf8))?;
        Self::parse_str(string.strip_suffix('\r').unwrap_or(string))
    }

    /// Parses a set of samples from the raw protocol.
    ///
    /// Returns a result for each line in `slice`, ignoring empty lines. Both UNIX newlines (`\n`)
    /// and Windows newlines (`\r\n`) are supported.
    ///
    /// It is possible to continue consuming the iterator after `Err` is yielded.
    ///
    /// # Example
    ///
    /// ```
    /// use tally_metrics::Sample;
    ///
    /// let data = br#"
    /// endpoint.response_time:57|ms
    /// endpoint.hits:1|c
    /// "#;
    ///
    /// for result in Sample::parse_all(data) {
    ///     let sample = result.expect("sample should parse");
    ///     println!("Sample {}: {:?}", sample.key, sample.value);
    /// }
    /// ```
    pub fn parse_all(slice: &[u8]) -> ParseSamples<'_> {
        ParseSamples { slice }
    }
}

/// Iterator over parsed samples returned from [`Sample::parse_all`].
#[derive(Clone, Debug, Default)]
pub struct ParseSamples<'a> {
    slice: &'a [u8],
}

impl Iterator for ParseSamples<'_> {
    type Item = Result<Sample, MalformedSample>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.slice.is_empty() {
                return None;
            }

            let mut split = self.slice.splitn(2, |&b| b == b'\n');
            let current = split.next()?;
            self.slice = split.next().unwrap_or_default();

            let string = match std::str::from_utf8(current) {
                Ok(string) => string.strip_suffix('\r').unwrap_or(string),
                Err(_) => return Some(Err(MalformedSample::InvalidUtf8)),
            };

            if !string.is_empty() {
                return Some(Sample::parse_str(string));
            }
        }
    }
}

impl FusedIterator for ParseSamples<'_> {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_garbage() {
        let s = "x23-408j17z4232@#34d\nc3456y7^😎";
        assert!(Sample::parse(s.as_bytes()).is_err());
    }

    #[test]
    fn test_parse_counter() {
        let sample = Sample::parse(b"foo:42|c").unwrap();
        insta::assert_debug_snapshot!(sample, @r###"
        Sample {
            key: "foo",
            value: Counter {
                delta: 42.0,
                sampling_rate: 1.0,
            },
        }
        "###);
    }

    #[test]
    fn test_parse_counter_sampled() {
        let sample = Sample::parse(b"foo:1|c|@0.1").unwrap();
        insta::assert_debug_snapshot!(sample, @r###"
        Sample {
            key: "foo",
            value: Counter {
                delta: 1.0,
                sampling_rate: 0.1,
            },
        }
        "###);
    }

    #[test]
    fn test_parse_counter_negative() {
        let sample = Sample::parse(b"foo:-3|c").unwrap();
        assert_eq!(sample, Sample::counter("foo", -3.0));
    }

    #[test]
    fn test_parse_counter_default_delta() {
        let sample = Sample::parse(b"foo:|c").unwrap();
        assert_eq!(sample, Sample::counter("foo", 1.0));
    }

    #[test]
    fn test_parse_other_type_codes_count() {
        for line in ["foo:2|g", "foo:2|h", "foo:2|whatever"] {
            let sample = Sample::parse(line.as_bytes()).unwrap();
            assert_eq!(sample.kind(), SampleKind::Counter, "{line}");
        }
    }

    #[test]
    fn test_parse_timer() {
        let sample = Sample::parse(b"foo.time:1337|ms").unwrap();
        insta::assert_debug_snapshot!(sample, @r###"
        Sample {
            key: "foo.time",
            value: Timer(
                1337.0,
            ),
        }
        "###);
    }

    #[test]
    fn test_parse_timer_fractional() {
        let sample = Sample::parse(b"foo:17.5|ms").unwrap();
        assert_eq!(sample.value, SampleValue::Timer(17.5));
    }

    #[test]
    fn test_parse_timer_default_duration() {
        let sample = Sample::parse(b"foo:|ms").unwrap();
        assert_eq!(sample, Sample::timer("foo", 0.0));
    }

    #[test]
    fn test_parse_timer_ignores_sample_rate() {
        let sample = Sample::parse(b"foo:10|ms|@0.5").unwrap();
        assert_eq!(sample, Sample::timer("foo", 10.0));
    }

    #[test]
    fn test_parse_timer_negative() {
        let result = Sample::parse(b"foo:-1|ms");
        assert_eq!(result, Err(MalformedSample::InvalidValue));
    }

    #[test]
    fn test_parse_non_numeric_value() {
        assert_eq!(
            Sample::parse(b"foo:abc|ms"),
            Err(MalformedSample::InvalidValue)
        );
        assert_eq!(
            Sample::parse(b"foo:abc|c"),
            Err(MalformedSample::InvalidValue)
        );
    }

    #[test]
    fn test_parse_non_finite_value() {
        assert_eq!(Sample::parse(b"foo:inf|c"), Err(MalformedSample::InvalidValue));
        assert_eq!(Sample::parse(b"foo:NaN|ms"), Err(MalformedSample::InvalidValue));
    }

    #[test]
    fn test_parse_missing_type() {
        assert_eq!(Sample::parse(b"foo:42"), Err(MalformedSample::MissingType));
        assert_eq!(Sample::parse(b"foo:42|"), Err(MalformedSample::MissingType));
    }

    #[test]
    fn test_parse_missing_delimiter() {
        assert_eq!(
            Sample::parse(b"foo|c"),
            Err(MalformedSample::MissingDelimiter)
        );
    }

    #[test]
    fn test_parse_empty_key() {
        assert_eq!(Sample::parse(b":42|c"), Err(MalformedSample::InvalidKey));
    }

    #[test]
    fn test_parse_key_with_whitespace() {
        assert_eq!(
            Sample::parse(b"foo bar:42|c"),
            Err(MalformedSample::InvalidKey)
        );
        assert_eq!(
            Sample::parse(b"foo\tbar:42|ms"),
            Err(MalformedSample::InvalidKey)
        );
    }

    #[test]
    fn test_parse_key_with_control_character() {
        assert_eq!(
            Sample::parse(b"foo\x07bar:42|c"),
            Err(MalformedSample::InvalidKey)
        );
        assert_eq!(
            Sample::parse(b"foo\x7fbar:42|c"),
            Err(MalformedSample::InvalidKey)
        );
        // Non-ASCII keys pass through unchanged.
        assert_eq!(
            Sample::parse("größe:42|c".as_bytes()),
            Ok(Sample::counter("größe", 42.0))
        );
    }

    #[test]
    fn test_parse_key_splits_on_first_colon() {
        // The remainder `1:2` is not a number.
        assert_eq!(
            Sample::parse(b"foo:1:2|c"),
            Err(MalformedSample::InvalidValue)
        );
    }

    #[test]
    fn test_parse_sample_rate_not_positive_decimal() {
        for line in [
            "foo:1|c|@0",
            "foo:1|c|@",
            "foo:1|c|@-0.5",
            "foo:1|c|@1.2.3",
            "foo:1|c|@abc",
        ] {
            assert_eq!(
                Sample::parse(line.as_bytes()),
                Ok(Sample::counter("foo", 1.0)),
                "{line}"
            );
        }
    }

    #[test]
    fn test_parse_sample_rate_above_one() {
        let sample = Sample::parse(b"foo:4|c|@2").unwrap();
        assert_eq!(sample, Sample::sampled_counter("foo", 4.0, 2.0));
    }

    #[test]
    fn test_parse_unrelated_third_field() {
        let sample = Sample::parse(b"foo:1|c|#tag:value").unwrap();
        assert_eq!(sample, Sample::counter("foo", 1.0));
    }

    #[test]
    fn test_parse_invalid_utf8() {
        assert_eq!(
            Sample::parse(b"foo:\xff|c"),
            Err(MalformedSample::InvalidUtf8)
        );
    }

    #[test]
    fn test_parse_crlf() {
        let sample = Sample::parse(b"foo:42|c\r").unwrap();
        assert_eq!(sample, Sample::counter("foo", 42.0));
    }

    #[test]
    fn test_parse_all() {
        let s = "foo:42|c\nbar:17|ms";
        let samples: Vec<Sample> = Sample::parse_all(s.as_bytes())
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(
            samples,
            [Sample::counter("foo", 42.0), Sample::timer("bar", 17.0)]
        );
    }

    #[test]
    fn test_parse_all_crlf() {
        let s = "foo:42|c\r\nbar:17|c";
        let count = Sample::parse_all(s.as_bytes())
            .filter(Result::is_ok)
            .count();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_parse_all_empty_lines() {
        let s = "foo:42|c\n\n\nbar:17|c\n";
        assert_eq!(Sample::parse_all(s.as_bytes()).count(), 2);
    }

    #[test]
    fn test_parse_all_continues_after_error() {
        let s = "foo:42\nbar:17|c";
        let results: Vec<_> = Sample::parse_all(s.as_bytes()).collect();
        assert_eq!(
            results,
            [
                Err(MalformedSample::MissingType),
                Ok(Sample::counter("bar", 17.0))
            ]
        );
    }
}
