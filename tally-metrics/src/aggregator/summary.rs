use crate::graphite::{GraphiteLine, StatValue};
use crate::protocol::TimerType;
use crate::time::UnixTimestamp;

/// Percentile statistics over the durations of one timer in one flush interval.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TimerSummary {
    /// The smallest duration.
    pub lower: TimerType,
    /// The number of durations.
    pub count: u64,
    /// The mean of the durations below the percentile cutoff.
    pub mean: TimerType,
    /// The largest duration.
    pub upper: TimerType,
    /// The duration at the percentile cutoff.
    pub upper_threshold: TimerType,
    /// The percentile used to compute `mean` and `upper_threshold`.
    pub percentile: u8,
}

impl TimerSummary {
    /// Summarizes a non-empty list of durations.
    ///
    /// Returns `None` if `durations` is empty. The durations are sorted in place.
    ///
    /// For more than one duration, the cutoff is `thresh = max(1, floor(P / 100 * count))`. The
    /// reported `upper_<P>` is the `thresh`-th smallest duration, and `mean` divides the sum of
    /// the `thresh - 1` smallest durations by `thresh`. Downstream dashboards depend on this exact
    /// formula, including the excluded cutoff value.
    pub fn compute(durations: &mut [TimerType], percentile: u8) -> Option<Self> {
        durations.sort_unstable_by(f64::total_cmp);

        let lower = *durations.first()?;
        let upper = *durations.last()?;
        let count = durations.len();

        let (mean, upper_threshold) = if count == 1 {
            (lower, upper)
        } else {
            let thresh = ((f64::from(percentile) / 100.0) * count as f64).floor() as usize;
            let thresh = thresh.clamp(1, count);

            let sum = durations[..thresh - 1]
                .iter()
                .fold(0.0, |sum, duration| sum + duration);

            (sum / thresh as f64, durations[thresh - 1])
        };

        Some(Self {
            lower,
            count: count as u64,
            mean,
            upper,
            upper_threshold,
            percentile,
        })
    }

    /// Appends the five flush lines of this summary to `lines`.
    pub fn write_lines(&self, key: &str, timestamp: UnixTimestamp, lines: &mut Vec<GraphiteLine>) {
        let stats = [
            ("lower", StatValue::Float(self.lower)),
            ("count", StatValue::Count(self.count)),
            ("mean", StatValue::Float(self.mean)),
            ("upper", StatValue::Float(self.upper)),
        ];

        for (stat, value) in stats {
            lines.push(GraphiteLine::timer(key, stat, value, timestamp));
        }

        let stat = format!("upper_{}", self.percentile);
        lines.push(GraphiteLine::timer(
            key,
            &stat,
            StatValue::Float(self.upper_threshold),
            timestamp,
        ));
    }
}
