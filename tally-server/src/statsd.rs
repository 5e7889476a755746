use tally_client::{CounterMetric, TimerMetric};

/// Counter metrics for the Tally server.
pub enum ServerCounters {
    /// Incremented for every datagram received by the UDP listener.
    DatagramReceived,

    /// Incremented for every datagram larger than `server.max_datagram_size`.
    ///
    /// The cut off trailing line of such a datagram is discarded.
    DatagramTruncated,

    /// Incremented for every sample applied to the aggregator.
    SampleAccepted,

    /// Incremented for every malformed line that was discarded.
    SampleDiscarded,

    /// Incremented for every line delivered to the sink.
    LinesFlushed,

    /// Incremented every time a flushed batch could not be delivered.
    FlushFailed,
}

impl CounterMetric for ServerCounters {
    fn name(&self) -> &'static str {
        match *self {
            Self::DatagramReceived => "server.datagram.received",
            Self::DatagramTruncated => "server.datagram.truncated",
            Self::SampleAccepted => "server.sample.accepted",
            Self::SampleDiscarded => "server.sample.discarded",
            Self::LinesFlushed => "server.flush.lines",
            Self::FlushFailed => "server.flush.failed",
        }
    }
}

/// Timer metrics for the Tally server.
pub enum ServerTimers {
    /// Time in milliseconds spent taking and rendering the aggregator's state.
    ///
    /// Delivering the batch to the sink is outside of this timer.
    FlushDuration,

    /// Time in milliseconds spent delivering a batch to the sink.
    SinkDuration,
}

impl TimerMetric for ServerTimers {
    fn name(&self) -> &'static str {
        match *self {
            Self::FlushDuration => "server.flush.duration",
            Self::SinkDuration => "server.sink.duration",
        }
    }
}
