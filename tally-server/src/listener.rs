use std::net::SocketAddr;
use std::sync::Arc;

use tally_client::metric;
use tally_metrics::Aggregator;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::statsd::ServerCounters;

/// The largest payload a UDP datagram can carry.
const MAX_UDP_PAYLOAD: usize = 65535;

/// Receives datagrams and feeds their samples into the aggregator.
///
/// Every datagram is handled independently. Malformed lines are skipped, the rest of the datagram
/// is still applied.
///
/// Datagrams larger than `max_datagram_size` are cut off by the socket at an arbitrary byte. The
/// cut line may still parse as a different sample, for instance `t:123|ms` as the counter
/// `t:123|m`, so the incomplete trailing line of an oversized datagram is dropped.
#[derive(Debug)]
pub struct UdpListener {
    socket: UdpSocket,
    aggregator: Arc<Aggregator>,
    max_datagram_size: usize,
}

impl UdpListener {
    /// Binds a UDP socket to `addr`.
    pub async fn bind(
        addr: SocketAddr,
        aggregator: Arc<Aggregator>,
        max_datagram_size: usize,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self {
            socket,
            aggregator,
            max_datagram_size: max_datagram_size.clamp(1, MAX_UDP_PAYLOAD),
        })
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn handle_datagram(&self, payload: &[u8], peer: SocketAddr) {
        let stats = match complete_lines(payload, self.max_datagram_size) {
            Some(complete) => {
                tally_log::debug!(
                    %peer,
                    limit = self.max_datagram_size,
                    "dropping cut off line of oversized datagram"
                );
                metric!(counter(ServerCounters::DatagramTruncated) += 1);

                let mut stats = self.aggregator.ingest_payload(complete);
                stats.discarded += 1;
                stats
            }
            None => self.aggregator.ingest_payload(payload),
        };

        tally_log::trace!(
            %peer,
            accepted = stats.accepted,
            discarded = stats.discarded,
            "received datagram"
        );

        metric!(counter(ServerCounters::DatagramReceived) += 1);
        metric!(counter(ServerCounters::SampleAccepted) += stats.accepted as i64);
        metric!(counter(ServerCounters::SampleDiscarded) += stats.discarded as i64);
    }

    /// Receives datagrams until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        // One extra byte tells oversized datagrams apart from those of exactly the maximum size.
        let mut buf = vec![0; self.max_datagram_size + 1];

        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => break,
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, peer)) => self.handle_datagram(&buf[..len], peer),
                    Err(error) => tally_log::warn!(
                        error = &error as &dyn std::error::Error,
                        "failed to receive datagram"
                    ),
                },
            }
        }

        tally_log::debug!("udp listener stopped");
    }
}

/// Returns the complete lines of an oversized datagram, or `None` if `payload` fits the limit.
///
/// Everything after the last newline within `max_size` bytes is dropped.
fn complete_lines(payload: &[u8], max_size: usize) -> Option<&[u8]> {
    if payload.len() <= max_size {
        return None;
    }

    let payload = &payload[..max_size];
    let end = payload.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    Some(&payload[..end])
}
