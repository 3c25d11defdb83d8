//! Wire-affecting and host-tunable constants.

use tokio::time::Duration;

/// Initial retransmission delay for a freshly enqueued reliable packet.
pub const RESEND_TIME: Duration = Duration::from_millis(200);
/// Delay between retries after the first resend.
pub const RETRY_RESEND_TIME: Duration = Duration::from_millis(500);
/// Retries after which a reliable packet is a terminal failure for its peer.
pub const MAX_SEND_RETRIES: u32 = 20;
/// Reorder buffer capacity per peer.
pub const MAX_RECV_BUFFER_SIZE: usize = 30;

/// Host-tunable knobs that don't affect wire compatibility between peers,
/// only this host's own scheduling and liveness policy.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    /// How long a peer may go without inbound traffic before the tick evicts
    /// it for `DisconnectReason::Timeout`.
    pub liveness_window: Duration,
    /// Cadence of the tick loop (resends + liveness sweep).
    pub tick_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(15),
            tick_interval: Duration::from_millis(10),
        }
    }
}
