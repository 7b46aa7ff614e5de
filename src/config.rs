//! Protocol constants and per-connection tunables.
//!
//! The maximum segment size is fixed at compile time; everything else can be
//! overridden per connection through [`Config`].

use std::time::Duration;

use thiserror::Error;

/// Largest payload carried by one segment.
pub const MSS: usize = 1400;
/// Capacity of a connection's receive buffer.
pub const RECV_BUFFER_LEN: usize = 8192;
/// Window advertised during the handshake.
pub const INITIAL_WINDOW: u16 = 8192;
pub const INITIAL_CWND: u32 = 3 * MSS as u32;
pub const INITIAL_SSTHRESH: u32 = 8192;
/// How long the sender waits for each acknowledgement.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(200);
/// Bound on every handshake receive that follows a local transmission.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(1);
/// How long an initiator waits for the peer's own FIN.
pub const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);
/// Consecutive retransmission rounds without progress before `send` gives up.
pub const MAX_RETRIES: u32 = 10;

/// Adjustable connection parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub recv_buffer_len: usize,
    pub initial_window: u16,
    pub initial_cwnd: u32,
    pub initial_ssthresh: u32,
    pub ack_timeout: Duration,
    pub handshake_timeout: Duration,
    pub close_timeout: Duration,
    pub max_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            recv_buffer_len: RECV_BUFFER_LEN,
            initial_window: INITIAL_WINDOW,
            initial_cwnd: INITIAL_CWND,
            initial_ssthresh: INITIAL_SSTHRESH,
            ack_timeout: ACK_TIMEOUT,
            handshake_timeout: HANDSHAKE_TIMEOUT,
            close_timeout: CLOSE_TIMEOUT,
            max_retries: MAX_RETRIES,
        }
    }
}

impl Config {
    /// Reject combinations the protocol cannot express.
    ///
    /// The advertised window is a 16-bit field, so the receive buffer must
    /// fit in it.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.recv_buffer_len == 0 {
            return Err(ConfigError::EmptyBuffer);
        }
        if self.recv_buffer_len > u16::MAX as usize {
            return Err(ConfigError::BufferTooLarge(self.recv_buffer_len));
        }
        if self.initial_window as usize > self.recv_buffer_len {
            return Err(ConfigError::WindowExceedsBuffer {
                window: self.initial_window,
                buffer: self.recv_buffer_len,
            });
        }
        if self.initial_cwnd == 0 || self.initial_ssthresh == 0 {
            return Err(ConfigError::ZeroCongestionWindow);
        }
        if self.ack_timeout.is_zero()
            || self.handshake_timeout.is_zero()
            || self.close_timeout.is_zero()
        {
            return Err(ConfigError::ZeroTimeout);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::ZeroRetries);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("receive buffer must not be empty")]
    EmptyBuffer,
    #[error("receive buffer of {0} bytes cannot be advertised in a 16-bit window")]
    BufferTooLarge(usize),
    #[error("initial window {window} exceeds receive buffer of {buffer} bytes")]
    WindowExceedsBuffer { window: u16, buffer: usize },
    #[error("congestion window and slow-start threshold must be at least one byte")]
    ZeroCongestionWindow,
    #[error("timeouts must be non-zero")]
    ZeroTimeout,
    #[error("retry bound must be at least one")]
    ZeroRetries,
}
