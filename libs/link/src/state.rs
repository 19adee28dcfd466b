//! Mutable state record for the single tracked connection.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use tether_core::ErrorKind;

/// Fixed capacity of the send and receive buffers, and the exact size of
/// every outbound frame.
pub const BUF_SIZE: usize = 2048;

/// Which side of the connection this adapter plays. Set at construction,
/// immutable thereafter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Client,
    Server,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Client => write!(f, "client"),
            Self::Server => write!(f, "server"),
        }
    }
}

/// Lifecycle phase of the adapter's connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Phase {
    /// No endpoint allocated yet.
    #[default]
    Uninitialized,
    /// Server endpoint bound and listening.
    Listening,
    /// Client connect issued, completion pending.
    Connecting,
    /// Data connection established.
    Connected,
    /// Teardown in progress.
    Closing,
    /// The active handle has been released. Terminal.
    Closed,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "Uninitialized"),
            Self::Listening => write!(f, "Listening"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Opaque token for an endpoint registered with the stack driver.
///
/// Replaces a raw per-connection pointer slot: the driver hands one out at
/// registration and everything else refers to the endpoint through it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// The single mutable record for one connection.
///
/// Owned exclusively by the adapter behind a mutex; the stack driver's event
/// handlers mutate it and the caller's polling loop observes it.
/// `has_incoming` is the sole ready signal between the two sides.
pub struct ConnState {
    pub(crate) send_buf: [u8; BUF_SIZE],
    pub(crate) recv_buf: [u8; BUF_SIZE],
    /// Valid bytes currently in `recv_buf`, not yet drained by `read`.
    pub(crate) recv_len: usize,
    /// Set by the accept/receive handlers, cleared by `read`.
    pub(crate) has_incoming: bool,
    pub(crate) error: ErrorKind,
    /// Poll interval in stack ticks; doubled for server-accepted connections.
    pub(crate) poll_ticks: u32,
    /// Listening endpoint, server role only.
    pub(crate) listening: Option<ConnId>,
    /// The single active data connection.
    pub(crate) active: Option<ConnId>,
    pub(crate) role: Role,
    pub(crate) phase: Phase,
}

impl ConnState {
    pub(crate) fn new(role: Role, poll_ticks: u32) -> Self {
        Self {
            send_buf: [0u8; BUF_SIZE],
            recv_buf: [0u8; BUF_SIZE],
            recv_len: 0,
            has_incoming: false,
            error: ErrorKind::Ok,
            poll_ticks,
            listening: None,
            active: None,
            role,
            phase: Phase::Uninitialized,
        }
    }

    /// Append received bytes, silently truncating to the remaining capacity.
    ///
    /// Lossy-overflow policy: whatever fits is kept, the rest is dropped with
    /// no signal to the caller beyond the truncation itself. Returns the
    /// number of bytes actually copied.
    pub(crate) fn push_received(&mut self, payload: &[u8]) -> usize {
        let room = BUF_SIZE - self.recv_len;
        let take = payload.len().min(room);
        self.recv_buf[self.recv_len..self.recv_len + take].copy_from_slice(&payload[..take]);
        self.recv_len += take;
        self.has_incoming = true;
        take
    }

    /// Drain the receive buffer: copies out exactly `recv_len` bytes and
    /// resets `recv_len` and `has_incoming` together.
    pub(crate) fn take_received(&mut self) -> Vec<u8> {
        let out = self.recv_buf[..self.recv_len].to_vec();
        self.recv_len = 0;
        self.has_incoming = false;
        out
    }

    /// Stage an outbound message as a full fixed-size frame.
    ///
    /// The message is copied into `send_buf` and the tail is zero-filled, so
    /// the frame put on the wire is always exactly `BUF_SIZE` bytes. Returns
    /// `None` (buffer untouched) when the message does not fit.
    pub(crate) fn stage_frame(&mut self, message: &[u8]) -> Option<Vec<u8>> {
        if message.len() > BUF_SIZE {
            return None;
        }
        self.send_buf[..message.len()].copy_from_slice(message);
        self.send_buf[message.len()..].fill(0);
        Some(self.send_buf.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_received_appends_and_signals() {
        let mut state = ConnState::new(Role::Server, 5);
        assert!(!state.has_incoming);

        let copied = state.push_received(b"0123456789");
        assert_eq!(copied, 10);
        assert_eq!(state.recv_len, 10);
        assert!(state.has_incoming);

        let copied = state.push_received(b"abc");
        assert_eq!(copied, 3);
        assert_eq!(&state.recv_buf[..13], b"0123456789abc");
    }

    #[test]
    fn push_received_truncates_on_overflow() {
        let mut state = ConnState::new(Role::Server, 5);
        state.push_received(&[0xaa; BUF_SIZE - 4]);

        // Only 4 bytes of room left; the rest is dropped without error.
        let copied = state.push_received(&[0xbb; 16]);
        assert_eq!(copied, 4);
        assert_eq!(state.recv_len, BUF_SIZE);
        assert!(state.error.is_ok());

        // Completely full: nothing is copied, nothing fails.
        assert_eq!(state.push_received(b"x"), 0);
        assert_eq!(state.recv_len, BUF_SIZE);
    }

    #[test]
    fn take_received_drains_atomically() {
        let mut state = ConnState::new(Role::Client, 5);
        state.push_received(b"hello");

        let out = state.take_received();
        assert_eq!(out, b"hello");
        assert_eq!(state.recv_len, 0);
        assert!(!state.has_incoming);

        assert!(state.take_received().is_empty());
    }

    #[test]
    fn stage_frame_pads_to_full_capacity() {
        let mut state = ConnState::new(Role::Client, 5);
        state.send_buf.fill(0xee);

        let frame = state.stage_frame(b"ping").expect("fits");
        assert_eq!(frame.len(), BUF_SIZE);
        assert_eq!(&frame[..4], b"ping");
        assert!(frame[4..].iter().all(|&b| b == 0), "tail must be zeroed");
    }

    #[test]
    fn stage_frame_rejects_oversized_untouched() {
        let mut state = ConnState::new(Role::Client, 5);
        state.send_buf.fill(0x11);

        assert!(state.stage_frame(&[0u8; BUF_SIZE + 1]).is_none());
        assert!(state.send_buf.iter().all(|&b| b == 0x11));

        // Exactly BUF_SIZE is still accepted.
        assert!(state.stage_frame(&[0x22; BUF_SIZE]).is_some());
    }
}
