//! Tether Link - Single-connection TCP adapter
//!
//! Exposes a small blocking-style API (listen, read, send, status) over an
//! asynchronous, event-driven stack driver. The driver's event handlers and
//! the polling caller meet in one shared connection-state record; a raised
//! incoming flag is the only ready signal between the two sides.
//!
//! Every outbound send transmits a fixed-size frame of exactly
//! [`BUF_SIZE`] bytes and received data is buffered up to the same capacity,
//! truncating on overflow. Message boundaries above raw bytes are the
//! caller's business.
//!
//! # Example
//!
//! ```no_run
//! use tether_link::{Tether, TetherConfig};
//!
//! // Serve one connection on port 5000, polling every 5 ticks.
//! let tether = Tether::new(TetherConfig::server("0.0.0.0", 5000).poll_interval(5));
//! assert!(tether.status());
//!
//! while tether.listen() {
//!     if let Some(bytes) = tether.read() {
//!         tether.send(&bytes); // echo
//!     }
//! }
//! ```

pub mod adapter;
pub mod assoc;
pub mod config;
mod event;
mod stack;
mod state;

// Re-exports for convenience
pub use adapter::Tether;
pub use assoc::{HostLink, LinkCredentials, LinkLayer};
pub use config::TetherConfig;
pub use state::{BUF_SIZE, ConnId, Phase, Role};
