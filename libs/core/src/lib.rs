//! Tether Core - Shared error types
//!
//! Holds the connection status taxonomy ([`ErrorKind`]) and the error type
//! used by fallible seams across the workspace.

pub mod error;

pub use error::{Error, ErrorKind, Result};
