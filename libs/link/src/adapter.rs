//! The blocking-style connection adapter.

use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;
use tracing::{error, info, warn};

use tether_core::ErrorKind;

use crate::assoc::{ASSOC_TIMEOUT, HostLink, LinkCredentials, LinkLayer};
use crate::config::TetherConfig;
use crate::event::EventHandlers;
use crate::stack::Stack;
use crate::state::{BUF_SIZE, ConnState, Phase, Role};

/// Sleep interval of the listen polling loop.
const LISTEN_POLL: Duration = Duration::from_millis(100);

/// A single-connection TCP adapter.
///
/// Bridges the stack driver's asynchronous event delivery to a synchronous
/// caller: event handlers mutate the shared connection state and the caller
/// polls it through the blocking-style API. One adapter manages exactly one
/// logical connection; once that connection has failed or been torn down,
/// a fresh adapter is needed.
///
/// # Example
///
/// ```no_run
/// use tether_link::{Tether, TetherConfig};
///
/// let tether = Tether::new(TetherConfig::server("0.0.0.0", 5000).poll_interval(5));
/// assert!(tether.status());
///
/// if tether.listen() {
///     if let Some(bytes) = tether.read() {
///         println!("received {} bytes", bytes.len());
///         tether.send(b"ack");
///     }
/// }
/// ```
pub struct Tether {
    config: TetherConfig,
    state: Arc<Mutex<ConnState>>,
    /// `None` only when the driver runtime itself failed to start.
    stack: Option<Stack>,
    link: Box<dyn LinkLayer>,
    local: Option<SocketAddr>,
}

impl Tether {
    /// Create an adapter with the default host link layer.
    pub fn new(config: TetherConfig) -> Self {
        Self::with_link_layer(config, Box::new(HostLink))
    }

    /// Create an adapter with a custom link-layer collaborator.
    ///
    /// Construction never fails hard: any initialization failure is latched
    /// into the connection state instead, and [`status`](Self::status) must
    /// be checked before use. A client's connect is issued asynchronously
    /// here; its failure likewise surfaces later through the handlers.
    pub fn with_link_layer(config: TetherConfig, link: Box<dyn LinkLayer>) -> Self {
        let state = Arc::new(Mutex::new(ConnState::new(config.role, config.poll_ticks)));
        let handlers = EventHandlers::new(state.clone());
        let mut local = None;

        let stack = match Stack::new() {
            Ok(stack) => Some(stack),
            Err(err) => {
                error!(error = %err, "failed to start the stack driver");
                state.lock().error = ErrorKind::InitializationFailure;
                None
            }
        };

        if let Some(stack) = &stack {
            match config.role {
                Role::Server => {
                    info!(port = config.port, "server mode init");
                    let bound = config
                        .validate()
                        .and_then(|_| stack.bind_listen(config.port, handlers));
                    match bound {
                        Ok((id, addr)) => {
                            let mut st = state.lock();
                            st.listening = Some(id);
                            st.phase = Phase::Listening;
                            local = Some(addr);
                        }
                        Err(err) => {
                            warn!(error = %err, "server init failed");
                            state.lock().error = ErrorKind::InitializationFailure;
                        }
                    }
                }
                Role::Client => {
                    info!(address = %config.address(), "client mode init");
                    match config.remote_addr() {
                        Ok(addr) => {
                            state.lock().phase = Phase::Connecting;
                            stack.connect(addr, handlers);
                        }
                        Err(err) => {
                            warn!(error = %err, "client init failed");
                            state.lock().error = ErrorKind::InitializationFailure;
                        }
                    }
                }
            }
        }

        Self {
            config,
            state,
            stack,
            link,
            local,
        }
    }

    /// Wait for an incoming event.
    ///
    /// Busy-waits in a bounded sleep loop until the incoming flag is raised
    /// (returns true) or a fault is recorded (reports it, returns false).
    /// Has no timeout of its own; an unresponsive peer is surfaced by the
    /// stack's poll handler. Recoverable faults clear once reported.
    pub fn listen(&self) -> bool {
        loop {
            {
                let mut state = self.state.lock();
                if !state.error.is_ok() {
                    report(state.error);
                    if state.error.recoverable() {
                        state.error = ErrorKind::Ok;
                    }
                    return false;
                }
                if state.has_incoming {
                    return true;
                }
            }
            thread::sleep(LISTEN_POLL);
        }
    }

    /// Drain the receive buffer.
    ///
    /// Returns `None` when a fault is latched; otherwise the bytes received
    /// since the last read (possibly none), resetting the buffered length
    /// and the incoming flag together.
    pub fn read(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        if !state.error.is_ok() {
            return None;
        }
        Some(state.take_received())
    }

    /// Send a message as one fixed-size frame.
    ///
    /// Every send transmits exactly [`BUF_SIZE`] bytes: the message followed
    /// by a zeroed tail; the peer must be prepared for full frames and draw
    /// message boundaries itself. Returns false when the message is too long
    /// (state untouched), a fault is latched, no connection is active, or
    /// the write fails (fault recorded, connection torn down).
    pub fn send(&self, message: &[u8]) -> bool {
        if message.len() > BUF_SIZE {
            return false;
        }
        let (active, frame) = {
            let mut state = self.state.lock();
            if !state.error.is_ok() {
                return false;
            }
            let Some(active) = state.active else {
                state.error = ErrorKind::NotConnected;
                return false;
            };
            let Some(frame) = state.stage_frame(message) else {
                return false;
            };
            (active, frame)
        };
        let Some(stack) = &self.stack else {
            return false;
        };
        match stack.send_frame(active, frame) {
            Ok(()) => true,
            Err(kind) => {
                warn!(error = %kind, "write failed, tearing the connection down");
                let mut state = self.state.lock();
                if !state.error.is_fatal() {
                    state.error = kind;
                }
                drop(state);
                self.end_connection();
                false
            }
        }
    }

    /// Whether the connection is healthy: true iff no fault is recorded.
    pub fn status(&self) -> bool {
        self.state.lock().error.is_ok()
    }

    /// Tear down the active connection.
    ///
    /// Deregisters the endpoint, attempts an orderly close with abort as the
    /// fallback, and clears the active handle. Idempotent: once the handle
    /// is cleared, further calls are no-ops returning `Ok`.
    pub fn end_connection(&self) -> ErrorKind {
        let active = {
            let mut state = self.state.lock();
            let taken = state.active.take();
            if taken.is_some() {
                state.phase = Phase::Closing;
            }
            taken
        };
        let Some(id) = active else {
            return ErrorKind::Ok;
        };
        let result = match &self.stack {
            Some(stack) => stack.close(id),
            None => ErrorKind::Ok,
        };
        self.state.lock().phase = Phase::Closed;
        result
    }

    /// Associate with the link through the external link-layer collaborator.
    ///
    /// Returns `Ok` on success; failures map into the taxonomy
    /// (`InterfaceError` for link faults and for attempts that exceed the
    /// association timeout). Purely a pass-through: no connection state is
    /// touched.
    pub fn connect_to_link(&self, credentials: &LinkCredentials) -> ErrorKind {
        info!(ssid = %credentials.ssid, "connecting to link");
        let Some(stack) = &self.stack else {
            return ErrorKind::InterfaceError;
        };
        let outcome =
            stack.block_on(async { timeout(ASSOC_TIMEOUT, self.link.associate(credentials)).await });
        match outcome {
            Ok(Ok(())) => {
                info!("link associated");
                ErrorKind::Ok
            }
            Ok(Err(err)) => {
                warn!(error = %err, "link association failed");
                err.kind()
            }
            Err(_) => {
                warn!("link association timed out");
                ErrorKind::InterfaceError
            }
        }
    }

    /// Role this adapter was constructed with.
    pub fn role(&self) -> Role {
        self.state.lock().role
    }

    /// Lifecycle phase, for diagnostics.
    pub fn phase(&self) -> Phase {
        self.state.lock().phase
    }

    /// Local address of the bound listener (server role only; resolves a
    /// port-zero bind).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local
    }
}

impl Drop for Tether {
    fn drop(&mut self) {
        self.end_connection();
        let listening = self.state.lock().listening.take();
        if let (Some(stack), Some(id)) = (&self.stack, listening) {
            stack.close(id);
        }
    }
}

impl std::fmt::Debug for Tether {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tether")
            .field("role", &self.config.role)
            .field("address", &self.config.address())
            .field("phase", &self.phase())
            .finish()
    }
}

/// Diagnostic report of a recorded fault. Side-effect-free: recovery
/// decisions belong to the callers observing the fault.
fn report(kind: ErrorKind) {
    if kind.is_ok() {
        return;
    }
    warn!(error = %kind, recoverable = kind.recoverable(), "connection fault");
}
