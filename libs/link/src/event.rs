//! Event handlers invoked by the stack driver.
//!
//! Handlers only mutate [`ConnState`]; they never block and never touch a
//! socket. The driver owns all I/O and acts on the [`Flow`] directive a
//! handler returns.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use tether_core::ErrorKind;

use crate::state::{ConnId, ConnState, Phase};

/// Directive returned to the driver after an event is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Keep servicing the connection.
    Continue,
    /// Tear the active connection down.
    Teardown,
}

/// The handler set registered on stack endpoints for one adapter.
#[derive(Clone)]
pub(crate) struct EventHandlers {
    state: Arc<Mutex<ConnState>>,
}

impl EventHandlers {
    pub(crate) fn new(state: Arc<Mutex<ConnState>>) -> Self {
        Self { state }
    }

    /// Caller-configured poll interval, in stack ticks.
    pub(crate) fn poll_ticks(&self) -> u32 {
        self.state.lock().poll_ticks
    }

    /// Record a fault. The first fatal kind wins: a latched fatal error is
    /// never downgraded by a later, softer one.
    fn record(state: &mut ConnState, kind: ErrorKind) {
        if state.error.is_fatal() {
            return;
        }
        state.error = kind;
    }

    /// Accept event, server role only.
    ///
    /// Rejects with the value-error signal when a connection is already
    /// active or a fatal error is latched; the existing active handle is
    /// left undisturbed either way.
    pub(crate) fn on_accept(&self, id: ConnId) -> Result<(), ErrorKind> {
        let mut state = self.state.lock();
        if state.active.is_some() {
            warn!(%id, "rejecting accept, a connection is already active");
            return Err(ErrorKind::InvalidArgument);
        }
        if state.error.is_fatal() {
            warn!(%id, error = %state.error, "rejecting accept, fatal error latched");
            return Err(ErrorKind::InvalidArgument);
        }
        state.active = Some(id);
        state.phase = Phase::Connected;
        // A new connection is itself reported as an initial incoming event.
        state.has_incoming = true;
        debug!(%id, "connection accepted");
        Ok(())
    }

    /// Client connect completion. Failures arrive via [`Self::on_fatal`]
    /// instead, never here.
    pub(crate) fn on_connected(&self, id: ConnId) {
        let mut state = self.state.lock();
        state.active = Some(id);
        state.phase = Phase::Connected;
        debug!(%id, "connected to remote host");
    }

    /// Data-received event. `None` is the stack's teardown signal: the peer
    /// closed gracefully, no fault is recorded, and the idle poll is what
    /// eventually surfaces the dead connection. Returns the number of bytes
    /// consumed so the driver can acknowledge them.
    pub(crate) fn on_data_received(&self, id: ConnId, payload: Option<&[u8]>) -> usize {
        let mut state = self.state.lock();
        let Some(bytes) = payload else {
            debug!(%id, "peer closed the connection");
            return 0;
        };
        if state.error.is_fatal() {
            // Fatal fault latched: no buffer mutation until teardown.
            return 0;
        }
        let copied = state.push_received(bytes);
        if copied < bytes.len() {
            warn!(
                %id,
                delivered = bytes.len(),
                copied,
                "receive buffer full, truncating delivery"
            );
        }
        copied
    }

    /// Send-completed event. Reserved hook for tracking peer-acknowledged
    /// bytes; diagnostics only.
    pub(crate) fn on_sent(&self, id: ConnId, len: usize) {
        debug!(%id, len, "send acknowledged");
    }

    /// Periodic poll fired with no activity on the connection: the peer is
    /// considered unresponsive.
    pub(crate) fn on_poll(&self, id: ConnId) -> Flow {
        let mut state = self.state.lock();
        warn!(%id, "poll interval elapsed without activity");
        Self::record(&mut state, ErrorKind::Timeout);
        state.phase = Phase::Closing;
        Flow::Teardown
    }

    /// Unrecoverable transport error reported by the stack.
    pub(crate) fn on_fatal(&self, id: ConnId, kind: ErrorKind) -> Flow {
        let mut state = self.state.lock();
        warn!(%id, error = %kind, "fatal transport error");
        Self::record(&mut state, kind);
        state.phase = Phase::Closing;
        Flow::Teardown
    }

    /// Invoked by the driver once a connection's teardown has finished and
    /// the endpoint is deregistered.
    pub(crate) fn on_closed(&self, id: ConnId) {
        let mut state = self.state.lock();
        if state.active == Some(id) {
            state.active = None;
            state.phase = Phase::Closed;
        }
        debug!(%id, "endpoint released");
    }
}
