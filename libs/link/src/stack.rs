//! Tokio-backed stack driver.
//!
//! Plays the role of the underlying asynchronous network stack: it owns the
//! sockets and a private runtime, and surfaces everything that happens on
//! them through the [`EventHandlers`] contract. Endpoints are referred to by
//! opaque [`ConnId`] tokens held in a registry; nothing outside this module
//! touches a socket.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};
use tokio::task::AbortHandle;
use tokio::time::timeout;
use tracing::{debug, warn};

use tether_core::{ErrorKind, Result};

use crate::event::{EventHandlers, Flow};
use crate::state::{BUF_SIZE, ConnId};

/// Granularity of one poll tick, the stack's coarse timer.
pub(crate) const POLL_TICK: Duration = Duration::from_millis(500);

/// How long an orderly close may take before falling back to abort.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// Command sent to a connection's driver task.
enum Command {
    /// Write one fixed-size frame; the result is acknowledged on the oneshot.
    Send(Vec<u8>, oneshot::Sender<std::result::Result<(), ErrorKind>>),
    /// Orderly close; the shutdown result is acknowledged on the oneshot.
    Close(oneshot::Sender<std::result::Result<(), ErrorKind>>),
}

struct ConnEntry {
    /// `None` for listening endpoints, which take no commands.
    cmd_tx: Option<mpsc::UnboundedSender<Command>>,
    abort: Option<AbortHandle>,
}

type Registry = Arc<Mutex<HashMap<ConnId, ConnEntry>>>;

/// The driver: a private two-worker runtime plus the endpoint registry.
pub(crate) struct Stack {
    runtime: Runtime,
    conns: Registry,
}

impl Stack {
    pub(crate) fn new() -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("tether-stack")
            .enable_all()
            .build()?;
        Ok(Self {
            runtime,
            conns: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Bind `0.0.0.0:port` and start the accept loop.
    ///
    /// The effective backlog is one pending connection: the loop offers each
    /// accepted stream to the accept handler and drops it on rejection.
    pub(crate) fn bind_listen(
        &self,
        port: u16,
        handlers: EventHandlers,
    ) -> Result<(ConnId, SocketAddr)> {
        let listener = self
            .runtime
            .block_on(TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)))?;
        let local = listener.local_addr()?;
        let id = ConnId::next();
        let task = self
            .runtime
            .spawn(accept_loop(listener, handlers, self.conns.clone()));
        self.conns.lock().insert(
            id,
            ConnEntry {
                cmd_tx: None,
                abort: Some(task.abort_handle()),
            },
        );
        debug!(%id, %local, "listening");
        Ok((id, local))
    }

    /// Issue an asynchronous connect. Completion and failure are both
    /// surfaced through the handlers, never synchronously.
    pub(crate) fn connect(&self, addr: SocketAddr, handlers: EventHandlers) {
        let conns = self.conns.clone();
        self.runtime.spawn(async move {
            let id = ConnId::next();
            debug!(%id, %addr, "connecting");
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    let idle = POLL_TICK * handlers.poll_ticks();
                    register_connection(id, stream, handlers.clone(), conns, idle);
                    handlers.on_connected(id);
                }
                Err(err) => {
                    handlers.on_fatal(id, ErrorKind::from(&err));
                }
            }
        });
    }

    /// Write one fixed-size frame on the given connection and synchronously
    /// observe the result.
    pub(crate) fn send_frame(
        &self,
        id: ConnId,
        frame: Vec<u8>,
    ) -> std::result::Result<(), ErrorKind> {
        let (ack_tx, ack_rx) = oneshot::channel();
        let queued = {
            let conns = self.conns.lock();
            match conns.get(&id).and_then(|entry| entry.cmd_tx.as_ref()) {
                Some(tx) => tx.send(Command::Send(frame, ack_tx)).is_ok(),
                None => false,
            }
        };
        if !queued {
            return Err(ErrorKind::NotConnected);
        }
        self.runtime
            .block_on(ack_rx)
            .unwrap_or(Err(ErrorKind::Aborted))
    }

    /// Deregister an endpoint and close it: orderly shutdown first, abort as
    /// the fallback when that fails or stalls. Unknown handles are a no-op.
    pub(crate) fn close(&self, id: ConnId) -> ErrorKind {
        let Some(entry) = self.conns.lock().remove(&id) else {
            return ErrorKind::Ok;
        };
        let Some(cmd_tx) = entry.cmd_tx else {
            // Listening endpoint: stop the accept loop.
            if let Some(abort) = entry.abort {
                abort.abort();
            }
            return ErrorKind::Ok;
        };

        let (ack_tx, ack_rx) = oneshot::channel();
        if cmd_tx.send(Command::Close(ack_tx)).is_err() {
            // Driver already gone; the endpoint is closed.
            return ErrorKind::Ok;
        }
        // The timeout future must be created inside the runtime context.
        match self
            .runtime
            .block_on(async { timeout(CLOSE_GRACE, ack_rx).await })
        {
            Ok(Ok(Ok(()))) => ErrorKind::Ok,
            Ok(Ok(Err(kind))) => {
                if let Some(abort) = entry.abort {
                    abort.abort();
                }
                kind
            }
            _ => {
                if let Some(abort) = entry.abort {
                    abort.abort();
                }
                ErrorKind::Aborted
            }
        }
    }

    /// Run a future to completion on the stack runtime.
    pub(crate) fn block_on<F: std::future::Future>(&self, fut: F) -> F::Output {
        self.runtime.block_on(fut)
    }
}

/// Accept connections for a listening endpoint, one active at a time.
async fn accept_loop(listener: TcpListener, handlers: EventHandlers, conns: Registry) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(error = %err, "accept failed");
                continue;
            }
        };
        let id = ConnId::next();
        if handlers.on_accept(id).is_err() {
            // Single-connection policy: surplus streams are dropped on the
            // floor, which the surplus peer observes as an immediate close.
            debug!(%peer, "dropping surplus connection");
            continue;
        }
        debug!(%id, %peer, "accepted");
        // Server-accepted connections poll at twice the configured interval.
        let idle = POLL_TICK * handlers.poll_ticks().saturating_mul(2);
        register_connection(id, stream, handlers.clone(), conns.clone(), idle);
    }
}

/// Register a data connection: command channel, driver task, registry entry.
///
/// Must run inside the stack runtime.
fn register_connection(
    id: ConnId,
    stream: TcpStream,
    handlers: EventHandlers,
    conns: Registry,
    idle: Duration,
) {
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    conns.lock().insert(
        id,
        ConnEntry {
            cmd_tx: Some(cmd_tx),
            abort: None,
        },
    );
    let task = tokio::spawn(connection_task(
        id,
        stream,
        handlers,
        conns.clone(),
        cmd_rx,
        idle,
    ));
    if let Some(entry) = conns.lock().get_mut(&id) {
        entry.abort = Some(task.abort_handle());
    }
}

/// Drive one data connection: adapter commands, socket readability, and the
/// idle poll timer, strictly serialized by the select loop.
async fn connection_task(
    id: ConnId,
    stream: TcpStream,
    handlers: EventHandlers,
    conns: Registry,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    idle: Duration,
) {
    let (mut reader, mut writer) = stream.into_split();
    let mut buf = vec![0u8; BUF_SIZE];
    let mut read_open = true;

    loop {
        // The sleep is re-armed on every event, so it only fires after a
        // full poll interval with no activity at all.
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(frame, ack)) => {
                    let result = write_frame(&mut writer, &frame).await;
                    if result.is_ok() {
                        handlers.on_sent(id, frame.len());
                    }
                    let _ = ack.send(result);
                }
                Some(Command::Close(ack)) => {
                    let result = writer.shutdown().await.map_err(|e| ErrorKind::from(&e));
                    let _ = ack.send(result);
                    break;
                }
                None => break,
            },
            read = reader.read(&mut buf), if read_open => match read {
                Ok(0) => {
                    // Graceful close from the peer; the idle poll will
                    // eventually retire the connection.
                    handlers.on_data_received(id, None);
                    read_open = false;
                }
                Ok(n) => {
                    handlers.on_data_received(id, Some(&buf[..n]));
                }
                Err(err) => {
                    if handlers.on_fatal(id, ErrorKind::from(&err)) == Flow::Teardown {
                        let _ = writer.shutdown().await;
                        break;
                    }
                }
            },
            _ = tokio::time::sleep(idle) => {
                if handlers.on_poll(id) == Flow::Teardown {
                    let _ = writer.shutdown().await;
                    break;
                }
            }
        }
    }

    conns.lock().remove(&id);
    handlers.on_closed(id);
    debug!(%id, "driver stopped");
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    frame: &[u8],
) -> std::result::Result<(), ErrorKind> {
    writer
        .write_all(frame)
        .await
        .map_err(|e| ErrorKind::from(&e))?;
    writer.flush().await.map_err(|e| ErrorKind::from(&e))
}
