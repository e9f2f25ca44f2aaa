//! TCP bus daemon.
//!
//! Accepts peer connections, attaches each to a shared [`Router`], and
//! relays frames between the socket and the router.
//!
//! # Thread Safety
//!
//! Each connection runs a reader loop and a writer task. The writer owns the
//! socket's write half and drains two channels: control answers produced by
//! the reader loop and messages routed to this peer. The `Router` is shared
//! via `Arc` and synchronizes internally.

use super::router::Router;
use super::wire::{read_frame, write_frame, Frame};
use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::message::MatchRule;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// Handle to a running bus daemon. Dropping shuts down the daemon.
pub struct BusDaemonHandle {
    pub addr: SocketAddr,
    router: Arc<Router>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    conn_shutdown_tx: watch::Sender<bool>,
    task_handle: Option<tokio::task::JoinHandle<()>>,
}

impl BusDaemonHandle {
    /// Get the address the daemon is listening on.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Stop accepting connections and close every active one.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        let _ = self.conn_shutdown_tx.send(true);
    }
}

impl Drop for BusDaemonHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(handle) = self.task_handle.take() {
            handle.abort();
        }
    }
}

/// TCP message bus.
pub struct BusDaemon;

impl BusDaemon {
    /// Bind `addr` and start serving in background tokio tasks.
    ///
    /// Use port 0 to let the OS pick; the chosen address is on the handle.
    pub async fn start(addr: SocketAddr) -> Result<BusDaemonHandle> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;

        info!("Bus daemon listening on {}", addr);

        let router = Arc::new(Router::new());
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (conn_shutdown_tx, conn_shutdown_rx) = watch::channel(false);
        let active_connections = Arc::new(AtomicUsize::new(0));

        let task_handle = tokio::spawn(Self::accept_loop(
            listener,
            router.clone(),
            shutdown_rx,
            conn_shutdown_rx,
            active_connections,
        ));

        Ok(BusDaemonHandle {
            addr,
            router,
            shutdown_tx: Some(shutdown_tx),
            conn_shutdown_tx,
            task_handle: Some(task_handle),
        })
    }

    async fn accept_loop(
        listener: TcpListener,
        router: Arc<Router>,
        mut shutdown_rx: oneshot::Receiver<()>,
        conn_shutdown_rx: watch::Receiver<bool>,
        active_connections: Arc<AtomicUsize>,
    ) {
        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Bus daemon shutting down");
                    break;
                }
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            let current = active_connections.load(Ordering::Relaxed);
                            if current >= BusConfig::MAX_CONNECTIONS {
                                warn!(
                                    "Rejecting bus connection from {}: at max capacity ({})",
                                    peer_addr,
                                    BusConfig::MAX_CONNECTIONS
                                );
                                continue;
                            }

                            active_connections.fetch_add(1, Ordering::Relaxed);
                            let router = router.clone();
                            let conns = active_connections.clone();
                            let mut conn_shutdown = conn_shutdown_rx.clone();

                            tokio::spawn(async move {
                                debug!("Bus connection from {}", peer_addr);
                                if let Err(e) = Self::handle_connection(stream, &router, &mut conn_shutdown).await {
                                    debug!("Bus connection {} ended: {}", peer_addr, e);
                                }
                                conns.fetch_sub(1, Ordering::Relaxed);
                            });
                        }
                        Err(e) => {
                            error!("Bus accept error: {}", e);
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(
        stream: TcpStream,
        router: &Router,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> Result<()> {
        stream.set_nodelay(true)?;
        let (mut reader, writer) = stream.into_split();

        let (unique, bus_rx) = router.attach()?;
        let (control_tx, control_rx) = mpsc::unbounded_channel::<Frame>();
        let writer_task = tokio::spawn(Self::write_loop(BufWriter::new(writer), control_rx, bus_rx));

        let result = loop {
            let frame = tokio::select! {
                result = read_frame(&mut reader) => {
                    match result {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break Ok(()), // Clean disconnect
                        // Length prefix was consumed, so the stream is still in sync
                        Err(e @ BusError::Json { .. }) => {
                            warn!("Unparseable frame from {}: {}", unique, e);
                            let fault = Frame::Fault { message: e.to_string() };
                            if control_tx.send(fault).is_err() {
                                break Ok(());
                            }
                            continue;
                        }
                        Err(e) => break Err(e),
                    }
                }
                _ = shutdown_rx.changed() => {
                    break Ok(()); // Daemon shutting down
                }
            };

            if let Some(answer) = Self::process_frame(frame, &unique, router) {
                if control_tx.send(answer).is_err() {
                    break Ok(()); // Writer gone
                }
            }
        };

        router.detach(&unique);
        drop(control_tx);
        let _ = writer_task.await;
        result
    }

    /// Apply one inbound frame; returns the control answer, if any.
    fn process_frame(frame: Frame, unique: &str, router: &Router) -> Option<Frame> {
        let fault = |e: BusError| Frame::Fault {
            message: e.to_string(),
        };

        match frame {
            Frame::Hello => Some(Frame::Welcome {
                unique_name: unique.to_string(),
            }),
            Frame::RequestName { name } => Some(match router.request_name(unique, &name) {
                Ok(reply) => Frame::NameReply { reply },
                Err(e) => fault(e),
            }),
            Frame::AddMatch { rule } => Some(
                match rule
                    .parse::<MatchRule>()
                    .and_then(|rule| router.add_match(unique, rule))
                {
                    Ok(()) => Frame::MatchAdded,
                    Err(e) => fault(e),
                },
            ),
            Frame::Message { message } => {
                if let Err(e) = router.route(unique, message) {
                    warn!("Could not route message from {}: {}", unique, e);
                }
                None
            }
            other => Some(Frame::Fault {
                message: format!("unexpected frame from peer: {:?}", other),
            }),
        }
    }

    async fn write_loop(
        mut writer: BufWriter<OwnedWriteHalf>,
        mut control_rx: mpsc::UnboundedReceiver<Frame>,
        mut bus_rx: mpsc::UnboundedReceiver<crate::message::Message>,
    ) {
        loop {
            let frame = tokio::select! {
                Some(frame) = control_rx.recv() => frame,
                Some(message) = bus_rx.recv() => Frame::Message { message },
                else => break,
            };

            let written = match write_frame(&mut writer, &frame).await {
                Ok(()) => writer.flush().await.map_err(BusError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = written {
                debug!("Bus writer stopped: {}", e);
                break;
            }
        }
    }
}
