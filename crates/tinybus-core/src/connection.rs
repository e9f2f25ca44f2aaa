//! Bus connection: serial assignment, name ownership and reply correlation.
//!
//! A [`BusConnection`] wraps one [`Transport`] and owns everything that is
//! per-connection state on a bus: the unique name handed out at hello, the
//! outgoing serial counter, and a backlog of messages that arrived while a
//! caller was blocked on a specific reply.
//!
//! # Pending calls
//!
//! [`send_with_pending_reply`](BusConnection::send_with_pending_reply)
//! returns a [`PendingCall`]. The handle is not `Clone` and releases itself
//! on drop, so it is released exactly once whether the call completes,
//! fails to send, or is abandoned. Every open/release is counted in a shared
//! ledger exposed through [`PendingStats`].

use crate::config::BusConfig;
use crate::error::{BusError, Result};
use crate::message::{MatchRule, Message, MessageKind, RequestNameReply};
use crate::transport::Transport;
use crate::validate::require_domain;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct PendingLedger {
    opened: AtomicU64,
    released: AtomicU64,
}

/// Snapshot of the pending-call ledger of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStats {
    pub opened: u64,
    pub released: u64,
}

impl PendingStats {
    pub fn outstanding(&self) -> u64 {
        self.opened.saturating_sub(self.released)
    }
}

/// Handle for one outstanding method call awaiting its reply.
#[derive(Debug)]
pub struct PendingCall {
    serial: u32,
    ledger: Arc<PendingLedger>,
}

impl PendingCall {
    fn open(serial: u32, ledger: Arc<PendingLedger>) -> Self {
        ledger.opened.fetch_add(1, Ordering::Relaxed);
        Self { serial, ledger }
    }

    /// Serial of the call this handle waits on.
    pub fn serial(&self) -> u32 {
        self.serial
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        self.ledger.released.fetch_add(1, Ordering::Relaxed);
    }
}

/// One connection to the bus.
pub struct BusConnection<T: Transport> {
    transport: T,
    unique_name: String,
    next_serial: u32,
    backlog: VecDeque<Message>,
    ledger: Arc<PendingLedger>,
}

impl<T: Transport> BusConnection<T> {
    /// Say hello to the bus and take the unique name it assigns.
    pub async fn connect(mut transport: T) -> Result<Self> {
        let unique_name = match transport.hello().await {
            Ok(Some(name)) => name,
            Ok(None) => return Err(BusError::connection("bus assigned no unique name")),
            Err(e @ BusError::Connection { .. }) => return Err(e),
            Err(e) => return Err(BusError::connection(format!("hello failed: {}", e))),
        };

        debug!("Connected to bus as {}", unique_name);

        Ok(Self {
            transport,
            unique_name,
            // call serials start at 1; signals carry their own
            next_serial: 1,
            backlog: VecDeque::new(),
            ledger: Arc::new(PendingLedger::default()),
        })
    }

    pub fn unique_name(&self) -> &str {
        &self.unique_name
    }

    /// Claim exclusive ownership of `name`. Only primary ownership counts.
    pub async fn claim_name(&mut self, name: &str) -> Result<()> {
        require_domain("service name", name)?;

        let reply = self
            .transport
            .request_name(name)
            .await
            .map_err(|e| BusError::NameOwnership {
                name: name.to_string(),
                message: e.to_string(),
            })?;

        match reply {
            RequestNameReply::PrimaryOwner => {
                info!("Acquired bus name {}", name);
                Ok(())
            }
            other => Err(BusError::NameOwnership {
                name: name.to_string(),
                message: format!("not primary owner ({:?})", other),
            }),
        }
    }

    pub async fn add_match(&mut self, rule: &MatchRule) -> Result<()> {
        match self.transport.add_match(rule).await {
            Ok(()) => {
                debug!("Added match rule {}", rule);
                Ok(())
            }
            Err(e @ BusError::Connection { .. }) => Err(e),
            Err(e) => Err(BusError::connection(format!(
                "could not add match rule {}: {}",
                rule, e
            ))),
        }
    }

    fn stamp(&mut self, message: &mut Message) -> u32 {
        if let Some(serial) = message.serial {
            return serial;
        }
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        message.serial = Some(serial);
        serial
    }

    async fn transmit(&mut self, message: Message) -> Result<()> {
        debug!(
            "Sending {} serial={:?} {}.{}",
            message.kind,
            message.serial,
            message.interface(),
            message.member()
        );
        self.transport.send(message).await.map_err(|e| match e {
            BusError::Send { .. } => e,
            other => BusError::send(other.to_string()),
        })
    }

    /// Send `message`, assigning the next serial unless it already has one.
    pub async fn send(&mut self, mut message: Message) -> Result<u32> {
        let serial = self.stamp(&mut message);
        self.transmit(message).await?;
        Ok(serial)
    }

    /// Send a method call and return the handle that tracks its reply.
    ///
    /// If the send fails the handle is released before the error returns.
    pub async fn send_with_pending_reply(&mut self, mut message: Message) -> Result<PendingCall> {
        if message.kind != MessageKind::Call {
            return Err(BusError::protocol(format!(
                "only method calls expect a reply, got {}",
                message.kind
            )));
        }
        let serial = self.stamp(&mut message);
        let pending = PendingCall::open(serial, self.ledger.clone());
        self.transmit(message).await?;
        Ok(pending)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.transport.flush().await.map_err(|e| match e {
            BusError::Send { .. } => e,
            other => BusError::send(format!("flush failed: {}", other)),
        })
    }

    /// Next inbound message in arrival order. Blocks until one arrives.
    pub async fn pop_or_block(&mut self) -> Result<Message> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(message);
        }
        self.transport.recv().await
    }

    /// Wait for the reply to `pending`, consuming the handle.
    ///
    /// Messages that are not the awaited reply are kept for
    /// [`pop_or_block`](Self::pop_or_block), up to
    /// [`BusConfig::MAX_BACKLOG`].
    pub async fn block_on(&mut self, pending: PendingCall) -> Result<Message> {
        let serial = pending.serial;
        let is_answer =
            |m: &Message| m.is_reply() && m.reply_serial == Some(serial);

        if let Some(pos) = self.backlog.iter().position(is_answer) {
            if let Some(reply) = self.backlog.remove(pos) {
                return Ok(reply);
            }
        }

        loop {
            let message = self.transport.recv().await?;
            if is_answer(&message) {
                debug!("Received {} for serial {}", message.kind, serial);
                return Ok(message);
            }
            debug!(
                "Parking {} serial={:?} while waiting on serial {}",
                message.kind, message.serial, serial
            );
            if self.backlog.len() >= BusConfig::MAX_BACKLOG {
                if let Some(dropped) = self.backlog.pop_front() {
                    warn!(
                        "Backlog full; dropping {} {}.{}",
                        dropped.kind,
                        dropped.interface(),
                        dropped.member()
                    );
                }
            }
            self.backlog.push_back(message);
        }
    }

    pub fn pending_stats(&self) -> PendingStats {
        PendingStats {
            opened: self.ledger.opened.load(Ordering::Relaxed),
            released: self.ledger.released.load(Ordering::Relaxed),
        }
    }

    /// Last transport-level failure description, if any.
    pub fn take_diagnostic(&mut self) -> Option<String> {
        self.transport.take_diagnostic()
    }
}
