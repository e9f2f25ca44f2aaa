//! Client call engine.
//!
//! A [`Client`] issues one method call at a time:
//!
//! ```text
//! Idle --call--> Sent --receive--> Idle
//!   ^              |
//!   +---failure----+
//! ```
//!
//! Every public operation reports failure as a single
//! [`BusError::Operation`] naming the operation, with the transport
//! diagnostic appended when one is available. Whatever an operation obtained
//! (the outgoing message, the pending-call handle) is released before it
//! returns, on every path.

use crate::config::BusConfig;
use crate::connection::{BusConnection, PendingCall};
use crate::error::{BusError, Result};
use crate::marshal::{self, Args, CallPattern};
use crate::message::{Message, MessageKind, TypeTag, Value};
use crate::transport::Transport;
use crate::validate::{require_domain, require_member, require_path};
use tracing::debug;

/// Where a client is in its call cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    /// A call was sent and its reply has not been received yet.
    Sent,
}

/// Bus client with at most one call in flight.
pub struct Client<T: Transport> {
    connection: BusConnection<T>,
    pending: Option<PendingCall>,
    signal_serial: u32,
}

impl<T: Transport> Client<T> {
    pub fn new(connection: BusConnection<T>) -> Self {
        Self {
            connection,
            pending: None,
            signal_serial: 0,
        }
    }

    pub fn connection(&self) -> &BusConnection<T> {
        &self.connection
    }

    pub fn state(&self) -> CallState {
        if self.pending.is_some() {
            CallState::Sent
        } else {
            CallState::Idle
        }
    }

    /// Serial the next emitted signal will carry.
    pub fn next_signal_serial(&self) -> u32 {
        self.signal_serial
    }

    fn fail(&mut self, operation: &'static str, err: BusError) -> BusError {
        let diagnostic = self.connection.take_diagnostic();
        err.within(operation, diagnostic)
    }

    /// Send a method call to `service`. Pair with [`receive`](Self::receive).
    ///
    /// `interface` may be empty, in which case the message carries none.
    pub async fn call(
        &mut self,
        service: &str,
        interface: &str,
        method: &str,
        shape: &[TypeTag],
        args: Vec<Value>,
    ) -> Result<()> {
        match self.send_call(service, interface, method, shape, args).await {
            Ok(pending) => {
                self.pending = Some(pending);
                Ok(())
            }
            Err(e) => Err(self.fail("call", e)),
        }
    }

    async fn send_call(
        &mut self,
        service: &str,
        interface: &str,
        method: &str,
        shape: &[TypeTag],
        args: Vec<Value>,
    ) -> Result<PendingCall> {
        if self.pending.is_some() {
            return Err(BusError::protocol("call already pending"));
        }
        require_domain("service name", service)?;
        if !interface.is_empty() {
            require_domain("interface name", interface)?;
        }
        require_member("method name", method)?;

        let args = marshal::encode(shape, args)?;
        let message = Message::method_call(service, BusConfig::OBJECT_PATH, interface, method)
            .with_args(args);

        let pending = self.connection.send_with_pending_reply(message).await?;
        self.connection.flush().await?;
        debug!("Call {} on {} pending as serial {}", method, service, pending.serial());
        Ok(pending)
    }

    /// Block until the reply to the pending call arrives and decode it.
    ///
    /// An error reply becomes [`BusError::Remote`] with the peer's reason.
    pub async fn receive(&mut self, expected: &[TypeTag]) -> Result<Vec<Value>> {
        let received = self.await_reply(expected).await;
        received.map_err(|e| self.fail("receive", e))
    }

    async fn await_reply(&mut self, expected: &[TypeTag]) -> Result<Vec<Value>> {
        let pending = self
            .pending
            .take()
            .ok_or_else(|| BusError::protocol("no call pending"))?;
        let reply = self.connection.block_on(pending).await?;

        if reply.kind == MessageKind::Error {
            let reason = marshal::decode(&reply, marshal::STRING).map_err(|e| match e {
                BusError::Marshal { message } => {
                    BusError::marshal(format!("while processing error reply: {}", message))
                }
                other => other,
            })?;
            return Err(BusError::Remote {
                reason: reason.into_iter().next().map(|v| v.to_string()).unwrap_or_default(),
            });
        }

        marshal::decode(&reply, expected)
    }

    /// [`call`](Self::call) with a typed argument tuple.
    pub async fn call_typed<A: Args>(
        &mut self,
        service: &str,
        interface: &str,
        method: &str,
        args: A,
    ) -> Result<()> {
        self.call(service, interface, method, &A::shape(), args.into_values())
            .await
    }

    /// [`receive`](Self::receive) decoding into a typed reply tuple.
    pub async fn receive_typed<R: Args>(&mut self) -> Result<R> {
        let values = self.receive(&R::shape()).await?;
        R::from_values(values).map_err(|e| self.fail("receive", e))
    }

    /// Call and receive in one step using a fixed call pattern.
    pub async fn invoke(
        &mut self,
        pattern: CallPattern,
        service: &str,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Vec<Value>> {
        self.call(service, interface, method, pattern.request_shape(), args)
            .await?;
        self.receive(pattern.reply_shape()).await
    }

    /// Emit a broadcast signal carrying one string. Returns the signal serial.
    ///
    /// Signals are stamped from their own counter, starting at 0, rather
    /// than from the connection's call serials. The serial is consumed once
    /// validation passes, even if sending fails.
    pub async fn signal(
        &mut self,
        path: &str,
        interface: &str,
        name: &str,
        payload: &str,
    ) -> Result<u32> {
        let emitted = self.emit_signal(path, interface, name, payload).await;
        emitted.map_err(|e| self.fail("signal", e))
    }

    async fn emit_signal(
        &mut self,
        path: &str,
        interface: &str,
        name: &str,
        payload: &str,
    ) -> Result<u32> {
        require_path("object path", path)?;
        require_domain("interface name", interface)?;
        require_member("signal name", name)?;

        let args = marshal::encode(marshal::SIGNAL_PAYLOAD, vec![Value::Str(payload.to_string())])?;

        let serial = self.signal_serial;
        self.signal_serial = serial
            .checked_add(1)
            .ok_or_else(|| BusError::protocol("signal serial exhausted"))?;

        let message = Message::signal(path, interface, name)
            .with_serial(serial)
            .with_args(args);
        self.connection.send(message).await?;
        self.connection.flush().await?;
        debug!("Signal {}.{} emitted with serial {}", interface, name, serial);
        Ok(serial)
    }
}
