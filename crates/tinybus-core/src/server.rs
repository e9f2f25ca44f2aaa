//! Server dispatch loop.
//!
//! A [`Server`] owns one service name on the bus and answers method calls on
//! one interface. Each loop iteration runs:
//!
//! ```text
//! WaitMessage -> Classified -> { Handled | ErrorReplied | Skipped } -> Reset
//! ```
//!
//! [`run_once`](Server::run_once) and [`serve`](Server::serve) drive that
//! cycle with registered handlers. The primitives it is built from
//! ([`next_message`](Server::next_message), [`decode`](Server::decode),
//! [`reply`](Server::reply), [`inform_error`](Server::inform_error),
//! [`reset`](Server::reset)) are public for callers that want to drive the
//! loop themselves. Every call gets exactly one reply, either a return or an
//! error.

use crate::config::ProtocolNames;
use crate::connection::BusConnection;
use crate::error::{BusError, Result};
use crate::introspect::IntrospectionDocument;
use crate::marshal::{self, CallPattern};
use crate::message::{MatchRule, Message, MessageKind, TypeTag, Value};
use crate::transport::Transport;
use crate::validate::{require_domain, require_member};
use std::collections::HashMap;
use tracing::{debug, error, info, warn};

/// Application logic for one method. `Err` is sent back as the error reason.
pub type MethodHandler =
    Box<dyn FnMut(Vec<Value>) -> std::result::Result<Vec<Value>, String> + Send>;

pub type SignalHandler = Box<dyn FnMut(SignalEvent) + Send>;

/// A received signal with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalEvent {
    pub sender: Option<String>,
    pub path: String,
    pub interface: String,
    pub member: String,
    pub payload: String,
}

/// The message currently held by the server, valid until [`Server::reset`].
#[derive(Debug, Clone)]
pub struct InboundEnvelope {
    pub kind: MessageKind,
    pub interface: String,
    pub member: String,
    pub message: Message,
    /// Set once a return or error has been sent for this call.
    pub replied: bool,
}

/// How one loop iteration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Handled,
    ErrorReplied,
    Skipped,
}

struct MethodEntry {
    pattern: CallPattern,
    handler: MethodHandler,
}

/// Bus service answering calls on one interface.
pub struct Server<T: Transport> {
    connection: BusConnection<T>,
    service: String,
    interface: String,
    methods: HashMap<String, MethodEntry>,
    on_signal: Option<SignalHandler>,
    document: IntrospectionDocument,
    current: Option<InboundEnvelope>,
}

impl<T: Transport> Server<T> {
    /// Claim `service` on the bus and serve methods on `interface`.
    pub async fn bind(
        mut connection: BusConnection<T>,
        service: &str,
        interface: &str,
    ) -> Result<Self> {
        require_domain("interface name", interface)?;
        connection.claim_name(service).await?;

        info!("Serving {} on interface {}", service, interface);

        Ok(Self {
            connection,
            service: service.to_string(),
            interface: interface.to_string(),
            methods: HashMap::new(),
            on_signal: None,
            document: IntrospectionDocument::new(interface),
            current: None,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn connection(&self) -> &BusConnection<T> {
        &self.connection
    }

    pub fn register_method<F>(&mut self, name: &str, pattern: CallPattern, handler: F) -> Result<()>
    where
        F: FnMut(Vec<Value>) -> std::result::Result<Vec<Value>, String> + Send + 'static,
    {
        require_member("method name", name)?;
        self.document
            .add_method(name, pattern.request_shape(), pattern.reply_shape());
        self.methods.insert(
            name.to_string(),
            MethodEntry {
                pattern,
                handler: Box::new(handler),
            },
        );
        Ok(())
    }

    /// Subscribe to every signal on `interface`.
    pub async fn register_signal(&mut self, interface: &str) -> Result<()> {
        require_domain("interface name", interface)?;
        self.connection.add_match(&MatchRule::signal(interface)).await?;
        self.connection.flush().await?;
        self.document.add_signal_interface(interface);
        Ok(())
    }

    pub fn on_signal<F>(&mut self, handler: F)
    where
        F: FnMut(SignalEvent) + Send + 'static,
    {
        self.on_signal = Some(Box::new(handler));
    }

    pub fn introspect(&self) -> String {
        self.document.render()
    }

    /// Block until the next message arrives and hold it.
    pub async fn next_message(&mut self) -> Result<&InboundEnvelope> {
        if self.current.is_some() {
            return Err(BusError::protocol(
                "previous message still held; call reset first",
            ));
        }
        let message = self.connection.pop_or_block().await?;
        let envelope = InboundEnvelope {
            kind: message.kind,
            interface: message.interface().to_string(),
            member: message.member().to_string(),
            message,
            replied: false,
        };
        debug!(
            "Received {} {}.{} from {:?}",
            envelope.kind, envelope.interface, envelope.member, envelope.message.sender
        );
        let held: &InboundEnvelope = self.current.insert(envelope);
        Ok(held)
    }

    fn held(&self) -> Result<&InboundEnvelope> {
        self.current
            .as_ref()
            .ok_or_else(|| BusError::protocol("no message held"))
    }

    fn held_call(&self) -> Result<&Message> {
        let envelope = self.held()?;
        if envelope.kind != MessageKind::Call {
            return Err(BusError::protocol(format!(
                "cannot reply to a {}",
                envelope.kind
            )));
        }
        if envelope.replied {
            return Err(BusError::protocol("call already answered"));
        }
        Ok(&envelope.message)
    }

    /// Send the one answer the held call gets.
    async fn answer(&mut self, message: Message) -> Result<()> {
        if let Some(envelope) = self.current.as_mut() {
            envelope.replied = true;
        }
        self.connection.send(message).await?;
        Ok(())
    }

    /// Decode the held message's arguments as `shape`.
    pub fn decode(&self, shape: &[TypeTag]) -> Result<Vec<Value>> {
        marshal::decode(&self.held()?.message, shape)
    }

    /// Send a method return for the held call.
    pub async fn reply(&mut self, shape: &[TypeTag], values: Vec<Value>) -> Result<()> {
        let args = marshal::encode(shape, values)?;
        let reply = Message::method_return(self.held_call()?).with_args(args);
        self.answer(reply).await
    }

    pub async fn reply_string(&mut self, text: &str) -> Result<()> {
        self.reply(marshal::STRING, vec![Value::Str(text.to_string())])
            .await
    }

    /// Answer the held call with a generic failure carrying `reason`.
    ///
    /// Returns the reason so callers can log or report it.
    pub async fn inform_error(&mut self, reason: &str) -> Result<String> {
        let error = Message::error(self.held_call()?, ProtocolNames::ERROR_FAILED, reason);
        self.answer(error).await?;
        debug!("Replied with error: {}", reason);
        Ok(reason.to_string())
    }

    /// Flush the connection and release the held message.
    ///
    /// The message is released even when the flush fails.
    pub async fn reset(&mut self) -> Result<()> {
        let held = self.current.take();
        let flushed = self.connection.flush().await;
        drop(held);
        flushed
    }

    /// Run one full loop iteration with the registered handlers.
    pub async fn run_once(&mut self) -> Result<Outcome> {
        self.next_message().await?;
        let outcome = self.dispatch().await;
        let reset = self.reset().await;
        let outcome = outcome?;
        reset?;
        Ok(outcome)
    }

    /// Serve until the bus connection fails.
    pub async fn serve(&mut self) -> Result<()> {
        loop {
            match self.run_once().await {
                Ok(outcome) => debug!("Iteration finished: {:?}", outcome),
                Err(e) if e.is_fatal() => {
                    error!("Server loop for {} stopped: {}", self.service, e);
                    return Err(e);
                }
                Err(e) => warn!("Iteration failed: {}", e),
            }
        }
    }

    async fn dispatch(&mut self) -> Result<Outcome> {
        let (kind, interface, member) = {
            let envelope = self.held()?;
            (
                envelope.kind,
                envelope.interface.clone(),
                envelope.member.clone(),
            )
        };

        match kind {
            MessageKind::Call => self.dispatch_call(&interface, &member).await,
            MessageKind::Return | MessageKind::Error => {
                warn!(
                    "Discarding unsolicited {} (reply_serial {:?})",
                    kind,
                    self.held()?.message.reply_serial
                );
                Ok(Outcome::Skipped)
            }
            MessageKind::Signal => Ok(self.dispatch_signal()),
        }
    }

    async fn dispatch_call(&mut self, interface: &str, member: &str) -> Result<Outcome> {
        if interface == ProtocolNames::INTROSPECTABLE_INTERFACE {
            if member == ProtocolNames::INTROSPECT_MEMBER {
                let document = self.introspect();
                self.reply_string(&document).await?;
                return Ok(Outcome::Handled);
            }
            self.inform_error("unknown method").await?;
            return Ok(Outcome::ErrorReplied);
        }

        if !interface.is_empty() && interface != self.interface {
            self.inform_error(&format!("unknown interface {}", interface))
                .await?;
            return Ok(Outcome::ErrorReplied);
        }

        let pattern = match self.methods.get(member) {
            Some(entry) => entry.pattern,
            None => {
                self.inform_error("unknown method").await?;
                return Ok(Outcome::ErrorReplied);
            }
        };

        let args = match self.decode(pattern.request_shape()) {
            Ok(args) => args,
            Err(e) => {
                self.inform_error(&e.to_string()).await?;
                return Ok(Outcome::ErrorReplied);
            }
        };

        let handled = self
            .methods
            .get_mut(member)
            .map(|entry| (entry.handler)(args))
            .unwrap_or_else(|| Err("unknown method".to_string()));

        let values = match handled {
            Ok(values) => values,
            Err(reason) => {
                self.inform_error(&reason).await?;
                return Ok(Outcome::ErrorReplied);
            }
        };

        match marshal::encode(pattern.reply_shape(), values) {
            Ok(values) => {
                let reply = Message::method_return(self.held_call()?).with_args(values);
                self.answer(reply).await?;
                Ok(Outcome::Handled)
            }
            Err(e) => {
                error!("Handler for {} returned a bad reply: {}", member, e);
                self.inform_error(&format!("internal error: {}", e)).await?;
                Ok(Outcome::ErrorReplied)
            }
        }
    }

    fn dispatch_signal(&mut self) -> Outcome {
        let Some(envelope) = self.current.as_ref() else {
            return Outcome::Skipped;
        };
        let Some(handler) = self.on_signal.as_mut() else {
            debug!("No signal handler; dropping {}", envelope.member);
            return Outcome::Skipped;
        };

        let payload = match marshal::decode(&envelope.message, marshal::SIGNAL_PAYLOAD) {
            Ok(values) => values.into_iter().next().map(|v| v.to_string()).unwrap_or_default(),
            Err(e) => {
                warn!("Ignoring signal {}: {}", envelope.member, e);
                return Outcome::Skipped;
            }
        };

        handler(SignalEvent {
            sender: envelope.message.sender.clone(),
            path: envelope.message.path.clone().unwrap_or_default(),
            interface: envelope.interface.clone(),
            member: envelope.member.clone(),
            payload,
        });
        Outcome::Handled
    }
}
