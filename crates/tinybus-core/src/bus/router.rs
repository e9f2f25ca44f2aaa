//! Routing core shared by the in-process bus and the TCP daemon.
//!
//! The router hands out unique connection names, keeps the well-known name
//! table and each peer's match rules, and delivers messages:
//!
//! - method calls go to the owner of their destination, or bounce back as a
//!   `ServiceUnknown` error when nobody owns it;
//! - returns and errors go to the unique name in their destination;
//! - signals go to their destination if set, otherwise to every peer with a
//!   matching rule.
//!
//! # Thread Safety
//!
//! State lives behind a `std::sync::Mutex` that is never held across an
//! `.await`; delivery uses unbounded channels so routing never blocks.

use crate::config::ProtocolNames;
use crate::error::{BusError, Result};
use crate::message::{MatchRule, Message, MessageKind, RequestNameReply};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Sender name the bus uses for messages it originates.
pub const BUS_NAME: &str = "org.freedesktop.DBus";

struct Peer {
    tx: mpsc::UnboundedSender<Message>,
    rules: Vec<MatchRule>,
}

#[derive(Default)]
struct RouterState {
    next_id: u64,
    peers: HashMap<String, Peer>,
    /// well-known name -> unique name
    names: HashMap<String, String>,
}

impl RouterState {
    fn resolve(&self, destination: &str) -> Option<&Peer> {
        if destination.starts_with(':') {
            self.peers.get(destination)
        } else {
            self.names
                .get(destination)
                .and_then(|unique| self.peers.get(unique))
        }
    }
}

/// Message router for one bus.
#[derive(Default)]
pub struct Router {
    state: Mutex<RouterState>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, RouterState>> {
        self.state
            .lock()
            .map_err(|_| BusError::connection("bus router state poisoned"))
    }

    /// Register a new peer, returning its unique name and inbound queue.
    pub fn attach(&self) -> Result<(String, mpsc::UnboundedReceiver<Message>)> {
        let mut state = self.lock()?;
        state.next_id += 1;
        let unique = format!("{}{}", ProtocolNames::UNIQUE_NAME_PREFIX, state.next_id);
        let (tx, rx) = mpsc::unbounded_channel();
        state.peers.insert(
            unique.clone(),
            Peer {
                tx,
                rules: Vec::new(),
            },
        );
        debug!("Peer {} attached", unique);
        Ok((unique, rx))
    }

    /// Remove a peer and release every name it owned.
    pub fn detach(&self, unique: &str) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.peers.remove(unique);
        state.names.retain(|name, owner| {
            if owner == unique {
                info!("Released bus name {} (owner {} left)", name, unique);
                false
            } else {
                true
            }
        });
        debug!("Peer {} detached", unique);
    }

    /// Grant `name` to `unique` unless someone else owns it. Never queues.
    pub fn request_name(&self, unique: &str, name: &str) -> Result<RequestNameReply> {
        let mut state = self.lock()?;
        if !state.peers.contains_key(unique) {
            return Err(BusError::connection(format!("unknown peer {}", unique)));
        }
        let reply = match state.names.get(name) {
            Some(owner) if owner == unique => RequestNameReply::AlreadyOwner,
            Some(_) => RequestNameReply::Exists,
            None => {
                state.names.insert(name.to_string(), unique.to_string());
                RequestNameReply::PrimaryOwner
            }
        };
        debug!("Name request {} by {}: {:?}", name, unique, reply);
        Ok(reply)
    }

    pub fn add_match(&self, unique: &str, rule: MatchRule) -> Result<()> {
        let mut state = self.lock()?;
        let peer = state
            .peers
            .get_mut(unique)
            .ok_or_else(|| BusError::connection(format!("unknown peer {}", unique)))?;
        if !peer.rules.contains(&rule) {
            peer.rules.push(rule);
        }
        Ok(())
    }

    /// Unique name currently owning `name`.
    pub fn owner_of(&self, name: &str) -> Option<String> {
        self.lock().ok()?.names.get(name).cloned()
    }

    /// Deliver a message sent by `from`.
    pub fn route(&self, from: &str, mut message: Message) -> Result<()> {
        message.sender = Some(from.to_string());
        let state = self.lock()?;

        match message.kind {
            MessageKind::Call => {
                let destination = message
                    .destination
                    .clone()
                    .ok_or_else(|| BusError::protocol("method call without destination"))?;

                let delivered = match state.resolve(&destination) {
                    Some(peer) => peer.tx.send(message.clone()).is_ok(),
                    None => false,
                };

                if !delivered {
                    debug!("No owner for {}, bouncing call from {}", destination, from);
                    let mut bounce = Message::error(
                        &message,
                        ProtocolNames::ERROR_SERVICE_UNKNOWN,
                        &format!("The name {} was not provided by any service", destination),
                    );
                    bounce.sender = Some(BUS_NAME.to_string());
                    if let Some(caller) = state.peers.get(from) {
                        let _ = caller.tx.send(bounce);
                    }
                }
            }
            MessageKind::Return | MessageKind::Error => {
                let delivered = message
                    .destination
                    .as_deref()
                    .and_then(|d| state.resolve(d))
                    .map(|peer| peer.tx.send(message.clone()).is_ok())
                    .unwrap_or(false);
                if !delivered {
                    debug!(
                        "Dropping {} for {:?}: recipient gone",
                        message.kind, message.destination
                    );
                }
            }
            MessageKind::Signal => match message.destination.as_deref() {
                Some(destination) => {
                    if let Some(peer) = state.resolve(destination) {
                        let _ = peer.tx.send(message);
                    }
                }
                None => {
                    for peer in state.peers.values() {
                        if peer.rules.iter().any(|rule| rule.matches(&message)) {
                            let _ = peer.tx.send(message.clone());
                        }
                    }
                }
            },
        }
        Ok(())
    }
}
