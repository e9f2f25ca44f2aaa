//! In-process bus.
//!
//! [`MemoryBus`] is a cheap cloneable handle around a [`Router`]; every
//! [`MemoryTransport`] it creates is one peer on that router. Dropping a
//! transport detaches the peer and releases its names.

use super::router::Router;
use crate::connection::BusConnection;
use crate::error::{BusError, Result};
use crate::message::{MatchRule, Message, RequestNameReply};
use crate::transport::Transport;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Handle to an in-process bus.
#[derive(Clone, Default)]
pub struct MemoryBus {
    router: Arc<Router>,
}

impl MemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that has not said hello yet.
    pub fn transport(&self) -> MemoryTransport {
        MemoryTransport {
            router: self.router.clone(),
            peer: None,
            diagnostic: None,
        }
    }

    /// Open a connected [`BusConnection`] on this bus.
    pub async fn connect(&self) -> Result<BusConnection<MemoryTransport>> {
        BusConnection::connect(self.transport()).await
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }
}

struct AttachedPeer {
    unique: String,
    rx: mpsc::UnboundedReceiver<Message>,
}

/// One peer on a [`MemoryBus`].
pub struct MemoryTransport {
    router: Arc<Router>,
    peer: Option<AttachedPeer>,
    diagnostic: Option<String>,
}

impl MemoryTransport {
    fn unique(&self) -> Result<&str> {
        self.peer
            .as_ref()
            .map(|p| p.unique.as_str())
            .ok_or_else(|| BusError::connection("hello not sent"))
    }

    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.diagnostic = Some(e.to_string());
        }
        result
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn hello(&mut self) -> Result<Option<String>> {
        if let Some(peer) = &self.peer {
            return Ok(Some(peer.unique.clone()));
        }
        let attached = self.router.attach();
        let (unique, rx) = self.note(attached)?;
        self.peer = Some(AttachedPeer {
            unique: unique.clone(),
            rx,
        });
        Ok(Some(unique))
    }

    async fn request_name(&mut self, name: &str) -> Result<RequestNameReply> {
        let result = self
            .unique()
            .and_then(|unique| self.router.request_name(unique, name));
        self.note(result)
    }

    async fn add_match(&mut self, rule: &MatchRule) -> Result<()> {
        let result = self
            .unique()
            .and_then(|unique| self.router.add_match(unique, rule.clone()));
        self.note(result)
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        let result = self
            .unique()
            .and_then(|unique| self.router.route(unique, message));
        self.note(result)
    }

    async fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    async fn recv(&mut self) -> Result<Message> {
        let received = match self.peer.as_mut() {
            Some(peer) => peer
                .rx
                .recv()
                .await
                .ok_or_else(|| BusError::connection("bus closed")),
            None => Err(BusError::connection("hello not sent")),
        };
        self.note(received)
    }

    fn take_diagnostic(&mut self) -> Option<String> {
        self.diagnostic.take()
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        if let Some(peer) = self.peer.take() {
            self.router.detach(&peer.unique);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;

    #[tokio::test]
    async fn test_dropping_transport_releases_names() {
        let bus = MemoryBus::new();
        let mut first = bus.connect().await.unwrap();
        first.claim_name("org.example.Svc").await.unwrap();
        assert!(bus.router().owner_of("org.example.Svc").is_some());

        drop(first);
        assert_eq!(bus.router().owner_of("org.example.Svc"), None);

        let mut second = bus.connect().await.unwrap();
        assert!(second.claim_name("org.example.Svc").await.is_ok());
    }

    #[tokio::test]
    async fn test_send_before_hello_fails() {
        let bus = MemoryBus::new();
        let mut transport = bus.transport();
        let err = transport
            .send(Message::signal("/p", "a.b", "s"))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("hello not sent"));
        assert!(transport.take_diagnostic().is_some());
    }

    #[tokio::test]
    async fn test_peers_exchange_messages() {
        let bus = MemoryBus::new();
        let mut a = bus.connect().await.unwrap();
        let mut b = bus.connect().await.unwrap();

        a.send(
            Message::signal("/p", "a.b", "hi").with_destination(b.unique_name().to_string()),
        )
        .await
        .unwrap();
        let got = b.pop_or_block().await.unwrap();
        assert_eq!(got.kind, MessageKind::Signal);
        assert_eq!(got.sender.as_deref(), Some(a.unique_name()));
    }
}
