//! The bus transport capability.
//!
//! A [`Transport`] moves already-built [`Message`]s to and from a bus and
//! performs the bus-side bookkeeping (hello, name ownership, match rules).
//! Everything above this trait is transport-agnostic; the crate ships an
//! in-process implementation ([`crate::bus::MemoryTransport`]) and a TCP one
//! ([`crate::bus::TcpTransport`]).

use crate::error::Result;
use crate::message::{MatchRule, Message, RequestNameReply};
use async_trait::async_trait;

#[cfg(test)]
pub(crate) mod scripted;

/// Connection to a message bus.
#[async_trait]
pub trait Transport: Send {
    /// Register with the bus and return the assigned unique name.
    ///
    /// `Ok(None)` means the bus answered without assigning a name.
    async fn hello(&mut self) -> Result<Option<String>>;

    /// Ask for exclusive ownership of `name` without queueing.
    async fn request_name(&mut self, name: &str) -> Result<RequestNameReply>;

    async fn add_match(&mut self, rule: &MatchRule) -> Result<()>;

    /// Hand a stamped message to the bus.
    async fn send(&mut self, message: Message) -> Result<()>;

    async fn flush(&mut self) -> Result<()>;

    /// Wait for the next inbound message. Blocks indefinitely.
    async fn recv(&mut self) -> Result<Message>;

    /// Last low-level failure description, if any. Clears it.
    fn take_diagnostic(&mut self) -> Option<String>;
}
