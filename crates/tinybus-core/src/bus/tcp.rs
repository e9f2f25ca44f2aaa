//! TCP transport connecting to a [`BusDaemon`](super::BusDaemon).
//!
//! Control requests are strictly request/response. While waiting for a
//! control answer, any `message` frames that arrive are queued and handed out
//! by later `recv` calls in arrival order.

use super::wire::{read_frame, write_frame, Frame};
use crate::config::BusConfig;
use crate::connection::BusConnection;
use crate::error::{BusError, Result};
use crate::message::{MatchRule, Message, RequestNameReply};
use crate::transport::Transport;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::net::SocketAddr;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// Client side of a TCP bus connection.
#[derive(Debug)]
pub struct TcpTransport {
    reader: OwnedReadHalf,
    writer: BufWriter<OwnedWriteHalf>,
    addr: SocketAddr,
    inbox: VecDeque<Message>,
    diagnostic: Option<String>,
}

impl TcpTransport {
    /// Connect to a bus daemon within [`BusConfig::CONNECT_TIMEOUT`].
    pub async fn connect(addr: SocketAddr) -> Result<Self> {
        let stream = tokio::time::timeout(BusConfig::CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| BusError::connection(format!("timed out connecting to bus at {}", addr)))?
            .map_err(|e| BusError::connection(format!("cannot reach bus at {}: {}", addr, e)))?;
        stream.set_nodelay(true)?;

        debug!("Connected to bus daemon at {}", addr);

        let (reader, writer) = stream.into_split();
        Ok(Self {
            reader,
            writer: BufWriter::new(writer),
            addr,
            inbox: VecDeque::new(),
            diagnostic: None,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn note<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            self.diagnostic = Some(e.to_string());
        }
        result
    }

    async fn read_next(&mut self) -> Result<Frame> {
        let read = read_frame(&mut self.reader)
            .await
            .and_then(|frame| frame.ok_or_else(|| BusError::connection("bus closed the connection")));
        self.note(read)
    }

    async fn write(&mut self, frame: &Frame) -> Result<()> {
        let written = write_frame(&mut self.writer, frame).await;
        self.note(written)
    }

    async fn request(&mut self, frame: Frame) -> Result<Frame> {
        self.write(&frame).await?;
        self.flush().await?;
        loop {
            match self.read_next().await? {
                Frame::Message { message } => self.inbox.push_back(message),
                answer => return Ok(answer),
            }
        }
    }
}

fn unexpected(frame: Frame) -> BusError {
    BusError::protocol(format!("unexpected frame from bus: {:?}", frame))
}

/// Connect to the daemon at `addr` and open a [`BusConnection`] over it.
pub async fn connect_tcp(addr: SocketAddr) -> Result<BusConnection<TcpTransport>> {
    BusConnection::connect(TcpTransport::connect(addr).await?).await
}

#[async_trait]
impl Transport for TcpTransport {
    async fn hello(&mut self) -> Result<Option<String>> {
        match self.request(Frame::Hello).await? {
            Frame::Welcome { unique_name } => Ok(Some(unique_name)),
            Frame::Fault { message } => Err(BusError::connection(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn request_name(&mut self, name: &str) -> Result<RequestNameReply> {
        let frame = Frame::RequestName {
            name: name.to_string(),
        };
        match self.request(frame).await? {
            Frame::NameReply { reply } => Ok(reply),
            Frame::Fault { message } => Err(BusError::connection(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn add_match(&mut self, rule: &MatchRule) -> Result<()> {
        let frame = Frame::AddMatch {
            rule: rule.to_string(),
        };
        match self.request(frame).await? {
            Frame::MatchAdded => Ok(()),
            Frame::Fault { message } => Err(BusError::connection(message)),
            other => Err(unexpected(other)),
        }
    }

    async fn send(&mut self, message: Message) -> Result<()> {
        self.write(&Frame::Message { message }).await
    }

    async fn flush(&mut self) -> Result<()> {
        let flushed = self.writer.flush().await.map_err(BusError::from);
        self.note(flushed)
    }

    async fn recv(&mut self) -> Result<Message> {
        if let Some(message) = self.inbox.pop_front() {
            return Ok(message);
        }
        loop {
            match self.read_next().await? {
                Frame::Message { message } => return Ok(message),
                Frame::Fault { message } => {
                    warn!("Bus reported fault: {}", message);
                    self.diagnostic = Some(message);
                }
                other => debug!("Ignoring unsolicited frame {:?}", other),
            }
        }
    }

    fn take_diagnostic(&mut self) -> Option<String> {
        self.diagnostic.take()
    }
}
