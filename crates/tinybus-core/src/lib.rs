//! # tinybus-core
//!
//! Typed call/reply and signal engine for a minimal message bus.
//!
//! Services own a name on the bus and answer method calls addressed by
//! (service, interface, member). Calls and replies carry fixed positional
//! argument tuples drawn from a small closed set of shapes; signals carry a
//! single string and are broadcast to every subscriber.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tinybus_core::{marshal::CallPattern, Client, MemoryBus, Server, Value};
//!
//! # async fn example() -> tinybus_core::Result<()> {
//! let bus = MemoryBus::new();
//!
//! let mut server = Server::bind(bus.connect().await?, "org.example.Echo", "org.example.Echo").await?;
//! server.register_method("echo", CallPattern::StringToString, |args| Ok(args))?;
//! tokio::spawn(async move { server.serve().await });
//!
//! let mut client = Client::new(bus.connect().await?);
//! let reply = client
//!     .invoke(
//!         CallPattern::StringToString,
//!         "org.example.Echo",
//!         "org.example.Echo",
//!         "echo",
//!         vec![Value::Str("hi".into())],
//!     )
//!     .await?;
//! assert_eq!(reply, vec![Value::Str("hi".into())]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`Client`] / [`Server`]: call engine and dispatch loop
//! - [`BusConnection`]: serials, name ownership, reply correlation
//! - [`marshal`]: closed shape table and typed tuple codec
//! - [`Transport`]: the bus capability; [`bus`] ships in-process and TCP buses

pub mod bus;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod introspect;
pub mod marshal;
pub mod message;
pub mod server;
pub mod transport;
pub mod validate;

pub use bus::{connect_tcp, BusDaemon, BusDaemonHandle, MemoryBus, MemoryTransport, TcpTransport};
pub use client::{CallState, Client};
pub use config::{resolve_address, BusConfig, ProtocolNames, ServiceDefaults};
pub use connection::{BusConnection, PendingCall, PendingStats};
pub use error::{BusError, ErrorKind, Result};
pub use introspect::IntrospectionDocument;
pub use marshal::{Args, CallPattern, WireType};
pub use message::{MatchRule, Message, MessageKind, RequestNameReply, TypeTag, Value};
pub use server::{InboundEnvelope, Outcome, Server, SignalEvent};
pub use transport::Transport;
