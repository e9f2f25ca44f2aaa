//! Centralized configuration for tinybus.
//!
//! Protocol names, bus limits and the defaults used by the demo service.

use crate::error::{BusError, Result};
use std::net::SocketAddr;
use std::time::Duration;

/// Bus-level configuration.
pub struct BusConfig;

impl BusConfig {
    /// Every call targets this single well-known object path.
    pub const OBJECT_PATH: &'static str = "/";

    pub const DEFAULT_ADDRESS: &'static str = "127.0.0.1:7411";
    pub const ADDRESS_ENV: &'static str = "TINYBUS_ADDRESS";

    pub const MAX_FRAME_SIZE: usize = 1_048_576; // 1MB
    pub const MAX_CONNECTIONS: usize = 64;
    pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
    /// Messages parked while a caller waits on a reply; oldest dropped first.
    pub const MAX_BACKLOG: usize = 1024;
}

/// Well-known interface, member and error names.
pub struct ProtocolNames;

impl ProtocolNames {
    pub const INTROSPECTABLE_INTERFACE: &'static str = "org.freedesktop.DBus.Introspectable";
    pub const INTROSPECT_MEMBER: &'static str = "Introspect";

    pub const ERROR_FAILED: &'static str = "org.freedesktop.DBus.Error.Failed";
    pub const ERROR_SERVICE_UNKNOWN: &'static str = "org.freedesktop.DBus.Error.ServiceUnknown";

    /// Prefix of bus-assigned unique connection names.
    pub const UNIQUE_NAME_PREFIX: &'static str = ":1.";
}

/// Defaults for the demo service and the command-line front-end.
pub struct ServiceDefaults;

impl ServiceDefaults {
    pub const SERVICE: &'static str = "org.tinybus.Demo";
    pub const INTERFACE: &'static str = "org.tinybus.Demo";
    pub const SIGNAL_INTERFACE: &'static str = "org.tinybus.Events";
    pub const SIGNAL_PATH: &'static str = "/org/tinybus/Events";
}

/// Resolve the bus address: explicit flag, then `TINYBUS_ADDRESS`, then the default.
pub fn resolve_address(flag: Option<&str>) -> Result<SocketAddr> {
    let env = std::env::var(BusConfig::ADDRESS_ENV).ok();
    resolve_address_from(flag, env.as_deref())
}

fn resolve_address_from(flag: Option<&str>, env: Option<&str>) -> Result<SocketAddr> {
    let raw = flag
        .or(env.filter(|value| !value.trim().is_empty()))
        .unwrap_or(BusConfig::DEFAULT_ADDRESS);

    raw.trim()
        .parse()
        .map_err(|_| BusError::validation("bus address", raw))
}
