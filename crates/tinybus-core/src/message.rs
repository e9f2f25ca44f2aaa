//! Bus message model.
//!
//! A [`Message`] is one of four kinds (method call, method return, error,
//! signal) carrying routing headers and an ordered list of typed [`Value`]s.
//! The type sequence of that list is the message signature, e.g. `uuss`.

use crate::error::{BusError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four message kinds a bus carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Call,
    Return,
    Error,
    Signal,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Call => "method_call",
            MessageKind::Return => "method_return",
            MessageKind::Error => "error",
            MessageKind::Signal => "signal",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageKind {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "method_call" => Ok(MessageKind::Call),
            "method_return" => Ok(MessageKind::Return),
            "error" => Ok(MessageKind::Error),
            "signal" => Ok(MessageKind::Signal),
            other => Err(BusError::validation("message type", other)),
        }
    }
}

/// Type of one argument slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeTag {
    U32,
    U64,
    F64,
    Str,
}

impl TypeTag {
    /// Single-character signature code.
    pub fn code(&self) -> char {
        match self {
            TypeTag::U32 => 'u',
            TypeTag::U64 => 't',
            TypeTag::F64 => 'd',
            TypeTag::Str => 's',
        }
    }

    pub fn from_code(code: char) -> Option<Self> {
        match code {
            'u' => Some(TypeTag::U32),
            't' => Some(TypeTag::U64),
            'd' => Some(TypeTag::F64),
            's' => Some(TypeTag::Str),
            _ => None,
        }
    }
}

/// Render a shape as a signature string such as `tuusd`.
pub fn signature_of(shape: &[TypeTag]) -> String {
    shape.iter().map(TypeTag::code).collect()
}

/// One typed argument.
///
/// Equality is bitwise for doubles, so `NaN == NaN` and `0.0 != -0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Value {
    U32(u32),
    U64(u64),
    #[serde(with = "f64_bits")]
    F64(f64),
    Str(String),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a.to_bits() == b.to_bits(),
            (Value::Str(a), Value::Str(b)) => a == b,
            _ => false,
        }
    }
}

/// JSON has no infinities or NaN; doubles travel as their IEEE-754 bits.
mod f64_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

impl Value {
    pub fn tag(&self) -> TypeTag {
        match self {
            Value::U32(_) => TypeTag::U32,
            Value::U64(_) => TypeTag::U64,
            Value::F64(_) => TypeTag::F64,
            Value::Str(_) => TypeTag::Str,
        }
    }

    /// Parse a textual literal as a value of the given type.
    pub fn parse(tag: TypeTag, text: &str) -> Result<Self> {
        let bad = || BusError::marshal(format!("cannot parse {:?} as '{}'", text, tag.code()));
        Ok(match tag {
            TypeTag::U32 => Value::U32(text.parse().map_err(|_| bad())?),
            TypeTag::U64 => Value::U64(text.parse().map_err(|_| bad())?),
            TypeTag::F64 => Value::F64(text.parse().map_err(|_| bad())?),
            TypeTag::Str => Value::Str(text.to_string()),
        })
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{}", v),
            Value::F64(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
        }
    }
}

/// A routed bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub kind: MessageKind,
    /// Assigned by the sending connection; `None` until sent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_serial: Option<u32>,
    /// Unique name of the sending connection, stamped by the bus.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_name: Option<String>,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Message {
    fn blank(kind: MessageKind) -> Self {
        Self {
            kind,
            serial: None,
            reply_serial: None,
            sender: None,
            destination: None,
            path: None,
            interface: None,
            member: None,
            error_name: None,
            args: Vec::new(),
        }
    }

    /// Build a method call. An empty interface is left unset.
    pub fn method_call(destination: &str, path: &str, interface: &str, member: &str) -> Self {
        Self {
            destination: Some(destination.to_string()),
            path: Some(path.to_string()),
            interface: (!interface.is_empty()).then(|| interface.to_string()),
            member: Some(member.to_string()),
            ..Self::blank(MessageKind::Call)
        }
    }

    /// Build a successful reply to `call`.
    pub fn method_return(call: &Message) -> Self {
        Self {
            reply_serial: call.serial,
            destination: call.sender.clone(),
            ..Self::blank(MessageKind::Return)
        }
    }

    /// Build an error reply to `call` carrying `reason` as its only argument.
    pub fn error(call: &Message, error_name: &str, reason: &str) -> Self {
        Self {
            reply_serial: call.serial,
            destination: call.sender.clone(),
            error_name: Some(error_name.to_string()),
            args: vec![Value::Str(reason.to_string())],
            ..Self::blank(MessageKind::Error)
        }
    }

    /// Build a broadcast signal.
    pub fn signal(path: &str, interface: &str, member: &str) -> Self {
        Self {
            path: Some(path.to_string()),
            interface: Some(interface.to_string()),
            member: Some(member.to_string()),
            ..Self::blank(MessageKind::Signal)
        }
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = args;
        self
    }

    pub fn with_serial(mut self, serial: u32) -> Self {
        self.serial = Some(serial);
        self
    }

    pub fn with_destination(mut self, destination: impl Into<String>) -> Self {
        self.destination = Some(destination.into());
        self
    }

    pub fn signature(&self) -> String {
        self.args.iter().map(|v| v.tag().code()).collect()
    }

    pub fn is_reply(&self) -> bool {
        matches!(self.kind, MessageKind::Return | MessageKind::Error)
    }

    pub fn interface(&self) -> &str {
        self.interface.as_deref().unwrap_or("")
    }

    pub fn member(&self) -> &str {
        self.member.as_deref().unwrap_or("")
    }
}

/// Bus-side subscription filter, written as `type='signal',interface='x.y'`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MatchRule {
    pub kind: Option<MessageKind>,
    pub interface: Option<String>,
}

impl MatchRule {
    /// Rule matching every signal on `interface`.
    pub fn signal(interface: &str) -> Self {
        Self {
            kind: Some(MessageKind::Signal),
            interface: Some(interface.to_string()),
        }
    }

    pub fn matches(&self, message: &Message) -> bool {
        if let Some(kind) = self.kind {
            if kind != message.kind {
                return false;
            }
        }
        match &self.interface {
            Some(interface) => message.interface.as_deref() == Some(interface.as_str()),
            None => true,
        }
    }
}

impl fmt::Display for MatchRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(kind) = self.kind {
            parts.push(format!("type='{}'", kind));
        }
        if let Some(interface) = &self.interface {
            parts.push(format!("interface='{}'", interface));
        }
        f.write_str(&parts.join(","))
    }
}

impl FromStr for MatchRule {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        let mut rule = MatchRule {
            kind: None,
            interface: None,
        };
        for part in s.split(',').filter(|p| !p.trim().is_empty()) {
            let (key, raw) = part
                .split_once('=')
                .ok_or_else(|| BusError::validation("match rule", s))?;
            let value = raw
                .trim()
                .strip_prefix('\'')
                .and_then(|v| v.strip_suffix('\''))
                .ok_or_else(|| BusError::validation("match rule", s))?;
            match key.trim() {
                "type" => rule.kind = Some(value.parse()?),
                "interface" => rule.interface = Some(value.to_string()),
                _ => return Err(BusError::validation("match rule key", key.trim())),
            }
        }
        Ok(rule)
    }
}

/// Outcome of a name ownership request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestNameReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}
