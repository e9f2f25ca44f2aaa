//! Typed argument marshaling.
//!
//! One tag-driven codec covers every call pattern. A shape is an ordered
//! list of [`TypeTag`]s and must appear in the closed [`SUPPORTED_SHAPES`]
//! table; anything else is rejected before a message is built. On the
//! receiving side the argument list must agree with the expected shape in
//! both length and per-slot type.
//!
//! The typed layer ([`WireType`], [`Args`]) maps Rust tuples onto shapes so
//! callers can write `client.call_typed::<(u32, u32, String, String)>(..)`.

use crate::error::{BusError, Result};
use crate::message::{signature_of, Message, TypeTag, Value};
use std::fmt;
use std::str::FromStr;

use crate::message::TypeTag::{F64 as D, Str as S, U32 as U, U64 as T};

pub const VOID: &[TypeTag] = &[];
pub const STRING: &[TypeTag] = &[S];
pub const X1_REQUEST: &[TypeTag] = &[U, U, S, S];
pub const X1_REPLY: &[TypeTag] = &[T, U, U, S, D];
pub const X2_REPLY: &[TypeTag] = &[T, S, S, S, D, D, D, D];
pub const X3_REQUEST: &[TypeTag] = &[S, S, S];
pub const X3_REPLY: &[TypeTag] = &[U, T, T, T];

/// Payload shape of every signal.
pub const SIGNAL_PAYLOAD: &[TypeTag] = STRING;

/// Every shape the codec accepts.
pub const SUPPORTED_SHAPES: &[&[TypeTag]] = &[
    VOID, STRING, X1_REQUEST, X1_REPLY, X2_REPLY, X3_REQUEST, X3_REPLY,
];

pub fn is_supported(shape: &[TypeTag]) -> bool {
    SUPPORTED_SHAPES.iter().any(|s| *s == shape)
}

fn require_supported(shape: &[TypeTag]) -> Result<()> {
    if is_supported(shape) {
        Ok(())
    } else {
        Err(BusError::marshal(format!(
            "unsupported shape '{}'",
            signature_of(shape)
        )))
    }
}

fn check_shape(values: &[Value], shape: &[TypeTag]) -> Result<()> {
    let actual: Vec<TypeTag> = values.iter().map(Value::tag).collect();
    if actual.as_slice() == shape {
        return Ok(());
    }
    if actual.len() != shape.len() {
        return Err(BusError::marshal(format!(
            "expected {} argument(s) '{}', got {} '{}'",
            shape.len(),
            signature_of(shape),
            actual.len(),
            signature_of(&actual)
        )));
    }
    let slot = actual
        .iter()
        .zip(shape)
        .position(|(a, e)| a != e)
        .unwrap_or_default();
    Err(BusError::marshal(format!(
        "argument {} has type '{}', expected '{}' (signature '{}')",
        slot,
        actual[slot].code(),
        shape[slot].code(),
        signature_of(shape)
    )))
}

/// Check `values` against `shape` and produce the outgoing argument list.
pub fn encode(shape: &[TypeTag], values: Vec<Value>) -> Result<Vec<Value>> {
    require_supported(shape)?;
    check_shape(&values, shape)?;
    Ok(values)
}

/// Extract the argument list of `message`, requiring it to match `shape`.
pub fn decode(message: &Message, shape: &[TypeTag]) -> Result<Vec<Value>> {
    require_supported(shape)?;
    check_shape(&message.args, shape)?;
    Ok(message.args.clone())
}

/// A Rust type that occupies one argument slot.
pub trait WireType: Sized {
    const TAG: TypeTag;

    fn into_value(self) -> Value;
    fn from_value(value: Value) -> Option<Self>;
}

macro_rules! impl_wire_type {
    ($ty:ty, $variant:ident) => {
        impl WireType for $ty {
            const TAG: TypeTag = TypeTag::$variant;

            fn into_value(self) -> Value {
                Value::$variant(self)
            }

            fn from_value(value: Value) -> Option<Self> {
                match value {
                    Value::$variant(v) => Some(v),
                    _ => None,
                }
            }
        }
    };
}

impl_wire_type!(u32, U32);
impl_wire_type!(u64, U64);
impl_wire_type!(f64, F64);
impl_wire_type!(String, Str);

/// A tuple of [`WireType`]s forming one argument list.
pub trait Args: Sized {
    fn shape() -> Vec<TypeTag>;
    fn into_values(self) -> Vec<Value>;
    fn from_values(values: Vec<Value>) -> Result<Self>;
}

fn take<W: WireType>(iter: &mut impl Iterator<Item = Value>) -> Result<W> {
    let value = iter
        .next()
        .ok_or_else(|| BusError::marshal("missing argument"))?;
    let tag = value.tag();
    W::from_value(value).ok_or_else(|| {
        BusError::marshal(format!(
            "expected '{}', got '{}'",
            W::TAG.code(),
            tag.code()
        ))
    })
}

macro_rules! impl_args {
    ($($ty:ident $var:ident),*) => {
        impl<$($ty: WireType),*> Args for ($($ty,)*) {
            fn shape() -> Vec<TypeTag> {
                vec![$($ty::TAG),*]
            }

            fn into_values(self) -> Vec<Value> {
                let ($($var,)*) = self;
                vec![$($var.into_value()),*]
            }

            #[allow(unused_mut, unused_variables)]
            fn from_values(values: Vec<Value>) -> Result<Self> {
                check_shape(&values, &Self::shape())?;
                let mut iter = values.into_iter();
                Ok(($(take::<$ty>(&mut iter)?,)*))
            }
        }
    };
}

impl_args!();
impl_args!(A a);
impl_args!(A a, B b, C c);
impl_args!(A a, B b, C c, D4 d);
impl_args!(A a, B b, C c, D4 d, E e);
impl_args!(A a, B b, C c, D4 d, E e, F f, G g, H h);

/// The fixed call patterns a client can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallPattern {
    VoidToString,
    StringToString,
    X1,
    X2,
    X3,
}

impl CallPattern {
    pub const ALL: [CallPattern; 5] = [
        CallPattern::VoidToString,
        CallPattern::StringToString,
        CallPattern::X1,
        CallPattern::X2,
        CallPattern::X3,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            CallPattern::VoidToString => "void",
            CallPattern::StringToString => "string",
            CallPattern::X1 => "x1",
            CallPattern::X2 => "x2",
            CallPattern::X3 => "x3",
        }
    }

    pub fn request_shape(&self) -> &'static [TypeTag] {
        match self {
            CallPattern::VoidToString => VOID,
            CallPattern::StringToString => STRING,
            CallPattern::X1 => X1_REQUEST,
            CallPattern::X2 => VOID,
            CallPattern::X3 => X3_REQUEST,
        }
    }

    pub fn reply_shape(&self) -> &'static [TypeTag] {
        match self {
            CallPattern::VoidToString | CallPattern::StringToString => STRING,
            CallPattern::X1 => X1_REPLY,
            CallPattern::X2 => X2_REPLY,
            CallPattern::X3 => X3_REPLY,
        }
    }

    /// Parse positional text arguments into a request of this pattern.
    pub fn parse_request(&self, args: &[String]) -> Result<Vec<Value>> {
        let shape = self.request_shape();
        if args.len() != shape.len() {
            return Err(BusError::marshal(format!(
                "pattern {} takes {} argument(s) '{}', got {}",
                self.name(),
                shape.len(),
                signature_of(shape),
                args.len()
            )));
        }
        shape
            .iter()
            .zip(args)
            .map(|(tag, text)| Value::parse(*tag, text))
            .collect()
    }
}

impl fmt::Display for CallPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CallPattern {
    type Err = BusError;

    fn from_str(s: &str) -> Result<Self> {
        CallPattern::ALL
            .into_iter()
            .find(|p| p.name() == s)
            .ok_or_else(|| BusError::validation("call pattern", s))
    }
}
