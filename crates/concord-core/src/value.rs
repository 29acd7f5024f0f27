//! Dynamic values that protocol members receive and return.
//!
//! The set of shapes is closed. Container states that a member body needs to
//! tell apart (wrapped or not, present or absent) are [`Value::Variant`]s and
//! are distinguished by their tag.

use std::fmt;
use std::sync::Arc;

use crate::error::{ProtocolError, ProtocolResult};

/// Unary function value, e.g. the continuation handed to a `bind` member.
pub type Lambda = Arc<dyn Fn(Value) -> ProtocolResult<Value> + Send + Sync>;

#[derive(Clone)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
    List(Vec<Value>),
    Variant(Variant),
    Func(Lambda),
}

/// A tagged container state. `payload` is `None` for nullary states.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub tag: String,
    pub payload: Option<Box<Value>>,
}

impl Value {
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(items.into_iter().collect())
    }

    pub fn func(f: impl Fn(Value) -> ProtocolResult<Value> + Send + Sync + 'static) -> Self {
        Self::Func(Arc::new(f))
    }

    pub fn variant(tag: impl Into<String>, payload: Option<Value>) -> Self {
        Self::Variant(Variant {
            tag: tag.into(),
            payload: payload.map(Box::new),
        })
    }

    /// Short name of the value's shape, used in mismatch diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Str(_) => "str",
            Self::List(_) => "list",
            Self::Variant(_) => "variant",
            Self::Func(_) => "func",
        }
    }

    pub fn tag(&self) -> Option<&str> {
        match self {
            Self::Variant(variant) => Some(variant.tag.as_str()),
            _ => None,
        }
    }

    pub fn as_int(&self) -> ProtocolResult<i64> {
        match self {
            Self::Int(n) => Ok(*n),
            other => Err(mismatch("int", other)),
        }
    }

    pub fn as_list(&self) -> ProtocolResult<&[Value]> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(mismatch("list", other)),
        }
    }

    pub fn into_list(self) -> ProtocolResult<Vec<Value>> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(mismatch("list", &other)),
        }
    }

    pub fn as_variant(&self) -> ProtocolResult<&Variant> {
        match self {
            Self::Variant(variant) => Ok(variant),
            other => Err(mismatch("variant", other)),
        }
    }

    /// Apply a function value to one argument.
    pub fn apply(&self, arg: Value) -> ProtocolResult<Value> {
        match self {
            Self::Func(f) => f(arg),
            other => Err(mismatch("func", other)),
        }
    }
}

fn mismatch(expected: &str, actual: &Value) -> ProtocolError {
    ProtocolError::TypeMismatch {
        expected: expected.to_owned(),
        actual: actual.kind().to_owned(),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unit, Self::Unit) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Variant(a), Self::Variant(b)) => a == b,
            // Functions are only equal to themselves.
            (Self::Func(a), Self::Func(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unit => write!(f, "()"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s:?}"),
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Variant(variant) => match &variant.payload {
                Some(payload) => write!(f, "{}({payload:?})", variant.tag),
                None => write!(f, "{}", variant.tag),
            },
            Self::Func(_) => write!(f, "<func>"),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}
