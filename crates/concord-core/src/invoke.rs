//! Invocation port between member bodies and the tables they run against.
//!
//! Member bodies never hold a reference to a concrete type. They receive an
//! [`Invocation`] whose [`MemberTable`] is consulted on every call, which is
//! what makes provided members late-bound.

use std::sync::Arc;

use crate::error::{ProtocolError, ProtocolResult};
use crate::member::Dispatch;
use crate::token::Token;
use crate::value::Value;

/// A member body: receives the invocation context and positional arguments.
pub type Behavior =
    Arc<dyn Fn(&Invocation<'_>, Vec<Value>) -> ProtocolResult<Value> + Send + Sync>;

/// Wrap a closure as a [`Behavior`].
pub fn behavior(
    f: impl Fn(&Invocation<'_>, Vec<Value>) -> ProtocolResult<Value> + Send + Sync + 'static,
) -> Behavior {
    Arc::new(f)
}

/// Lookup side of a type's capability table.
///
/// Implementations must return owned handles so that no lock is held while
/// the returned body runs.
pub trait MemberTable: Send + Sync {
    fn resolve(&self, dispatch: Dispatch, token: &Token) -> Option<Behavior>;
}

/// Context a member body runs in.
pub struct Invocation<'a> {
    token: &'a Token,
    receiver: Option<&'a Value>,
    members: &'a dyn MemberTable,
}

impl<'a> Invocation<'a> {
    pub fn new(token: &'a Token, receiver: Option<&'a Value>, members: &'a dyn MemberTable) -> Self {
        Self {
            token,
            receiver,
            members,
        }
    }

    /// Token of the member currently executing.
    pub fn token(&self) -> &Token {
        self.token
    }

    /// The instance the member was invoked on.
    pub fn receiver(&self) -> ProtocolResult<&'a Value> {
        self.receiver.ok_or_else(|| ProtocolError::MissingReceiver {
            token: self.token.clone(),
        })
    }

    /// Call an instance member on the current receiver.
    pub fn call(&self, token: &Token, args: Vec<Value>) -> ProtocolResult<Value> {
        let receiver = self.receiver()?;
        self.call_on(receiver, token, args)
    }

    /// Call an instance member on another value of the same type.
    pub fn call_on(&self, receiver: &Value, token: &Token, args: Vec<Value>) -> ProtocolResult<Value> {
        dispatch(self.members, Dispatch::Instance, token, Some(receiver), args)
    }

    /// Call a type-level member.
    pub fn call_static(&self, token: &Token, args: Vec<Value>) -> ProtocolResult<Value> {
        dispatch(self.members, Dispatch::Static, token, None, args)
    }
}

/// Resolve `token` on `members` and run it.
pub fn dispatch(
    members: &dyn MemberTable,
    kind: Dispatch,
    token: &Token,
    receiver: Option<&Value>,
    args: Vec<Value>,
) -> ProtocolResult<Value> {
    let body = members
        .resolve(kind, token)
        .ok_or_else(|| ProtocolError::MemberNotBound {
            token: token.clone(),
        })?;
    body(&Invocation::new(token, receiver, members), args)
}
