//! Error types for the Concord protocol engine.

use thiserror::Error;

use crate::ids::{ProtocolId, TypeKey};
use crate::token::Token;

/// Errors surfaced synchronously by declaration, implementation, and lookup.
///
/// Every variant is local to the failing call; the engine never enters a
/// degraded state because of one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("cyclic inheritance: {protocol} is reachable from its parent {via}")]
    CyclicInheritance { protocol: String, via: String },
    #[error("duplicate provision in {protocol}: {token} is required by {required_by}")]
    DuplicateProvision {
        protocol: String,
        token: Token,
        required_by: String,
    },
    #[error("{protocol} is already implemented for type {target}")]
    AlreadyImplemented { target: TypeKey, protocol: String },
    #[error("incomplete implementation of {protocol}: missing {}", render_tokens(.missing))]
    IncompleteImplementation {
        protocol: String,
        missing: Vec<Token>,
    },
    #[error("{protocol} is not implemented for type {target}")]
    NotImplemented { target: TypeKey, protocol: String },
    #[error("unknown protocol: {0}")]
    UnknownProtocol(ProtocolId),
    #[error("protocol already declared: {0}")]
    DuplicateProtocol(ProtocolId),
    #[error("invalid minimal path {path} in {protocol}: {reason}")]
    InvalidMinimalPath {
        protocol: String,
        path: String,
        reason: String,
    },
    #[error("{token} is not a member {protocol} accepts from an implementation")]
    UnexpectedMember { protocol: String, token: Token },
    #[error("{token} is not a member of {protocol}")]
    UnknownMember { protocol: String, token: Token },
    #[error("no behavior bound for {token}")]
    MemberNotBound { token: Token },
    #[error("{token} dispatches on an instance but was invoked without a receiver")]
    MissingReceiver { token: Token },
    #[error("{token} belongs to {owner}, which {protocol} does not extend")]
    ForeignToken {
        protocol: String,
        token: Token,
        owner: String,
    },
    #[error("{token} on type {target} was installed by protocol {owner} and cannot be replaced")]
    MemberConflict {
        target: TypeKey,
        token: Token,
        owner: ProtocolId,
    },
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
}

fn render_tokens(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Convenience result type for engine operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn incomplete_implementation_lists_every_token() {
        let map = Token::new("Functor.map");
        let pure = Token::new("Applicative.pure");
        let error = ProtocolError::IncompleteImplementation {
            protocol: "Monad".to_owned(),
            missing: vec![map.clone(), pure.clone()],
        };
        let rendered = error.to_string();
        assert!(rendered.contains(&map.to_string()));
        assert!(rendered.contains(&pure.to_string()));
        assert!(rendered.starts_with("incomplete implementation of Monad"));
    }

    #[test]
    fn already_implemented_names_target() {
        let error = ProtocolError::AlreadyImplemented {
            target: TypeKey::from_string("list"),
            protocol: "Functor".to_owned(),
        };
        assert_eq!(error.to_string(), "Functor is already implemented for type list");
    }

    #[test]
    fn member_conflict_names_the_installing_protocol() {
        let len = Token::new("Sized.len");
        let error = ProtocolError::MemberConflict {
            target: TypeKey::from_string("list"),
            token: len.clone(),
            owner: ProtocolId::from_string("sized"),
        };
        assert_eq!(
            error.to_string(),
            format!("{len} on type list was installed by protocol sized and cannot be replaced")
        );
    }
}
