//! Member tokens and the process-wide token allocator.
//!
//! A [`Token`] names exactly one logical member of one protocol. Two tokens
//! are equal only when they were produced by the same allocation; the scope
//! label is carried for diagnostics and never takes part in comparison, so
//! textually identical member names in unrelated protocols cannot collide.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Opaque, globally unique member identifier.
#[derive(Clone)]
pub struct Token {
    id: u64,
    scope: Arc<str>,
}

impl Token {
    /// Mint a fresh token labelled with `scope` (e.g. `"Functor.map"`).
    pub fn new(scope: impl Into<String>) -> Self {
        new_token(scope)
    }

    /// Process-unique numeric identity.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Diagnostic label given at allocation time.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Serializable description for reports.
    pub fn descriptor(&self) -> TokenDescriptor {
        TokenDescriptor {
            id: self.id,
            scope: self.scope.to_string(),
        }
    }
}

/// Mint a new token. Never fails; tokens are never reused.
pub fn new_token(scope: impl Into<String>) -> Token {
    let id = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    Token {
        id,
        scope: Arc::from(scope.into()),
    }
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Token {}

impl Hash for Token {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl PartialOrd for Token {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Token {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({}#{})", self.scope, self.id)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.scope, self.id)
    }
}

/// Token as it appears in diagnostic output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenDescriptor {
    pub id: u64,
    pub scope: String,
}
