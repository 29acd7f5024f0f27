//! Committed implementation records and their serializable reports.

use std::fmt;

use chrono::{DateTime, Utc};
use concord_core::{MemberMap, ProtocolId, Token, TokenDescriptor, TypeKey};
use serde::Serialize;

/// The record of one protocol implementation on one type.
#[derive(Clone)]
pub struct Binding {
    pub target: TypeKey,
    pub protocol: ProtocolId,
    pub protocol_name: String,
    /// Behaviors the implementer handed in, including ones adopted from the
    /// target's legacy aliases.
    pub supplied: MemberMap,
    /// Tokens satisfied by bindings of ancestor protocols already installed.
    pub inherited: Vec<Token>,
    /// Tokens filled from provided members and minimal-path derivations.
    pub derived: Vec<Token>,
    /// Names of the minimal paths chosen, one per resolved choice group.
    pub minimal_paths: Vec<String>,
    /// Set when the binding was recorded as part of implementing a descendant.
    pub implied_by: Option<ProtocolId>,
    pub installed_at: DateTime<Utc>,
}

impl Binding {
    pub fn new(target: TypeKey, protocol: ProtocolId, protocol_name: impl Into<String>) -> Self {
        Self {
            target,
            protocol,
            protocol_name: protocol_name.into(),
            supplied: MemberMap::new(),
            inherited: Vec::new(),
            derived: Vec::new(),
            minimal_paths: Vec::new(),
            implied_by: None,
            installed_at: Utc::now(),
        }
    }

    /// Whether this binding filled `token`, either directly or by derivation.
    pub fn covers(&self, token: &Token) -> bool {
        self.supplied.contains_key(token) || self.derived.contains(token)
    }

    pub fn report(&self) -> BindingReport {
        BindingReport {
            target: self.target.clone(),
            protocol: self.protocol.clone(),
            protocol_name: self.protocol_name.clone(),
            supplied: self.supplied.keys().map(Token::descriptor).collect(),
            inherited: self.inherited.iter().map(Token::descriptor).collect(),
            derived: self.derived.iter().map(Token::descriptor).collect(),
            minimal_paths: self.minimal_paths.clone(),
            implied_by: self.implied_by.clone(),
            installed_at: self.installed_at,
        }
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("target", &self.target)
            .field("protocol", &self.protocol_name)
            .field("supplied", &self.supplied.keys().collect::<Vec<_>>())
            .field("inherited", &self.inherited)
            .field("derived", &self.derived)
            .field("minimal_paths", &self.minimal_paths)
            .field("implied_by", &self.implied_by)
            .field("installed_at", &self.installed_at)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingReport {
    pub target: TypeKey,
    pub protocol: ProtocolId,
    pub protocol_name: String,
    pub supplied: Vec<TokenDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub inherited: Vec<TokenDescriptor>,
    pub derived: Vec<TokenDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub minimal_paths: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub implied_by: Option<ProtocolId>,
    pub installed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LedgerReport {
    pub generated_at: DateTime<Utc>,
    pub installed: Vec<BindingReport>,
}
