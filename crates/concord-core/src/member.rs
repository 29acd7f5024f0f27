//! Member specifications: what a protocol demands and what it grants.

use std::fmt;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

use crate::invoke::Behavior;
use crate::token::{Token, TokenDescriptor};

/// Whether a member is looked up on instances or on the type itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    Instance,
    Static,
}

/// Behaviors supplied by an implementer, keyed by the token they fill.
pub type MemberMap = IndexMap<Token, Behavior>;

/// A capability a type must supply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequiredMember {
    pub token: Token,
    pub dispatch: Dispatch,
    /// String name under which legacy types may already expose this member.
    pub alias: Option<String>,
}

impl RequiredMember {
    pub fn instance(token: Token) -> Self {
        Self {
            token,
            dispatch: Dispatch::Instance,
            alias: None,
        }
    }

    pub fn type_level(token: Token) -> Self {
        Self {
            token,
            dispatch: Dispatch::Static,
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn descriptor(&self) -> MemberDescriptor {
        MemberDescriptor {
            token: self.token.descriptor(),
            dispatch: self.dispatch,
            alias: self.alias.clone(),
        }
    }
}

/// Default behavior granted once a protocol's requirements are met.
///
/// The body is late-bound: it reaches other members through the
/// [`Invocation`](crate::Invocation) it is called with, so it always sees
/// whatever is installed on the receiver's type at call time.
#[derive(Clone)]
pub struct ProvidedMember {
    pub token: Token,
    pub dispatch: Dispatch,
    pub body: Behavior,
}

impl ProvidedMember {
    pub fn instance(token: Token, body: Behavior) -> Self {
        Self {
            token,
            dispatch: Dispatch::Instance,
            body,
        }
    }

    pub fn type_level(token: Token, body: Behavior) -> Self {
        Self {
            token,
            dispatch: Dispatch::Static,
            body,
        }
    }

    pub fn descriptor(&self) -> MemberDescriptor {
        MemberDescriptor {
            token: self.token.descriptor(),
            dispatch: self.dispatch,
            alias: None,
        }
    }
}

impl fmt::Debug for ProvidedMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvidedMember")
            .field("token", &self.token)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

/// One way of satisfying a [`ChoiceGroup`]: the members an implementer
/// supplies, and the behaviors that fill in the rest of the group.
#[derive(Debug, Clone)]
pub struct MinimalPath {
    pub name: String,
    pub supplies: IndexSet<Token>,
    pub derives: Vec<ProvidedMember>,
}

impl MinimalPath {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            supplies: IndexSet::new(),
            derives: Vec::new(),
        }
    }

    pub fn supplies(mut self, token: Token) -> Self {
        self.supplies.insert(token);
        self
    }

    pub fn derives(mut self, member: ProvidedMember) -> Self {
        self.derives.push(member);
        self
    }

    pub fn derived(&self, token: &Token) -> Option<&ProvidedMember> {
        self.derives.iter().find(|member| member.token == *token)
    }
}

/// Interchangeable members of a protocol. An implementation picks any one
/// path; the remaining members of the group come from that path's derivations.
#[derive(Debug, Clone, Default)]
pub struct ChoiceGroup {
    pub members: IndexMap<Token, RequiredMember>,
    pub paths: Vec<MinimalPath>,
}

impl ChoiceGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn member(mut self, member: RequiredMember) -> Self {
        self.members.insert(member.token.clone(), member);
        self
    }

    pub fn path(mut self, path: MinimalPath) -> Self {
        self.paths.push(path);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Serializable view of a member for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberDescriptor {
    pub token: TokenDescriptor,
    pub dispatch: Dispatch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}
