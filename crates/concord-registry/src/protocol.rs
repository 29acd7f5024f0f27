//! Protocol specifications and their published, immutable definitions.

use std::sync::Arc;

use concord_core::{
    ChoiceGroup, Dispatch, MemberDescriptor, ProtocolId, ProvidedMember, RequiredMember, Token,
};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};

/// Shared handle to a published protocol.
pub type ProtocolHandle = Arc<ProtocolDef>;

/// Declaration input for [`ProtocolRegistry::declare`](crate::ProtocolRegistry::declare).
#[derive(Debug, Clone)]
pub struct ProtocolSpec {
    pub(crate) id: ProtocolId,
    pub(crate) name: String,
    pub(crate) parents: Vec<ProtocolId>,
    pub(crate) required: Vec<RequiredMember>,
    pub(crate) provided: Vec<ProvidedMember>,
    pub(crate) choice: ChoiceGroup,
}

impl ProtocolSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(ProtocolId::new_uuid(), name)
    }

    pub fn with_id(id: ProtocolId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            parents: Vec::new(),
            required: Vec::new(),
            provided: Vec::new(),
            choice: ChoiceGroup::new(),
        }
    }

    pub fn id(&self) -> &ProtocolId {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn extends(self, parent: &ProtocolDef) -> Self {
        self.extends_id(parent.id().clone())
    }

    pub fn extends_id(mut self, parent: ProtocolId) -> Self {
        self.parents.push(parent);
        self
    }

    pub fn require(mut self, member: RequiredMember) -> Self {
        self.required.push(member);
        self
    }

    pub fn provide(mut self, member: ProvidedMember) -> Self {
        self.provided.push(member);
        self
    }

    pub fn choice(mut self, group: ChoiceGroup) -> Self {
        self.choice = group;
        self
    }
}

/// A choice group together with the protocol that declared it.
#[derive(Debug, Clone)]
pub struct EffectiveChoice {
    pub declared_by: ProtocolId,
    pub protocol_name: String,
    pub group: Arc<ChoiceGroup>,
}

/// A published protocol. Closures over the ancestry are computed once at
/// declaration and never change.
#[derive(Debug)]
pub struct ProtocolDef {
    pub(crate) id: ProtocolId,
    pub(crate) name: String,
    pub(crate) parents: Vec<ProtocolId>,
    pub(crate) required: IndexMap<Token, RequiredMember>,
    pub(crate) provided: IndexMap<Token, ProvidedMember>,
    pub(crate) choice: Option<Arc<ChoiceGroup>>,
    pub(crate) ancestors: IndexSet<ProtocolId>,
    pub(crate) effective_required: IndexMap<Token, RequiredMember>,
    pub(crate) effective_provided: IndexMap<Token, ProvidedMember>,
    pub(crate) effective_choices: Vec<EffectiveChoice>,
}

impl ProtocolDef {
    pub fn id(&self) -> &ProtocolId {
        &self.id
    }

    /// Diagnostic name; never used for identity.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parents(&self) -> &[ProtocolId] {
        &self.parents
    }

    pub fn own_required(&self) -> &IndexMap<Token, RequiredMember> {
        &self.required
    }

    pub fn own_provided(&self) -> &IndexMap<Token, ProvidedMember> {
        &self.provided
    }

    pub fn own_choice(&self) -> Option<&ChoiceGroup> {
        self.choice.as_deref()
    }

    /// Tokens this protocol itself declares, in any role.
    pub fn own_tokens(&self) -> impl Iterator<Item = &Token> {
        self.required
            .keys()
            .chain(self.provided.keys())
            .chain(self.choice.iter().flat_map(|group| group.members.keys()))
    }

    /// Every transitive ancestor, excluding the protocol itself.
    pub fn ancestors(&self) -> &IndexSet<ProtocolId> {
        &self.ancestors
    }

    pub fn effective_required(&self) -> &IndexMap<Token, RequiredMember> {
        &self.effective_required
    }

    pub fn effective_provided(&self) -> &IndexMap<Token, ProvidedMember> {
        &self.effective_provided
    }

    pub fn effective_choices(&self) -> &[EffectiveChoice] {
        &self.effective_choices
    }

    /// Members of every effective choice group.
    pub fn choice_members(&self) -> impl Iterator<Item = &RequiredMember> {
        self.effective_choices
            .iter()
            .flat_map(|choice| choice.group.members.values())
    }

    /// Dispatch of `token` if it belongs anywhere in this protocol's closure.
    pub fn member_dispatch(&self, token: &Token) -> Option<Dispatch> {
        if let Some(member) = self.effective_required.get(token) {
            return Some(member.dispatch);
        }
        if let Some(member) = self.effective_provided.get(token) {
            return Some(member.dispatch);
        }
        self.choice_members()
            .find(|member| member.token == *token)
            .map(|member| member.dispatch)
    }

    pub fn summary(&self) -> ProtocolSummary {
        ProtocolSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            parents: self.parents.clone(),
            required: self
                .effective_required
                .values()
                .map(RequiredMember::descriptor)
                .collect(),
            provided: self
                .effective_provided
                .values()
                .map(ProvidedMember::descriptor)
                .collect(),
            choices: self
                .choice_members()
                .map(RequiredMember::descriptor)
                .collect(),
            minimal_paths: self
                .effective_choices
                .iter()
                .flat_map(|choice| choice.group.paths.iter().map(|path| path.name.clone()))
                .collect(),
        }
    }
}

/// Serializable description of a protocol's effective shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolSummary {
    pub id: ProtocolId,
    pub name: String,
    pub parents: Vec<ProtocolId>,
    pub required: Vec<MemberDescriptor>,
    pub provided: Vec<MemberDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<MemberDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub minimal_paths: Vec<String>,
}
