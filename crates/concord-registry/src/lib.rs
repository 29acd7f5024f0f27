//! Protocol registry: declarations, inheritance edges, and member closures.
//!
//! Declarations are append-only. A [`ProtocolDef`] is fully built, including
//! its memoized ancestor and member closures, before it is inserted, so a
//! reader can never observe a half-wired protocol.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use concord_core::{
    ChoiceGroup, ProtocolError, ProtocolId, ProtocolResult, ProvidedMember, RequiredMember, Token,
};
use indexmap::{IndexMap, IndexSet};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

mod protocol;

pub use protocol::{EffectiveChoice, ProtocolDef, ProtocolHandle, ProtocolSpec, ProtocolSummary};

#[derive(Debug, Default)]
pub struct ProtocolRegistry {
    catalog: RwLock<Catalog>,
}

/// Published protocols and the protocol that introduced each member token.
#[derive(Debug, Default)]
struct Catalog {
    protocols: HashMap<ProtocolId, ProtocolHandle>,
    owners: HashMap<Token, ProtocolId>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and publish a protocol.
    #[instrument(skip(self, spec), fields(protocol = %spec.name, parents = spec.parents.len()))]
    pub fn declare(&self, spec: ProtocolSpec) -> ProtocolResult<ProtocolHandle> {
        let mut catalog = self.catalog.write();
        match build_definition(&catalog, spec) {
            Ok(definition) => {
                let handle = Arc::new(definition);
                for token in handle.own_tokens() {
                    catalog
                        .owners
                        .entry(token.clone())
                        .or_insert_with(|| handle.id.clone());
                }
                catalog.protocols.insert(handle.id.clone(), handle.clone());
                info!(
                    id = %handle.id,
                    ancestors = handle.ancestors.len(),
                    required = handle.effective_required.len(),
                    provided = handle.effective_provided.len(),
                    "protocol declared"
                );
                Ok(handle)
            }
            Err(error) => {
                warn!(%error, "protocol declaration rejected");
                Err(error)
            }
        }
    }

    pub fn get(&self, id: &ProtocolId) -> Option<ProtocolHandle> {
        self.catalog.read().protocols.get(id).cloned()
    }

    pub fn require(&self, id: &ProtocolId) -> ProtocolResult<ProtocolHandle> {
        self.get(id)
            .ok_or_else(|| ProtocolError::UnknownProtocol(id.clone()))
    }

    /// Required members of `protocol` and all of its ancestors.
    pub fn effective_required<'p>(
        &self,
        protocol: &'p ProtocolDef,
    ) -> &'p IndexMap<Token, RequiredMember> {
        protocol.effective_required()
    }

    /// Provided members of `protocol` and all of its ancestors.
    pub fn effective_provided<'p>(
        &self,
        protocol: &'p ProtocolDef,
    ) -> &'p IndexMap<Token, ProvidedMember> {
        protocol.effective_provided()
    }

    /// Reflexive-transitive ancestry test.
    pub fn is_ancestor(&self, ancestor: &ProtocolId, protocol: &ProtocolDef) -> bool {
        protocol.id == *ancestor || protocol.ancestors.contains(ancestor)
    }

    pub fn len(&self) -> usize {
        self.catalog.read().protocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.read().protocols.is_empty()
    }

    pub fn summaries(&self) -> Vec<ProtocolSummary> {
        let mut summaries: Vec<_> = self
            .catalog
            .read()
            .protocols
            .values()
            .map(|protocol| protocol.summary())
            .collect();
        summaries.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)));
        summaries
    }
}

fn build_definition(catalog: &Catalog, spec: ProtocolSpec) -> ProtocolResult<ProtocolDef> {
    let protocols = &catalog.protocols;
    let ProtocolSpec {
        id,
        name,
        parents,
        required,
        provided,
        choice,
    } = spec;

    if protocols.contains_key(&id) {
        return Err(ProtocolError::DuplicateProtocol(id));
    }

    let parents: Vec<ProtocolId> = parents
        .into_iter()
        .collect::<IndexSet<_>>()
        .into_iter()
        .collect();
    let mut parent_defs = Vec::with_capacity(parents.len());
    for parent_id in &parents {
        if reaches(protocols, parent_id, &id) {
            let via = protocols
                .get(parent_id)
                .map(|parent| parent.name.clone())
                .unwrap_or_else(|| name.clone());
            return Err(ProtocolError::CyclicInheritance {
                protocol: name,
                via,
            });
        }
        let parent = protocols
            .get(parent_id)
            .ok_or_else(|| ProtocolError::UnknownProtocol(parent_id.clone()))?;
        parent_defs.push(parent.clone());
    }

    let mut ancestors = IndexSet::new();
    let mut effective_required = IndexMap::new();
    let mut effective_provided = IndexMap::new();
    let mut effective_choices: Vec<EffectiveChoice> = Vec::new();
    for parent in &parent_defs {
        ancestors.extend(parent.ancestors.iter().cloned());
        ancestors.insert(parent.id.clone());
        for (token, member) in &parent.effective_required {
            effective_required
                .entry(token.clone())
                .or_insert_with(|| member.clone());
        }
        for (token, member) in &parent.effective_provided {
            effective_provided
                .entry(token.clone())
                .or_insert_with(|| member.clone());
        }
        for inherited in &parent.effective_choices {
            if !effective_choices
                .iter()
                .any(|choice| choice.declared_by == inherited.declared_by)
            {
                effective_choices.push(inherited.clone());
            }
        }
    }

    // A token may only be reused by descendants of the protocol that minted it.
    let declared = required
        .iter()
        .map(|member| &member.token)
        .chain(provided.iter().map(|member| &member.token))
        .chain(choice.members.keys());
    for token in declared {
        let foreign = catalog
            .owners
            .get(token)
            .filter(|owner| !ancestors.contains(*owner));
        if let Some(owner) = foreign {
            let owner = protocols
                .get(owner)
                .map(|owner| owner.name.clone())
                .unwrap_or_else(|| owner.to_string());
            return Err(ProtocolError::ForeignToken {
                protocol: name,
                token: token.clone(),
                owner,
            });
        }
    }

    let mut own_required = IndexMap::new();
    for member in required {
        if effective_provided.contains_key(&member.token) {
            return Err(ProtocolError::DuplicateProvision {
                protocol: name.clone(),
                token: member.token,
                required_by: name,
            });
        }
        effective_required.insert(member.token.clone(), member.clone());
        own_required.insert(member.token.clone(), member);
    }

    let mut own_provided = IndexMap::new();
    for member in provided {
        let required_by = if own_required.contains_key(&member.token)
            || choice.members.contains_key(&member.token)
        {
            Some(name.clone())
        } else {
            requiring_ancestor(protocols, &ancestors, &member.token)
        };
        if let Some(required_by) = required_by {
            return Err(ProtocolError::DuplicateProvision {
                protocol: name,
                token: member.token,
                required_by,
            });
        }
        // A descendant's body shadows an inherited one for the same token.
        effective_provided.insert(member.token.clone(), member.clone());
        own_provided.insert(member.token.clone(), member);
    }

    validate_choice(
        &name,
        &choice,
        &effective_required,
        &effective_provided,
        &effective_choices,
    )?;
    let choice = if choice.is_empty() {
        None
    } else {
        let group = Arc::new(choice);
        effective_choices.push(EffectiveChoice {
            declared_by: id.clone(),
            protocol_name: name.clone(),
            group: group.clone(),
        });
        Some(group)
    };

    debug!(
        ancestors = ancestors.len(),
        choice_groups = effective_choices.len(),
        "protocol closure computed"
    );

    Ok(ProtocolDef {
        id,
        name,
        parents,
        required: own_required,
        provided: own_provided,
        choice,
        ancestors,
        effective_required,
        effective_provided,
        effective_choices,
    })
}

/// Depth-first walk along parent edges from `from`, looking for `target`.
fn reaches<'a>(
    protocols: &'a HashMap<ProtocolId, ProtocolHandle>,
    from: &'a ProtocolId,
    target: &ProtocolId,
) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == target {
            return true;
        }
        if !seen.insert(current) {
            continue;
        }
        if let Some(protocol) = protocols.get(current) {
            stack.extend(protocol.parents.iter());
        }
    }
    false
}

fn requiring_ancestor(
    protocols: &HashMap<ProtocolId, ProtocolHandle>,
    ancestors: &IndexSet<ProtocolId>,
    token: &Token,
) -> Option<String> {
    ancestors
        .iter()
        .filter_map(|id| protocols.get(id))
        .find(|ancestor| {
            ancestor.required.contains_key(token)
                || ancestor
                    .choice
                    .as_ref()
                    .is_some_and(|group| group.members.contains_key(token))
        })
        .map(|ancestor| ancestor.name.clone())
}

fn validate_choice(
    protocol: &str,
    group: &ChoiceGroup,
    effective_required: &IndexMap<Token, RequiredMember>,
    effective_provided: &IndexMap<Token, ProvidedMember>,
    inherited: &[EffectiveChoice],
) -> ProtocolResult<()> {
    let invalid = |path: &str, reason: String| ProtocolError::InvalidMinimalPath {
        protocol: protocol.to_owned(),
        path: path.to_owned(),
        reason,
    };

    if group.is_empty() {
        return match group.paths.first() {
            Some(path) => Err(invalid(&path.name, "choice group has no members".to_owned())),
            None => Ok(()),
        };
    }
    if group.paths.is_empty() {
        return Err(invalid("*", "choice group declares no minimal path".to_owned()));
    }

    for token in group.members.keys() {
        let taken = effective_required.contains_key(token)
            || effective_provided.contains_key(token)
            || inherited
                .iter()
                .any(|choice| choice.group.members.contains_key(token));
        if taken {
            return Err(invalid(
                "*",
                format!("{token} is already a member of the protocol closure"),
            ));
        }
    }

    for path in &group.paths {
        if let Some(token) = path
            .supplies
            .iter()
            .find(|token| !group.members.contains_key(*token))
        {
            return Err(invalid(
                &path.name,
                format!("supplies {token}, which is not a member of the group"),
            ));
        }
        for derived in &path.derives {
            let Some(member) = group.members.get(&derived.token) else {
                return Err(invalid(
                    &path.name,
                    format!("derives {}, which is not a member of the group", derived.token),
                ));
            };
            if member.dispatch != derived.dispatch {
                return Err(invalid(
                    &path.name,
                    format!("derives {} with mismatched dispatch", derived.token),
                ));
            }
            if path.supplies.contains(&derived.token) {
                return Err(invalid(
                    &path.name,
                    format!("both supplies and derives {}", derived.token),
                ));
            }
        }
        if let Some(token) = group
            .members
            .keys()
            .find(|token| !path.supplies.contains(*token) && path.derived(token).is_none())
        {
            return Err(invalid(
                &path.name,
                format!("neither supplies nor derives {token}"),
            ));
        }
    }
    Ok(())
}
