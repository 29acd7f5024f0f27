//! Completeness checking and derivation of provided behavior.
//!
//! Nothing here mutates a target: the resolver turns an implementation request
//! into an [`InstallPlan`] or an error, and the installer applies the plan only
//! after every check has passed.

use std::sync::Arc;

use concord_core::{
    Behavior, ChoiceGroup, Dispatch, MemberMap, MinimalPath, ProtocolError, ProtocolId,
    ProtocolResult, ProvidedMember, Token,
};
use concord_ledger::Binding;
use concord_registry::ProtocolDef;
use indexmap::IndexSet;
use tracing::debug;

use crate::target::{Install, TargetType};

/// Behaviors that fill a protocol's choice groups for one supplied subset.
#[derive(Debug, Clone, Default)]
pub struct DefaultDerivation {
    /// Chosen path per group, in group order.
    pub paths: Vec<String>,
    pub members: Vec<ProvidedMember>,
}

pub(crate) struct InstallPlan {
    pub supplied: MemberMap,
    pub aliased: Vec<Token>,
    pub inherited: Vec<Token>,
    pub derived: Vec<ProvidedMember>,
    /// Chosen path per settled group, keyed by the declaring protocol.
    pub minimal_paths: Vec<(ProtocolId, String)>,
}

impl InstallPlan {
    pub fn installs(&self, protocol: &ProtocolDef) -> Vec<Install> {
        let supplied = self.supplied.iter().filter_map(|(token, body)| {
            protocol.member_dispatch(token).map(|dispatch| Install {
                dispatch,
                token: token.clone(),
                body: body.clone(),
            })
        });
        let derived = self.derived.iter().map(|member| Install {
            dispatch: member.dispatch,
            token: member.token.clone(),
            body: member.body.clone(),
        });
        supplied.chain(derived).collect()
    }

    /// The ledger record for `protocol`, which is either the implemented
    /// protocol itself or one of its ancestors recorded by implication.
    pub fn binding_for(
        &self,
        target: &TargetType,
        protocol: &ProtocolDef,
        implied_by: Option<&ProtocolId>,
    ) -> Binding {
        let in_closure = |token: &Token| protocol.member_dispatch(token).is_some();
        let mut binding = Binding::new(target.key().clone(), protocol.id().clone(), protocol.name());
        binding.supplied = self
            .supplied
            .iter()
            .filter(|(token, _)| in_closure(token))
            .map(|(token, body)| (token.clone(), body.clone()))
            .collect();
        binding.inherited = self
            .inherited
            .iter()
            .filter(|token| in_closure(token))
            .cloned()
            .collect();
        binding.derived = self
            .derived
            .iter()
            .filter(|member| in_closure(&member.token))
            .map(|member| member.token.clone())
            .collect();
        binding.minimal_paths = self
            .minimal_paths
            .iter()
            .filter(|(declared_by, _)| {
                declared_by == protocol.id() || protocol.ancestors().contains(declared_by)
            })
            .map(|(_, name)| name.clone())
            .collect();
        binding.implied_by = implied_by.cloned();
        binding
    }
}

/// Pick the first path whose supplied members are all available, or report
/// the missing members of the path closest to being satisfied.
fn select_path<'g>(
    group: &'g ChoiceGroup,
    available: impl Fn(&Token) -> bool,
) -> Result<&'g MinimalPath, Vec<Token>> {
    let mut nearest: Option<Vec<Token>> = None;
    for path in &group.paths {
        let missing: Vec<Token> = path
            .supplies
            .iter()
            .filter(|token| !available(*token))
            .cloned()
            .collect();
        if missing.is_empty() {
            return Ok(path);
        }
        if nearest
            .as_ref()
            .is_none_or(|current| missing.len() < current.len())
        {
            nearest = Some(missing);
        }
    }
    Err(nearest.unwrap_or_default())
}

/// Derivations for every choice group of `protocol`, given that the members in
/// `via` are supplied by the implementer.
pub fn derive_default(protocol: &ProtocolDef, via: &[Token]) -> ProtocolResult<DefaultDerivation> {
    let via: IndexSet<&Token> = via.iter().collect();
    let mut derivation = DefaultDerivation::default();
    let mut missing = Vec::new();
    for choice in protocol.effective_choices() {
        match select_path(&choice.group, |token| via.contains(token)) {
            Ok(path) => {
                derivation.paths.push(path.name.clone());
                derivation.members.extend(
                    choice
                        .group
                        .members
                        .keys()
                        .filter(|token| !via.contains(token))
                        .filter_map(|token| path.derived(token).cloned()),
                );
            }
            Err(path_missing) => missing.extend(path_missing),
        }
    }
    if missing.is_empty() {
        Ok(derivation)
    } else {
        Err(ProtocolError::IncompleteImplementation {
            protocol: protocol.name().to_owned(),
            missing,
        })
    }
}

/// Validate an implementation request and compute what it installs.
pub(crate) fn plan(
    target: &TargetType,
    protocol: &ProtocolDef,
    installed_ancestors: &[Arc<Binding>],
    mut supplied: MemberMap,
) -> ProtocolResult<InstallPlan> {
    let covered: IndexSet<&Token> = installed_ancestors
        .iter()
        .flat_map(|binding| {
            binding
                .supplied
                .keys()
                .chain(binding.inherited.iter())
                .chain(binding.derived.iter())
        })
        .collect();
    // Groups whose members an installed ancestor already filled are settled.
    let open_choices: Vec<_> = protocol
        .effective_choices()
        .iter()
        .filter(|choice| !choice.group.members.keys().all(|token| covered.contains(token)))
        .collect();

    if let Some(token) = supplied.keys().find(|token| {
        let wanted = protocol.effective_required().contains_key(*token)
            || open_choices
                .iter()
                .any(|choice| choice.group.members.contains_key(*token));
        !wanted || covered.contains(token)
    }) {
        return Err(ProtocolError::UnexpectedMember {
            protocol: protocol.name().to_owned(),
            token: token.clone(),
        });
    }

    let mut missing = Vec::new();
    let mut aliased = Vec::new();
    let mut inherited = Vec::new();
    for (token, member) in protocol.effective_required() {
        if supplied.contains_key(token) {
            continue;
        }
        if covered.contains(token) {
            inherited.push(token.clone());
            continue;
        }
        match adopt_alias(target, member.alias.as_deref(), member.dispatch) {
            Some(body) => {
                supplied.insert(token.clone(), body);
                aliased.push(token.clone());
            }
            None => missing.push(token.clone()),
        }
    }

    let mut derived = Vec::new();
    let mut minimal_paths = Vec::new();
    for choice in &open_choices {
        for (token, member) in &choice.group.members {
            if supplied.contains_key(token) {
                continue;
            }
            if let Some(body) = adopt_alias(target, member.alias.as_deref(), member.dispatch) {
                supplied.insert(token.clone(), body);
                aliased.push(token.clone());
            }
        }
        match select_path(&choice.group, |token| supplied.contains_key(token)) {
            Ok(path) => {
                debug!(
                    group = %choice.protocol_name,
                    path = %path.name,
                    "minimal path selected"
                );
                minimal_paths.push((choice.declared_by.clone(), path.name.clone()));
                derived.extend(
                    choice
                        .group
                        .members
                        .keys()
                        .filter(|token| !supplied.contains_key(*token))
                        .filter_map(|token| path.derived(token).cloned()),
                );
            }
            Err(path_missing) => missing.extend(path_missing),
        }
    }

    if !missing.is_empty() {
        return Err(ProtocolError::IncompleteImplementation {
            protocol: protocol.name().to_owned(),
            missing,
        });
    }

    for (token, member) in protocol.effective_provided() {
        if covered.contains(token) {
            continue;
        }
        derived.push(member.clone());
    }

    Ok(InstallPlan {
        supplied,
        aliased,
        inherited,
        derived,
        minimal_paths,
    })
}

fn adopt_alias(
    target: &TargetType,
    alias: Option<&str>,
    dispatch: Dispatch,
) -> Option<Behavior> {
    let (exposed, body) = target.named_member(alias?)?;
    (exposed == dispatch).then_some(body)
}
