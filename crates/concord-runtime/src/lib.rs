//! # concord-runtime: resolution and installation
//!
//! [`ProtocolRuntime`] validates an implementation request against the
//! registry, claims the pair in the ledger, installs members onto the
//! target's tables and commits the binding. It also answers `query` and
//! resolves installed members for invocation.

use std::sync::Arc;

use concord_core::{
    Behavior, Dispatch, Invocation, MemberMap, MemberTable, ProtocolError, ProtocolResult, Token,
    Value,
};
use concord_ledger::CoherenceLedger;
use concord_registry::{ProtocolDef, ProtocolRegistry};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

mod resolver;
mod target;

pub use resolver::{DefaultDerivation, derive_default};
pub use target::{TargetBuilder, TargetHandle, TargetType};

/// How `query` decides whether a type satisfies a protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Every member token is bound on the type, however it got there.
    #[default]
    Structural,
    /// Structural, and the pair went through `implement`.
    Installed,
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub query_mode: QueryMode,
}

#[derive(Clone)]
pub struct ProtocolRuntime {
    config: RuntimeConfig,
    registry: Arc<ProtocolRegistry>,
    ledger: Arc<CoherenceLedger>,
}

impl ProtocolRuntime {
    pub fn new(
        config: RuntimeConfig,
        registry: Arc<ProtocolRegistry>,
        ledger: Arc<CoherenceLedger>,
    ) -> Self {
        Self {
            config,
            registry,
            ledger,
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        &self.registry
    }

    pub fn ledger(&self) -> &Arc<CoherenceLedger> {
        &self.ledger
    }

    /// Install `protocol` on `target` using the supplied member behaviors.
    ///
    /// Either every member is installed and the pair is recorded, or the call
    /// fails and the target and ledger are exactly as they were. Ancestors of
    /// `protocol` not yet installed on `target` are recorded alongside it, and
    /// members installed for any protocol are never replaced.
    #[instrument(
        skip(self, target, protocol, members),
        fields(
            target_type = %target.name(),
            protocol = %protocol.name(),
            supplied = members.len()
        )
    )]
    pub fn implement(
        &self,
        target: &TargetHandle,
        protocol: &ProtocolDef,
        members: MemberMap,
    ) -> ProtocolResult<TargetHandle> {
        self.registry.require(protocol.id())?;
        let permit = self
            .ledger
            .begin_implementation(target.key(), protocol.id(), protocol.name())?;

        // Ancestors still unimplemented are recorded with this binding. One
        // that another attempt holds in flight stays with that attempt.
        let mut implied = Vec::new();
        for ancestor_id in protocol.ancestors() {
            if self.ledger.is_installed(target.key(), ancestor_id) {
                continue;
            }
            let ancestor = self.registry.require(ancestor_id)?;
            match self.ledger.try_begin_implementation(target.key(), ancestor_id) {
                Some(ancestor_permit) => implied.push((ancestor, ancestor_permit)),
                None => debug!(ancestor = %ancestor.name(), "ancestor claimed elsewhere"),
            }
        }
        let implied_count = implied.len();

        let installed_ancestors: Vec<_> = self
            .ledger
            .installed_for(target.key())
            .into_iter()
            .filter(|binding| protocol.ancestors().contains(&binding.protocol))
            .collect();
        debug!(
            installed_ancestors = installed_ancestors.len(),
            implied = implied_count,
            "resolving implementation"
        );

        let plan = resolver::plan(target, protocol, &installed_ancestors, members)
            .inspect_err(|error| warn!(%error, "implementation rejected"))?;
        let replaced = target
            .install(protocol.id(), plan.installs(protocol))
            .inspect_err(|error| warn!(%error, "implementation rejected"))?;
        if replaced > 0 {
            debug!(replaced, "installed members superseded ad-hoc entries");
        }

        for (ancestor, ancestor_permit) in implied {
            let binding = plan.binding_for(target, &ancestor, Some(protocol.id()));
            self.ledger.commit(ancestor_permit, binding);
        }
        let binding = self
            .ledger
            .commit(permit, plan.binding_for(target, protocol, None));

        info!(
            supplied = binding.supplied.len(),
            aliased = plan.aliased.len(),
            inherited = binding.inherited.len(),
            derived = binding.derived.len(),
            implied = implied_count,
            "protocol implemented"
        );
        Ok(target.clone())
    }

    /// Whether `target` currently satisfies `protocol`.
    pub fn query(&self, target: &TargetType, protocol: &ProtocolDef) -> bool {
        let structural = {
            let tables = target.tables();
            let required = protocol
                .effective_required()
                .values()
                .chain(protocol.choice_members())
                .all(|member| {
                    tables.contains(member.dispatch, &member.token)
                        || member.alias.as_deref().is_some_and(|alias| {
                            target
                                .named_member(alias)
                                .is_some_and(|(dispatch, _)| dispatch == member.dispatch)
                        })
                });
            required
                && protocol
                    .effective_provided()
                    .values()
                    .all(|member| tables.contains(member.dispatch, &member.token))
        };
        match self.config.query_mode {
            QueryMode::Structural => structural,
            QueryMode::Installed => {
                structural && self.ledger.is_installed(target.key(), protocol.id())
            }
        }
    }

    /// Resolve the behavior installed for `token` by the `protocol` binding.
    pub fn member(
        &self,
        target: &TargetHandle,
        protocol: &ProtocolDef,
        token: &Token,
    ) -> ProtocolResult<BoundMember> {
        if !self.ledger.is_installed(target.key(), protocol.id()) {
            return Err(ProtocolError::NotImplemented {
                target: target.key().clone(),
                protocol: protocol.name().to_owned(),
            });
        }
        let dispatch =
            protocol
                .member_dispatch(token)
                .ok_or_else(|| ProtocolError::UnknownMember {
                    protocol: protocol.name().to_owned(),
                    token: token.clone(),
                })?;
        let body = target
            .resolve(dispatch, token)
            .ok_or_else(|| ProtocolError::MemberNotBound {
                token: token.clone(),
            })?;
        Ok(BoundMember {
            target: target.clone(),
            token: token.clone(),
            dispatch,
            body,
        })
    }

    pub fn derive_default(
        &self,
        protocol: &ProtocolDef,
        via: &[Token],
    ) -> ProtocolResult<DefaultDerivation> {
        derive_default(protocol, via)
    }
}

/// A member behavior resolved on a specific target, ready to invoke.
#[derive(Clone)]
pub struct BoundMember {
    target: TargetHandle,
    token: Token,
    dispatch: Dispatch,
    body: Behavior,
}

impl BoundMember {
    pub fn token(&self) -> &Token {
        &self.token
    }

    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Invoke on an instance of the target type.
    pub fn call(&self, receiver: &Value, args: Vec<Value>) -> ProtocolResult<Value> {
        (self.body)(
            &Invocation::new(&self.token, Some(receiver), self.target.as_ref()),
            args,
        )
    }

    /// Invoke a type-level member.
    pub fn call_static(&self, args: Vec<Value>) -> ProtocolResult<Value> {
        if self.dispatch == Dispatch::Instance {
            return Err(ProtocolError::MissingReceiver {
                token: self.token.clone(),
            });
        }
        (self.body)(
            &Invocation::new(&self.token, None, self.target.as_ref()),
            args,
        )
    }
}

impl std::fmt::Debug for BoundMember {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundMember")
            .field("target", &self.target.key())
            .field("token", &self.token)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}
