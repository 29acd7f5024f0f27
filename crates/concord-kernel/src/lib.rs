//! # concord-kernel: the Concord engine facade
//!
//! Wires a [`ProtocolRegistry`], a [`CoherenceLedger`] and the resolution
//! runtime into one [`ConcordEngine`]. Hosts declare protocols, implement them
//! on target types, then query and invoke members through the engine only.

use std::sync::Arc;

use concord_ledger::CoherenceLedger;
use concord_registry::ProtocolRegistry;
use concord_runtime::{ProtocolRuntime, RuntimeConfig};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub use concord_core::{
    Behavior, ChoiceGroup, Dispatch, Invocation, MemberMap, MinimalPath, ProtocolError, ProtocolId,
    ProtocolResult, ProvidedMember, RequiredMember, Token, TypeKey, Value, Variant, behavior,
};
pub use concord_ledger::{Binding, BindingReport, LedgerReport};
pub use concord_registry::{ProtocolDef, ProtocolHandle, ProtocolSpec, ProtocolSummary};
pub use concord_runtime::{
    BoundMember, DefaultDerivation, QueryMode, TargetBuilder, TargetHandle, TargetType,
};

/// Engine settings a host can load from its own configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub query_mode: QueryMode,
}

#[derive(Debug, Clone, Default)]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn query_mode(mut self, query_mode: QueryMode) -> Self {
        self.config.query_mode = query_mode;
        self
    }

    pub fn build(self) -> ConcordEngine {
        let registry = Arc::new(ProtocolRegistry::new());
        let ledger = Arc::new(CoherenceLedger::new());
        let runtime = ProtocolRuntime::new(
            RuntimeConfig {
                query_mode: self.config.query_mode,
            },
            registry,
            ledger,
        );
        debug!(query_mode = ?self.config.query_mode, "engine built");
        ConcordEngine {
            config: self.config,
            runtime,
        }
    }
}

/// Cloning is cheap; clones share the registry and ledger.
#[derive(Clone)]
pub struct ConcordEngine {
    config: EngineConfig,
    runtime: ProtocolRuntime,
}

impl Default for ConcordEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcordEngine {
    pub fn new() -> Self {
        EngineBuilder::new().build()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ProtocolRegistry> {
        self.runtime.registry()
    }

    pub fn declare_protocol(&self, spec: ProtocolSpec) -> ProtocolResult<ProtocolHandle> {
        self.runtime.registry().declare(spec)
    }

    pub fn protocol(&self, id: &ProtocolId) -> Option<ProtocolHandle> {
        self.runtime.registry().get(id)
    }

    /// Summaries of every declared protocol, ordered by name.
    pub fn protocols(&self) -> Vec<ProtocolSummary> {
        self.runtime.registry().summaries()
    }

    pub fn new_type(&self, name: impl Into<String>) -> TargetHandle {
        TargetType::new(name)
    }

    /// Start a type that carries members from outside `implement`.
    pub fn type_builder(&self, name: impl Into<String>) -> TargetBuilder {
        TargetType::builder(name)
    }

    pub fn implement(
        &self,
        target: &TargetHandle,
        protocol: &ProtocolDef,
        members: MemberMap,
    ) -> ProtocolResult<TargetHandle> {
        self.runtime.implement(target, protocol, members)
    }

    pub fn query(&self, target: &TargetType, protocol: &ProtocolDef) -> bool {
        self.runtime.query(target, protocol)
    }

    pub fn member(
        &self,
        target: &TargetHandle,
        protocol: &ProtocolDef,
        token: &Token,
    ) -> ProtocolResult<BoundMember> {
        self.runtime.member(target, protocol, token)
    }

    pub fn derive_default(
        &self,
        protocol: &ProtocolDef,
        via: &[Token],
    ) -> ProtocolResult<DefaultDerivation> {
        self.runtime.derive_default(protocol, via)
    }

    pub fn binding(&self, target: &TargetType, protocol: &ProtocolDef) -> Option<Arc<Binding>> {
        self.runtime.ledger().lookup(target.key(), protocol.id())
    }

    pub fn ledger_report(&self) -> LedgerReport {
        self.runtime.ledger().report()
    }

    pub fn effective_required<'p>(
        &self,
        protocol: &'p ProtocolDef,
    ) -> &'p IndexMap<Token, RequiredMember> {
        self.runtime.registry().effective_required(protocol)
    }

    pub fn effective_provided<'p>(
        &self,
        protocol: &'p ProtocolDef,
    ) -> &'p IndexMap<Token, ProvidedMember> {
        self.runtime.registry().effective_provided(protocol)
    }

    /// Whether `ancestor` is `protocol` or one of its transitive parents.
    pub fn is_ancestor(&self, ancestor: &ProtocolDef, protocol: &ProtocolDef) -> bool {
        self.runtime.registry().is_ancestor(ancestor.id(), protocol)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use anyhow::Result;

    use crate::{
        Behavior, ChoiceGroup, ConcordEngine, Dispatch, EngineBuilder, EngineConfig, MemberMap,
        MinimalPath, ProtocolDef, ProtocolError, ProtocolHandle, ProtocolResult, ProtocolSpec,
        ProvidedMember, QueryMode, RequiredMember, TargetType, Token, Value, behavior,
    };

    fn first_arg(args: &[Value]) -> ProtocolResult<&Value> {
        args.first().ok_or_else(|| ProtocolError::TypeMismatch {
            expected: "argument".to_owned(),
            actual: "nothing".to_owned(),
        })
    }

    fn ints(values: impl IntoIterator<Item = i64>) -> Value {
        Value::list(values.into_iter().map(Value::Int))
    }

    #[derive(Clone)]
    struct Monads {
        functor: ProtocolHandle,
        applicative: ProtocolHandle,
        bind: ProtocolHandle,
        monad: ProtocolHandle,
        map: Token,
        pure: Token,
        bind_fn: Token,
        join: Token,
    }

    fn declare_monads(engine: &ConcordEngine) -> Result<Monads> {
        let map = Token::new("Functor.map");
        let pure = Token::new("Applicative.pure");
        let bind_fn = Token::new("Bind.bind");
        let join = Token::new("Monad.join");

        let functor = engine.declare_protocol(
            ProtocolSpec::new("Functor")
                .require(RequiredMember::instance(map.clone()).with_alias("map")),
        )?;
        let applicative = engine.declare_protocol(
            ProtocolSpec::new("Applicative")
                .extends(&functor)
                .require(RequiredMember::type_level(pure.clone())),
        )?;
        let bind = engine.declare_protocol(
            ProtocolSpec::new("Bind")
                .extends(&functor)
                .require(RequiredMember::instance(bind_fn.clone())),
        )?;
        let bind_for_join = bind_fn.clone();
        let monad = engine.declare_protocol(
            ProtocolSpec::new("Monad")
                .extends(&applicative)
                .extends(&bind)
                .provide(ProvidedMember::instance(
                    join.clone(),
                    behavior(move |inv, _| inv.call(&bind_for_join, vec![Value::func(Ok)])),
                )),
        )?;

        Ok(Monads {
            functor,
            applicative,
            bind,
            monad,
            map,
            pure,
            bind_fn,
            join,
        })
    }

    fn list_map() -> Behavior {
        behavior(|inv, args| {
            let f = first_arg(&args)?;
            inv.receiver()?
                .as_list()?
                .iter()
                .map(|item| f.apply(item.clone()))
                .collect::<ProtocolResult<Vec<_>>>()
                .map(Value::List)
        })
    }

    fn list_pure() -> Behavior {
        behavior(|_, args| Ok(Value::list(args.into_iter().take(1))))
    }

    fn list_bind() -> Behavior {
        behavior(|inv, args| {
            let f = first_arg(&args)?;
            let mut out = Vec::new();
            for item in inv.receiver()?.as_list()? {
                out.extend(f.apply(item.clone())?.into_list()?);
            }
            Ok(Value::List(out))
        })
    }

    fn list_flatten() -> Behavior {
        behavior(|inv, _| {
            let mut out = Vec::new();
            for item in inv.receiver()?.as_list()? {
                out.extend(item.clone().into_list()?);
            }
            Ok(Value::List(out))
        })
    }

    fn monad_members(monads: &Monads) -> MemberMap {
        MemberMap::from([
            (monads.map.clone(), list_map()),
            (monads.pure.clone(), list_pure()),
            (monads.bind_fn.clone(), list_bind()),
        ])
    }

    #[test]
    fn monad_on_lists_flattens_one_level() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let list = engine.new_type("List");

        engine.implement(&list, &monads.monad, monad_members(&monads))?;

        assert!(engine.query(&list, &monads.monad));
        for parent in [&monads.functor, &monads.applicative, &monads.bind] {
            assert!(engine.query(&list, parent));
        }

        let join = engine.member(&list, &monads.monad, &monads.join)?;
        let nested = Value::list([ints([1, 2]), ints([3]), ints([])]);
        assert_eq!(join.call(&nested, vec![])?, ints([1, 2, 3]));
        let deeper = Value::list([Value::list([ints([1])]), Value::list([ints([2])])]);
        assert_eq!(
            join.call(&deeper, vec![])?,
            Value::list([ints([1]), ints([2])])
        );

        let pure = engine.member(&list, &monads.monad, &monads.pure)?;
        assert_eq!(pure.dispatch(), Dispatch::Static);
        assert_eq!(pure.call_static(vec![Value::Int(7)])?, ints([7]));
        Ok(())
    }

    #[test]
    fn second_implementation_is_rejected_even_when_identical() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let list = engine.new_type("List");
        engine.implement(&list, &monads.monad, monad_members(&monads))?;
        let installed_at = engine
            .binding(&list, &monads.monad)
            .expect("monad installed")
            .installed_at;

        let err = engine
            .implement(&list, &monads.monad, monad_members(&monads))
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::AlreadyImplemented {
                target: list.key().clone(),
                protocol: "Monad".to_owned(),
            }
        );

        let binding = engine.binding(&list, &monads.monad).expect("still installed");
        assert_eq!(binding.installed_at, installed_at);
        let join = engine.member(&list, &monads.monad, &monads.join)?;
        assert_eq!(join.call(&Value::list([ints([4])]), vec![])?, ints([4]));
        Ok(())
    }

    #[test]
    fn omitting_any_member_names_it_as_missing() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let full = monad_members(&monads);

        for token in full.keys() {
            let mut partial = full.clone();
            partial.shift_remove(token);
            let list = engine.new_type("List");

            let err = engine.implement(&list, &monads.monad, partial).unwrap_err();
            assert_eq!(
                err,
                ProtocolError::IncompleteImplementation {
                    protocol: "Monad".to_owned(),
                    missing: vec![token.clone()],
                }
            );
            assert_eq!(list.member_count(), 0);
            assert!(!engine.query(&list, &monads.monad));
            assert!(engine.binding(&list, &monads.monad).is_none());
            assert!(engine.binding(&list, &monads.functor).is_none());

            engine.implement(&list, &monads.monad, full.clone())?;
            assert!(engine.query(&list, &monads.monad));
        }
        Ok(())
    }

    #[test]
    fn installed_parents_satisfy_inherited_requirements() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let list = engine.new_type("List");

        engine.implement(
            &list,
            &monads.functor,
            MemberMap::from([(monads.map.clone(), list_map())]),
        )?;
        engine.implement(
            &list,
            &monads.monad,
            MemberMap::from([
                (monads.pure.clone(), list_pure()),
                (monads.bind_fn.clone(), list_bind()),
            ]),
        )?;

        let monad = engine.binding(&list, &monads.monad).expect("monad installed");
        assert_eq!(monad.inherited, vec![monads.map.clone()]);
        assert_eq!(monad.derived, vec![monads.join.clone()]);
        let functor = engine.binding(&list, &monads.functor).expect("functor installed");
        assert!(functor.implied_by.is_none());
        let applicative = engine
            .binding(&list, &monads.applicative)
            .expect("applicative implied");
        assert_eq!(applicative.implied_by.as_ref(), Some(monads.monad.id()));
        assert!(applicative.supplied.contains_key(&monads.pure));

        let map = engine.member(&list, &monads.monad, &monads.map)?;
        let double = Value::func(|value| Ok(Value::Int(value.as_int()? * 2)));
        assert_eq!(map.call(&ints([1, 2]), vec![double])?, ints([2, 4]));

        let vec_type = engine.new_type("Vec");
        engine.implement(
            &vec_type,
            &monads.functor,
            MemberMap::from([(monads.map.clone(), list_map())]),
        )?;
        let err = engine
            .implement(&vec_type, &monads.monad, monad_members(&monads))
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolError::UnexpectedMember {
                protocol: "Monad".to_owned(),
                token: monads.map.clone(),
            }
        );
        Ok(())
    }

    #[test]
    fn implementing_a_parent_after_its_descendant_is_rejected() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let list = engine.new_type("List");
        engine.implement(&list, &monads.monad, monad_members(&monads))?;

        let err = engine
            .implement(
                &list,
                &monads.functor,
                MemberMap::from([(monads.map.clone(), list_map())]),
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::AlreadyImplemented { .. }));
        let map = engine.member(&list, &monads.functor, &monads.map)?;
        let negate = Value::func(|value| Ok(Value::Int(-value.as_int()?)));
        assert_eq!(map.call(&ints([3]), vec![negate])?, ints([-3]));
        Ok(())
    }

    #[test]
    fn committed_bindings_survive_later_implementations() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let list = engine.new_type("List");
        let reversing_map = behavior(|inv, args| {
            let f = first_arg(&args)?;
            inv.receiver()?
                .as_list()?
                .iter()
                .rev()
                .map(|item| f.apply(item.clone()))
                .collect::<ProtocolResult<Vec<_>>>()
                .map(Value::List)
        });
        engine.implement(
            &list,
            &monads.functor,
            MemberMap::from([(monads.map.clone(), reversing_map)]),
        )?;
        let installed_at = engine
            .binding(&list, &monads.functor)
            .expect("functor installed")
            .installed_at;

        let err = engine
            .declare_protocol(
                ProtocolSpec::new("Mappable").require(RequiredMember::instance(monads.map.clone())),
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::ForeignToken { .. }));

        let err = engine
            .implement(
                &list,
                &monads.bind,
                MemberMap::from([
                    (monads.map.clone(), list_map()),
                    (monads.bind_fn.clone(), list_bind()),
                ]),
            )
            .unwrap_err();
        assert!(matches!(err, ProtocolError::UnexpectedMember { .. }));
        engine.implement(
            &list,
            &monads.monad,
            MemberMap::from([
                (monads.pure.clone(), list_pure()),
                (monads.bind_fn.clone(), list_bind()),
            ]),
        )?;

        let functor = engine.binding(&list, &monads.functor).expect("still installed");
        assert_eq!(functor.installed_at, installed_at);
        let identity = Value::func(Ok);
        for protocol in [&monads.functor, &monads.monad] {
            let map = engine.member(&list, protocol, &monads.map)?;
            assert_eq!(map.call(&ints([1, 2, 3]), vec![identity.clone()])?, ints([3, 2, 1]));
        }
        Ok(())
    }

    #[test]
    fn query_is_false_until_members_are_present() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let blank = engine.new_type("Blank");
        assert!(!engine.query(&blank, &monads.functor));
        assert!(!engine.query(&blank, &monads.monad));

        let partial = engine
            .type_builder("Partial")
            .instance_member(monads.map.clone(), list_map())
            .instance_member(monads.bind_fn.clone(), list_bind())
            .build();
        assert!(engine.query(&partial, &monads.bind));
        assert!(!engine.query(&partial, &monads.monad));
        Ok(())
    }

    #[test]
    fn installed_query_mode_ignores_ad_hoc_types() -> Result<()> {
        let config: EngineConfig = serde_json::from_str(r#"{"query_mode": "installed"}"#)?;
        assert_eq!(config.query_mode, QueryMode::Installed);
        let defaults: EngineConfig = serde_json::from_str("{}")?;
        assert_eq!(defaults.query_mode, QueryMode::Structural);

        let engine = EngineBuilder::new().config(config).build();
        let monads = declare_monads(&engine)?;
        let ad_hoc = engine
            .type_builder("AdHoc")
            .instance_member(monads.map.clone(), list_map())
            .build();
        assert!(!engine.query(&ad_hoc, &monads.functor));

        let list = engine.new_type("List");
        engine.implement(
            &list,
            &monads.functor,
            MemberMap::from([(monads.map.clone(), list_map())]),
        )?;
        assert!(engine.query(&list, &monads.functor));
        Ok(())
    }

    #[test]
    fn legacy_named_members_satisfy_aliased_requirements() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let legacy = engine
            .type_builder("LegacyList")
            .named_member("map", Dispatch::Instance, list_map())
            .build();

        assert!(engine.query(&legacy, &monads.functor));
        engine.implement(&legacy, &monads.functor, MemberMap::new())?;
        let map = engine.member(&legacy, &monads.functor, &monads.map)?;
        let square = Value::func(|value| {
            let n = value.as_int()?;
            Ok(Value::Int(n * n))
        });
        assert_eq!(map.call(&ints([2, 3]), vec![square])?, ints([4, 9]));
        Ok(())
    }

    #[test]
    fn tagged_variants_select_behavior_by_tag() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let maybe = engine.new_type("Maybe");
        let maybe_map = behavior(|inv, args| {
            let f = first_arg(&args)?;
            let variant = inv.receiver()?.as_variant()?;
            match (variant.tag.as_str(), &variant.payload) {
                ("just", Some(inner)) => {
                    Ok(Value::variant("just", Some(f.apply((**inner).clone())?)))
                }
                _ => Ok(Value::variant("nothing", None)),
            }
        });
        engine.implement(
            &maybe,
            &monads.functor,
            MemberMap::from([(monads.map.clone(), maybe_map)]),
        )?;

        let map = engine.member(&maybe, &monads.functor, &monads.map)?;
        let increment = Value::func(|value| Ok(Value::Int(value.as_int()? + 1)));
        assert_eq!(
            map.call(&Value::variant("just", Some(Value::Int(1))), vec![increment.clone()])?,
            Value::variant("just", Some(Value::Int(2)))
        );
        assert_eq!(
            map.call(&Value::variant("nothing", None), vec![increment])?,
            Value::variant("nothing", None)
        );
        Ok(())
    }

    struct ChainProtocol {
        protocol: ProtocolHandle,
        chain: Token,
        flatten: Token,
    }

    /// `chain` and `flatten` are interderivable given `map`.
    fn declare_chain(
        engine: &ConcordEngine,
        functor: &ProtocolDef,
        map: &Token,
    ) -> Result<ChainProtocol> {
        let chain = Token::new("Chain.chain");
        let flatten = Token::new("Chain.flatten");

        let chain_for_flatten = chain.clone();
        let via_chain = MinimalPath::new("via-chain")
            .supplies(chain.clone())
            .derives(ProvidedMember::instance(
                flatten.clone(),
                behavior(move |inv, _| inv.call(&chain_for_flatten, vec![Value::func(Ok)])),
            ));

        let map_for_chain = map.clone();
        let flatten_for_chain = flatten.clone();
        let via_flatten = MinimalPath::new("via-flatten")
            .supplies(flatten.clone())
            .derives(ProvidedMember::instance(
                chain.clone(),
                behavior(move |inv, args| {
                    let mapped = inv.call(&map_for_chain, args)?;
                    inv.call_on(&mapped, &flatten_for_chain, vec![])
                }),
            ));

        let protocol = engine.declare_protocol(
            ProtocolSpec::new("Chain").extends(functor).choice(
                ChoiceGroup::new()
                    .member(RequiredMember::instance(chain.clone()))
                    .member(RequiredMember::instance(flatten.clone()))
                    .path(via_chain)
                    .path(via_flatten),
            ),
        )?;
        Ok(ChainProtocol {
            protocol,
            chain,
            flatten,
        })
    }

    #[test]
    fn either_minimal_path_yields_the_same_behavior() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let chain = declare_chain(&engine, &monads.functor, &monads.map)?;

        let by_chain = engine.new_type("ListByChain");
        engine.implement(
            &by_chain,
            &chain.protocol,
            MemberMap::from([
                (monads.map.clone(), list_map()),
                (chain.chain.clone(), list_bind()),
            ]),
        )?;
        let by_flatten = engine.new_type("ListByFlatten");
        engine.implement(
            &by_flatten,
            &chain.protocol,
            MemberMap::from([
                (monads.map.clone(), list_map()),
                (chain.flatten.clone(), list_flatten()),
            ]),
        )?;

        let spread = Value::func(|value| {
            let n = value.as_int()?;
            Ok(ints([n, n * 10]))
        });
        let input = ints([1, 2, 3]);
        let nested = Value::list([ints([1]), ints([]), ints([2, 3])]);
        for token in [&chain.chain, &chain.flatten] {
            let left = engine.member(&by_chain, &chain.protocol, token)?;
            let right = engine.member(&by_flatten, &chain.protocol, token)?;
            let (receiver, args) = if token == &chain.chain {
                (&input, vec![spread.clone()])
            } else {
                (&nested, vec![])
            };
            assert_eq!(
                left.call(receiver, args.clone())?,
                right.call(receiver, args)?
            );
        }

        let chained = engine.member(&by_flatten, &chain.protocol, &chain.chain)?;
        assert_eq!(chained.call(&input, vec![spread])?, ints([1, 10, 2, 20, 3, 30]));

        let paths = |target: &TargetType| {
            engine
                .binding(target, &chain.protocol)
                .map(|binding| binding.minimal_paths.clone())
                .unwrap_or_default()
        };
        assert_eq!(paths(by_chain.as_ref()), vec!["via-chain"]);
        assert_eq!(paths(by_flatten.as_ref()), vec!["via-flatten"]);

        let derivation =
            engine.derive_default(&chain.protocol, std::slice::from_ref(&chain.chain))?;
        assert_eq!(derivation.paths, vec!["via-chain"]);
        assert_eq!(derivation.members[0].token, chain.flatten);
        Ok(())
    }

    #[test]
    fn closures_and_reports_describe_the_hierarchy() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;

        let required: Vec<_> = engine
            .effective_required(&monads.monad)
            .keys()
            .cloned()
            .collect();
        assert_eq!(required.len(), 3);
        for token in [&monads.map, &monads.pure, &monads.bind_fn] {
            assert!(required.contains(token));
        }
        assert!(engine.effective_provided(&monads.monad).contains_key(&monads.join));
        assert!(engine.effective_provided(&monads.bind).is_empty());
        assert!(engine.is_ancestor(&monads.functor, &monads.monad));
        assert!(engine.is_ancestor(&monads.monad, &monads.monad));
        assert!(!engine.is_ancestor(&monads.bind, &monads.applicative));

        let names: Vec<_> = engine
            .protocols()
            .into_iter()
            .map(|summary| summary.name)
            .collect();
        assert_eq!(names, vec!["Applicative", "Bind", "Functor", "Monad"]);
        assert!(engine.protocol(monads.monad.id()).is_some());

        let list = engine.new_type("List");
        engine.implement(&list, &monads.monad, monad_members(&monads))?;
        let report = serde_json::to_value(engine.ledger_report())?;
        let installed = report["installed"].as_array().map(Vec::len).unwrap_or(0);
        assert_eq!(installed, 4);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn sibling_protocols_racing_on_a_shared_parent_install_it_once() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;

        for round in 0..16 {
            let list = engine.new_type(format!("List{round}"));
            let barrier = Arc::new(Barrier::new(2));
            let siblings = [
                (
                    monads.applicative.clone(),
                    MemberMap::from([
                        (monads.map.clone(), list_map()),
                        (monads.pure.clone(), list_pure()),
                    ]),
                ),
                (
                    monads.bind.clone(),
                    MemberMap::from([
                        (monads.map.clone(), list_map()),
                        (monads.bind_fn.clone(), list_bind()),
                    ]),
                ),
            ];

            let mut handles = Vec::new();
            for (protocol, members) in siblings {
                let engine = engine.clone();
                let list = list.clone();
                let barrier = barrier.clone();
                handles.push(tokio::task::spawn_blocking(move || {
                    barrier.wait();
                    let outcome = engine.implement(&list, &protocol, members);
                    (protocol, outcome)
                }));
            }

            let mut winners = Vec::new();
            for handle in handles {
                let (protocol, outcome) = handle.await?;
                match outcome {
                    Ok(_) => winners.push(protocol),
                    Err(
                        ProtocolError::MemberConflict { .. }
                        | ProtocolError::UnexpectedMember { .. },
                    ) => assert!(engine.binding(&list, &protocol).is_none()),
                    Err(other) => return Err(other.into()),
                }
            }
            assert_eq!(winners.len(), 1);
            let winner = engine.binding(&list, &winners[0]).expect("winner installed");
            assert!(winner.covers(&monads.map));
            let map = engine.member(&list, &winners[0], &monads.map)?;
            let double = Value::func(|value| Ok(Value::Int(value.as_int()? * 2)));
            assert_eq!(map.call(&ints([1, 2]), vec![double])?, ints([2, 4]));
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_implementations_admit_exactly_one_winner() -> Result<()> {
        let engine = ConcordEngine::new();
        let monads = declare_monads(&engine)?;
        let list = engine.new_type("List");

        let mut handles = Vec::new();
        for _ in 0..12 {
            let engine = engine.clone();
            let monads = monads.clone();
            let list = list.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                engine.implement(&list, &monads.monad, monad_members(&monads))
            }));
        }

        let mut winners = 0;
        for handle in handles {
            match handle.await? {
                Ok(_) => winners += 1,
                Err(ProtocolError::AlreadyImplemented { .. }) => {}
                Err(other) => return Err(other.into()),
            }
        }
        assert_eq!(winners, 1);
        assert!(engine.query(&list, &monads.monad));
        assert_eq!(engine.ledger_report().installed.len(), 4);
        Ok(())
    }
}
