//! Per-type capability tables.
//!
//! A [`TargetType`] is created empty or, for legacy objects, pre-populated
//! through [`TargetBuilder`]. After construction its tables change only when
//! the installer commits an implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use concord_core::{
    Behavior, Dispatch, MemberTable, ProtocolError, ProtocolId, ProtocolResult, Token, TypeKey,
};
use parking_lot::{RwLock, RwLockReadGuard};

pub type TargetHandle = Arc<TargetType>;

/// A table slot. `installed_by` is `None` for ad-hoc members.
struct Entry {
    body: Behavior,
    installed_by: Option<ProtocolId>,
}

#[derive(Default)]
pub(crate) struct MemberTables {
    instance: HashMap<Token, Entry>,
    statics: HashMap<Token, Entry>,
}

impl MemberTables {
    fn table(&self, dispatch: Dispatch) -> &HashMap<Token, Entry> {
        match dispatch {
            Dispatch::Instance => &self.instance,
            Dispatch::Static => &self.statics,
        }
    }

    fn table_mut(&mut self, dispatch: Dispatch) -> &mut HashMap<Token, Entry> {
        match dispatch {
            Dispatch::Instance => &mut self.instance,
            Dispatch::Static => &mut self.statics,
        }
    }

    pub(crate) fn contains(&self, dispatch: Dispatch, token: &Token) -> bool {
        self.table(dispatch).contains_key(token)
    }

    fn get(&self, dispatch: Dispatch, token: &Token) -> Option<&Behavior> {
        self.table(dispatch).get(token).map(|entry| &entry.body)
    }

    fn insert(
        &mut self,
        dispatch: Dispatch,
        token: Token,
        body: Behavior,
        installed_by: Option<ProtocolId>,
    ) -> Option<Entry> {
        self.table_mut(dispatch)
            .insert(token, Entry { body, installed_by })
    }
}

/// A member destined for a target's table.
pub(crate) struct Install {
    pub dispatch: Dispatch,
    pub token: Token,
    pub body: Behavior,
}

pub struct TargetType {
    key: TypeKey,
    name: String,
    tables: RwLock<MemberTables>,
    named: HashMap<String, (Dispatch, Behavior)>,
}

impl TargetType {
    /// A fresh type with empty tables.
    pub fn new(name: impl Into<String>) -> TargetHandle {
        Self::builder(name).build()
    }

    pub fn builder(name: impl Into<String>) -> TargetBuilder {
        TargetBuilder {
            key: None,
            name: name.into(),
            tables: MemberTables::default(),
            named: HashMap::new(),
        }
    }

    pub fn key(&self) -> &TypeKey {
        &self.key
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn has_member(&self, dispatch: Dispatch, token: &Token) -> bool {
        self.tables.read().contains(dispatch, token)
    }

    /// Legacy member exposed under a string name.
    pub fn named_member(&self, name: &str) -> Option<(Dispatch, Behavior)> {
        self.named.get(name).cloned()
    }

    pub fn member_count(&self) -> usize {
        let tables = self.tables.read();
        tables.instance.len() + tables.statics.len()
    }

    pub(crate) fn tables(&self) -> RwLockReadGuard<'_, MemberTables> {
        self.tables.read()
    }

    /// Insert every member under a single write lock, so readers observe
    /// either none or all of one implementation.
    ///
    /// Ad-hoc entries may be replaced; an entry installed for a protocol may
    /// not. On conflict nothing is inserted. Returns the number of ad-hoc
    /// entries replaced.
    pub(crate) fn install(
        &self,
        protocol: &ProtocolId,
        members: Vec<Install>,
    ) -> ProtocolResult<usize> {
        let mut tables = self.tables.write();
        let conflict = members.iter().find_map(|member| {
            tables
                .table(member.dispatch)
                .get(&member.token)
                .and_then(|entry| entry.installed_by.as_ref())
                .map(|owner| (member.token.clone(), owner.clone()))
        });
        if let Some((token, owner)) = conflict {
            return Err(ProtocolError::MemberConflict {
                target: self.key.clone(),
                token,
                owner,
            });
        }

        let mut replaced = 0;
        for member in members {
            let previous = tables.insert(
                member.dispatch,
                member.token,
                member.body,
                Some(protocol.clone()),
            );
            if previous.is_some() {
                replaced += 1;
            }
        }
        Ok(replaced)
    }
}

impl MemberTable for TargetType {
    fn resolve(&self, dispatch: Dispatch, token: &Token) -> Option<Behavior> {
        self.tables.read().get(dispatch, token).cloned()
    }
}

impl fmt::Debug for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self.tables.read();
        f.debug_struct("TargetType")
            .field("key", &self.key)
            .field("name", &self.name)
            .field("instance_members", &tables.instance.len())
            .field("static_members", &tables.statics.len())
            .field("named_members", &self.named.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builds a target, optionally with members that did not come through
/// `implement`, e.g. objects that predate a protocol but match its shape.
pub struct TargetBuilder {
    key: Option<TypeKey>,
    name: String,
    tables: MemberTables,
    named: HashMap<String, (Dispatch, Behavior)>,
}

impl TargetBuilder {
    pub fn key(mut self, key: TypeKey) -> Self {
        self.key = Some(key);
        self
    }

    pub fn instance_member(mut self, token: Token, body: Behavior) -> Self {
        self.tables.insert(Dispatch::Instance, token, body, None);
        self
    }

    pub fn static_member(mut self, token: Token, body: Behavior) -> Self {
        self.tables.insert(Dispatch::Static, token, body, None);
        self
    }

    pub fn named_member(mut self, name: impl Into<String>, dispatch: Dispatch, body: Behavior) -> Self {
        self.named.insert(name.into(), (dispatch, body));
        self
    }

    pub fn build(self) -> TargetHandle {
        Arc::new(TargetType {
            key: self.key.unwrap_or_default(),
            name: self.name,
            tables: RwLock::new(self.tables),
            named: self.named,
        })
    }
}
