//! Coherence ledger: at most one implementation per (type, protocol), ever.
//!
//! Each key moves through `Unimplemented → Permitted → Installed`. The first
//! transition is a compare-and-set on a sharded map, so attempts on unrelated
//! keys never contend on a shared lock. A [`Permit`] that is dropped without
//! being committed removes its slot again, leaving no trace of the attempt.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use concord_core::{ProtocolError, ProtocolId, ProtocolResult, TypeKey};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::{debug, warn};

mod binding;

pub use binding::{Binding, BindingReport, LedgerReport};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub target: TypeKey,
    pub protocol: ProtocolId,
}

impl LedgerKey {
    pub fn new(target: &TypeKey, protocol: &ProtocolId) -> Self {
        Self {
            target: target.clone(),
            protocol: protocol.clone(),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Permitted { permit: u64 },
    Installed(Arc<Binding>),
}

#[derive(Debug, Default)]
pub struct CoherenceLedger {
    entries: DashMap<LedgerKey, Slot>,
    next_permit: AtomicU64,
}

impl CoherenceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the right to implement `protocol` on `target`.
    ///
    /// Fails with [`ProtocolError::AlreadyImplemented`] if the pair is
    /// installed or another attempt currently holds its permit.
    pub fn begin_implementation(
        &self,
        target: &TypeKey,
        protocol: &ProtocolId,
        protocol_name: &str,
    ) -> ProtocolResult<Permit<'_>> {
        match self.claim(LedgerKey::new(target, protocol)) {
            Ok(permit) => {
                debug!(
                    target_type = %target,
                    protocol = protocol_name,
                    permit = permit.id,
                    "permit granted"
                );
                Ok(permit)
            }
            Err(in_flight) => {
                warn!(
                    target_type = %target,
                    protocol = protocol_name,
                    in_flight,
                    "coherence violation rejected"
                );
                Err(ProtocolError::AlreadyImplemented {
                    target: target.clone(),
                    protocol: protocol_name.to_owned(),
                })
            }
        }
    }

    /// Claim the pair only if it is unimplemented and unclaimed. Unlike
    /// [`begin_implementation`](Self::begin_implementation), a taken pair is
    /// not treated as a violation.
    pub fn try_begin_implementation(
        &self,
        target: &TypeKey,
        protocol: &ProtocolId,
    ) -> Option<Permit<'_>> {
        self.claim(LedgerKey::new(target, protocol)).ok()
    }

    /// Compare-and-set `Unimplemented -> Permitted`. On failure, reports
    /// whether the slot is held by an in-flight permit.
    fn claim(&self, key: LedgerKey) -> Result<Permit<'_>, bool> {
        match self.entries.entry(key.clone()) {
            Entry::Occupied(occupied) => Err(matches!(occupied.get(), Slot::Permitted { .. })),
            Entry::Vacant(vacant) => {
                let id = self.next_permit.fetch_add(1, Ordering::Relaxed);
                vacant.insert(Slot::Permitted { permit: id });
                Ok(Permit {
                    ledger: self,
                    key,
                    id,
                    committed: false,
                })
            }
        }
    }

    /// Finalize a permit. Irreversible.
    pub fn commit(&self, permit: Permit<'_>, binding: Binding) -> Arc<Binding> {
        debug_assert!(std::ptr::eq(self, permit.ledger));
        permit.commit(binding)
    }

    /// Installed binding for the pair; in-flight permits are not visible.
    pub fn lookup(&self, target: &TypeKey, protocol: &ProtocolId) -> Option<Arc<Binding>> {
        let key = LedgerKey::new(target, protocol);
        self.entries.get(&key).and_then(|slot| match slot.value() {
            Slot::Installed(binding) => Some(binding.clone()),
            Slot::Permitted { .. } => None,
        })
    }

    pub fn is_installed(&self, target: &TypeKey, protocol: &ProtocolId) -> bool {
        self.lookup(target, protocol).is_some()
    }

    /// Every installed binding of `target`, ordered by installation time.
    pub fn installed_for(&self, target: &TypeKey) -> Vec<Arc<Binding>> {
        let mut bindings: Vec<_> = self
            .entries
            .iter()
            .filter(|entry| entry.key().target == *target)
            .filter_map(|entry| match entry.value() {
                Slot::Installed(binding) => Some(binding.clone()),
                Slot::Permitted { .. } => None,
            })
            .collect();
        bindings.sort_by(|a, b| a.installed_at.cmp(&b.installed_at));
        bindings
    }

    /// Number of installed bindings.
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| matches!(entry.value(), Slot::Installed(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn report(&self) -> LedgerReport {
        let mut installed: Vec<_> = self
            .entries
            .iter()
            .filter_map(|entry| match entry.value() {
                Slot::Installed(binding) => Some(binding.report()),
                Slot::Permitted { .. } => None,
            })
            .collect();
        installed.sort_by(|a, b| {
            a.target
                .cmp(&b.target)
                .then_with(|| a.installed_at.cmp(&b.installed_at))
        });
        LedgerReport {
            generated_at: Utc::now(),
            installed,
        }
    }
}

/// Exclusive, transient right to install one (type, protocol) pair.
#[derive(Debug)]
#[must_use = "dropping a permit releases the pair"]
pub struct Permit<'a> {
    ledger: &'a CoherenceLedger,
    key: LedgerKey,
    id: u64,
    committed: bool,
}

impl Permit<'_> {
    pub fn key(&self) -> &LedgerKey {
        &self.key
    }

    /// Turn the permitted slot into an installed one.
    pub fn commit(mut self, binding: Binding) -> Arc<Binding> {
        debug_assert_eq!(binding.target, self.key.target);
        debug_assert_eq!(binding.protocol, self.key.protocol);
        let binding = Arc::new(binding);
        if let Some(mut slot) = self.ledger.entries.get_mut(&self.key) {
            *slot = Slot::Installed(binding.clone());
        }
        self.committed = true;
        debug!(
            target_type = %self.key.target,
            protocol = %binding.protocol_name,
            permit = self.id,
            "binding committed"
        );
        binding
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let id = self.id;
        self.ledger
            .entries
            .remove_if(&self.key, |_, slot| matches!(slot, Slot::Permitted { permit } if *permit == id));
        debug!(target_type = %self.key.target, permit = id, "permit released");
    }
}
