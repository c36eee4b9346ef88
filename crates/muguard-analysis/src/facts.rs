//! Cross-package fact bridge.
//!
//! Guards, function lock facts, and concurrent-entry markers flow between
//! packages through a `FactStore` supplied by the driver. Payloads are
//! serde-serializable; the wire encoding belongs to the store. When the
//! driver registers no fact kinds (single-package test mode), the bridge
//! is skipped entirely.

use crate::context::{GuardInfo, MutexFieldKey, PassContext};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Mutex;

/// The three fact kinds a driver can register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactKind {
    FieldGuard,
    FuncLock,
    Concurrent,
}

/// A serializable reference to a mutex field.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MutexRef {
    pub pkg_path: String,
    pub type_name: String,
    pub field_index: u32,
}

/// Attached to an exported struct type: field index → guarding mutex
/// field index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGuardFact {
    pub guards: BTreeMap<u32, u32>,
}

impl std::fmt::Display for FieldGuardFact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .guards
            .iter()
            .map(|(field, mutex)| format!("{field}->{mutex}"))
            .collect();
        write!(f, "FieldGuardFact{{{}}}", parts.join(" "))
    }
}

/// Attached to an exported function: its lock fact sets as sorted refs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncLockFact {
    pub requires: Vec<MutexRef>,
    pub acquires: Vec<MutexRef>,
    pub acquires_transitive: Vec<MutexRef>,
    pub returns_holding: Vec<MutexRef>,
}

impl FuncLockFact {
    pub fn is_empty(&self) -> bool {
        self.requires.is_empty()
            && self.acquires.is_empty()
            && self.acquires_transitive.is_empty()
            && self.returns_holding.is_empty()
    }
}

impl std::fmt::Display for FuncLockFact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let fmt_refs = |refs: &[MutexRef]| -> String {
            let parts: Vec<String> = refs
                .iter()
                .map(|r| format!("{}.{}", r.type_name, r.field_index))
                .collect();
            format!("[{}]", parts.join(" "))
        };
        write!(
            f,
            "FuncLockFact{{requires={} acquires={}}}",
            fmt_refs(&self.requires),
            fmt_refs(&self.acquires)
        )
    }
}

/// Driver-supplied fact persistence, keyed by exported entity.
pub trait FactStore {
    /// Registered fact kinds; an empty list disables the bridge.
    fn registered_kinds(&self) -> Vec<FactKind>;

    fn import_field_guards(&self, pkg_path: &str, type_name: &str) -> Option<FieldGuardFact>;
    fn import_func_lock(&self, func: &str) -> Option<FuncLockFact>;
    fn import_concurrent(&self, func: &str) -> bool;

    fn export_field_guards(&self, pkg_path: &str, type_name: &str, fact: FieldGuardFact);
    fn export_func_lock(&self, func: &str, fact: FuncLockFact);
    fn export_concurrent(&self, func: &str);
}

/// In-memory store for tests and single-process drivers. Payloads are
/// kept JSON-encoded so the analyzer never depends on the concrete shape.
#[derive(Default)]
pub struct MemoryFactStore {
    inner: Mutex<MemoryFacts>,
}

#[derive(Default)]
struct MemoryFacts {
    field_guards: HashMap<(String, String), serde_json::Value>,
    func_locks: HashMap<String, serde_json::Value>,
    concurrent: BTreeSet<String>,
}

impl MemoryFactStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn facts(&self) -> std::sync::MutexGuard<'_, MemoryFacts> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl FactStore for MemoryFactStore {
    fn registered_kinds(&self) -> Vec<FactKind> {
        vec![FactKind::FieldGuard, FactKind::FuncLock, FactKind::Concurrent]
    }

    fn import_field_guards(&self, pkg_path: &str, type_name: &str) -> Option<FieldGuardFact> {
        let facts = self.facts();
        let value = facts
            .field_guards
            .get(&(pkg_path.to_string(), type_name.to_string()))?;
        serde_json::from_value(value.clone()).ok()
    }

    fn import_func_lock(&self, func: &str) -> Option<FuncLockFact> {
        let facts = self.facts();
        let value = facts.func_locks.get(func)?;
        serde_json::from_value(value.clone()).ok()
    }

    fn import_concurrent(&self, func: &str) -> bool {
        self.facts().concurrent.contains(func)
    }

    fn export_field_guards(&self, pkg_path: &str, type_name: &str, fact: FieldGuardFact) {
        if let Ok(value) = serde_json::to_value(&fact) {
            self.facts()
                .field_guards
                .insert((pkg_path.to_string(), type_name.to_string()), value);
        }
    }

    fn export_func_lock(&self, func: &str, fact: FuncLockFact) {
        if let Ok(value) = serde_json::to_value(&fact) {
            self.facts().func_locks.insert(func.to_string(), value);
        }
    }

    fn export_concurrent(&self, func: &str) {
        self.facts().concurrent.insert(func.to_string());
    }
}

/// Split a qualified type name into (package path, type name).
fn split_qualified(name: &str) -> (String, String) {
    match name.rsplit_once('.') {
        Some((pkg, ty)) => (pkg.to_string(), ty.to_string()),
        None => (String::new(), name.to_string()),
    }
}

impl<'a> PassContext<'a> {
    fn bridge_enabled(&self) -> bool {
        self.store
            .is_some_and(|s| !s.registered_kinds().is_empty())
    }

    fn mfk_to_ref(&self, mfk: &MutexFieldKey) -> MutexRef {
        let (pkg_path, type_name) = split_qualified(&mfk.struct_name);
        MutexRef {
            pkg_path,
            type_name,
            field_index: mfk.field_index,
        }
    }

    /// Resolve a serialized ref back to a key, validating against the
    /// type information we actually have. Unknown types or out-of-range
    /// indices drop the ref.
    fn ref_to_mfk(&self, r: &MutexRef) -> Option<MutexFieldKey> {
        let struct_name = if r.pkg_path.is_empty() {
            r.type_name.clone()
        } else {
            format!("{}.{}", r.pkg_path, r.type_name)
        };
        let st = self.types.by_name(&struct_name)?;
        if r.field_index as usize >= st.fields.len() {
            tracing::warn!(
                %struct_name,
                field_index = r.field_index,
                "imported fact references an out-of-range field; dropping"
            );
            return None;
        }
        Some(MutexFieldKey {
            struct_name,
            field_index: r.field_index,
        })
    }

    /// Import upstream facts for imported types and callees. Runs after
    /// the walk (observations and call sites exist) and before inference.
    pub fn import_facts(&mut self) {
        if !self.bridge_enabled() {
            return;
        }
        self.import_field_guard_facts();
        self.import_func_lock_facts();
        self.import_concurrent_facts();
    }

    fn import_field_guard_facts(&mut self) {
        let store = match self.store {
            Some(s) => s,
            None => return,
        };
        let mut seen = BTreeSet::new();
        let observed_types: Vec<String> = self
            .observations
            .keys()
            .map(|k| k.struct_name.clone())
            .collect();

        for struct_name in observed_types {
            if self.pkg.defines(&struct_name) || !seen.insert(struct_name.clone()) {
                continue;
            }
            let (pkg_path, type_name) = split_qualified(&struct_name);
            let Some(fact) = store.import_field_guards(&pkg_path, &type_name) else {
                continue;
            };
            for (field_index, mutex_field_index) in fact.guards {
                self.guards.insert(
                    crate::context::FieldKey {
                        struct_name: struct_name.clone(),
                        field_index,
                    },
                    GuardInfo {
                        mutex_field_index,
                        needs_exclusive: false,
                    },
                );
            }
            self.imported_guard_types.insert(struct_name);
        }
    }

    fn import_func_lock_facts(&mut self) {
        let store = match self.store {
            Some(s) => s,
            None => return,
        };
        let mut seen = BTreeSet::new();
        let callees: Vec<String> = self.call_sites.iter().map(|cs| cs.callee.clone()).collect();

        for callee in callees {
            if self.func_index.contains_key(&callee) || !seen.insert(callee.clone()) {
                continue;
            }
            let Some(fact) = store.import_func_lock(&callee) else {
                continue;
            };

            let requires: Vec<MutexFieldKey> =
                fact.requires.iter().filter_map(|r| self.ref_to_mfk(r)).collect();
            let acquires: Vec<MutexFieldKey> =
                fact.acquires.iter().filter_map(|r| self.ref_to_mfk(r)).collect();
            let transitive: Vec<MutexFieldKey> = fact
                .acquires_transitive
                .iter()
                .filter_map(|r| self.ref_to_mfk(r))
                .collect();
            let returns_holding: Vec<MutexFieldKey> = fact
                .returns_holding
                .iter()
                .filter_map(|r| self.ref_to_mfk(r))
                .collect();

            let facts = self.get_or_create_func_facts(&callee);
            facts.requires.extend(requires);
            facts.acquires.extend(acquires);
            facts.acquires_transitive.extend(transitive);
            facts.returns_holding.extend(returns_holding);
        }
    }

    fn import_concurrent_facts(&mut self) {
        let store = match self.store {
            Some(s) => s,
            None => return,
        };
        let mut seen = BTreeSet::new();
        let callees: Vec<String> = self.call_sites.iter().map(|cs| cs.callee.clone()).collect();

        for callee in callees {
            if self.func_index.contains_key(&callee) || !seen.insert(callee.clone()) {
                continue;
            }
            if store.import_concurrent(&callee) {
                self.annotations.concurrent.insert(callee);
            }
        }
    }

    /// Export facts for entities defined and exported by this package.
    pub fn export_facts(&mut self) {
        if !self.bridge_enabled() {
            return;
        }
        self.export_field_guard_facts();
        self.export_func_lock_facts();
        self.export_concurrent_facts();
    }

    fn export_field_guard_facts(&self) {
        let Some(store) = self.store else {
            return;
        };
        let mut by_type: BTreeMap<String, BTreeMap<u32, u32>> = BTreeMap::new();
        for (key, guard) in &self.guards {
            if !self.pkg.defines(&key.struct_name) {
                continue;
            }
            let Some(st) = self.types.by_name(&key.struct_name) else {
                continue;
            };
            if !st.is_exported() {
                continue;
            }
            by_type
                .entry(key.struct_name.clone())
                .or_default()
                .insert(key.field_index, guard.mutex_field_index);
        }

        for (struct_name, guards) in by_type {
            let (pkg_path, type_name) = split_qualified(&struct_name);
            store.export_field_guards(&pkg_path, &type_name, FieldGuardFact { guards });
        }
    }

    fn export_func_lock_facts(&self) {
        let Some(store) = self.store else {
            return;
        };
        for (func, facts) in &self.func_facts {
            let Some(f) = self.func_index.get(func) else {
                continue;
            };
            if !f.is_exported {
                continue;
            }
            let to_refs = |set: &BTreeSet<MutexFieldKey>| -> Vec<MutexRef> {
                let mut refs: Vec<MutexRef> = set.iter().map(|m| self.mfk_to_ref(m)).collect();
                refs.sort();
                refs
            };
            let fact = FuncLockFact {
                requires: to_refs(&facts.requires),
                acquires: to_refs(&facts.acquires),
                acquires_transitive: to_refs(&facts.acquires_transitive),
                returns_holding: to_refs(&facts.returns_holding),
            };
            if fact.is_empty() {
                continue;
            }
            store.export_func_lock(func, fact);
        }
    }

    fn export_concurrent_facts(&self) {
        let Some(store) = self.store else {
            return;
        };
        for func in self.detect_concurrent_entrypoints() {
            let Some(f) = self.func_index.get(&func) else {
                continue;
            };
            if f.is_exported {
                store.export_concurrent(&func);
            }
        }
    }
}
