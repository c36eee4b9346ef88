//! Per-package pass context and the analysis pipeline.
//!
//! One `PassContext` aggregates every side table produced while analyzing a
//! single package: observations, inferred guards, call sites, per-function
//! lock facts, candidate lists, and the lock-order graph. It is constructed
//! at the start of a package pass and dropped at the end; reuse across
//! packages is forbidden.

use crate::annotations::Annotations;
use crate::config::Config;
use crate::facts::FactStore;
use crate::lock_order::LockOrderGraph;
use crate::lock_state::{LockMode, LockRef};
use muguard_diagnostics::diagnostic::{
    sort_diagnostics, Diagnostic, DiagnosticBuilder, DiagnosticSource, Location, Severity,
};
use muguard_ir::ir::{Function, Package, Span};
use muguard_ir::types::TypeMap;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Uniquely identifies a struct field across the package.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FieldKey {
    pub struct_name: String,
    pub field_index: u32,
}

/// Identifies a mutex field across functions: the lock *class*, as opposed
/// to `LockRef` which is one lock *instance* within a function.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MutexFieldKey {
    pub struct_name: String,
    pub field_index: u32,
}

/// A mutex field held at a program point, with its mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeldMutexField {
    pub field_index: u32,
    pub mode: LockMode,
}

/// One recorded field access with its lock-state context.
/// `same_base_mutexes` lists mutex fields held on the same struct instance
/// at the time of the access.
#[derive(Debug, Clone)]
pub struct Observation {
    pub same_base_mutexes: Vec<HeldMutexField>,
    pub is_read: bool,
    pub func: String,
    pub span: Option<Span>,
}

/// The inferred guard for a field.
#[derive(Debug, Clone, Copy)]
pub struct GuardInfo {
    pub mutex_field_index: u32,
    /// True when any write observation occurred under the guard.
    pub needs_exclusive: bool,
}

/// Observation dedup key: field, source position, access kind. Blocks may
/// be re-walked during fixed-point iteration; this keeps one observation
/// per site.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObsKey {
    pub field: FieldKey,
    pub pos: PosKey,
    pub is_read: bool,
}

/// A sortable, hashable source position.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PosKey {
    pub file: String,
    pub line: u32,
    pub col: u32,
}

impl PosKey {
    pub fn from_span(span: &Option<Span>) -> Option<Self> {
        span.as_ref().map(|s| Self {
            file: s.file.clone(),
            line: s.start_line,
            col: s.start_col,
        })
    }
}

/// A static call with the normalized lock state at the call point.
#[derive(Debug, Clone)]
pub struct CallSiteRecord {
    pub caller: String,
    pub callee: String,
    pub span: Option<Span>,
    /// Struct type name → held mutex fields (index, mode) on any instance
    /// of that type.
    pub held_by_struct: BTreeMap<String, Vec<(u32, LockMode)>>,
    /// Receiver value ID in the caller, when the callee is a method.
    pub receiver: Option<u32>,
}

impl CallSiteRecord {
    /// True if the caller holds the given mutex class at this site.
    pub fn holds(&self, mfk: &MutexFieldKey) -> bool {
        self.held_by_struct
            .get(&mfk.struct_name)
            .is_some_and(|fields| fields.iter().any(|(fi, _)| *fi == mfk.field_index))
    }
}

/// Per-function lock fact sets.
#[derive(Debug, Clone, Default)]
pub struct FuncLockFacts {
    /// Locks callers must hold.
    pub requires: BTreeSet<MutexFieldKey>,
    /// Locks this function directly acquires.
    pub acquires: BTreeSet<MutexFieldKey>,
    /// Direct plus transitive acquisitions via callees.
    pub acquires_transitive: BTreeSet<MutexFieldKey>,
    /// Locks this function releases (directly or via scoped release).
    pub releases: BTreeSet<MutexFieldKey>,
    /// Locks held on every return path.
    pub returns_holding: BTreeSet<MutexFieldKey>,
}

/// Deferred unlock-of-unheld candidate; reported after requirement
/// propagation so suppression rules have complete information.
#[derive(Debug, Clone)]
pub struct UnlockCandidate {
    pub func: String,
    pub span: Option<Span>,
    pub lock_name: String,
    pub mfk: Option<MutexFieldKey>,
}

/// Deferred lock-leak candidate, keyed by return position so block
/// re-walks overwrite stale entries.
#[derive(Debug, Clone)]
pub struct LeakCandidate {
    pub func: String,
    pub ret_span: Option<Span>,
    pub lock: LockRef,
    pub lock_name: String,
    pub mfk: Option<MutexFieldKey>,
    pub acquired_at: Option<Span>,
}

/// State for a single package pass.
pub struct PassContext<'a> {
    pub pkg: &'a Package,
    pub config: &'a Config,
    pub types: TypeMap,
    pub func_index: HashMap<String, &'a Function>,
    pub store: Option<&'a dyn FactStore>,

    pub observations: BTreeMap<FieldKey, Vec<Observation>>,
    pub observed_at: HashSet<ObsKey>,
    pub guards: BTreeMap<FieldKey, GuardInfo>,
    /// Struct types whose guards came from imported facts; inference skips
    /// these.
    pub imported_guard_types: BTreeSet<String>,

    pub call_sites: Vec<CallSiteRecord>,
    pub func_facts: BTreeMap<String, FuncLockFacts>,
    /// Call-site index → receiver struct name, for method calls in
    /// constructor-like callers before the receiver is published.
    /// Requirements on that struct neither propagate nor report there.
    pub prepub_suppressed: HashMap<usize, String>,

    /// `None` means no entrypoints were detected: treat every function as
    /// concurrent.
    pub concurrent_funcs: Option<BTreeSet<String>>,

    pub annotations: Annotations,
    pub lock_order_graph: LockOrderGraph,

    pub unlock_candidates: Vec<UnlockCandidate>,
    pub leak_candidates: BTreeMap<PosKey, Vec<LeakCandidate>>,

    pub diagnostics: Vec<Diagnostic>,
}

impl<'a> PassContext<'a> {
    pub fn new(pkg: &'a Package, config: &'a Config, store: Option<&'a dyn FactStore>) -> Self {
        let func_index = pkg.functions.iter().map(|f| (f.name.clone(), f)).collect();
        Self {
            pkg,
            config,
            types: TypeMap::from_package(pkg),
            func_index,
            store,
            observations: BTreeMap::new(),
            observed_at: HashSet::new(),
            guards: BTreeMap::new(),
            imported_guard_types: BTreeSet::new(),
            call_sites: Vec::new(),
            func_facts: BTreeMap::new(),
            prepub_suppressed: HashMap::new(),
            concurrent_funcs: None,
            annotations: Annotations::default(),
            lock_order_graph: LockOrderGraph::new(),
            unlock_candidates: Vec::new(),
            leak_candidates: BTreeMap::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Run the full pipeline for one package.
    pub fn run(mut self) -> Vec<Diagnostic> {
        self.parse_annotations();
        self.collect_observations();
        self.import_facts();
        self.infer_guards();
        self.derive_initial_requirements();
        self.propagate_requirements();
        self.compute_concurrent_context();
        self.compute_returns_holding();
        self.check_violations();
        self.check_interprocedural_violations();
        self.check_acquire_helpers();
        self.report_lock_leaks();
        self.report_unlock_of_unheld();
        self.detect_and_report_lock_order_cycles();
        self.check_exported_guarded_fields();
        self.export_facts();
        self.finish()
    }

    /// Sort, deduplicate, and cap the collected diagnostics.
    fn finish(mut self) -> Vec<Diagnostic> {
        sort_diagnostics(&mut self.diagnostics);
        self.diagnostics
            .dedup_by(|a, b| a.rule == b.rule && a.location == b.location && a.message == b.message);
        let cap = self.config.muguard.max_diagnostics;
        if cap > 0 && self.diagnostics.len() > cap {
            self.diagnostics.truncate(cap);
        }
        self.diagnostics
    }

    pub fn get_or_create_func_facts(&mut self, func: &str) -> &mut FuncLockFacts {
        self.func_facts.entry(func.to_string()).or_default()
    }

    /// True if any recorded call site targets this function.
    pub fn has_callers(&self, func: &str) -> bool {
        self.call_sites.iter().any(|cs| cs.callee == func)
    }

    /// True if the function runs in a concurrent context. With no detected
    /// entrypoints, every function is concurrent.
    pub fn is_concurrent(&self, func: &str) -> bool {
        match &self.concurrent_funcs {
            None => true,
            Some(set) => set.contains(func),
        }
    }

    /// Emit a diagnostic unless the annotation overlay suppresses it.
    /// Reports without a source position are dropped.
    pub fn report(
        &mut self,
        rule: &str,
        severity: Severity,
        source: DiagnosticSource,
        func: &str,
        span: &Option<Span>,
        message: String,
    ) -> bool {
        let Some(loc) = location_of(span) else {
            return false;
        };
        if self.annotations.is_suppressed(func, span) {
            return false;
        }
        self.diagnostics.push(
            DiagnosticBuilder::new(rule, severity, message, source)
                .location(loc.file, loc.line, loc.column)
                .build(),
        );
        true
    }

    // ── name helpers ────────────────────────────────────────────

    /// Display name of a mutex class: `Registry.mu`. Returns `None` when
    /// the struct or field is unknown; such reports are dropped.
    pub fn mutex_field_display(&self, mfk: &MutexFieldKey) -> Option<String> {
        let st = self.types.by_name(&mfk.struct_name)?;
        let field = st.fields.get(mfk.field_index as usize)?;
        Some(format!("{}.{}", st.short_name(), field.name))
    }

    /// Display name of a guarded field: `Registry.count`.
    pub fn field_display(&self, key: &FieldKey) -> Option<String> {
        let st = self.types.by_name(&key.struct_name)?;
        let field = st.fields.get(key.field_index as usize)?;
        Some(format!("{}.{}", st.short_name(), field.name))
    }

    /// Unqualified function name for messages: `helper`, `Inc`.
    pub fn func_display(&self, func: &str) -> String {
        match self.func_index.get(func) {
            Some(f) if !f.short_name.is_empty() => f.short_name.clone(),
            _ => func
                .rsplit('.')
                .next()
                .unwrap_or(func)
                .trim_end_matches(')')
                .to_string(),
        }
    }
}

/// Convert an IR span to a diagnostic location.
pub fn location_of(span: &Option<Span>) -> Option<Location> {
    let s = span.as_ref()?;
    if s.start_line == 0 {
        return None;
    }
    Some(Location {
        file: s.file.clone(),
        line: s.start_line,
        column: s.start_col,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use muguard_ir::ir::{FieldDef, TypeKind, TypeRef};

    fn pkg_with_registry() -> Package {
        Package {
            import_path: "example.com/reg".into(),
            name: "reg".into(),
            types: vec![TypeRef {
                id: 1,
                kind: TypeKind::Struct,
                name: "example.com/reg.Registry".into(),
                fields: vec![
                    FieldDef {
                        name: "mu".into(),
                        type_name: "sync.Mutex".into(),
                        ..Default::default()
                    },
                    FieldDef {
                        name: "count".into(),
                        type_name: "int".into(),
                        ..Default::default()
                    },
                ],
                ..Default::default()
            }],
            functions: vec![Function {
                name: "(*example.com/reg.Registry).Inc".into(),
                short_name: "Inc".into(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_display_helpers() {
        let pkg = pkg_with_registry();
        let config = Config::default();
        let ctx = PassContext::new(&pkg, &config, None);

        let mfk = MutexFieldKey {
            struct_name: "example.com/reg.Registry".into(),
            field_index: 0,
        };
        assert_eq!(ctx.mutex_field_display(&mfk).unwrap(), "Registry.mu");

        let fk = FieldKey {
            struct_name: "example.com/reg.Registry".into(),
            field_index: 1,
        };
        assert_eq!(ctx.field_display(&fk).unwrap(), "Registry.count");

        let missing = MutexFieldKey {
            struct_name: "example.com/reg.Nope".into(),
            field_index: 0,
        };
        assert!(ctx.mutex_field_display(&missing).is_none());

        assert_eq!(ctx.func_display("(*example.com/reg.Registry).Inc"), "Inc");
        assert_eq!(ctx.func_display("example.com/other.helper"), "helper");
    }

    #[test]
    fn test_report_requires_position() {
        let pkg = pkg_with_registry();
        let config = Config::default();
        let mut ctx = PassContext::new(&pkg, &config, None);

        assert!(!ctx.report(
            "MU001",
            Severity::Warning,
            DiagnosticSource::Guard,
            "f",
            &None,
            "no position".into()
        ));
        assert!(ctx.report(
            "MU001",
            Severity::Warning,
            DiagnosticSource::Guard,
            "f",
            &Some(Span::new("a.go", 3, 1)),
            "positioned".into()
        ));
        assert_eq!(ctx.diagnostics.len(), 1);
    }

    #[test]
    fn test_call_site_holds() {
        let mut held = BTreeMap::new();
        held.insert(
            "example.com/reg.Registry".to_string(),
            vec![(0u32, LockMode::Exclusive)],
        );
        let cs = CallSiteRecord {
            caller: "a".into(),
            callee: "b".into(),
            span: None,
            held_by_struct: held,
            receiver: None,
        };
        assert!(cs.holds(&MutexFieldKey {
            struct_name: "example.com/reg.Registry".into(),
            field_index: 0,
        }));
        assert!(!cs.holds(&MutexFieldKey {
            struct_name: "example.com/reg.Registry".into(),
            field_index: 1,
        }));
        assert!(!cs.holds(&MutexFieldKey {
            struct_name: "example.com/reg.Other".into(),
            field_index: 0,
        }));
    }
}
