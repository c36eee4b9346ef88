//! CFG walker.
//!
//! Walks each function's basic blocks depth-first carrying a `LockState`
//! down every edge, with entry-state memoization so loops converge and
//! branch merges get a conservative meet. Along the way it records field
//! observations, call sites, lock-order edges, leak and unlock candidates,
//! and the intra-function lock diagnostics.

use crate::config::Config;
use crate::context::{
    CallSiteRecord, FieldKey, HeldMutexField, LeakCandidate, MutexFieldKey, ObsKey, Observation,
    PassContext, PosKey, UnlockCandidate,
};
use crate::lock_order::LockOrderEdge;
use crate::lock_state::{LockMode, LockRef, LockState};
use crate::resolver::Resolver;
use muguard_diagnostics::diagnostic::{DiagnosticSource, Severity};
use muguard_ir::cfg::Cfg;
use muguard_ir::ir::{Function, Instruction, Span, ValueKind};
use muguard_ir::types::TypeMap;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A diagnostic produced during the walk, emitted through the context's
/// suppression overlay once the function is done.
struct PendingDiag {
    rule: &'static str,
    severity: Severity,
    span: Option<Span>,
    message: String,
}

/// Everything one function walk produces.
#[derive(Default)]
struct WalkOutput {
    observations: Vec<(FieldKey, Observation)>,
    call_sites: Vec<CallSiteRecord>,
    acquires: Vec<MutexFieldKey>,
    releases: Vec<MutexFieldKey>,
    lock_edges: Vec<LockOrderEdge>,
    unlock_candidates: Vec<UnlockCandidate>,
    leak_candidates: BTreeMap<PosKey, Vec<LeakCandidate>>,
    diags: Vec<PendingDiag>,
}

struct FunctionWalker<'w> {
    func: &'w Function,
    cfg: Cfg<'w>,
    resolver: Resolver<'w>,
    config: &'w Config,
    local_funcs: &'w HashMap<String, &'w Function>,
    entry_states: HashMap<u32, LockState>,
    inconsistent_reported: HashSet<u32>,
    out: WalkOutput,
}

impl<'a> PassContext<'a> {
    /// Walk every source function, accumulating observations and facts.
    pub fn collect_observations(&mut self) {
        let pkg = self.pkg;
        for func in &pkg.functions {
            if func.blocks.is_empty() {
                continue;
            }
            let out = {
                let walker = FunctionWalker::new(
                    func,
                    &self.types,
                    self.config,
                    &self.func_index,
                );
                walker.walk()
            };
            self.merge_walk_output(func, out);
        }
    }

    fn merge_walk_output(&mut self, func: &Function, out: WalkOutput) {
        for (key, obs) in out.observations {
            let Some(pos) = PosKey::from_span(&obs.span) else {
                continue;
            };
            let obs_key = ObsKey {
                field: key.clone(),
                pos,
                is_read: obs.is_read,
            };
            if self.observed_at.insert(obs_key) {
                self.observations.entry(key).or_default().push(obs);
            }
        }

        self.call_sites.extend(out.call_sites);

        {
            let facts = self.get_or_create_func_facts(&func.name);
            facts.acquires.extend(out.acquires);
            facts.releases.extend(out.releases);
        }

        for edge in out.lock_edges {
            self.lock_order_graph.add_edge(edge);
        }
        self.unlock_candidates.extend(out.unlock_candidates);
        for (pos, candidates) in out.leak_candidates {
            self.leak_candidates.insert(pos, candidates);
        }

        for diag in out.diags {
            self.report(
                diag.rule,
                diag.severity,
                DiagnosticSource::Walker,
                &func.name,
                &diag.span,
                diag.message,
            );
        }
    }
}

impl<'w> FunctionWalker<'w> {
    fn new(
        func: &'w Function,
        types: &'w TypeMap,
        config: &'w Config,
        local_funcs: &'w HashMap<String, &'w Function>,
    ) -> Self {
        Self {
            func,
            cfg: Cfg::from_function(func),
            resolver: Resolver::new(func, types, &config.mutex),
            config,
            local_funcs,
            entry_states: HashMap::new(),
            inconsistent_reported: HashSet::new(),
            out: WalkOutput::default(),
        }
    }

    fn walk(mut self) -> WalkOutput {
        if self.cfg.entry_block().is_some() {
            self.walk_block(0, None, LockState::new());
        }
        self.out
    }

    fn walk_block(&mut self, block_id: u32, from: Option<u32>, state: LockState) {
        let mut ls = state;
        if let Some(prev) = self.entry_states.get(&block_id).cloned() {
            if ls.equal_held(&prev) {
                return; // loop with compatible state
            }
            let merged = prev.meet(&ls);
            let is_merge = from.is_some_and(|f| {
                self.cfg.predecessors(block_id).len() > 1 && !self.cfg.is_back_edge(f, block_id)
            });
            if is_merge && !self.inconsistent_reported.contains(&block_id) {
                self.report_inconsistent_state(block_id, &prev, &ls);
                self.inconsistent_reported.insert(block_id);
            }
            if merged.equal_held(&prev) {
                return; // converged
            }
            self.entry_states.insert(block_id, merged.fork());
            ls = merged;
        } else {
            self.entry_states.insert(block_id, ls.fork());
        }

        if let Some(block) = self.cfg.block(block_id) {
            for instr in &block.instructions {
                self.process_instruction(instr, &mut ls);
            }
        }

        let succs: Vec<u32> = self.cfg.successors(block_id).to_vec();
        for succ in succs {
            self.walk_block(succ, Some(block_id), ls.fork());
        }
    }

    fn process_instruction(&mut self, instr: &'w Instruction, ls: &mut LockState) {
        match instr.kind {
            ValueKind::Call => self.process_call(instr, ls),
            ValueKind::Defer => self.process_defer(instr, ls),
            ValueKind::Return => self.process_return(instr, ls),
            ValueKind::Store => self.process_store(instr, ls),
            ValueKind::Load => self.process_load(instr, ls),
            _ => {}
        }
    }

    // ── calls ───────────────────────────────────────────────────

    fn process_call(&mut self, call: &Instruction, ls: &mut LockState) {
        let Some(method) = call.callee_method_name().map(str::to_string) else {
            return;
        };

        if call.callee_is_interface {
            // Interface dispatch is opaque unless the receiver itself
            // resolves to a recognized mutex.
            if self.config.mutex.is_lock_method(&method) {
                if let Some(&recv) = call.operands.first() {
                    if let Some(lock) = self.resolver.resolve_lock_ref(recv) {
                        self.handle_lock_op(&lock, &method, &call.span, ls);
                    }
                }
            }
            return;
        }

        if self.config.mutex.is_lock_method(&method) {
            if let Some(&recv) = call.operands.first() {
                let lock = self
                    .resolver
                    .resolve_lock_ref(recv)
                    .or_else(|| self.resolver.resolve_embedded_mutex(recv, &method));
                if let Some(lock) = lock {
                    if self.resolver.mode_valid_for(&lock, &method) {
                        self.handle_lock_op(&lock, &method, &call.span, ls);
                    }
                }
            }
            // Lock-method calls never become call sites, resolved or not.
            return;
        }

        // Non-lock static call: record a call site for interprocedural
        // propagation.
        let Some(callee) = call.callee.clone() else {
            return;
        };
        let receiver = self
            .callee_is_method(&callee)
            .then(|| call.operands.first().copied())
            .flatten();
        self.out.call_sites.push(CallSiteRecord {
            caller: self.func.name.clone(),
            callee,
            span: call.span.clone(),
            held_by_struct: self.normalize_lock_state(ls),
            receiver,
        });
    }

    fn callee_is_method(&self, callee: &str) -> bool {
        if let Some(func) = self.local_funcs.get(callee) {
            return func.is_method;
        }
        // External callees: method names carry a receiver, `(*T).M`.
        callee.starts_with('(')
    }

    /// Struct type name → held mutex fields, for call-site records.
    fn normalize_lock_state(&self, ls: &LockState) -> BTreeMap<String, Vec<(u32, LockMode)>> {
        let mut result: BTreeMap<String, Vec<(u32, LockMode)>> = BTreeMap::new();
        for hl in ls.held() {
            let Some(name) = self.resolver.struct_name_of_value(hl.lock.base) else {
                continue;
            };
            result.entry(name).or_default().push((hl.lock.field_index, hl.mode));
        }
        result
    }

    fn handle_lock_op(&mut self, lock: &LockRef, method: &str, span: &Option<Span>, ls: &mut LockState) {
        if self.config.mutex.is_acquire(method) {
            let exclusive = self.config.mutex.is_exclusive_method(method);
            self.check_and_record_acquire(lock, exclusive, span, ls);
        } else {
            let exclusive = self.config.mutex.is_exclusive_method(method);
            self.check_and_record_release(lock, exclusive, span, ls);
        }
    }

    fn check_and_record_acquire(
        &mut self,
        lock: &LockRef,
        exclusive: bool,
        span: &Option<Span>,
        ls: &mut LockState,
    ) {
        if let Some(existing) = ls.get(lock) {
            let name = self.lock_display(lock);
            let held_exclusive = existing.mode == LockMode::Exclusive;
            match (exclusive, held_exclusive) {
                (true, true) | (false, true) => self.pending(
                    "MU003",
                    Severity::Error,
                    span,
                    format!("{name} is already held when locking {name}"),
                ),
                (false, false) => self.pending(
                    "MU004",
                    Severity::Warning,
                    span,
                    format!("recursive RLock on {name} — can deadlock if a writer is waiting"),
                ),
                (true, false) => self.pending(
                    "MU005",
                    Severity::Error,
                    span,
                    format!("{name}.Lock() called while {name} is read-locked — lock upgrade can deadlock"),
                ),
            }
        }

        // Lock-order edges: each already-held lock precedes the acquired
        // one. The same instance is a double-lock, not an ordering issue.
        if let Some(acquired_key) = self.resolver.mutex_field_key(lock) {
            let held_refs: Vec<LockRef> = ls.held().map(|hl| hl.lock).collect();
            for held in held_refs {
                if held == *lock {
                    continue;
                }
                let Some(held_key) = self.resolver.mutex_field_key(&held) else {
                    continue;
                };
                self.out.lock_edges.push(LockOrderEdge {
                    from: held_key,
                    to: acquired_key.clone(),
                    span: span.clone(),
                    func: self.func.name.clone(),
                });
            }
            self.out.acquires.push(acquired_key);
        }

        let mode = if exclusive {
            LockMode::Exclusive
        } else {
            LockMode::Shared
        };
        ls.acquire(*lock, mode, span.clone());
    }

    fn check_and_record_release(
        &mut self,
        lock: &LockRef,
        exclusive_unlock: bool,
        span: &Option<Span>,
        ls: &mut LockState,
    ) {
        if let Some(existing) = ls.get(lock) {
            self.check_release_mode(lock, existing.mode, exclusive_unlock, span);
        } else {
            // Deferred to reporting so Requires facts can suppress.
            self.out.unlock_candidates.push(UnlockCandidate {
                func: self.func.name.clone(),
                span: span.clone(),
                lock_name: self.lock_display(lock),
                mfk: self.resolver.mutex_field_key(lock),
            });
        }
        ls.release(lock);

        if let Some(mfk) = self.resolver.mutex_field_key(lock) {
            self.out.releases.push(mfk);
        }
    }

    fn check_release_mode(
        &mut self,
        lock: &LockRef,
        held_mode: LockMode,
        exclusive_unlock: bool,
        span: &Option<Span>,
    ) {
        let name = self.lock_display(lock);
        match (held_mode, exclusive_unlock) {
            (LockMode::Exclusive, false) => self.pending(
                "MU006",
                Severity::Error,
                span,
                format!("{name} is exclusively locked but RUnlock() was called — use Unlock()"),
            ),
            (LockMode::Shared, true) => self.pending(
                "MU006",
                Severity::Error,
                span,
                format!("{name} is read-locked but Unlock() was called — use RUnlock()"),
            ),
            _ => {}
        }
    }

    // ── scoped releases ─────────────────────────────────────────

    /// Scoped releases run at return, so the lock state is not mutated
    /// here: a deferred unlock keeps the body's accesses correctly seen as
    /// locked, and a deferred acquire never protects the body at all.
    fn process_defer(&mut self, d: &Instruction, ls: &mut LockState) {
        let Some((lock, method)) = self.resolve_deferred_lock(d) else {
            return;
        };

        if self.config.mutex.is_acquire(&method) {
            let field = self
                .resolver
                .lock_field_name(&lock)
                .unwrap_or_else(|| "mutex".into());
            let release = if self.config.mutex.is_exclusive_method(&method) {
                &self.config.mutex.unlock_method
            } else {
                &self.config.mutex.runlock_method
            };
            self.pending(
                "MU013",
                Severity::Error,
                &d.span,
                format!(
                    "defer {field}.{method}() will deadlock — did you mean defer {field}.{release}()?"
                ),
            );
            return;
        }

        if let Some(existing) = ls.get(&lock) {
            let mode = existing.mode;
            self.check_release_mode(
                &lock,
                mode,
                self.config.mutex.is_exclusive_method(&method),
                &d.span,
            );
        }

        ls.defer_release(lock);
        if let Some(mfk) = self.resolver.mutex_field_key(&lock) {
            self.out.releases.push(mfk);
        }
    }

    fn resolve_deferred_lock(&self, d: &Instruction) -> Option<(LockRef, String)> {
        let method = d.callee_method_name()?.to_string();
        if !self.config.mutex.is_lock_method(&method) {
            return None;
        }
        let &recv = d.operands.first()?;
        let lock = self
            .resolver
            .resolve_lock_ref(recv)
            .or_else(|| self.resolver.resolve_embedded_mutex(recv, &method))?;
        Some((lock, method))
    }

    // ── returns ─────────────────────────────────────────────────

    /// Collect leak candidates: every held lock without a deferred-unlock
    /// marker on this path. Keyed by return position so re-walks overwrite
    /// stale entries.
    fn process_return(&mut self, ret: &Instruction, ls: &mut LockState) {
        let Some(pos) = PosKey::from_span(&ret.span) else {
            return;
        };
        self.out.leak_candidates.remove(&pos);

        let mut candidates = Vec::new();
        for hl in ls.held() {
            if ls.has_deferred_unlock(&hl.lock) {
                continue;
            }
            candidates.push(LeakCandidate {
                func: self.func.name.clone(),
                ret_span: ret.span.clone(),
                lock: hl.lock,
                lock_name: self.lock_display(&hl.lock),
                mfk: self.resolver.mutex_field_key(&hl.lock),
                acquired_at: hl.acquired_at.clone(),
            });
        }
        if !candidates.is_empty() {
            self.out.leak_candidates.insert(pos, candidates);
        }
    }

    // ── field accesses ──────────────────────────────────────────

    fn process_store(&mut self, store: &Instruction, ls: &mut LockState) {
        let Some(&addr) = store.operands.first() else {
            return;
        };
        self.record_access(addr, false, &store.span, ls);
    }

    fn process_load(&mut self, load: &Instruction, ls: &mut LockState) {
        let Some(&addr) = load.operands.first() else {
            return;
        };
        self.record_access(addr, true, &load.span, ls);
    }

    fn record_access(&mut self, addr: u32, is_read: bool, span: &Option<Span>, ls: &LockState) {
        let Some(access) = self.resolver.resolve_field_access(addr) else {
            return;
        };
        self.push_observation(
            FieldKey {
                struct_name: access.struct_name,
                field_index: access.field_index,
            },
            access.base,
            is_read,
            span,
            ls,
        );

        // Value-typed nested fields produce one address chain with no
        // intermediate loads; the ancestors are accessed too.
        if let Some(fa) = self.resolver.as_field_addr(addr) {
            self.record_ancestor_accesses(fa, is_read, span, ls);
        }
    }

    fn record_ancestor_accesses(
        &mut self,
        primary: &Instruction,
        is_read: bool,
        span: &Option<Span>,
        ls: &LockState,
    ) {
        let mut seen = HashSet::new();
        let mut current = match primary.operands.first() {
            Some(&base) => base,
            None => return,
        };
        while seen.insert(current) {
            let Some(ancestor) = self.resolver.as_field_addr(current) else {
                break;
            };
            let Some(access) = self.resolver.resolve_field_access(ancestor.id) else {
                break;
            };
            self.push_observation(
                FieldKey {
                    struct_name: access.struct_name,
                    field_index: access.field_index,
                },
                access.base,
                is_read,
                span,
                ls,
            );
            current = match ancestor.operands.first() {
                Some(&base) => base,
                None => break,
            };
        }
    }

    fn push_observation(
        &mut self,
        key: FieldKey,
        base: u32,
        is_read: bool,
        span: &Option<Span>,
        ls: &LockState,
    ) {
        let obs = Observation {
            same_base_mutexes: same_base_mutex_fields(base, ls),
            is_read,
            func: self.func.name.clone(),
            span: span.clone(),
        };
        self.out.observations.push((key, obs));
    }

    // ── merges ──────────────────────────────────────────────────

    fn report_inconsistent_state(&mut self, block_id: u32, a: &LockState, b: &LockState) {
        let span = self.block_span(block_id);
        if span.is_none() {
            return;
        }
        let (only_a, only_b) = a.diff(b);
        let mut reported = HashSet::new();
        for lock in only_a.into_iter().chain(only_b) {
            if !reported.insert(lock) {
                continue;
            }
            let name = self.lock_display(&lock);
            self.pending(
                "MU012",
                Severity::Warning,
                &span,
                format!("inconsistent lock state: {name} is held on one branch but not the other"),
            );
        }
    }

    /// Position of the first non-phi instruction with a valid span.
    fn block_span(&self, block_id: u32) -> Option<Span> {
        let block = self.cfg.block(block_id)?;
        block
            .instructions
            .iter()
            .find(|i| i.kind != ValueKind::Phi && i.span.is_some())
            .and_then(|i| i.span.clone())
    }

    fn lock_display(&self, lock: &LockRef) -> String {
        self.resolver
            .lock_display(lock)
            .unwrap_or_else(|| "mutex".into())
    }

    fn pending(&mut self, rule: &'static str, severity: Severity, span: &Option<Span>, message: String) {
        self.out.diags.push(PendingDiag {
            rule,
            severity,
            span: span.clone(),
            message,
        });
    }
}

/// Held mutex fields whose base matches the accessed struct instance,
/// with their modes, in deterministic order.
fn same_base_mutex_fields(base: u32, ls: &LockState) -> Vec<HeldMutexField> {
    ls.held()
        .filter(|hl| hl.lock.base == base)
        .map(|hl| HeldMutexField {
            field_index: hl.lock.field_index,
            mode: hl.mode,
        })
        .collect()
}
