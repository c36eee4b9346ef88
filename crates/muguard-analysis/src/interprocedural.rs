//! Interprocedural propagation.
//!
//! Seeds per-function lock requirements from guard-missing observations,
//! propagates them bottom-up through the recorded call sites to a fixed
//! point, closes transitive acquisitions downward, and feeds
//! caller-held × callee-acquired pairs into the lock-order graph.

use crate::context::{MutexFieldKey, PassContext};
use crate::lock_order::LockOrderEdge;
use crate::resolver::Resolver;
use muguard_ir::ir::{Function, Span, ValueKind};
use std::collections::HashMap;

/// Safety cap for the fixed points. Requirements and transitive acquires
/// grow monotonically within finite sets bounded by functions × mutex
/// fields, so this only guards pathological inputs.
const MAX_FIXED_POINT_ITERATIONS: usize = 1000;

impl<'a> PassContext<'a> {
    /// Derive initial requirements: a function that accesses a guarded
    /// field without the guard held needs its callers to hold that lock,
    /// unless it is constructor-like for the struct.
    pub fn derive_initial_requirements(&mut self) {
        let mut seeds: Vec<(String, MutexFieldKey)> = Vec::new();
        for (key, guard) in &self.guards {
            let Some(observations) = self.observations.get(key) else {
                continue;
            };
            for obs in observations {
                if self.is_constructor_like(&obs.func, &key.struct_name) {
                    continue;
                }
                let held = obs
                    .same_base_mutexes
                    .iter()
                    .any(|h| h.field_index == guard.mutex_field_index);
                if !held {
                    seeds.push((
                        obs.func.clone(),
                        MutexFieldKey {
                            struct_name: key.struct_name.clone(),
                            field_index: guard.mutex_field_index,
                        },
                    ));
                }
            }
        }
        for (func, mfk) in seeds {
            self.get_or_create_func_facts(&func).requires.insert(mfk);
        }
    }

    /// Run both fixed points and record interprocedural lock-order edges.
    pub fn propagate_requirements(&mut self) {
        let callee_to_sites = self.index_call_sites_by_callee();
        self.prepub_suppressed = self.compute_prepublication_suppressions();

        // Bottom-up requirement propagation: if the callee requires L and
        // the caller does not hold L at the call site, the caller requires
        // L too.
        let mut changed = true;
        let mut iterations = 0;
        while changed && iterations < MAX_FIXED_POINT_ITERATIONS {
            changed = false;
            iterations += 1;

            let snapshot: Vec<(String, Vec<MutexFieldKey>)> = self
                .func_facts
                .iter()
                .map(|(f, facts)| (f.clone(), facts.requires.iter().cloned().collect()))
                .collect();

            for (callee, requires) in snapshot {
                let Some(sites) = callee_to_sites.get(&callee) else {
                    continue;
                };
                for mfk in requires {
                    for &site_idx in sites {
                        if self.call_sites[site_idx].holds(&mfk) {
                            continue;
                        }
                        if self.prepublication_suppressed(site_idx, &mfk) {
                            continue;
                        }
                        let caller = self.call_sites[site_idx].caller.clone();
                        let facts = self.get_or_create_func_facts(&caller);
                        if facts.requires.insert(mfk.clone()) {
                            changed = true;
                        }
                    }
                }
            }
        }
        if iterations == MAX_FIXED_POINT_ITERATIONS {
            tracing::debug!("requirement propagation hit the iteration cap");
        }

        // Downward transitive-acquire closure.
        for facts in self.func_facts.values_mut() {
            let direct: Vec<MutexFieldKey> = facts.acquires.iter().cloned().collect();
            facts.acquires_transitive.extend(direct);
        }

        let mut changed = true;
        let mut iterations = 0;
        while changed && iterations < MAX_FIXED_POINT_ITERATIONS {
            changed = false;
            iterations += 1;
            for i in 0..self.call_sites.len() {
                let callee = self.call_sites[i].callee.clone();
                let Some(callee_facts) = self.func_facts.get(&callee) else {
                    continue;
                };
                let transitive: Vec<MutexFieldKey> =
                    callee_facts.acquires_transitive.iter().cloned().collect();
                let caller = self.call_sites[i].caller.clone();
                let caller_facts = self.get_or_create_func_facts(&caller);
                for mfk in transitive {
                    if caller_facts.acquires_transitive.insert(mfk) {
                        changed = true;
                    }
                }
            }
        }
        if iterations == MAX_FIXED_POINT_ITERATIONS {
            tracing::debug!("transitive-acquire closure hit the iteration cap");
        }

        self.record_interprocedural_lock_order_edges();
    }

    /// After closure: the caller holding H while the callee transitively
    /// acquires A establishes the ordering H before A. Equal keys are the
    /// interprocedural double-lock case, handled separately.
    fn record_interprocedural_lock_order_edges(&mut self) {
        let mut edges = Vec::new();
        for cs in &self.call_sites {
            let Some(callee_facts) = self.func_facts.get(&cs.callee) else {
                continue;
            };
            for (struct_name, held_fields) in &cs.held_by_struct {
                for (field_index, _) in held_fields {
                    let held_key = MutexFieldKey {
                        struct_name: struct_name.clone(),
                        field_index: *field_index,
                    };
                    for acquired in &callee_facts.acquires_transitive {
                        if *acquired == held_key {
                            continue;
                        }
                        edges.push(LockOrderEdge {
                            from: held_key.clone(),
                            to: acquired.clone(),
                            span: cs.span.clone(),
                            func: cs.caller.clone(),
                        });
                    }
                }
            }
        }
        for edge in edges {
            self.lock_order_graph.add_edge(edge);
        }
    }

    pub fn index_call_sites_by_callee(&self) -> HashMap<String, Vec<usize>> {
        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, cs) in self.call_sites.iter().enumerate() {
            index.entry(cs.callee.clone()).or_default().push(i);
        }
        index
    }

    // ── pre-publication suppression ─────────────────────────────

    /// Call-site index → receiver struct name, for method call sites in
    /// constructor-like callers where the receiver is not yet published.
    /// Requirements on the receiver's own type do not propagate through
    /// such sites: the object is still thread-private.
    pub fn compute_prepublication_suppressions(&self) -> HashMap<usize, String> {
        let mut suppressed = HashMap::new();
        for (i, cs) in self.call_sites.iter().enumerate() {
            let Some(receiver) = cs.receiver else {
                continue;
            };
            let Some(caller_fn) = self.func_index.get(&cs.caller).copied() else {
                continue;
            };
            let resolver = Resolver::new(caller_fn, &self.types, &self.config.mutex);
            let Some(struct_name) = resolver.struct_name_of_value(receiver) else {
                continue;
            };
            if !self.is_constructor_like(&cs.caller, &struct_name) {
                continue;
            }
            if receiver_published_before(caller_fn, &resolver, receiver, &cs.span) {
                continue;
            }
            suppressed.insert(i, struct_name);
        }
        suppressed
    }

    pub fn prepublication_suppressed(&self, site_idx: usize, mfk: &MutexFieldKey) -> bool {
        self.prepub_suppressed
            .get(&site_idx)
            .is_some_and(|struct_name| *struct_name == mfk.struct_name)
    }
}

/// Syntax-ordered publication check: does any store of the receiver into a
/// map/collection or a non-local struct field precede the call position?
/// Cross-branch order is approximated by source position; a pre-publication
/// call may be treated as post-publication, never the reverse.
fn receiver_published_before(
    caller: &Function,
    resolver: &Resolver<'_>,
    receiver: u32,
    call_span: &Option<Span>,
) -> bool {
    let Some(call_span) = call_span else {
        return true; // cannot order without a position; assume published
    };
    let receiver = resolver.canonical_base(receiver);

    for block in &caller.blocks {
        for instr in &block.instructions {
            let publishes = match instr.kind {
                ValueKind::MapUpdate => instr
                    .operands
                    .get(2)
                    .is_some_and(|&v| resolver.canonical_base(v) == receiver),
                ValueKind::Store => {
                    let stored = instr
                        .operands
                        .get(1)
                        .is_some_and(|&v| resolver.canonical_base(v) == receiver);
                    stored && store_target_escapes(resolver, instr.operands[0])
                }
                _ => false,
            };
            if !publishes {
                continue;
            }
            let Some(span) = &instr.span else {
                return true; // unpositioned publication: assume it precedes
            };
            if span.file == call_span.file && span.pos_key() < call_span.pos_key() {
                return true;
            }
        }
    }
    false
}

/// True when a store address reaches shared state: an element of a
/// collection, or a field of a struct that is not a function-local
/// allocation.
fn store_target_escapes(resolver: &Resolver<'_>, addr: u32) -> bool {
    let target = resolver.unwrap_value(addr);
    let Some(instr) = resolver.value(target) else {
        return false;
    };
    match instr.kind {
        ValueKind::IndexAddr => true,
        ValueKind::FieldAddr => {
            let Some(&base) = instr.operands.first() else {
                return false;
            };
            let base = resolver.canonical_base(base);
            resolver
                .value(base)
                .map(|b| b.kind != ValueKind::Alloc)
                .unwrap_or(true)
        }
        _ => false,
    }
}
