//! Diagnostic emission.
//!
//! Consults the guard map, function facts, concurrency reachability, and
//! the annotation overlay to decide what surfaces where. Direct field
//! violations in functions whose requirement propagated upward are
//! reported at call sites instead of inside the helper.

use crate::context::{FieldKey, MutexFieldKey, PassContext};
use muguard_diagnostics::diagnostic::{DiagnosticBuilder, DiagnosticSource, Severity};
use muguard_ir::ir::Span;

/// Verbose-mode provenance limits.
const MAX_PROVENANCE_CHAINS: usize = 3;
const MAX_PROVENANCE_HOPS: usize = 5;

impl<'a> PassContext<'a> {
    /// Check guarded-field accesses against the inferred guards.
    pub fn check_violations(&mut self) {
        struct Violation {
            func: String,
            span: Option<Span>,
            message: String,
            write_under_shared: bool,
        }
        let mut violations = Vec::new();

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
                    .find(|h| h.field_index == guard.mutex_field_index);

                if let Some(held) = held {
                    // Write under RLock: the guard is held, but shared
                    // mode gives no exclusion against other readers
                    // turned writers.
                    let shared = held.mode == crate::lock_state::LockMode::Shared;
                    if shared && !obs.is_read && self.is_concurrent(&obs.func) {
                        if let Some(message) = self.write_under_shared_message(key, guard) {
                            violations.push(Violation {
                                func: obs.func.clone(),
                                span: obs.span.clone(),
                                message,
                                write_under_shared: true,
                            });
                        }
                    }
                    continue;
                }

                if !self.is_concurrent(&obs.func) {
                    continue;
                }
                let mfk = MutexFieldKey {
                    struct_name: key.struct_name.clone(),
                    field_index: guard.mutex_field_index,
                };
                if self.should_suppress_direct_violation(&obs.func, &mfk) {
                    continue;
                }
                if let Some(message) = self.violation_message(key, guard) {
                    violations.push(Violation {
                        func: obs.func.clone(),
                        span: obs.span.clone(),
                        message,
                        write_under_shared: false,
                    });
                }
            }
        }

        for v in violations {
            let rule = if v.write_under_shared { "MU002" } else { "MU001" };
            let severity = if v.write_under_shared {
                Severity::Error
            } else {
                Severity::Warning
            };
            self.report(rule, severity, DiagnosticSource::Guard, &v.func, &v.span, v.message);
        }
    }

    /// A function with a propagated requirement and at least one caller
    /// surfaces its violation at the call sites, not inside the helper.
    pub fn should_suppress_direct_violation(&self, func: &str, mfk: &MutexFieldKey) -> bool {
        self.function_requires(func, mfk) && self.has_callers(func)
    }

    fn violation_message(&self, key: &FieldKey, guard: &crate::context::GuardInfo) -> Option<String> {
        let field = self.field_display(key)?;
        let mutex = self.mutex_field_display(&MutexFieldKey {
            struct_name: key.struct_name.clone(),
            field_index: guard.mutex_field_index,
        })?;
        Some(format!("field {field} is accessed without holding {mutex}"))
    }

    fn write_under_shared_message(
        &self,
        key: &FieldKey,
        guard: &crate::context::GuardInfo,
    ) -> Option<String> {
        let field = self.field_display(key)?;
        let mutex = self.mutex_field_display(&MutexFieldKey {
            struct_name: key.struct_name.clone(),
            field_index: guard.mutex_field_index,
        })?;
        Some(format!(
            "field {field} is written while {mutex} is read-locked — use Lock() for write access"
        ))
    }

    /// Call-site checks: unsatisfied callee requirements and caller-held
    /// locks the callee acquires again.
    pub fn check_interprocedural_violations(&mut self) {
        struct SiteReport {
            rule: &'static str,
            caller: String,
            span: Option<Span>,
            message: String,
            provenance: Vec<String>,
        }
        let mut reports = Vec::new();

        for (site_idx, cs) in self.call_sites.iter().enumerate() {
            if !self.is_concurrent(&cs.caller) {
                continue;
            }
            let Some(callee_facts) = self.func_facts.get(&cs.callee) else {
                continue;
            };

            for mfk in &callee_facts.requires {
                if cs.holds(mfk) {
                    continue;
                }
                // The receiver is still private to its constructor here.
                if self.prepublication_suppressed(site_idx, mfk) {
                    continue;
                }
                // The caller inherited the same requirement and has its
                // own callers: report further up instead.
                if self.should_suppress_direct_violation(&cs.caller, mfk) {
                    continue;
                }
                let Some(name) = self.mutex_field_display(mfk) else {
                    continue;
                };
                let provenance = if self.config.muguard.verbose {
                    self.provenance_chains(&cs.callee, mfk)
                } else {
                    Vec::new()
                };
                reports.push(SiteReport {
                    rule: "MU008",
                    caller: cs.caller.clone(),
                    span: cs.span.clone(),
                    message: format!(
                        "{name} must be held when calling {}()",
                        self.func_display(&cs.callee)
                    ),
                    provenance,
                });
            }

            for mfk in &callee_facts.acquires_transitive {
                if !cs.holds(mfk) {
                    continue;
                }
                let Some(name) = self.mutex_field_display(mfk) else {
                    continue;
                };
                reports.push(SiteReport {
                    rule: "MU007",
                    caller: cs.caller.clone(),
                    span: cs.span.clone(),
                    message: format!(
                        "{name} is already held when calling {}() which locks {name}",
                        self.func_display(&cs.callee)
                    ),
                    provenance: Vec::new(),
                });
            }
        }

        for r in reports {
            if self.annotations.is_suppressed(&r.caller, &r.span) {
                continue;
            }
            let Some(loc) = crate::context::location_of(&r.span) else {
                continue;
            };
            let severity = if r.rule == "MU007" {
                Severity::Error
            } else {
                Severity::Warning
            };
            self.diagnostics.push(
                DiagnosticBuilder::new(r.rule, severity, r.message, DiagnosticSource::Interprocedural)
                    .location(loc.file, loc.line, loc.column)
                    .provenance(r.provenance)
                    .build(),
            );
        }
    }

    /// Call-path chains explaining why a function requires a lock, capped
    /// at three chains of five hops each.
    pub fn provenance_chains(&self, root: &str, mfk: &MutexFieldKey) -> Vec<String> {
        let mut chains = Vec::new();
        let mut path = vec![root.to_string()];
        self.walk_provenance(root, mfk, &mut path, &mut chains);
        chains
    }

    fn walk_provenance(
        &self,
        current: &str,
        mfk: &MutexFieldKey,
        path: &mut Vec<String>,
        chains: &mut Vec<String>,
    ) {
        if chains.len() >= MAX_PROVENANCE_CHAINS {
            return;
        }

        if let Some(site) = self.direct_violation_site(current, mfk) {
            let names: Vec<String> = path.iter().map(|f| format!("{}()", self.func_display(f))).collect();
            chains.push(format!("{}: {}", names.join(" -> "), site));
        }

        if path.len() >= MAX_PROVENANCE_HOPS {
            return;
        }

        for cs in &self.call_sites {
            if cs.caller != *current || cs.holds(mfk) {
                continue;
            }
            if !self
                .func_facts
                .get(&cs.callee)
                .is_some_and(|f| f.requires.contains(mfk))
            {
                continue;
            }
            if path.contains(&cs.callee) {
                continue;
            }
            path.push(cs.callee.clone());
            self.walk_provenance(&cs.callee, mfk, path, chains);
            path.pop();
        }
    }

    /// The first unguarded access in `func` of a field guarded by `mfk`.
    fn direct_violation_site(&self, func: &str, mfk: &MutexFieldKey) -> Option<String> {
        for (key, guard) in &self.guards {
            if key.struct_name != mfk.struct_name
                || guard.mutex_field_index != mfk.field_index
            {
                continue;
            }
            let observations = self.observations.get(key)?;
            for obs in observations {
                if obs.func != func {
                    continue;
                }
                let held = obs
                    .same_base_mutexes
                    .iter()
                    .any(|h| h.field_index == guard.mutex_field_index);
                if held {
                    continue;
                }
                let field = self.field_display(key)?;
                let loc = crate::context::location_of(&obs.span)?;
                let verb = if obs.is_read { "read" } else { "written" };
                return Some(format!("{field} {verb} at {loc}"));
            }
        }
        None
    }

    /// Run cycle detection and report cycles reachable from a concurrent
    /// context.
    pub fn detect_and_report_lock_order_cycles(&mut self) {
        let cycles = self.lock_order_graph.detect_cycles();
        let mut reports: Vec<(String, Option<Span>, String)> = Vec::new();

        for cycle in cycles {
            if cycle.is_empty() {
                continue;
            }
            if !cycle.iter().any(|e| self.is_concurrent(&e.func)) {
                continue;
            }

            // Unique mutex names in cycle order.
            let mut names: Vec<String> = Vec::new();
            for edge in &cycle {
                if let Some(name) = self.mutex_field_display(&edge.from) {
                    if !names.contains(&name) {
                        names.push(name);
                    }
                }
            }

            let edge = &cycle[0];
            let message = match names.len() {
                0 => continue,
                1 => format!("potential deadlock: lock ordering cycle on {}", names[0]),
                2 => format!(
                    "potential deadlock: lock ordering cycle between {} and {}",
                    names[0], names[1]
                ),
                _ => format!(
                    "potential deadlock: lock ordering cycle involving {}",
                    names.join(", ")
                ),
            };
            reports.push((edge.func.clone(), edge.span.clone(), message));
        }

        for (func, span, message) in reports {
            self.report(
                "MU009",
                Severity::Error,
                DiagnosticSource::LockOrder,
                &func,
                &span,
                message,
            );
        }
    }

    /// Advisory: a guarded field that is exported can be accessed by
    /// external packages without the lock.
    pub fn check_exported_guarded_fields(&mut self) {
        let mut reports: Vec<(Option<Span>, String)> = Vec::new();

        for (key, guard) in &self.guards {
            if !self.pkg.defines(&key.struct_name) {
                continue;
            }
            let Some(st) = self.types.by_name(&key.struct_name) else {
                continue;
            };
            let Some(field) = st.fields.get(key.field_index as usize) else {
                continue;
            };
            if !field.is_exported() {
                continue;
            }
            let Some(mutex_field) = st.fields.get(guard.mutex_field_index as usize) else {
                continue;
            };
            reports.push((
                field.span.clone(),
                format!(
                    "field {short}.{field} is guarded by {short}.{mutex} but is exported \
                     — external packages can bypass the lock",
                    short = st.short_name(),
                    field = field.name,
                    mutex = mutex_field.name,
                ),
            ));
        }

        for (span, message) in reports {
            self.report(
                "MU016",
                Severity::Info,
                DiagnosticSource::Guard,
                "",
                &span,
                message,
            );
        }
    }
}
