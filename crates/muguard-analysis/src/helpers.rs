//! Acquire-helper analysis.
//!
//! A function that holds a lock at every return point is an acquire
//! helper: the held lock is its postcondition, not a leak. The callee gets
//! one report stating the contract; callers must either release the lock
//! or propagate the postcondition themselves.

use crate::context::{MutexFieldKey, PassContext, PosKey};
use muguard_diagnostics::diagnostic::{DiagnosticSource, Severity};
use std::collections::{BTreeMap, BTreeSet};

impl<'a> PassContext<'a> {
    /// Derive `ReturnsHolding`: a lock belongs to it iff every return
    /// instruction of the function is a leak candidate for that lock.
    pub fn compute_returns_holding(&mut self) {
        let mut return_positions: BTreeMap<(String, MutexFieldKey), BTreeSet<PosKey>> =
            BTreeMap::new();
        for (pos, candidates) in &self.leak_candidates {
            for c in candidates {
                let Some(mfk) = &c.mfk else {
                    continue;
                };
                return_positions
                    .entry((c.func.clone(), mfk.clone()))
                    .or_default()
                    .insert(pos.clone());
            }
        }

        for ((func, mfk), positions) in return_positions {
            let returns = self
                .func_index
                .get(&func)
                .map(|f| f.return_count())
                .unwrap_or(0);
            if returns > 0 && positions.len() == returns {
                self.get_or_create_func_facts(&func).returns_holding.insert(mfk);
            }
        }
    }

    /// Callee-side contract reports plus caller obligation checks.
    pub fn check_acquire_helpers(&mut self) {
        // Callee side: one report per helper/lock pair at the declaration.
        let mut callee_reports = Vec::new();
        for (func, facts) in &self.func_facts {
            for mfk in &facts.returns_holding {
                let Some(name) = self.mutex_field_display(mfk) else {
                    continue;
                };
                let Some(f) = self.func_index.get(func) else {
                    continue;
                };
                callee_reports.push((func.clone(), f.span.clone(), name));
            }
        }
        for (func, span, name) in callee_reports {
            let display = self.func_display(&func);
            self.report(
                "MU014",
                Severity::Info,
                DiagnosticSource::Helper,
                &func,
                &span,
                format!("{display}() returns while holding {name} -- callers must unlock"),
            );
        }

        // Caller side: each call site must release or propagate.
        let mut caller_reports = Vec::new();
        for cs in &self.call_sites {
            let Some(callee_facts) = self.func_facts.get(&cs.callee) else {
                continue;
            };
            if callee_facts.returns_holding.is_empty() {
                continue;
            }
            let caller_facts = self.func_facts.get(&cs.caller);
            for mfk in &callee_facts.returns_holding {
                let propagates = caller_facts
                    .is_some_and(|f| f.returns_holding.contains(mfk));
                let releases = caller_facts.is_some_and(|f| f.releases.contains(mfk));
                if propagates || releases {
                    continue;
                }
                let Some(name) = self.mutex_field_display(mfk) else {
                    continue;
                };
                caller_reports.push((cs.caller.clone(), cs.callee.clone(), cs.span.clone(), name));
            }
        }
        for (caller, callee, span, name) in caller_reports {
            let caller_display = self.func_display(&caller);
            let callee_display = self.func_display(&callee);
            self.report(
                "MU015",
                Severity::Error,
                DiagnosticSource::Helper,
                &caller,
                &span,
                format!(
                    "{caller_display}() calls {callee_display}() which acquires {name}, \
                     but {caller_display}() never releases it"
                ),
            );
        }
    }

    /// Report leak candidates not covered by a requirement or an
    /// acquire-helper postcondition.
    pub fn report_lock_leaks(&mut self) {
        let mut reports = Vec::new();
        for candidates in self.leak_candidates.values() {
            for c in candidates {
                if let Some(mfk) = &c.mfk {
                    if self.function_requires(&c.func, mfk) {
                        continue;
                    }
                    // An intentional postcondition, not a bug.
                    if self
                        .func_facts
                        .get(&c.func)
                        .is_some_and(|f| f.returns_holding.contains(mfk))
                    {
                        continue;
                    }
                }
                reports.push(c.clone());
            }
        }
        for c in reports {
            let locked_at = c
                .acquired_at
                .as_ref()
                .map(|s| {
                    let base = std::path::Path::new(&s.file)
                        .file_name()
                        .map(|f| f.to_string_lossy().into_owned())
                        .unwrap_or_else(|| s.file.clone());
                    format!(" (locked at {}:{}:{})", base, s.start_line, s.start_col)
                })
                .unwrap_or_default();
            self.report(
                "MU011",
                Severity::Error,
                DiagnosticSource::Walker,
                &c.func,
                &c.ret_span,
                format!("return without unlocking {}{}", c.lock_name, locked_at),
            );
        }
    }

    /// Report unlock-of-unheld candidates not explained by a requirement
    /// or by a callee that returns holding the lock.
    pub fn report_unlock_of_unheld(&mut self) {
        let mut reports = Vec::new();
        for c in &self.unlock_candidates {
            if let Some(mfk) = &c.mfk {
                if self.function_requires(&c.func, mfk) {
                    continue;
                }
                // The lock was obtained through an acquire helper; this
                // unlock is the caller meeting its obligation.
                if self.callee_returns_holding(&c.func, mfk) {
                    continue;
                }
            }
            reports.push(c.clone());
        }
        for c in reports {
            self.report(
                "MU010",
                Severity::Error,
                DiagnosticSource::Walker,
                &c.func,
                &c.span,
                format!("Unlock() called but {} is not held", c.lock_name),
            );
        }
    }

    pub fn function_requires(&self, func: &str, mfk: &MutexFieldKey) -> bool {
        self.func_facts
            .get(func)
            .is_some_and(|f| f.requires.contains(mfk))
    }

    /// True if any callee of `func` has ReturnsHolding for the lock.
    fn callee_returns_holding(&self, func: &str, mfk: &MutexFieldKey) -> bool {
        self.call_sites.iter().any(|cs| {
            cs.caller == func
                && self
                    .func_facts
                    .get(&cs.callee)
                    .is_some_and(|f| f.returns_holding.contains(mfk))
        })
    }
}
