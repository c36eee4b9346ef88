//! Guard inference.
//!
//! Derives, for each struct field, the mutex field that most
//! authoritatively protects it. Constructor accesses are excluded (the
//! struct is not shared yet), immutable-after-construction fields are
//! skipped, and writes outrank reads in the frequency count: the mutex
//! held during writes is overwhelmingly the true guard, while reads under
//! a coincidental second lock (tandem-lock patterns) are noise.

use crate::context::{FieldKey, GuardInfo, Observation, PassContext};
use std::collections::BTreeMap;

impl<'a> PassContext<'a> {
    /// Infer guards for all locally defined struct fields with
    /// observations. Imported types keep their fact-provided guards.
    pub fn infer_guards(&mut self) {
        let keys: Vec<FieldKey> = self.observations.keys().cloned().collect();
        for key in keys {
            if !self.pkg.defines(&key.struct_name) {
                continue; // guards for imported types arrive via facts
            }
            if self.imported_guard_types.contains(&key.struct_name) {
                continue;
            }

            let filtered: Vec<Observation> = self.observations[&key]
                .iter()
                .filter(|obs| !self.is_constructor_like(&obs.func, &key.struct_name))
                .cloned()
                .collect();
            if filtered.is_empty() {
                continue;
            }

            // Immutable after construction: reads only, nothing to guard.
            if filtered.iter().all(|obs| obs.is_read) {
                continue;
            }

            if let Some(guard) = infer_field_guard(&key, &filtered) {
                self.guards.insert(key, guard);
            }
        }
    }

    /// True if the function looks like a constructor for the struct type:
    /// an init function, a function returning the struct (by value or
    /// pointer), or a New/Make/Create-prefixed function naming the struct.
    pub fn is_constructor_like(&self, func_name: &str, struct_name: &str) -> bool {
        let Some(func) = self.func_index.get(func_name) else {
            return false;
        };
        if func.short_name == "init" || func.short_name.starts_with("init#") {
            return true;
        }

        let ptr_name = format!("*{struct_name}");
        if func
            .result_type_names
            .iter()
            .any(|r| r == struct_name || r == &ptr_name)
        {
            return true;
        }

        let struct_short = struct_name.rsplit('.').next().unwrap_or(struct_name);
        for prefix in ["New", "Make", "Create"] {
            if func.short_name.starts_with(prefix) && func.short_name.contains(struct_short) {
                return true;
            }
        }
        false
    }
}

/// Two-phase frequency count over same-base held mutex fields.
/// Phase A counts writes only; phase B falls back to all observations.
/// The field's own index is excluded, and ties break toward the lowest
/// field index for deterministic results.
fn infer_field_guard(key: &FieldKey, observations: &[Observation]) -> Option<GuardInfo> {
    let count_phase = |writes_only: bool| -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for obs in observations {
            if writes_only && obs.is_read {
                continue;
            }
            for held in &obs.same_base_mutexes {
                if held.field_index == key.field_index {
                    continue;
                }
                *counts.entry(held.field_index).or_insert(0) += 1;
            }
        }
        counts
    };

    let mut counts = count_phase(true);
    if counts.is_empty() {
        counts = count_phase(false);
    }

    // BTreeMap iterates in ascending index order, so keeping the first
    // maximal entry breaks ties toward the lowest field index.
    let mut winner: Option<(u32, usize)> = None;
    for (&idx, &count) in &counts {
        match winner {
            Some((_, best_count)) if count <= best_count => {}
            _ => winner = Some((idx, count)),
        }
    }
    let (best, _) = winner?;

    let needs_exclusive = observations.iter().any(|obs| {
        !obs.is_read
            && obs
                .same_base_mutexes
                .iter()
                .any(|h| h.field_index == best)
    });

    Some(GuardInfo {
        mutex_field_index: best,
        needs_exclusive,
    })
}
