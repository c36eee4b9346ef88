//! Concurrent-context detection.
//!
//! Finds concurrent entrypoints (goroutine launches, request handlers,
//! registered handler functions, annotated or fact-imported entries) and
//! computes forward reachability over the recorded call sites. Guard
//! violations are only meaningful for code that can actually run
//! concurrently; with no entrypoints at all, everything is treated as
//! concurrent.

use crate::context::PassContext;
use muguard_ir::ir::{Function, ValueKind};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

impl<'a> PassContext<'a> {
    /// Detect entrypoints and compute the reachable-from-concurrent set.
    pub fn compute_concurrent_context(&mut self) {
        let entrypoints = self.detect_concurrent_entrypoints();
        if entrypoints.is_empty() {
            self.concurrent_funcs = None; // conservative: all concurrent
            return;
        }

        // BFS forward over the static call graph.
        let mut forward: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for cs in &self.call_sites {
            forward
                .entry(cs.caller.as_str())
                .or_default()
                .push(cs.callee.as_str());
        }

        let mut reachable: BTreeSet<String> = BTreeSet::new();
        let mut queue: VecDeque<String> = VecDeque::new();
        for entry in entrypoints {
            if reachable.insert(entry.clone()) {
                queue.push_back(entry);
            }
        }
        while let Some(func) = queue.pop_front() {
            if let Some(callees) = forward.get(func.as_str()) {
                for &callee in callees {
                    if reachable.insert(callee.to_string()) {
                        queue.push_back(callee.to_string());
                    }
                }
            }
        }

        self.concurrent_funcs = Some(reachable);
    }

    /// Scan for concurrent entrypoints:
    /// - functions launched via `go` (directly or as closures)
    /// - request-handler methods matching the configured shape
    /// - functions passed to the configured registration functions
    /// - functions carrying the concurrent annotation (including imported
    ///   concurrent facts, merged during fact import)
    pub fn detect_concurrent_entrypoints(&self) -> BTreeSet<String> {
        let mut entrypoints = BTreeSet::new();

        for func in &self.pkg.functions {
            if self.is_handler_method(func) {
                entrypoints.insert(func.name.clone());
            }

            for block in &func.blocks {
                for instr in &block.instructions {
                    match instr.kind {
                        ValueKind::Go => {
                            if let Some(target) = &instr.callee {
                                entrypoints.insert(target.clone());
                            }
                            for target in &instr.func_args {
                                entrypoints.insert(target.clone());
                            }
                        }
                        ValueKind::Call => {
                            if let Some(target) = self.handler_registration_target(instr) {
                                entrypoints.insert(target);
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        for func in &self.annotations.concurrent {
            entrypoints.insert(func.clone());
        }

        entrypoints
    }

    /// A method with the configured handler name and exact parameter type
    /// list (e.g. `ServeHTTP(http.ResponseWriter, *http.Request)`).
    fn is_handler_method(&self, func: &Function) -> bool {
        let handler = &self.config.handler;
        if func.short_name != handler.method_name || !func.is_method {
            return false;
        }
        if func.params.len() != handler.param_types.len() {
            return false;
        }
        func.params
            .iter()
            .zip(&handler.param_types)
            .all(|(param, expected)| &param.type_name == expected)
    }

    /// The handler argument of a recognized registration call: the last
    /// function-valued argument.
    fn handler_registration_target(&self, instr: &muguard_ir::ir::Instruction) -> Option<String> {
        let callee = instr.callee.as_deref()?;
        if !self
            .config
            .handler
            .register_functions
            .iter()
            .any(|r| r == callee)
        {
            return None;
        }
        instr.func_args.last().cloned()
    }
}
