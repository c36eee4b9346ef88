//! Top-level analysis entry points.

use crate::config::Config;
use crate::context::PassContext;
use crate::facts::FactStore;
use muguard_diagnostics::diagnostic::Diagnostic;
use muguard_ir::ir::{AnalysisInput, Package};

/// Mutex-guard consistency analyzer.
///
/// Produces diagnostics for:
/// - MU001/MU002: guarded-field access violations
/// - MU003..MU006: intra-function double-lock, recursive RLock, lock
///   upgrade, and mismatched unlock
/// - MU007/MU008: interprocedural double-lock and missing lock at call
/// - MU009: lock-ordering cycles
/// - MU010..MU013: unlock of unheld, lock leak, inconsistent branch
///   state, deferred lock typo
/// - MU014/MU015: acquire-helper contract and caller obligations
/// - MU016: exported guarded fields
pub struct MutexAnalyzer;

impl MutexAnalyzer {
    /// Analyze all packages with no cross-package fact store.
    pub fn analyze(input: &AnalysisInput, config: &Config) -> Vec<Diagnostic> {
        input
            .packages
            .iter()
            .flat_map(|pkg| Self::analyze_package(pkg, config, None))
            .collect()
    }

    /// Analyze all packages, importing and exporting facts through the
    /// given store. Packages are processed in input order, so upstream
    /// packages must precede their importers.
    pub fn analyze_with_store(
        input: &AnalysisInput,
        config: &Config,
        store: &dyn FactStore,
    ) -> Vec<Diagnostic> {
        input
            .packages
            .iter()
            .flat_map(|pkg| Self::analyze_package(pkg, config, Some(store)))
            .collect()
    }

    /// Analyze a single package.
    pub fn analyze_package(
        pkg: &Package,
        config: &Config,
        store: Option<&dyn FactStore>,
    ) -> Vec<Diagnostic> {
        PassContext::new(pkg, config, store).run()
    }
}
