//! MuGuard analysis — mutex-guard inference and locking checks for Go.
//!
//! The pipeline per package: parse annotations, walk every function's CFG
//! tracking lock state, import upstream facts, infer field guards,
//! propagate lock requirements and acquisitions through the call graph,
//! compute concurrent reachability, then emit diagnostics through the
//! suppression overlay and export facts for downstream packages.

pub mod analysis;
pub mod annotations;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod facts;
pub mod helpers;
pub mod inference;
pub mod interprocedural;
pub mod lock_order;
pub mod lock_state;
pub mod reporter;
pub mod resolver;
pub mod walker;

pub use analysis::MutexAnalyzer;
