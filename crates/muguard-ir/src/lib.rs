//! MuGuard IR — intermediate representation for Go mutex analysis.
//!
//! The IR is built by the Go compiler frontend (the bridge) and
//! deserialized in Rust. This crate provides:
//! - Owned IR wrappers matching the bridge JSON output
//! - CFG navigation helpers with dominator computation
//! - Type and struct-field lookup helpers

#[cfg(any(test, feature = "test-fixtures"))]
pub mod builder;
pub mod cfg;
pub mod ir;
pub mod types;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid bridge JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Load a bridge JSON file and convert it to the owned IR.
pub fn load_json_file(path: &std::path::Path) -> Result<ir::AnalysisInput, LoadError> {
    let data = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&data)?)
}
