//! Configuration loading from muguard.toml.
//!
//! Three surfaces are configurable: the annotation directives, the
//! recognized mutex types with their four methods, and the HTTP-handler
//! heuristic. Everything else is fixed behavior.

use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub muguard: MuguardConfig,
    pub annotations: AnnotationConfig,
    pub mutex: MutexConfig,
    pub handler: HandlerConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MuguardConfig {
    /// Append provenance chains to interprocedural reports.
    pub verbose: bool,
    /// Maximum diagnostics to report (0 = unlimited).
    pub max_diagnostics: usize,
}

impl Default for MuguardConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            max_diagnostics: 0,
        }
    }
}

/// Comment directive configuration. Directives are matched as
/// `<prefix><keyword>`, bare or followed by free text.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnnotationConfig {
    pub prefix: String,
    pub concurrent_keyword: String,
    pub ignore_keyword: String,
    pub nolint_keyword: String,
}

impl Default for AnnotationConfig {
    fn default() -> Self {
        Self {
            prefix: "mu:".into(),
            concurrent_keyword: "concurrent".into(),
            ignore_keyword: "ignore".into(),
            nolint_keyword: "nolint".into(),
        }
    }
}

impl AnnotationConfig {
    pub fn concurrent_directive(&self) -> String {
        format!("{}{}", self.prefix, self.concurrent_keyword)
    }
    pub fn ignore_directive(&self) -> String {
        format!("{}{}", self.prefix, self.ignore_keyword)
    }
    pub fn nolint_directive(&self) -> String {
        format!("{}{}", self.prefix, self.nolint_keyword)
    }
}

/// Recognized mutex types and method names.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MutexConfig {
    /// Qualified name of the exclusive-only mutex type.
    pub single_mode_type: String,
    /// Qualified name of the dual-mode (read/write) mutex type.
    pub dual_mode_type: String,
    pub lock_method: String,
    pub unlock_method: String,
    pub rlock_method: String,
    pub runlock_method: String,
}

impl Default for MutexConfig {
    fn default() -> Self {
        Self {
            single_mode_type: "sync.Mutex".into(),
            dual_mode_type: "sync.RWMutex".into(),
            lock_method: "Lock".into(),
            unlock_method: "Unlock".into(),
            rlock_method: "RLock".into(),
            runlock_method: "RUnlock".into(),
        }
    }
}

impl MutexConfig {
    pub fn is_mutex_type(&self, type_name: &str) -> bool {
        type_name == self.single_mode_type || type_name == self.dual_mode_type
    }

    pub fn is_dual_mode_type(&self, type_name: &str) -> bool {
        type_name == self.dual_mode_type
    }

    pub fn is_lock_method(&self, name: &str) -> bool {
        name == self.lock_method
            || name == self.unlock_method
            || name == self.rlock_method
            || name == self.runlock_method
    }

    pub fn is_acquire(&self, name: &str) -> bool {
        name == self.lock_method || name == self.rlock_method
    }

    /// True for Lock/Unlock, false for RLock/RUnlock.
    pub fn is_exclusive_method(&self, name: &str) -> bool {
        name == self.lock_method || name == self.unlock_method
    }

    /// True for RLock/RUnlock, which require the dual-mode type.
    pub fn is_shared_method(&self, name: &str) -> bool {
        name == self.rlock_method || name == self.runlock_method
    }
}

/// Request-handler heuristic: functions with this name and parameter types
/// are concurrent entrypoints, as are functions registered through the
/// listed registration functions.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HandlerConfig {
    pub method_name: String,
    pub param_types: Vec<String>,
    pub register_functions: Vec<String>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            method_name: "ServeHTTP".into(),
            param_types: vec!["net/http.ResponseWriter".into(), "*net/http.Request".into()],
            register_functions: vec![
                "net/http.HandleFunc".into(),
                "(*net/http.ServeMux).HandleFunc".into(),
            ],
        }
    }
}

/// Find and load muguard.toml, walking up from `start_dir`.
/// Returns the default config if no file is found or it fails to parse.
pub fn load_config(start_dir: &Path) -> Config {
    match find_config_file(start_dir) {
        Some(path) => {
            let content = std::fs::read_to_string(&path).unwrap_or_default();
            toml::from_str(&content).unwrap_or_default()
        }
        None => Config::default(),
    }
}

/// Walk up directories looking for muguard.toml.
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join("muguard.toml");
        if candidate.exists() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Default TOML content for `muguard init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"[muguard]
verbose = false
# max_diagnostics = 0

[annotations]
prefix = "mu:"
concurrent_keyword = "concurrent"
ignore_keyword = "ignore"
nolint_keyword = "nolint"

[mutex]
single_mode_type = "sync.Mutex"
dual_mode_type = "sync.RWMutex"
lock_method = "Lock"
unlock_method = "Unlock"
rlock_method = "RLock"
runlock_method = "RUnlock"

[handler]
method_name = "ServeHTTP"
param_types = ["net/http.ResponseWriter", "*net/http.Request"]
register_functions = ["net/http.HandleFunc", "(*net/http.ServeMux).HandleFunc"]
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let cfg = Config::default();
        assert_eq!(cfg.annotations.prefix, "mu:");
        assert_eq!(cfg.mutex.dual_mode_type, "sync.RWMutex");
        assert_eq!(cfg.handler.method_name, "ServeHTTP");
        assert!(!cfg.muguard.verbose);
    }

    #[test]
    fn test_mutex_method_classification() {
        let m = MutexConfig::default();
        assert!(m.is_lock_method("Lock"));
        assert!(m.is_lock_method("RUnlock"));
        assert!(!m.is_lock_method("TryLock"));
        assert!(m.is_acquire("RLock"));
        assert!(!m.is_acquire("Unlock"));
        assert!(m.is_exclusive_method("Unlock"));
        assert!(m.is_shared_method("RLock"));
        assert!(m.is_mutex_type("sync.Mutex"));
        assert!(m.is_dual_mode_type("sync.RWMutex"));
        assert!(!m.is_dual_mode_type("sync.Mutex"));
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
[muguard]
verbose = true

[annotations]
prefix = "lock:"

[mutex]
single_mode_type = "mylib.Mu"
"#;
        let cfg: Config = toml::from_str(toml_str).unwrap();
        assert!(cfg.muguard.verbose);
        assert_eq!(cfg.annotations.prefix, "lock:");
        assert_eq!(cfg.annotations.concurrent_keyword, "concurrent");
        assert_eq!(cfg.mutex.single_mode_type, "mylib.Mu");
        // dual mode untouched by partial table
        assert_eq!(cfg.mutex.dual_mode_type, "sync.RWMutex");
    }

    #[test]
    fn test_directive_rendering() {
        let ann = AnnotationConfig::default();
        assert_eq!(ann.concurrent_directive(), "mu:concurrent");
        assert_eq!(ann.ignore_directive(), "mu:ignore");
        assert_eq!(ann.nolint_directive(), "mu:nolint");
    }

    #[test]
    fn test_load_config_no_file() {
        let cfg = load_config(Path::new("/nonexistent/path"));
        assert_eq!(cfg.annotations.prefix, "mu:");
    }

    #[test]
    fn test_find_config_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("muguard.toml"), DEFAULT_CONFIG_TOML).unwrap();
        let subdir = dir.path().join("sub");
        std::fs::create_dir(&subdir).unwrap();
        let found = find_config_file(&subdir);
        assert_eq!(found.unwrap(), dir.path().join("muguard.toml"));
    }

    #[test]
    fn test_default_config_toml_parses() {
        let cfg: Config = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        assert_eq!(cfg.handler.register_functions.len(), 2);
        assert_eq!(cfg.handler.param_types[1], "*net/http.Request");
    }
}
