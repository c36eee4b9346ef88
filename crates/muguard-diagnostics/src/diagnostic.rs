//! Core diagnostic types for MuGuard.
//!
//! All analysis passes produce `Diagnostic` values, and all formatters
//! (human, JSON) consume them.

use serde::{Deserialize, Serialize};

/// A diagnostic produced by an analysis pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Unique ID: RULE-file:line (e.g., "MU001-registry.go:18").
    pub id: String,
    /// Rule code (e.g., "MU001").
    pub rule: String,
    pub severity: Severity,
    /// The single-line message, e.g.
    /// "field Counter.count is accessed without holding Counter.mu".
    pub message: String,
    /// Where the issue manifests.
    pub location: Location,
    /// Secondary location, e.g. the acquisition site of a leaked lock.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<Note>,
    /// Call-path chains rendered in verbose mode, one string per chain.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub provenance: Vec<String>,
    /// The analysis phase that produced this diagnostic.
    pub source: DiagnosticSource,
}

/// Severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Source code location. Lines and columns are 1-based
/// (matching Go's `token.Position`).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// A secondary location attached to a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub location: Location,
    pub text: String,
}

/// Which analysis phase produced the diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSource {
    /// Intra-function checks from the CFG walk.
    Walker,
    /// Guard-inference based field checks.
    Guard,
    /// Call-graph propagation checks.
    Interprocedural,
    /// Lock-order cycle detection.
    LockOrder,
    /// Acquire-helper postcondition checks.
    Helper,
}

impl std::fmt::Display for DiagnosticSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Walker => write!(f, "walker"),
            Self::Guard => write!(f, "guard"),
            Self::Interprocedural => write!(f, "interprocedural"),
            Self::LockOrder => write!(f, "lockorder"),
            Self::Helper => write!(f, "helper"),
        }
    }
}

/// Builder for creating diagnostics conveniently.
pub struct DiagnosticBuilder {
    rule: String,
    severity: Severity,
    message: String,
    location: Location,
    note: Option<Note>,
    provenance: Vec<String>,
    source: DiagnosticSource,
}

impl DiagnosticBuilder {
    pub fn new(
        rule: impl Into<String>,
        severity: Severity,
        message: impl Into<String>,
        source: DiagnosticSource,
    ) -> Self {
        Self {
            rule: rule.into(),
            severity,
            message: message.into(),
            location: Location::default(),
            note: None,
            provenance: Vec::new(),
            source,
        }
    }

    pub fn location(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.location = Location {
            file: file.into(),
            line,
            column,
        };
        self
    }

    pub fn note(mut self, location: Location, text: impl Into<String>) -> Self {
        self.note = Some(Note {
            location,
            text: text.into(),
        });
        self
    }

    pub fn provenance(mut self, chains: Vec<String>) -> Self {
        self.provenance = chains;
        self
    }

    pub fn build(self) -> Diagnostic {
        let id = format!("{}-{}:{}", self.rule, self.location.file, self.location.line);
        Diagnostic {
            id,
            rule: self.rule,
            severity: self.severity,
            message: self.message,
            location: self.location,
            note: self.note,
            provenance: self.provenance,
            source: self.source,
        }
    }
}

/// Sort diagnostics into the deterministic reporting order:
/// location first, then rule code, then message.
pub fn sort_diagnostics(diags: &mut [Diagnostic]) {
    diags.sort_by(|a, b| {
        a.location
            .cmp(&b.location)
            .then_with(|| a.rule.cmp(&b.rule))
            .then_with(|| a.message.cmp(&b.message))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_builder() {
        let diag = DiagnosticBuilder::new(
            "MU001",
            Severity::Warning,
            "field Counter.count is accessed without holding Counter.mu",
            DiagnosticSource::Guard,
        )
        .location("registry.go", 18, 5)
        .build();

        assert_eq!(diag.id, "MU001-registry.go:18");
        assert_eq!(diag.rule, "MU001");
        assert_eq!(diag.location.line, 18);
        assert!(diag.note.is_none());
        assert!(diag.provenance.is_empty());
    }

    #[test]
    fn test_diagnostic_with_note() {
        let diag = DiagnosticBuilder::new(
            "MU011",
            Severity::Error,
            "return without unlocking Registry.mu",
            DiagnosticSource::Walker,
        )
        .location("registry.go", 30, 2)
        .note(
            Location {
                file: "registry.go".into(),
                line: 25,
                column: 2,
            },
            "locked here",
        )
        .build();

        let note = diag.note.unwrap();
        assert_eq!(note.location.line, 25);
        assert_eq!(note.text, "locked here");
    }

    #[test]
    fn test_sort_is_deterministic() {
        let mk = |file: &str, line: u32, rule: &str| {
            DiagnosticBuilder::new(rule, Severity::Warning, "m", DiagnosticSource::Walker)
                .location(file, line, 1)
                .build()
        };
        let mut diags = vec![
            mk("b.go", 2, "MU003"),
            mk("a.go", 9, "MU001"),
            mk("b.go", 2, "MU001"),
        ];
        sort_diagnostics(&mut diags);
        assert_eq!(diags[0].location.file, "a.go");
        assert_eq!(diags[1].rule, "MU001");
        assert_eq!(diags[2].rule, "MU003");
    }

    #[test]
    fn test_json_roundtrip() {
        let diag = DiagnosticBuilder::new(
            "MU008",
            Severity::Warning,
            "Counter.mu must be held when calling helper()",
            DiagnosticSource::Interprocedural,
        )
        .location("main.go", 42, 10)
        .provenance(vec!["helper() -> inner()".into()])
        .build();

        let json = serde_json::to_string(&diag).unwrap();
        let parsed: Diagnostic = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, diag);
    }

    #[test]
    fn test_location_display() {
        let loc = Location {
            file: "registry.go".into(),
            line: 18,
            column: 5,
        };
        assert_eq!(loc.to_string(), "registry.go:18:5");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }
}
