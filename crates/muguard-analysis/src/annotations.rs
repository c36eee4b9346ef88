//! Comment directive scanning.
//!
//! Three directives, matched under a configurable prefix (default `mu:`):
//! - `mu:concurrent` — the enclosing function is a concurrent entrypoint
//! - `mu:ignore` — suppress all diagnostics in the enclosing function
//! - `mu:nolint` — suppress diagnostics on the next source line
//!
//! Function-scoped directives bind to the declaration they immediately
//! precede or sit inside; line-scoped directives bind to the following
//! line in the same file.

use crate::context::PassContext;
use muguard_ir::ir::{Function, Span};
use std::collections::{BTreeMap, BTreeSet};

/// Parsed directives for the current package.
#[derive(Debug, Default)]
pub struct Annotations {
    /// Functions marked as concurrent entrypoints.
    pub concurrent: BTreeSet<String>,
    /// Functions whose diagnostics are suppressed entirely.
    pub ignored: BTreeSet<String>,
    /// File path → suppressed line numbers.
    pub nolint: BTreeMap<String, BTreeSet<u32>>,
}

impl Annotations {
    /// True if reporting is suppressed for this function and position.
    pub fn is_suppressed(&self, func: &str, span: &Option<Span>) -> bool {
        if self.ignored.contains(func) {
            return true;
        }
        if let Some(s) = span {
            if let Some(lines) = self.nolint.get(&s.file) {
                if lines.contains(&s.start_line) {
                    return true;
                }
            }
        }
        false
    }
}

/// A directive occurrence: bare keyword or keyword plus free text.
fn matches_directive(text: &str, directive: &str) -> bool {
    text == directive || text.strip_prefix(directive).is_some_and(|rest| rest.starts_with(' '))
}

/// Strip comment markers and surrounding whitespace.
fn comment_payload(text: &str) -> &str {
    text.trim_start()
        .trim_start_matches("//")
        .trim_start_matches("/*")
        .trim_end_matches("*/")
        .trim()
}

impl<'a> PassContext<'a> {
    /// Scan all file comments and populate the annotation tables.
    pub fn parse_annotations(&mut self) {
        let mut ann = Annotations::default();
        let ann_cfg = &self.config.annotations;
        let concurrent = ann_cfg.concurrent_directive();
        let ignore = ann_cfg.ignore_directive();
        let nolint = ann_cfg.nolint_directive();

        for file in &self.pkg.files {
            // Function declarations in this file, in declaration order.
            let mut decls: Vec<&Function> = self
                .pkg
                .functions
                .iter()
                .filter(|f| {
                    f.span
                        .as_ref()
                        .is_some_and(|s| s.file == file.path)
                })
                .collect();
            decls.sort_by_key(|f| f.span.as_ref().map(|s| s.start_line).unwrap_or(0));

            for comment in &file.comments {
                let text = comment_payload(&comment.text);

                if matches_directive(text, &concurrent) {
                    if let Some(func) = find_func_for_comment(&decls, comment.line) {
                        ann.concurrent.insert(func.name.clone());
                    }
                } else if matches_directive(text, &ignore) {
                    if let Some(func) = find_func_for_comment(&decls, comment.line) {
                        ann.ignored.insert(func.name.clone());
                    }
                } else if matches_directive(text, &nolint) {
                    ann.nolint
                        .entry(file.path.clone())
                        .or_default()
                        .insert(comment.line + 1);
                }
            }
        }

        self.annotations = ann;
    }
}

/// Find the function a function-scoped directive binds to: the declaration
/// starting on the comment line or the next line, or the function whose
/// span contains the comment.
fn find_func_for_comment<'f>(decls: &[&'f Function], comment_line: u32) -> Option<&'f Function> {
    for func in decls {
        let span = func.span.as_ref()?;
        if span.start_line >= comment_line && span.start_line <= comment_line + 1 {
            return Some(func);
        }
        if comment_line >= span.start_line && comment_line <= span.end_line {
            return Some(func);
        }
    }
    None
}
