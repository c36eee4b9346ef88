//! Human-readable diagnostic output.
//!
//! One line per report: `file:line:col: message`. In verbose mode each
//! report is followed by its provenance chains, separated by blank lines.

use crate::diagnostic::Diagnostic;

/// Format diagnostics for terminal output.
pub fn format_human(diags: &[Diagnostic], verbose: bool) -> String {
    if diags.is_empty() {
        return "no issues found\n".to_string();
    }

    let mut out = String::new();
    for diag in diags {
        out.push_str(&format_line(diag));
        out.push('\n');
        if verbose {
            for chain in &diag.provenance {
                out.push('\n');
                out.push_str(chain);
                out.push('\n');
            }
        }
    }

    out.push_str(&format!("\n{} issue(s) found\n", diags.len()));
    out
}

/// The single-line form of one diagnostic.
pub fn format_line(diag: &Diagnostic) -> String {
    match &diag.note {
        Some(note) => format!(
            "{}: {} ({} {})",
            diag.location, diag.message, note.text, note.location
        ),
        None => format!("{}: {}", diag.location, diag.message),
    }
}
