//! Diagnostic accumulation for one compilation.
//!
//! Passes and the driver push notes into a [`DiagnosticScope`]; on failure
//! the driver renders everything it gathered next to the offending module.

use std::fmt;

use pyrite_ir::Location;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => f.write_str("error"),
            Severity::Warning => f.write_str("warning"),
            Severity::Note => f.write_str("note"),
        }
    }
}

/// One accumulated diagnostic.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub stage: Option<String>,
    pub message: String,
    pub location: Option<Location>,
}

/// Accumulates diagnostics for the duration of a compilation.
#[derive(Default)]
pub struct DiagnosticScope {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, severity: Severity, stage: Option<&str>, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            stage: stage.map(str::to_owned),
            message: message.into(),
            location: None,
        });
    }

    pub fn error(&mut self, stage: &str, message: impl Into<String>) {
        self.emit(Severity::Error, Some(stage), message);
    }

    pub fn note(&mut self, stage: &str, message: impl Into<String>) {
        self.emit(Severity::Note, Some(stage), message);
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    /// Render all accumulated diagnostics.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for d in &self.diagnostics {
            match &d.stage {
                Some(stage) => {
                    out.push_str(&format!("{} [{}]: {}\n", d.severity, stage, d.message))
                }
                None => out.push_str(&format!("{}: {}\n", d.severity, d.message)),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errors_are_detected_and_rendered() {
        let mut scope = DiagnosticScope::new();
        assert!(!scope.has_errors());
        scope.note("plier-to-std", "resolved 3 calls");
        assert!(!scope.has_errors());
        scope.error("lower-to-gpu", "device conflict");
        assert!(scope.has_errors());
        let rendered = scope.render();
        assert!(rendered.contains("note [plier-to-std]: resolved 3 calls"));
        assert!(rendered.contains("error [lower-to-gpu]: device conflict"));
    }
}
