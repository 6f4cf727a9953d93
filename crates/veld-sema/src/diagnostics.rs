//! Semantic diagnostics produced inside phase transformations.
//!
//! Ordinary semantic errors (unresolved names, type mismatches) do not
//! abort resolution: the transformation records them in a sink and the
//! declaration still advances its phase — a declaration can be resolved
//! and erroneous at the same time. Programming-contract violations go
//! through [`crate::resolve::error::ResolveError`] instead.

use std::fmt;

use crate::foundation::Span;

/// Category of semantic diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Reference to a name with no declaration in scope.
    UnresolvedName,
    /// Expression type incompatible with its context.
    TypeMismatch,
    /// Assignment target is not assignable.
    InvalidAssignment,
    /// `this`/`super` used where no receiver is in scope.
    NoReceiverInScope,
}

impl DiagnosticKind {
    pub fn name(self) -> &'static str {
        match self {
            DiagnosticKind::UnresolvedName => "unresolved name",
            DiagnosticKind::TypeMismatch => "type mismatch",
            DiagnosticKind::InvalidAssignment => "invalid assignment",
            DiagnosticKind::NoReceiverInScope => "no receiver in scope",
        }
    }
}

/// Diagnostic severity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Note,
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Note => write!(f, "note"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
        }
    }
}

/// A single semantic diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub span: Span,
    pub message: String,
    pub notes: Vec<String>,
}

impl Diagnostic {
    pub fn error(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            kind,
            severity: Severity::Error,
            span,
            message: message.into(),
            notes: Vec::new(),
        }
    }

    pub fn warning(kind: DiagnosticKind, span: Span, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(kind, span, message)
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.kind.name(), self.message)
    }
}

/// Accumulates diagnostics for one resolution request.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    diagnostics: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    /// Hand the collected diagnostics to the downstream consumer.
    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span() -> Span {
        Span::zero(0)
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::error(DiagnosticKind::UnresolvedName, span(), "unresolved 'foo'");
        let text = d.to_string();
        assert!(text.contains("error"));
        assert!(text.contains("unresolved name"));
        assert!(text.contains("unresolved 'foo'"));
    }

    #[test]
    fn test_sink_accumulates() {
        let mut sink = DiagnosticSink::new();
        assert!(sink.is_empty());

        sink.push(Diagnostic::error(DiagnosticKind::TypeMismatch, span(), "boom"));
        sink.push(
            Diagnostic::warning(DiagnosticKind::UnresolvedName, span(), "odd")
                .with_note("check imports"),
        );

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.into_vec().len(), 2);
    }
}
