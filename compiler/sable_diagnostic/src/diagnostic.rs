use std::fmt;

use sable_ir::Span;

use crate::ErrorCode;

/// Severity level for diagnostics.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Severity {
    Error,
    Warning,
    Note,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Note => write!(f, "note"),
        }
    }
}

/// A labeled span with a message.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Label {
    pub span: Span,
    pub message: String,
    pub is_primary: bool,
}

impl Label {
    pub fn primary(span: Span, message: impl Into<String>) -> Self {
        Label {
            span,
            message: message.into(),
            is_primary: true,
        }
    }

    pub fn secondary(span: Span, message: impl Into<String>) -> Self {
        Label {
            span,
            message: message.into(),
            is_primary: false,
        }
    }
}

/// A single diagnostic: severity, code, message, labeled spans.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub code: ErrorCode,
    pub message: String,
    pub labels: Vec<Label>,
    pub notes: Vec<String>,
}

impl Diagnostic {
    /// Create an error diagnostic with a primary span.
    pub fn error(code: ErrorCode, span: Span, message: impl Into<String>) -> Self {
        let message = message.into();
        Diagnostic {
            severity: Severity::Error,
            code,
            labels: vec![Label::primary(span, message.clone())],
            message,
            notes: Vec::new(),
        }
    }

    /// Create a warning diagnostic with a primary span.
    pub fn warning(code: ErrorCode, span: Span, message: impl Into<String>) -> Self {
        let message = message.into();
        Diagnostic {
            severity: Severity::Warning,
            code,
            labels: vec![Label::primary(span, message.clone())],
            message,
            notes: Vec::new(),
        }
    }

    /// Attach a free-standing note.
    #[must_use]
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Attach a secondary labeled span.
    #[must_use]
    pub fn with_label(mut self, label: Label) -> Self {
        self.labels.push(label);
        self
    }

    /// The primary span, if any label is primary.
    pub fn primary_span(&self) -> Option<Span> {
        self.labels.iter().find(|l| l.is_primary).map(|l| l.span)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]: {}", self.severity, self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_has_primary_span() {
        let d = Diagnostic::error(ErrorCode::AsmOperand, Span::new(3, 9), "bad operand");
        assert_eq!(d.severity, Severity::Error);
        assert_eq!(d.primary_span(), Some(Span::new(3, 9)));
    }

    #[test]
    fn display_format() {
        let d = Diagnostic::error(ErrorCode::AsmOperand, Span::DUMMY, "bad operand");
        assert_eq!(d.to_string(), "error[L0002]: bad operand");
    }
}
