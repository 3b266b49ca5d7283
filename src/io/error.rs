// src/io/error.rs

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Hard failures. Everything else the reader meets is downgraded to a
/// [`Diagnostic`] and the parse keeps going.
#[derive(Debug, Error)]
pub enum CifError {
    #[error("I/O operation failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
    #[error("JSON serialization failed: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

/// Non-fatal problems found while reading a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DiagnosticKind {
    /// Unexpected token shape, e.g. a key without a leading underscore.
    GrammarWarning,
    /// A value was missing where one was required; the record is skipped.
    IncompleteRecord,
    /// A recognized loop without any usable column combination.
    UnsupportedLoopShape,
    /// A symmetry operator string that could not be parsed.
    SymmetryOperatorParse,
    /// An atom wave vector that matches no combination of cell wave vectors.
    ModulationVectorMismatch,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DiagnosticKind::GrammarWarning => "grammar",
            DiagnosticKind::IncompleteRecord => "incomplete record",
            DiagnosticKind::UnsupportedLoopShape => "unsupported loop",
            DiagnosticKind::SymmetryOperatorParse => "symmetry operator",
            DiagnosticKind::ModulationVectorMismatch => "modulation vector",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    /// 1-based input line, or 0 when the problem is not tied to a line.
    pub line: usize,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line > 0 {
            write!(f, "[{}] line {}: {}", self.kind, self.line, self.message)
        } else {
            write!(f, "[{}] {}", self.kind, self.message)
        }
    }
}

/// Collects diagnostics for one invocation and mirrors each one to the log.
#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&mut self, kind: DiagnosticKind, line: usize, message: impl Into<String>) {
        let d = Diagnostic {
            kind,
            line,
            message: message.into(),
        };
        log::warn!("{}", d);
        self.items.push(d);
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|d| d.kind == kind).count()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.items
    }
}
