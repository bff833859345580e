//! Error types and reporting

use crate::ast::Span;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, CheckError>;

/// Checker error
#[derive(Debug, Error)]
pub enum CheckError {
    /// The front end handed over an AST with unresolved type slots.
    #[error("Invalid AST at {span:?}: {message}")]
    InvalidAst { message: String, span: Span },

    /// The program uses a construct the encoding cannot express.
    #[error("Encoding error: {message}")]
    Encoding { message: String },

    /// The solver subprocess misbehaved (not a timeout; timeouts are
    /// an Unknown verdict, not an error).
    #[error("Solver error: {message}")]
    Solver { message: String },

    #[error("IO error: {message}")]
    Io { message: String },

    #[error("JSON error: {message}")]
    Json { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl CheckError {
    pub fn invalid_ast(message: impl Into<String>, span: Span) -> Self {
        Self::InvalidAst {
            message: message.into(),
            span,
        }
    }

    pub fn encoding(message: impl Into<String>) -> Self {
        Self::Encoding {
            message: message.into(),
        }
    }

    pub fn unsupported_type(owner: &str, ty: impl std::fmt::Display) -> Self {
        Self::Encoding {
            message: format!("unsupported type for `{owner}`: {ty}"),
        }
    }

    pub fn unknown_variable(name: &str) -> Self {
        Self::Internal {
            message: format!("unknown variable `{name}`"),
        }
    }

    pub fn solver(message: impl Into<String>) -> Self {
        Self::Solver {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn span(&self) -> Option<Span> {
        match self {
            Self::InvalidAst { span, .. } => Some(*span),
            Self::Encoding { .. }
            | Self::Solver { .. }
            | Self::Io { .. }
            | Self::Json { .. }
            | Self::Internal { .. } => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::InvalidAst { message, .. }
            | Self::Encoding { message }
            | Self::Solver { message }
            | Self::Io { message }
            | Self::Json { message }
            | Self::Internal { message } => message,
        }
    }
}

impl From<std::io::Error> for CheckError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for CheckError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json {
            message: err.to_string(),
        }
    }
}

/// Report error with ariadne
pub fn report_error(filename: &str, source: &str, error: &CheckError) {
    use ariadne::{Color, Label, Report, ReportKind, Source};

    let kind = match error {
        CheckError::InvalidAst { .. } => "Invalid AST",
        CheckError::Encoding { .. } => "Encoding",
        CheckError::Solver { .. } => "Solver",
        CheckError::Io { .. } => "IO",
        CheckError::Json { .. } => "JSON",
        CheckError::Internal { .. } => "Internal",
    };

    if let Some(span) = error.span() {
        let result = Report::build(ReportKind::Error, (filename, span.start..span.end))
            .with_message(format!("{kind} error"))
            .with_label(
                Label::new((filename, span.start..span.end))
                    .with_message(error.message())
                    .with_color(Color::Red),
            )
            .finish()
            .print((filename, Source::from(source)));
        if result.is_err() {
            eprintln!("{kind} error at {}: {}", span, error.message());
        }
    } else {
        let result = Report::build(ReportKind::Error, (filename, 0..0))
            .with_message(format!("{kind} error: {}", error.message()))
            .finish()
            .print((filename, Source::from(source)));
        if result.is_err() {
            eprintln!("{kind} error: {}", error.message());
        }
    }
}
