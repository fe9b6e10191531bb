use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::SourceSpan;

/// Maximum width of the filename shown in diagnostics.
const FILENAME_DISPLAY_WIDTH: usize = 32;

/// Maximum width of a variable preview line in render errors.
pub const VARIABLE_PREVIEW_WIDTH: usize = 64;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    pub span: Option<SourceSpan>,
    pub filename: Option<String>,
    pub excerpt: Option<String>,
}

impl ErrorDetail {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_span(message: impl Into<String>, span: SourceSpan) -> Self {
        Self {
            message: message.into(),
            span: Some(span),
            ..Self::default()
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(filename) = &self.filename {
            write!(f, "\n - Filename: {}", truncate_filename(filename))?;
        }
        if let Some(span) = &self.span {
            write!(
                f,
                "\n - Location: ({}:{})",
                span.start.line, span.start.column
            )?;
        }
        if let Some(excerpt) = &self.excerpt {
            write!(f, "\n - Source:\n{}", excerpt)?;
        }
        Ok(())
    }
}

/// The kind of the original failure an expression raised at render
/// time. The source language expressed "inherit from the original
/// exception class"; here callers pattern-match on the kind instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RenderErrorKind {
    /// An undefined variable or function (`NameError`).
    Name,
    /// A failed member access (`AttributeError`).
    Attribute,
    /// A failed keyed or indexed access (`LookupError`).
    Lookup,
    /// An operation applied to an unsuitable value (`TypeError`).
    Type,
    /// An invalid value (`ValueError`).
    Value,
    /// A failed `import:` resolution.
    Import,
    /// Everything else the evaluator can raise.
    Other,
    /// Internal evaluator failure; never wrapped, never caught by the
    /// pipe operator (the `RuntimeError` analogue).
    Internal,
}

impl RenderErrorKind {
    /// The set the pipe fallback operator and `exists:` swallow.
    pub fn is_fallback_catchable(self) -> bool {
        matches!(
            self,
            Self::Name | Self::Attribute | Self::Lookup | Self::Type | Self::Value
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderError {
    pub original: RenderErrorKind,
    pub message: String,
    /// Literal source slice of the failing expression.
    pub expression: String,
    pub filename: Option<String>,
    pub span: Option<SourceSpan>,
    pub excerpt: Option<String>,
    /// Bounded single-line previews of the scope at failure time.
    pub variables: BTreeMap<String, String>,
    /// Wrapping chain, innermost last in display order.
    pub cause: Option<Box<RenderError>>,
}

impl RenderError {
    pub fn new(
        original: RenderErrorKind,
        message: impl Into<String>,
        expression: impl Into<String>,
    ) -> Self {
        Self {
            original,
            message: message.into(),
            expression: expression.into(),
            filename: None,
            span: None,
            excerpt: None,
            variables: BTreeMap::new(),
            cause: None,
        }
    }

    pub fn is_original(&self, kind: RenderErrorKind) -> bool {
        self.original == kind
            || self
                .cause
                .as_ref()
                .map(|cause| cause.is_original(kind))
                .unwrap_or(false)
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        write!(f, "\n - Expression: \"{}\"", self.expression)?;
        if let Some(filename) = &self.filename {
            write!(f, "\n - Filename: {}", truncate_filename(filename))?;
        }
        if let Some(span) = &self.span {
            write!(
                f,
                "\n - Location: ({}:{})",
                span.start.line, span.start.column
            )?;
        }
        if let Some(excerpt) = &self.excerpt {
            write!(f, "\n - Source:\n{}", excerpt)?;
        }
        if !self.variables.is_empty() {
            write!(f, "\n - Arguments:")?;
            for (name, preview) in &self.variables {
                write!(f, "\n     {}: {}", name, preview)?;
            }
        }
        if let Some(cause) = &self.cause {
            write!(f, "\n{}", cause)?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Serialize, Deserialize)]
pub enum TemplateError {
    /// Tokenizer or markup parser failure.
    #[error("parse error: {0}")]
    Parse(ErrorDetail),
    /// Illegal statement combination, ordering violation, unknown
    /// control attribute or reserved-name collision.
    #[error("language error: {0}")]
    Language(ErrorDetail),
    /// Invalid expression payload (unknown type prefix, syntax error).
    #[error("expression error: {0}")]
    Expression(ErrorDetail),
    /// An expression failed while rendering.
    #[error("render error: {0}")]
    Render(Box<RenderError>),
}

impl TemplateError {
    pub fn parse(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::Parse(ErrorDetail::with_span(message, span))
    }

    pub fn language(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::Language(ErrorDetail::with_span(message, span))
    }

    pub fn expression(message: impl Into<String>, span: SourceSpan) -> Self {
        Self::Expression(ErrorDetail::with_span(message, span))
    }

    pub fn render(error: RenderError) -> Self {
        Self::Render(Box::new(error))
    }

    pub fn span(&self) -> Option<SourceSpan> {
        match self {
            Self::Parse(detail) | Self::Language(detail) | Self::Expression(detail) => detail.span,
            Self::Render(error) => error.span,
        }
    }

    /// Attach the template filename and a source excerpt to whichever
    /// variant is carried; diagnostics always cite literal input.
    pub fn annotate(mut self, filename: &str, source: &str) -> Self {
        let excerpt_of = |span: &SourceSpan| crate::types::excerpt_with_caret(source, &span.start);
        match &mut self {
            Self::Parse(detail) | Self::Language(detail) | Self::Expression(detail) => {
                detail.filename.get_or_insert_with(|| filename.to_string());
                if detail.excerpt.is_none() {
                    detail.excerpt = detail.span.as_ref().map(excerpt_of);
                }
            }
            Self::Render(error) => {
                error.filename.get_or_insert_with(|| filename.to_string());
                if error.excerpt.is_none() {
                    error.excerpt = error.span.as_ref().map(excerpt_of);
                }
            }
        }
        self
    }
}

fn truncate_filename(filename: &str) -> String {
    let count = filename.chars().count();
    if count <= FILENAME_DISPLAY_WIDTH {
        return filename.to_string();
    }
    let tail: String = filename
        .chars()
        .skip(count - (FILENAME_DISPLAY_WIDTH - 3))
        .collect();
    format!("...{}", tail)
}
