use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::SourceSpan;
use crate::value::TplValue;

/// The compiled artifact: a serializable tagged-variant tree the
/// runtime interprets. Because every expression is carried as a
/// rewritten source string, compiling the same source twice with the
/// same settings yields a byte-identical serialized program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub source_name: String,
    pub engine_version: String,
    pub source_digest: u64,
    pub settings_digest: u64,
    pub root: Vec<IrNode>,
    pub macros: BTreeMap<String, MacroIr>,
    /// Kept when compiled in debug mode for richer diagnostics.
    pub source: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroIr {
    pub name: String,
    /// Slot names defined inside the macro body, unique per macro.
    pub slots: Vec<String>,
    pub body: Vec<IrNode>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IrNode {
    /// A literal markup run, emitted verbatim.
    Static { text: String },
    /// Evaluate an expression and insert the result.
    Insert(InsertIr),
    Element(Box<ElementIr>),
    /// A lexical scope frame introduced by `define`.
    Define(DefineIr),
    Condition {
        expr: ExpressionIr,
        body: Vec<IrNode>,
        span: SourceSpan,
    },
    Repeat(RepeatIr),
    /// Evaluates the switch value and opens a case frame; at most one
    /// nested `Case` body renders (first match wins).
    Switch {
        expr: ExpressionIr,
        body: Vec<IrNode>,
        span: SourceSpan,
    },
    Case {
        expr: ExpressionIr,
        body: Vec<IrNode>,
        span: SourceSpan,
    },
    /// Error boundary for `on-error`: render `body`; on a wrapped
    /// render failure substitute the element with the handler's
    /// result, keeping the static fallback tag.
    OnError {
        handler: ExpressionIr,
        structure: bool,
        fallback: Option<FallbackTag>,
        body: Vec<IrNode>,
        span: SourceSpan,
    },
    /// `<?python … ?>` statement block; bindings written by the block
    /// persist in the current scope up to the nearest macro boundary.
    CodeBlock { code: String, span: SourceSpan },
    UseMacro(UseMacroIr),
    DefineSlot {
        name: String,
        default: Vec<IrNode>,
        span: SourceSpan,
    },
    Translate(TranslateIr),
    /// Named capture subtemplate inside a translated element.
    I18nName {
        name: String,
        body: Vec<IrNode>,
        span: SourceSpan,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertIr {
    pub expr: ExpressionIr,
    /// False when inserted as structure.
    pub escape: bool,
    /// Rendered instead when the expression yields the default
    /// sentinel.
    pub default: Vec<IrNode>,
    /// Route plain strings through the translation callable
    /// (implicit-i18n mode).
    pub translate: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefineBinding {
    /// One name, or several for tuple unpacking by position.
    pub names: Vec<String>,
    pub expr: ExpressionIr,
    pub global: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefineIr {
    pub bindings: Vec<DefineBinding>,
    pub body: Vec<IrNode>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepeatIr {
    /// One name, or several for tuple unpacking by position.
    pub names: Vec<String>,
    pub expr: ExpressionIr,
    pub body: Vec<IrNode>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OmitTagIr {
    Never,
    Always,
    Expr(ExpressionIr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementIr {
    pub tag: String,
    pub attributes: Vec<AttributeIr>,
    pub body: Vec<IrNode>,
    pub omit: OmitTagIr,
    pub self_closing: bool,
    pub span: SourceSpan,
}

/// Static fallback form of an element, used by the `on-error`
/// substitution (dynamic attributes dropped).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackTag {
    pub tag: String,
    /// (name, raw value, quote, leading space, eq)
    pub attributes: Vec<(String, String, String, String, String)>,
    pub self_closing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValueIr {
    /// Raw source text between the quotes, emitted verbatim.
    Static { raw: String },
    /// A `tal:attributes` entry. `static_default` is the original
    /// static raw value the default sentinel reverts to.
    Dynamic {
        expr: ExpressionIr,
        static_default: Option<String>,
    },
    /// `${…}` in attribute position.
    Interpolated { parts: Vec<TextPartIr> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeIr {
    /// Empty for a nameless dict-typed `tal:attributes` entry that
    /// splices its map entries as attributes.
    pub name: String,
    pub value: AttrValueIr,
    pub quote: String,
    pub space: String,
    pub eq: String,
    /// Subject to boolean rendering (`name="name"` / omission).
    pub boolean: bool,
    /// Translate the rendered value; the string is the explicit msgid,
    /// empty meaning "derive from the value text".
    pub translate: Option<String>,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TextPartIr {
    Static(String),
    Expr(ExpressionIr),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UseMacroIr {
    pub expr: ExpressionIr,
    pub fillers: BTreeMap<String, Vec<IrNode>>,
    /// True for `extend-macro`: the current filler layers stay
    /// visible inside the used macro.
    pub extend: bool,
    pub span: SourceSpan,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranslateIr {
    /// Explicit message id; derived from the normalized body text when
    /// absent.
    pub msgid: Option<String>,
    pub domain: Option<String>,
    pub context: Option<String>,
    pub source_language: Option<String>,
    pub target_language: Option<String>,
    /// `i18n:data` expression; its value is passed as a message
    /// descriptor when present.
    pub data: Option<ExpressionIr>,
    pub body: Vec<IrNode>,
    pub span: SourceSpan,
}

/// A compiled expression: the literal source slice for diagnostics
/// plus an ordered pipe-fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionIr {
    pub source: String,
    pub span: SourceSpan,
    pub candidates: Vec<ExprCandidate>,
}

impl ExpressionIr {
    pub fn single(source: impl Into<String>, span: SourceSpan, candidate: ExprCandidate) -> Self {
        Self {
            source: source.into(),
            span,
            candidates: vec![candidate],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExprCandidate {
    /// A `python:` payload, evaluated by the embedded expression
    /// engine. The source is stored entity-decoded and
    /// separator-unescaped.
    Code { source: String },
    /// A `string:` payload with `${…}` substitutions.
    StringTemplate { parts: Vec<TextPartIr> },
    Exists { inner: Box<ExprCandidate> },
    Not { inner: Box<ExprCandidate> },
    /// Dotted path resolved at render time against the template
    /// namespace.
    Import { path: String },
    /// Template path resolved relative to the current template,
    /// yielding a macro reference.
    Load { path: String },
    Structure { inner: Box<ExprCandidate> },
    Literal { value: TplValue },
}
