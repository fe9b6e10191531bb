pub mod config;
pub mod error;
pub mod program;
pub mod types;
pub mod value;

pub use config::{
    digest_bytes, env_flag, parse_flag, Fnv64, Settings, BUILTIN_NAMES,
    DEFAULT_BOOLEAN_ATTRIBUTES, ENGINE_VERSION, RESERVED_NAMES,
};
pub use error::{
    ErrorDetail, RenderError, RenderErrorKind, TemplateError, VARIABLE_PREVIEW_WIDTH,
};
pub use program::{
    AttrValueIr, AttributeIr, DefineBinding, DefineIr, ElementIr, ExprCandidate, ExpressionIr,
    FallbackTag, InsertIr, IrNode, MacroIr, OmitTagIr, Program, RepeatIr, TextPartIr, TranslateIr,
    UseMacroIr,
};
pub use types::{excerpt_with_caret, SourceLocation, SourceSpan};
pub use value::{normalize_msgid, value_from_json, MacroHandle, MessageRecord, TplValue};
