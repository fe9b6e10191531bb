pub mod codegen;
pub mod i18n;
pub mod interpolation;
pub mod namespaces;
pub mod pipeline;
pub mod statements;
pub mod tales;

pub use codegen::Codegen;
pub use i18n::{normalize_msgid, I18nContext};
pub use interpolation::{has_interpolation, lower_interpolation, parse_string_template};
pub use namespaces::{
    is_control_namespace, NamespaceEnv, CONTROL_NAMESPACES, I18N_NS, META_NS, METAL_NS, PETAL_NS,
    TAL_NS,
};
pub use pipeline::{compile_bytes, compile_template, compile_with_registry};
pub use statements::{bind_element, split_clauses, BoundElement, Statement, StatementKind};
pub use tales::{
    decode_expression_entities, normalize_string_literals, prepare_code, split_candidates,
    ExpressionCompiler, ExpressionRegistry,
};
