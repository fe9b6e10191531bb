pub use petal_core::normalize_msgid;

/// Lexically inherited translation context. Macro and slot boundaries
/// do not reset it; it follows the source tree, not the render tree.
#[derive(Debug, Clone, Default)]
pub struct I18nContext {
    pub domain: Option<String>,
    pub context: Option<String>,
    pub source: Option<String>,
    pub target: Option<String>,
}
