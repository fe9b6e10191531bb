pub mod bridge;
pub mod engine;
pub mod escape;
pub mod repeat;
pub mod scope;
pub mod translate;

pub use engine::{MacroResolver, RenderEngine, RenderOptions};
pub use escape::{escape_attribute, escape_html};
pub use repeat::{RepeatDict, RepeatItem};
pub use scope::ScopeStack;
pub use translate::{NullTranslator, Translator};
