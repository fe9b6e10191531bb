pub mod cache;
pub mod loader;
pub mod template;

pub use cache::DiskCache;
pub use loader::TemplateLoader;
pub use template::Template;

pub use petal_core::{value_from_json, Settings, TemplateError, TplValue};
pub use petal_runtime::{MacroResolver, NullTranslator, RenderOptions, Translator};
