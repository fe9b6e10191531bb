use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::value::TplValue;

/// Engine version constant; part of every cache key so a changed
/// runtime invalidates persisted artifacts.
pub const ENGINE_VERSION: &str = "petal.v3";

/// Default set of attribute names subject to boolean rendering.
pub const DEFAULT_BOOLEAN_ATTRIBUTES: &[&str] = &[
    "autofocus", "autoplay", "checked", "controls", "default", "defer", "disabled", "formnovalidate",
    "hidden", "ismap", "loop", "multiple", "muted", "novalidate", "open", "readonly", "required",
    "reversed", "selected",
];

/// Names reserved for the compiler's own machinery; user defines may
/// not target them (a hard error in strict mode).
pub const RESERVED_NAMES: &[&str] = &["econtext", "rcontext", "translate", "decode", "convert"];

/// Built-in scope names that user defines shadow but never replace.
pub const BUILTIN_NAMES: &[&str] = &["float", "int", "len", "None", "True", "False", "default"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub auto_reload: bool,
    pub debug: bool,
    /// Cook at construction instead of on first render.
    pub eager: bool,
    pub strict: bool,
    /// Explicit byte-input decoding; negotiated from the XML
    /// declaration when absent.
    pub encoding: Option<String>,
    pub boolean_attributes: BTreeSet<String>,
    pub implicit_i18n_translate: bool,
    pub implicit_i18n_attributes: BTreeSet<String>,
    pub trim_attribute_space: bool,
    pub enable_data_attributes: bool,
    pub enable_comment_interpolation: bool,
    pub restricted_namespace: bool,
    pub extra_builtins: BTreeMap<String, TplValue>,
    pub search_path: Vec<PathBuf>,
    pub default_expression: String,
    pub cache_directory: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_reload: false,
            debug: false,
            eager: false,
            strict: false,
            encoding: None,
            boolean_attributes: DEFAULT_BOOLEAN_ATTRIBUTES
                .iter()
                .map(|name| name.to_string())
                .collect(),
            implicit_i18n_translate: false,
            implicit_i18n_attributes: BTreeSet::new(),
            trim_attribute_space: false,
            enable_data_attributes: false,
            enable_comment_interpolation: true,
            restricted_namespace: false,
            extra_builtins: BTreeMap::new(),
            search_path: Vec::new(),
            default_expression: "python".to_string(),
            cache_directory: None,
        }
    }
}

impl Settings {
    /// Process defaults: the environment layer applied over
    /// `Settings::default()`.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        if let Some(value) = env_flag("PETAL_DEBUG") {
            settings.debug = value;
        }
        if let Some(value) = env_flag("PETAL_EAGER") {
            settings.eager = value;
        }
        if let Some(value) = env_flag("PETAL_RELOAD") {
            settings.auto_reload = value;
        }
        if let Some(value) = env_flag("PETAL_STRICT") {
            settings.strict = value;
        }
        // Structure validation rides on strict mode.
        if let Some(value) = env_flag("PETAL_VALIDATE") {
            settings.strict = value;
        }
        if let Ok(directory) = std::env::var("PETAL_CACHE") {
            if !directory.trim().is_empty() {
                settings.cache_directory = Some(PathBuf::from(directory));
            }
        }
        settings
    }

    /// Stable digest over every option that affects code generation,
    /// plus the engine version. Part of the disk-cache key.
    pub fn codegen_digest(&self) -> u64 {
        let mut digest = Fnv64::new();
        digest.write(ENGINE_VERSION.as_bytes());
        digest.write(&[
            self.debug as u8,
            self.strict as u8,
            self.implicit_i18n_translate as u8,
            self.trim_attribute_space as u8,
            self.enable_data_attributes as u8,
            self.enable_comment_interpolation as u8,
            self.restricted_namespace as u8,
        ]);
        for name in &self.boolean_attributes {
            digest.write(name.as_bytes());
            digest.write(b";");
        }
        for name in &self.implicit_i18n_attributes {
            digest.write(name.as_bytes());
            digest.write(b";");
        }
        digest.write(self.default_expression.as_bytes());
        digest.finish()
    }
}

/// Booleanish environment variable: `1`/`true`/`on` enable,
/// `0`/`false`/`off` disable (case-insensitive); anything else is
/// ignored.
pub fn env_flag(name: &str) -> Option<bool> {
    let value = std::env::var(name).ok()?;
    parse_flag(&value)
}

pub fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

/// FNV-1a, 64-bit. Deterministic across processes, unlike the standard
/// library's randomized hasher, which makes it usable for cache file
/// names.
#[derive(Debug, Clone)]
pub struct Fnv64 {
    state: u64,
}

impl Fnv64 {
    const OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;

    pub fn new() -> Self {
        Self {
            state: Self::OFFSET_BASIS,
        }
    }

    pub fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.state ^= u64::from(*byte);
            self.state = self.state.wrapping_mul(Self::PRIME);
        }
    }

    pub fn finish(&self) -> u64 {
        self.state
    }
}

impl Default for Fnv64 {
    fn default() -> Self {
        Self::new()
    }
}

pub fn digest_bytes(bytes: &[u8]) -> u64 {
    let mut digest = Fnv64::new();
    digest.write(bytes);
    digest.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_parsing_accepts_the_documented_spellings() {
        assert_eq!(parse_flag("1"), Some(true));
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag(" on "), Some(true));
        assert_eq!(parse_flag("0"), Some(false));
        assert_eq!(parse_flag("False"), Some(false));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }

    #[test]
    fn digest_tracks_codegen_relevant_options_only() {
        let base = Settings::default();
        let mut strict = base.clone();
        strict.strict = true;
        assert_ne!(base.codegen_digest(), strict.codegen_digest());

        let mut reload_only = base.clone();
        reload_only.auto_reload = true;
        assert_eq!(base.codegen_digest(), reload_only.codegen_digest());
    }

    #[test]
    fn digest_is_stable_across_instances() {
        assert_eq!(
            Settings::default().codegen_digest(),
            Settings::default().codegen_digest()
        );
        assert_eq!(digest_bytes(b"abc"), digest_bytes(b"abc"));
        assert_ne!(digest_bytes(b"abc"), digest_bytes(b"abd"));
    }

    #[test]
    fn default_boolean_set_contains_the_form_attributes() {
        let settings = Settings::default();
        assert!(settings.boolean_attributes.contains("checked"));
        assert!(settings.boolean_attributes.contains("selected"));
        assert!(!settings.boolean_attributes.contains("href"));
    }
}
