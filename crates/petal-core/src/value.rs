use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// A translatable message descriptor. Insertion positions treat any
/// `Message` value as a request to call the translation backend rather
/// than stringify directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub msgid: String,
    pub domain: Option<String>,
    pub default: Option<String>,
    pub mapping: BTreeMap<String, String>,
}

impl MessageRecord {
    pub fn new(msgid: impl Into<String>) -> Self {
        Self {
            msgid: msgid.into(),
            domain: None,
            default: None,
            mapping: BTreeMap::new(),
        }
    }
}

/// Normalize a derived message identifier: collapse interior
/// whitespace runs to single spaces and trim the ends.
pub fn normalize_msgid(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Reference to a macro: the result of a `load:` expression or of the
/// `macros` accessor. `template` is a resolver path (current template
/// when absent); `name` selects a named macro (whole template when
/// absent).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MacroHandle {
    pub template: Option<String>,
    pub name: Option<String>,
}

/// The runtime value model. The dynamic object model of the template
/// language is a closed variant: strings, pre-escaped markup, numbers,
/// booleans, none, mappings, sequences, message descriptors and macro
/// references. `Default` is the distinguished sentinel meaning "use the
/// literal template text here"; its identity is the variant itself, so
/// it is a single global constant by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TplValue {
    None,
    Default,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Markup(String),
    Array(Vec<TplValue>),
    Map(BTreeMap<String, TplValue>),
    Message(Box<MessageRecord>),
    Macro(MacroHandle),
}

impl TplValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Default => "default",
            Self::Bool(_) => "boolean",
            Self::Int(_) => "integer",
            Self::Float(_) => "float",
            Self::Str(_) => "string",
            Self::Markup(_) => "markup",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
            Self::Message(_) => "message",
            Self::Macro(_) => "macro",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(value) | Self::Markup(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            // The sentinel reads as truthy in condition position.
            Self::Default => true,
            Self::Bool(value) => *value,
            Self::Int(value) => *value != 0,
            Self::Float(value) => *value != 0.0,
            Self::Str(value) | Self::Markup(value) => !value.is_empty(),
            Self::Array(values) => !values.is_empty(),
            Self::Map(values) => !values.is_empty(),
            Self::Message(_) | Self::Macro(_) => true,
        }
    }

    /// Stringification used for content insertion and attribute values.
    /// `None` and `Default` have no text form here; insertion positions
    /// handle them before calling this.
    pub fn to_text(&self) -> String {
        match self {
            Self::None | Self::Default => String::new(),
            Self::Bool(value) => value.to_string(),
            Self::Int(value) => value.to_string(),
            Self::Float(value) => {
                if value.fract() == 0.0 && value.is_finite() {
                    format!("{:.1}", value)
                } else {
                    value.to_string()
                }
            }
            Self::Str(value) | Self::Markup(value) => value.clone(),
            Self::Array(values) => {
                let parts = values.iter().map(TplValue::to_text).collect::<Vec<_>>();
                format!("[{}]", parts.join(", "))
            }
            Self::Map(values) => {
                let parts = values
                    .iter()
                    .map(|(key, value)| format!("{}: {}", key, value.to_text()))
                    .collect::<Vec<_>>();
                format!("{{{}}}", parts.join(", "))
            }
            Self::Message(message) => message
                .default
                .clone()
                .unwrap_or_else(|| message.msgid.clone()),
            Self::Macro(handle) => format!(
                "<macro {}>",
                handle.name.as_deref().unwrap_or("<template>")
            ),
        }
    }

    /// Bounded single-line preview used in render-error variable
    /// snapshots.
    pub fn preview(&self, max_len: usize) -> String {
        let mut text = self.to_text().replace(['\n', '\r'], " ");
        if text.chars().count() > max_len {
            text = text.chars().take(max_len.saturating_sub(3)).collect();
            text.push_str("...");
        }
        text
    }
}

pub fn value_from_json(json: JsonValue) -> TplValue {
    match json {
        JsonValue::Null => TplValue::None,
        JsonValue::Bool(value) => TplValue::Bool(value),
        JsonValue::Number(value) => {
            if let Some(int) = value.as_i64() {
                TplValue::Int(int)
            } else {
                TplValue::Float(value.as_f64().unwrap_or(0.0))
            }
        }
        JsonValue::String(value) => TplValue::Str(value),
        JsonValue::Array(values) => {
            TplValue::Array(values.into_iter().map(value_from_json).collect())
        }
        JsonValue::Object(values) => TplValue::Map(
            values
                .into_iter()
                .map(|(key, value)| (key, value_from_json(value)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthiness_follows_emptiness() {
        assert!(!TplValue::None.is_truthy());
        assert!(TplValue::Default.is_truthy());
        assert!(!TplValue::Str(String::new()).is_truthy());
        assert!(TplValue::Str("x".to_string()).is_truthy());
        assert!(!TplValue::Array(Vec::new()).is_truthy());
        assert!(!TplValue::Int(0).is_truthy());
    }

    #[test]
    fn text_form_renders_integers_without_fraction() {
        assert_eq!(TplValue::Int(3).to_text(), "3");
        assert_eq!(TplValue::Float(2.5).to_text(), "2.5");
        assert_eq!(TplValue::Float(2.0).to_text(), "2.0");
    }

    #[test]
    fn json_conversion_preserves_structure() {
        let json: JsonValue =
            serde_json::from_str(r#"{"name": "World", "count": 3, "tags": ["a"]}"#)
                .expect("json should parse");
        let value = value_from_json(json);
        let TplValue::Map(map) = value else {
            panic!("expected a map");
        };
        assert_eq!(map.get("name"), Some(&TplValue::Str("World".to_string())));
        assert_eq!(map.get("count"), Some(&TplValue::Int(3)));
        assert_eq!(
            map.get("tags"),
            Some(&TplValue::Array(vec![TplValue::Str("a".to_string())]))
        );
    }

    #[test]
    fn preview_is_bounded_and_single_line() {
        let value = TplValue::Str("line one\nline two that keeps going".to_string());
        let preview = value.preview(16);
        assert!(!preview.contains('\n'));
        assert!(preview.chars().count() <= 16);
        assert!(preview.ends_with("..."));
    }
}
