use std::collections::BTreeMap;

use petal_core::MessageRecord;

/// The translation backend contract. Implementations must be
/// re-entrant under parallel renders.
pub trait Translator: Send + Sync {
    fn translate(
        &self,
        msgid: &str,
        domain: Option<&str>,
        mapping: &BTreeMap<String, String>,
        context: Option<&str>,
        target_language: Option<&str>,
        default: Option<&str>,
    ) -> Option<String>;
}

/// Backend that translates nothing; every call falls back to the
/// default text.
#[derive(Debug, Default)]
pub struct NullTranslator;

impl Translator for NullTranslator {
    fn translate(
        &self,
        _msgid: &str,
        _domain: Option<&str>,
        _mapping: &BTreeMap<String, String>,
        _context: Option<&str>,
        _target_language: Option<&str>,
        _default: Option<&str>,
    ) -> Option<String> {
        None
    }
}

/// Invoke the backend with the fallback rules: the empty string is
/// never translated, and an absent result coerces to the default text
/// or the message id itself.
pub fn invoke(
    translator: &dyn Translator,
    msgid: &str,
    domain: Option<&str>,
    mapping: &BTreeMap<String, String>,
    context: Option<&str>,
    target_language: Option<&str>,
    default: Option<&str>,
) -> String {
    if msgid.is_empty() {
        return default.unwrap_or_default().to_string();
    }
    translator
        .translate(msgid, domain, mapping, context, target_language, default)
        .unwrap_or_else(|| default.unwrap_or(msgid).to_string())
}

/// Translate a message descriptor value.
pub fn invoke_message(
    translator: &dyn Translator,
    message: &MessageRecord,
    context: Option<&str>,
    target_language: Option<&str>,
) -> String {
    invoke(
        translator,
        &message.msgid,
        message.domain.as_deref(),
        &message.mapping,
        context,
        target_language,
        message.default.as_deref(),
    )
}

/// Substitute `${name}` placeholders in translated text from the
/// capture mapping. Unknown placeholders stay literal.
pub fn substitute_mapping(text: &str, mapping: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(found) = rest.find("${") {
        out.push_str(&rest[..found]);
        let after = &rest[found + 2..];
        let Some(close) = after.find('}') else {
            out.push_str(&rest[found..]);
            return out;
        };
        let name = after[..close].trim();
        match mapping.get(name) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[found..found + 2 + close + 1]),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}
