use std::collections::BTreeMap;

use petal_core::{
    normalize_msgid, AttrValueIr, AttributeIr, RenderErrorKind, TemplateError, TextPartIr,
    TplValue,
};

use crate::escape::escape_attribute;
use crate::translate::{invoke, invoke_message};

use super::Ctx;

impl Ctx<'_> {
    /// The single attribute-output algorithm: static attributes are
    /// the base map, `tal:attributes` entries override by
    /// case-insensitive name, the sentinel reverts to the static
    /// value, `None` drops, boolean names render `name="name"` or
    /// vanish.
    pub(crate) fn write_attributes(
        &mut self,
        attributes: &[AttributeIr],
    ) -> Result<(), TemplateError> {
        for attribute in attributes {
            match &attribute.value {
                AttrValueIr::Static { raw } => {
                    if attribute.eq.is_empty() {
                        self.buffer
                            .push(format!("{}{}", attribute.space, attribute.name));
                        continue;
                    }
                    let text = match &attribute.translate {
                        Some(msgid) => {
                            let translated = self.translate_attribute(msgid, raw);
                            escape_attribute(&translated, &attribute.quote)
                        }
                        None => raw.clone(),
                    };
                    self.emit(attribute, &text);
                }
                AttrValueIr::Dynamic {
                    expr,
                    static_default,
                } => {
                    let value = self.eval(expr)?;
                    if attribute.name.is_empty() {
                        self.write_splat(attribute, value, expr)?;
                        continue;
                    }
                    match value {
                        TplValue::Default => {
                            if let Some(raw) = static_default {
                                self.emit(attribute, raw);
                            }
                        }
                        other => self.emit_dynamic(attribute, other),
                    }
                }
                AttrValueIr::Interpolated { parts } => {
                    if let [TextPartIr::Expr(expr)] = parts.as_slice() {
                        let value = self.eval(expr)?;
                        match value {
                            TplValue::Default => {}
                            other => self.emit_dynamic(attribute, other),
                        }
                        continue;
                    }
                    let mut text = String::new();
                    for part in parts {
                        match part {
                            TextPartIr::Static(literal) => text.push_str(literal),
                            TextPartIr::Expr(expr) => match self.eval(expr)? {
                                TplValue::None | TplValue::Default => {}
                                TplValue::Markup(markup) => text.push_str(&markup),
                                other => text.push_str(&escape_attribute(
                                    &other.to_text(),
                                    &attribute.quote,
                                )),
                            },
                        }
                    }
                    self.emit(attribute, &text);
                }
            }
        }
        Ok(())
    }

    /// A dict-typed nameless `tal:attributes` entry contributes its
    /// entries as dynamic attributes.
    fn write_splat(
        &mut self,
        attribute: &AttributeIr,
        value: TplValue,
        expr: &petal_core::ExpressionIr,
    ) -> Result<(), TemplateError> {
        match value {
            TplValue::None | TplValue::Default => Ok(()),
            TplValue::Map(map) => {
                for (name, item) in map {
                    let boolean = self
                        .settings()
                        .boolean_attributes
                        .contains(&name.to_lowercase());
                    let entry = AttributeIr {
                        name,
                        value: attribute.value.clone(),
                        quote: "\"".to_string(),
                        space: " ".to_string(),
                        eq: "=".to_string(),
                        boolean,
                        translate: None,
                        span: attribute.span,
                    };
                    self.emit_dynamic(&entry, item);
                }
                Ok(())
            }
            other => Err(TemplateError::render(self.render_error(
                RenderErrorKind::Type,
                format!(
                    "A nameless attributes entry must produce a mapping, got {}.",
                    other.type_name()
                ),
                expr,
            ))),
        }
    }

    fn emit_dynamic(&mut self, attribute: &AttributeIr, value: TplValue) {
        if matches!(value, TplValue::None) {
            return;
        }
        if attribute.boolean {
            if value.is_truthy() {
                let text = attribute.name.clone();
                self.emit(attribute, &escape_attribute(&text, &attribute.quote));
            }
            return;
        }
        match value {
            TplValue::Markup(markup) => self.emit(attribute, &markup),
            TplValue::Message(message) => {
                let text = invoke_message(self.options.translator.as_ref(), &message, None, None);
                self.emit(attribute, &escape_attribute(&text, &attribute.quote));
            }
            other => {
                let mut text = other.to_text();
                if let Some(msgid) = &attribute.translate {
                    text = self.translate_attribute(msgid, &text);
                }
                self.emit(attribute, &escape_attribute(&text, &attribute.quote));
            }
        }
    }

    fn translate_attribute(&self, msgid: &str, text: &str) -> String {
        let msgid = if msgid.is_empty() {
            normalize_msgid(text)
        } else {
            msgid.to_string()
        };
        invoke(
            self.options.translator.as_ref(),
            &msgid,
            None,
            &BTreeMap::new(),
            None,
            None,
            Some(text),
        )
    }

    fn emit(&mut self, attribute: &AttributeIr, text: &str) {
        let quote = if attribute.quote.is_empty() {
            "\""
        } else {
            attribute.quote.as_str()
        };
        let eq = if attribute.eq.is_empty() {
            "="
        } else {
            attribute.eq.as_str()
        };
        self.buffer.push(format!(
            "{}{}{}{}{}{}",
            attribute.space, attribute.name, eq, quote, text, quote
        ));
    }
}
