use std::collections::BTreeMap;
use std::sync::Arc;

use petal_core::{
    DefineIr, ElementIr, FallbackTag, InsertIr, IrNode, MacroHandle, OmitTagIr, Program,
    RenderErrorKind, RepeatIr, SourceSpan, TemplateError, TplValue, TranslateIr, UseMacroIr,
};

use petal_core::normalize_msgid;

use crate::escape::escape_html;
use crate::repeat::RepeatItem;
use crate::translate::{invoke, invoke_message, substitute_mapping};

use super::eval::values_equal;
use super::{Ctx, SlotLayer, SwitchFrame};

impl Ctx<'_> {
    pub(crate) fn render_nodes(&mut self, nodes: &[IrNode]) -> Result<(), TemplateError> {
        for node in nodes {
            self.render_node(node)?;
        }
        Ok(())
    }

    fn render_node(&mut self, node: &IrNode) -> Result<(), TemplateError> {
        match node {
            IrNode::Static { text } => {
                self.buffer.push(text.clone());
                Ok(())
            }
            IrNode::Insert(insert) => self.render_insert(insert),
            IrNode::Element(element) => self.render_element(element),
            IrNode::Define(define) => self.render_define(define),
            IrNode::Condition { expr, body, .. } => {
                let value = self.eval(expr)?;
                // The sentinel reads as truthy here.
                if value.is_truthy() {
                    self.render_nodes(body)?;
                }
                Ok(())
            }
            IrNode::Repeat(repeat) => self.render_repeat(repeat),
            IrNode::Switch { expr, body, .. } => {
                let value = self.eval(expr)?;
                self.switches.push(SwitchFrame {
                    value,
                    matched: false,
                });
                let result = self.render_nodes(body);
                self.switches.pop();
                result
            }
            IrNode::Case { expr, body, .. } => {
                let Some(frame_index) = self.switches.len().checked_sub(1) else {
                    return Ok(());
                };
                if self.switches[frame_index].matched {
                    return Ok(());
                }
                let case_value = self.eval(expr)?;
                let switch_value = self.switches[frame_index].value.clone();
                let matches = matches!(case_value, TplValue::Default)
                    || values_equal(&case_value, &switch_value);
                if matches {
                    self.switches[frame_index].matched = true;
                    self.render_nodes(body)?;
                }
                Ok(())
            }
            IrNode::OnError {
                handler,
                structure,
                fallback,
                body,
                ..
            } => self.render_on_error(handler, *structure, fallback.as_ref(), body),
            IrNode::CodeBlock { code, span } => self.run_code_block(code, *span),
            IrNode::UseMacro(use_macro) => self.render_use_macro(use_macro),
            IrNode::DefineSlot { name, default, .. } => self.render_slot(name, default),
            IrNode::Translate(translate) => self.render_translate(translate),
            IrNode::I18nName { name, body, .. } => {
                if self.i18n_capture.is_empty() {
                    return self.render_nodes(body);
                }
                let rendered = self.render_to_string(body)?;
                if let Some(capture) = self.i18n_capture.last_mut() {
                    capture.insert(name.clone(), rendered);
                }
                self.buffer.push(format!("${{{}}}", name));
                Ok(())
            }
        }
    }

    fn render_insert(&mut self, insert: &InsertIr) -> Result<(), TemplateError> {
        let value = self.eval(&insert.expr)?;
        match value {
            TplValue::Default => self.render_nodes(&insert.default),
            // Nothing is emitted for none-ish values in content
            // position.
            TplValue::None | TplValue::Bool(false) => Ok(()),
            TplValue::Markup(markup) => {
                self.buffer.push(markup);
                Ok(())
            }
            TplValue::Message(message) => {
                let text = invoke_message(
                    self.options.translator.as_ref(),
                    &message,
                    None,
                    None,
                );
                self.push_text(&text, insert.escape);
                Ok(())
            }
            other => {
                let text = other.to_text();
                let text = if insert.translate {
                    let msgid = normalize_msgid(&text);
                    invoke(
                        self.options.translator.as_ref(),
                        &msgid,
                        None,
                        &BTreeMap::new(),
                        None,
                        None,
                        Some(&text),
                    )
                } else {
                    text
                };
                self.push_text(&text, insert.escape);
                Ok(())
            }
        }
    }

    fn push_text(&mut self, text: &str, escape: bool) {
        if escape {
            self.buffer.push(escape_html(text));
        } else {
            self.buffer.push(text.to_string());
        }
    }

    fn render_element(&mut self, element: &ElementIr) -> Result<(), TemplateError> {
        let omit = match &element.omit {
            OmitTagIr::Never => false,
            OmitTagIr::Always => true,
            OmitTagIr::Expr(expr) => self.eval(expr)?.is_truthy(),
        };
        let collapsed = element.self_closing && element.body.is_empty();

        if !omit {
            self.buffer.push(format!("<{}", element.tag));
            self.write_attributes(&element.attributes)?;
            if collapsed {
                self.buffer.push(" />".to_string());
            } else {
                self.buffer.push(">".to_string());
            }
        }
        if !collapsed {
            self.render_nodes(&element.body)?;
            if !omit {
                self.buffer.push(format!("</{}>", element.tag));
            }
        }
        Ok(())
    }

    fn render_define(&mut self, define: &DefineIr) -> Result<(), TemplateError> {
        self.scope.push_frame();
        let result = (|| {
            for binding in &define.bindings {
                let value = self.eval(&binding.expr)?;
                let pairs = self.unpack(&binding.names, value, &binding.expr.span)?;
                for (name, item) in pairs {
                    if binding.global {
                        self.scope.set_global(&name, item);
                    } else {
                        self.scope.set_local(&name, item);
                    }
                }
            }
            self.render_nodes(&define.body)
        })();
        self.scope.pop_frame();
        result
    }

    fn unpack(
        &self,
        names: &[String],
        value: TplValue,
        span: &SourceSpan,
    ) -> Result<Vec<(String, TplValue)>, TemplateError> {
        if names.len() == 1 {
            return Ok(vec![(names[0].clone(), value)]);
        }
        let TplValue::Array(items) = value else {
            return Err(TemplateError::render({
                let mut error = petal_core::RenderError::new(
                    RenderErrorKind::Type,
                    format!("Cannot unpack a non-sequence into {} names.", names.len()),
                    String::new(),
                );
                error.span = Some(*span);
                error
            }));
        };
        if items.len() != names.len() {
            return Err(TemplateError::render({
                let mut error = petal_core::RenderError::new(
                    RenderErrorKind::Value,
                    format!(
                        "Unpack length mismatch: {} names, {} values.",
                        names.len(),
                        items.len()
                    ),
                    String::new(),
                );
                error.span = Some(*span);
                error
            }));
        }
        Ok(names.iter().cloned().zip(items).collect())
    }

    fn render_repeat(&mut self, repeat: &RepeatIr) -> Result<(), TemplateError> {
        let value = self.eval(&repeat.expr)?;
        match value {
            // The sentinel leaves the element unchanged: one pass,
            // no loop variable.
            TplValue::Default => return self.render_nodes(&repeat.body),
            TplValue::None => return Ok(()),
            _ => {}
        }
        let items = iterable_items(&value).ok_or_else(|| {
            TemplateError::render(self.render_error(
                RenderErrorKind::Type,
                format!("Cannot iterate a {} value.", value.type_name()),
                &repeat.expr,
            ))
        })?;
        let items = Arc::new(items);
        let loop_name = &repeat.names[0];
        let shadowed = self.repeat.get(loop_name).cloned();

        self.scope.push_frame();
        let result = (|| {
            for index in 0..items.len() {
                self.repeat
                    .enter(loop_name, RepeatItem::new(index, items.clone()));
                let pairs =
                    self.unpack(&repeat.names, items[index].clone(), &repeat.expr.span)?;
                for (name, item) in pairs {
                    self.scope.set_local(&name, item);
                }
                self.render_nodes(&repeat.body)?;
            }
            Ok(())
        })();
        // Loop state never leaks: the variable frame and the repeat
        // entry go away together, restoring any shadowed outer entry.
        self.scope.pop_frame();
        self.repeat.exit(loop_name, shadowed);
        result
    }

    fn render_on_error(
        &mut self,
        handler: &petal_core::ExpressionIr,
        structure: bool,
        fallback: Option<&FallbackTag>,
        body: &[IrNode],
    ) -> Result<(), TemplateError> {
        let checkpoint = self.buffer.len();
        let switches = self.switches.len();
        let slots = self.slots.len();
        let programs = self.programs.len();
        let captures = self.i18n_capture.len();
        let repeat_snapshot = self.repeat.clone();

        let error = match self.render_nodes(body) {
            Ok(()) => return Ok(()),
            // The internal kind is the un-catchable evaluator
            // failure; it passes through untouched.
            Err(TemplateError::Render(error))
                if error.original != RenderErrorKind::Internal =>
            {
                *error
            }
            Err(other) => return Err(other),
        };

        self.buffer.truncate(checkpoint);
        self.switches.truncate(switches);
        self.slots.truncate(slots);
        self.programs.truncate(programs);
        self.i18n_capture.truncate(captures);
        self.repeat = repeat_snapshot;

        if let Some(callback) = &self.options.on_error_handler {
            callback(&error);
        }

        self.scope.push_frame();
        self.scope.set_local(
            "error",
            TplValue::Map(BTreeMap::from([
                (
                    "message".to_string(),
                    TplValue::Str(error.message.clone()),
                ),
                (
                    "kind".to_string(),
                    TplValue::Str(format!("{:?}", error.original)),
                ),
                (
                    "expression".to_string(),
                    TplValue::Str(error.expression.clone()),
                ),
            ])),
        );
        let handled = self.eval(handler);
        self.scope.pop_frame();
        let value = handled?;

        let text = match value {
            TplValue::None | TplValue::Default => String::new(),
            TplValue::Markup(markup) => markup,
            other => {
                let text = other.to_text();
                if structure {
                    text
                } else {
                    escape_html(&text)
                }
            }
        };

        match fallback {
            Some(tag) => {
                let mut open = format!("<{}", tag.tag);
                for (name, raw, quote, space, eq) in &tag.attributes {
                    open.push_str(space);
                    open.push_str(name);
                    open.push_str(eq);
                    open.push_str(quote);
                    open.push_str(raw);
                    open.push_str(quote);
                }
                open.push('>');
                self.buffer.push(open);
                self.buffer.push(text);
                // The end tag is guaranteed even when substituting
                // nothing.
                self.buffer.push(format!("</{}>", tag.tag));
            }
            None => self.buffer.push(text),
        }
        Ok(())
    }

    fn render_use_macro(&mut self, use_macro: &UseMacroIr) -> Result<(), TemplateError> {
        let handle = self.resolve_macro_value(use_macro)?;
        let (program, body) = self.macro_body(&handle, &use_macro.expr)?;

        self.slots.push(SlotLayer {
            fillers: use_macro.fillers.clone(),
            barrier: !use_macro.extend,
        });
        let switched_program = if let Some(program) = program {
            self.programs.push(program);
            true
        } else {
            false
        };
        // Macro boundary: code-block bindings stop here.
        self.scope.push_frame();
        let result = self.render_nodes(&body);
        self.scope.pop_frame();
        if switched_program {
            self.programs.pop();
        }
        self.slots.pop();
        result
    }

    fn resolve_macro_value(
        &mut self,
        use_macro: &UseMacroIr,
    ) -> Result<MacroHandle, TemplateError> {
        // A bare identifier naming a macro of the current template
        // resolves directly, before expression evaluation.
        let source = use_macro.expr.source.trim();
        if is_identifier(source) && self.current_program().macros.contains_key(source) {
            return Ok(MacroHandle {
                template: None,
                name: Some(source.to_string()),
            });
        }
        match self.eval(&use_macro.expr)? {
            TplValue::Macro(handle) => Ok(handle),
            TplValue::Str(name) => Ok(MacroHandle {
                template: None,
                name: Some(name),
            }),
            other => Err(TemplateError::render(self.render_error(
                RenderErrorKind::Type,
                format!("\"use-macro\" expects a macro, got {}.", other.type_name()),
                &use_macro.expr,
            ))),
        }
    }

    /// Resolve a handle to the macro body, returning the foreign
    /// program when the macro lives in another template.
    fn macro_body(
        &mut self,
        handle: &MacroHandle,
        expr: &petal_core::ExpressionIr,
    ) -> Result<(Option<Arc<Program>>, Vec<IrNode>), TemplateError> {
        match &handle.template {
            Some(path) => {
                let Some(resolver) = self.options.resolver.clone() else {
                    return Err(TemplateError::render(self.render_error(
                        RenderErrorKind::Import,
                        format!("Cannot load macro template \"{}\": no resolver.", path),
                        expr,
                    )));
                };
                let program = resolver.load(path)?;
                let body = match &handle.name {
                    Some(name) => {
                        let Some(macro_ir) = program.macros.get(name) else {
                            return Err(TemplateError::render(self.render_error(
                                RenderErrorKind::Lookup,
                                format!("Macro \"{}\" not found in \"{}\".", name, path),
                                expr,
                            )));
                        };
                        macro_ir.body.clone()
                    }
                    None => program.root.clone(),
                };
                Ok((Some(program), body))
            }
            None => {
                let program = self.current_program().clone();
                let body = match &handle.name {
                    Some(name) => {
                        let Some(macro_ir) = program.macros.get(name) else {
                            return Err(TemplateError::render(self.render_error(
                                RenderErrorKind::Lookup,
                                format!("Macro \"{}\" is not defined.", name),
                                expr,
                            )));
                        };
                        macro_ir.body.clone()
                    }
                    None => program.root.clone(),
                };
                Ok((None, body))
            }
        }
    }

    /// Fill a slot: the outermost visible filler wins; the filler
    /// renders with the remaining layers visible, so an inner
    /// `define-slot` within it can still be filled by a closer layer.
    fn render_slot(&mut self, name: &str, default: &[IrNode]) -> Result<(), TemplateError> {
        let visible_start = self
            .slots
            .iter()
            .rposition(|layer| layer.barrier)
            .unwrap_or(0);
        let mut found = None;
        for index in visible_start..self.slots.len() {
            if let Some(body) = self.slots[index].fillers.remove(name) {
                found = Some((index, body));
                break;
            }
        }
        match found {
            Some((index, body)) => {
                let result = self.render_nodes(&body);
                if index < self.slots.len() {
                    self.slots[index].fillers.insert(name.to_string(), body);
                }
                result
            }
            None => self.render_nodes(default),
        }
    }

    fn render_translate(&mut self, translate: &TranslateIr) -> Result<(), TemplateError> {
        self.i18n_capture.push(BTreeMap::new());
        let rendered = self.render_to_string(&translate.body);
        let mapping = self.i18n_capture.pop().unwrap_or_default();
        let text = rendered?;

        let translated = if let Some(data_expr) = &translate.data {
            let data = self.eval(data_expr)?;
            match data {
                TplValue::Message(message) => {
                    let mut merged = message.mapping.clone();
                    merged.extend(mapping.clone());
                    invoke(
                        self.options.translator.as_ref(),
                        &message.msgid,
                        message.domain.as_deref().or(translate.domain.as_deref()),
                        &merged,
                        translate.context.as_deref(),
                        translate.target_language.as_deref(),
                        message.default.as_deref().or(Some(&text)),
                    )
                }
                other => {
                    let msgid = translate
                        .msgid
                        .clone()
                        .unwrap_or_else(|| normalize_msgid(&other.to_text()));
                    invoke(
                        self.options.translator.as_ref(),
                        &msgid,
                        translate.domain.as_deref(),
                        &mapping,
                        translate.context.as_deref(),
                        translate.target_language.as_deref(),
                        Some(&text),
                    )
                }
            }
        } else {
            let msgid = translate
                .msgid
                .clone()
                .unwrap_or_else(|| normalize_msgid(&text));
            invoke(
                self.options.translator.as_ref(),
                &msgid,
                translate.domain.as_deref(),
                &mapping,
                translate.context.as_deref(),
                translate.target_language.as_deref(),
                Some(&text),
            )
        };

        // The mapping values are already rendered markup; the result
        // goes out raw after placeholder substitution.
        self.buffer.push(substitute_mapping(&translated, &mapping));
        Ok(())
    }
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn iterable_items(value: &TplValue) -> Option<Vec<TplValue>> {
    match value {
        TplValue::Array(items) => Some(items.clone()),
        TplValue::Map(map) => Some(map.keys().map(|key| TplValue::Str(key.clone())).collect()),
        TplValue::Str(text) => Some(
            text.chars()
                .map(|ch| TplValue::Str(ch.to_string()))
                .collect(),
        ),
        _ => None,
    }
}
