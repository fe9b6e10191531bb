use petal_core::{
    ExprCandidate, ExpressionIr, MacroHandle, RenderError, RenderErrorKind, SourceSpan,
    TemplateError, TextPartIr, TplValue, VARIABLE_PREVIEW_WIDTH,
};
use rhai::Dynamic;

use crate::bridge::{dynamic_to_value, kind_of_eval_error, value_to_dynamic, MacroDyn};

use super::Ctx;

impl Ctx<'_> {
    /// Evaluate a full expression: try each pipe candidate in order,
    /// swallowing the catchable failure kinds. A candidate that fails
    /// leaves no observable effect on the scope.
    pub(crate) fn eval(&mut self, expr: &ExpressionIr) -> Result<TplValue, TemplateError> {
        let last = expr.candidates.len().saturating_sub(1);
        for (index, candidate) in expr.candidates.iter().enumerate() {
            match self.eval_candidate(candidate, expr) {
                Ok(value) => return Ok(value),
                Err(TemplateError::Render(error))
                    if index < last && error.original.is_fallback_catchable() => {}
                Err(error) => return Err(error),
            }
        }
        Err(TemplateError::render(self.render_error(
            RenderErrorKind::Other,
            "Expression has no candidates.",
            expr,
        )))
    }

    pub(crate) fn eval_candidate(
        &mut self,
        candidate: &ExprCandidate,
        expr: &ExpressionIr,
    ) -> Result<TplValue, TemplateError> {
        match candidate {
            ExprCandidate::Code { source } => self.eval_code(source, expr),
            ExprCandidate::StringTemplate { parts } => {
                let mut out = String::new();
                for part in parts {
                    match part {
                        TextPartIr::Static(text) => out.push_str(text),
                        TextPartIr::Expr(inner) => {
                            let value = self.eval(inner)?;
                            if !matches!(value, TplValue::None | TplValue::Default) {
                                out.push_str(&value.to_text());
                            }
                        }
                    }
                }
                Ok(TplValue::Str(out))
            }
            ExprCandidate::Exists { inner } => match self.eval_candidate(inner, expr) {
                Ok(_) => Ok(TplValue::Bool(true)),
                Err(TemplateError::Render(error)) if error.original.is_fallback_catchable() => {
                    Ok(TplValue::Bool(false))
                }
                Err(error) => Err(error),
            },
            ExprCandidate::Not { inner } => {
                let value = self.eval_candidate(inner, expr)?;
                Ok(TplValue::Bool(!value.is_truthy()))
            }
            ExprCandidate::Import { path } => match &self.options.resolver {
                Some(resolver) => resolver.import_symbol(path),
                None => Err(TemplateError::render(self.render_error(
                    RenderErrorKind::Import,
                    format!("Cannot import \"{}\": no resolver is configured.", path),
                    expr,
                ))),
            },
            ExprCandidate::Load { path } => {
                let current = self.current_program().source_name.clone();
                let Some(resolver) = self.options.resolver.clone() else {
                    return Err(TemplateError::render(self.render_error(
                        RenderErrorKind::Import,
                        format!("Cannot load \"{}\": no resolver is configured.", path),
                        expr,
                    )));
                };
                let located = resolver.locate(path, &current)?;
                Ok(TplValue::Macro(MacroHandle {
                    template: Some(located),
                    name: None,
                }))
            }
            ExprCandidate::Structure { inner } => {
                let value = self.eval_candidate(inner, expr)?;
                Ok(match value {
                    TplValue::Markup(_) | TplValue::None | TplValue::Default => value,
                    other => TplValue::Markup(other.to_text()),
                })
            }
            ExprCandidate::Literal { value } => Ok(value.clone()),
        }
    }

    fn eval_code(&mut self, source: &str, expr: &ExpressionIr) -> Result<TplValue, TemplateError> {
        let ast = self.engine.compiled_expression(source)?;
        let mut scope = self.build_rhai_scope();
        let result = self
            .engine
            .rhai
            .eval_ast_with_scope::<Dynamic>(&mut scope, &ast);
        match result {
            Ok(value) => dynamic_to_value(value).map_err(|kind| {
                TemplateError::render(self.render_error(
                    kind,
                    "Expression produced an unsupported value type.",
                    expr,
                ))
            }),
            Err(error) => {
                let kind = kind_of_eval_error(&error);
                Err(TemplateError::render(self.render_error(
                    kind,
                    error.to_string(),
                    expr,
                )))
            }
        }
    }

    /// Run a `<?python … ?>` block. Bindings it writes persist in the
    /// current scope; new top-level names become locals of the
    /// innermost frame, so they stop at the nearest macro boundary.
    pub(crate) fn run_code_block(
        &mut self,
        code: &str,
        span: SourceSpan,
    ) -> Result<(), TemplateError> {
        let ast = self.engine.compiled_block(code)?;
        let mut scope = self.build_rhai_scope();
        if let Err(error) = self.engine.rhai.run_ast_with_scope(&mut scope, &ast) {
            let kind = kind_of_eval_error(&error);
            let mut render_error = self.render_error(kind, error.to_string(), &ExpressionIr {
                source: code.to_string(),
                span,
                candidates: Vec::new(),
            });
            render_error.span = Some(span);
            return Err(TemplateError::render(render_error));
        }
        let mut iter = Vec::new();
        for (name, _, value) in scope.iter() {
            iter.push((name.to_string(), value));
        }
        for (name, value) in iter {
            if name == "repeat" || name == "macros" {
                continue;
            }
            let Ok(converted) = dynamic_to_value(value) else {
                continue;
            };
            if !self.scope.assign_existing(&name, converted.clone()) {
                self.scope.set_local(&name, converted);
            }
        }
        Ok(())
    }

    /// Expose the layered scope to one evaluation: flattened bindings,
    /// then the repeat dictionary and the macro table of the current
    /// program.
    fn build_rhai_scope(&self) -> rhai::Scope<'static> {
        let mut scope = rhai::Scope::new();
        for (name, value) in self.scope.flatten() {
            scope.push_dynamic(name, value_to_dynamic(&value));
        }
        let mut repeat_map = rhai::Map::new();
        for (name, item) in self.repeat.iter() {
            repeat_map.insert(name.clone().into(), Dynamic::from(item.clone()));
        }
        scope.push_dynamic("repeat", Dynamic::from_map(repeat_map));

        let mut macros_map = rhai::Map::new();
        for name in self.current_program().macros.keys() {
            macros_map.insert(
                name.clone().into(),
                Dynamic::from(MacroDyn(MacroHandle {
                    template: None,
                    name: Some(name.clone()),
                })),
            );
        }
        scope.push_dynamic("macros", Dynamic::from_map(macros_map));
        scope
    }

    /// Build the error-tracking frame for a failed expression: the
    /// literal source slice, the element location, and a bounded
    /// preview of every visible variable.
    pub(crate) fn render_error(
        &self,
        kind: RenderErrorKind,
        message: impl Into<String>,
        expr: &ExpressionIr,
    ) -> RenderError {
        let mut error = RenderError::new(kind, message, expr.source.clone());
        error.span = Some(expr.span);
        error.filename = Some(self.current_program().source_name.clone());
        for (name, value) in self.scope.flatten() {
            error
                .variables
                .insert(name, value.preview(VARIABLE_PREVIEW_WIDTH));
        }
        error
    }

}

/// Loose equality for `switch`/`case`: numeric values compare across
/// the integer/float divide, markup compares as text.
pub(crate) fn values_equal(left: &TplValue, right: &TplValue) -> bool {
    match (left, right) {
        (TplValue::Int(a), TplValue::Float(b)) | (TplValue::Float(b), TplValue::Int(a)) => {
            (*a as f64) == *b
        }
        (TplValue::Str(a) | TplValue::Markup(a), TplValue::Str(b) | TplValue::Markup(b)) => a == b,
        (a, b) => a == b,
    }
}
