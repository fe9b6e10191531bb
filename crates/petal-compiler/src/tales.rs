use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};

use petal_core::{ExprCandidate, ExpressionIr, SourceSpan, TemplateError, TplValue};
use regex::Regex;

use crate::interpolation::parse_string_template;

/// Decode the fixed entity set inside expression source before
/// compilation. Kept to exactly `amp`, `lt`, `gt`, `quot` to match
/// observed behaviour.
pub fn decode_expression_entities(source: &str) -> String {
    source
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Split an expression into its pipe-fallback candidates. The split
/// happens outside brackets and quotes only; a doubled pipe is the
/// literal `|`.
pub fn split_candidates(source: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut chars = source.chars().peekable();

    while let Some(ch) = chars.next() {
        if let Some(active) = quote {
            current.push(ch);
            if ch == active {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => {
                quote = Some(ch);
                current.push(ch);
            }
            '(' | '[' | '{' => {
                depth += 1;
                current.push(ch);
            }
            ')' | ']' | '}' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '|' if depth == 0 => {
                if chars.peek() == Some(&'|') {
                    chars.next();
                    current.push('|');
                } else {
                    out.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    out.push(current);
    out
}

/// Convert single-quoted string literals to the double-quoted form the
/// embedded expression engine expects. Runs outside double-quoted
/// strings only.
pub fn normalize_string_literals(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    out.push(inner);
                    if inner == '\\' {
                        if let Some(escaped) = chars.next() {
                            out.push(escaped);
                        }
                        continue;
                    }
                    if inner == '"' {
                        break;
                    }
                }
            }
            '\'' => {
                let mut body = String::new();
                let mut closed = false;
                while let Some(inner) = chars.next() {
                    if inner == '\\' {
                        match chars.next() {
                            Some('\'') => body.push('\''),
                            Some(other) => {
                                body.push('\\');
                                body.push(other);
                            }
                            None => break,
                        }
                        continue;
                    }
                    if inner == '\'' {
                        closed = true;
                        break;
                    }
                    body.push(inner);
                }
                if closed {
                    out.push('"');
                    out.push_str(&body.replace('"', "\\\""));
                    out.push('"');
                } else {
                    out.push('\'');
                    out.push_str(&body);
                }
            }
            _ => out.push(ch),
        }
    }
    out
}

/// The evaluator reserves `default` as a symbol, but the expression
/// language needs it as the sentinel's name. Rewrite the standalone
/// identifier to the internal alias the runtime also binds.
pub fn rewrite_default_identifier(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut chars = source.char_indices();
    let mut previous: Option<char> = None;
    while let Some((index, ch)) = chars.next() {
        if ch == '"' {
            out.push(ch);
            previous = Some(ch);
            for (_, inner) in chars.by_ref() {
                out.push(inner);
                if inner == '"' && previous != Some('\\') {
                    break;
                }
                previous = Some(inner);
            }
            previous = Some('"');
            continue;
        }
        let word_start = previous.map_or(true, |p| !is_ident_char(p));
        if ch == 'd' && word_start && source[index..].starts_with("default") {
            let after = source[index + "default".len()..].chars().next();
            if after.map_or(true, |a| !is_ident_char(a)) {
                out.push_str("__default");
                for _ in 0.."default".len() - 1 {
                    chars.next();
                }
                previous = Some('t');
                continue;
            }
        }
        out.push(ch);
        previous = Some(ch);
    }
    out
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Full source preparation for code payloads: string-literal
/// normalization plus the reserved-identifier rewrite.
pub fn prepare_code(source: &str) -> String {
    rewrite_default_identifier(&normalize_string_literals(source))
}

fn prefix_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*([a-z][a-z0-9\-_]*):").expect("prefix regex must compile"))
}

/// A registered expression type. Implementations produce one typed
/// candidate from their payload.
pub trait ExpressionCompiler: Send + Sync {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError>;
}

/// Typed-prefix to compiler mapping with pipe-fallback handling.
pub struct ExpressionRegistry {
    compilers: BTreeMap<String, Arc<dyn ExpressionCompiler>>,
    pub default_prefix: String,
    pub strict: bool,
}

impl ExpressionRegistry {
    pub fn with_defaults(default_prefix: &str, strict: bool) -> Self {
        let mut registry = Self {
            compilers: BTreeMap::new(),
            default_prefix: default_prefix.to_string(),
            strict,
        };
        registry.register("python", Arc::new(PythonCompiler));
        registry.register("string", Arc::new(StringCompiler));
        registry.register("exists", Arc::new(ExistsCompiler));
        registry.register("not", Arc::new(NotCompiler));
        registry.register("import", Arc::new(ImportCompiler));
        registry.register("load", Arc::new(LoadCompiler));
        registry.register("structure", Arc::new(StructureCompiler));
        registry
    }

    pub fn register(&mut self, prefix: &str, compiler: Arc<dyn ExpressionCompiler>) {
        self.compilers.insert(prefix.to_string(), compiler);
    }

    /// Compile a full expression: entity decode, pipe split, one typed
    /// candidate per segment.
    pub fn parse_expression(
        &self,
        source: &str,
        span: SourceSpan,
    ) -> Result<ExpressionIr, TemplateError> {
        let decoded = decode_expression_entities(source);
        let mut candidates = Vec::new();
        for segment in split_candidates(&decoded) {
            candidates.push(self.parse_candidate(&segment, span)?);
        }
        Ok(ExpressionIr {
            source: source.trim().to_string(),
            span,
            candidates,
        })
    }

    /// Compile one candidate, resolving an optional type prefix.
    pub fn parse_candidate(
        &self,
        text: &str,
        span: SourceSpan,
    ) -> Result<ExprCandidate, TemplateError> {
        if let Some(captures) = prefix_re().captures(text) {
            let prefix = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
            let payload = &text[captures.get(0).map(|m| m.end()).unwrap_or(0)..];
            if let Some(compiler) = self.compilers.get(prefix) {
                return compiler.compile(payload, span, self);
            }
            if self.strict {
                return Err(TemplateError::expression(
                    format!("Unknown expression type \"{}:\".", prefix),
                    span,
                ));
            }
        }
        let Some(compiler) = self.compilers.get(&self.default_prefix) else {
            return Err(TemplateError::expression(
                format!(
                    "Default expression type \"{}:\" is not registered.",
                    self.default_prefix
                ),
                span,
            ));
        };
        compiler.compile(text, span, self)
    }
}

fn validation_engine() -> &'static rhai::Engine {
    static ENGINE: OnceLock<rhai::Engine> = OnceLock::new();
    ENGINE.get_or_init(rhai::Engine::new_raw)
}

/// Check code-expression syntax at compile time so payload errors
/// surface as `ExpressionError` instead of failing every render.
pub fn validate_code_expression(source: &str, span: SourceSpan) -> Result<(), TemplateError> {
    validation_engine()
        .compile_expression(source)
        .map(|_| ())
        .map_err(|error| {
            TemplateError::expression(format!("Invalid expression: {}", error), span)
        })
}

/// Check a statement block (`<?python … ?>`) at compile time.
pub fn validate_code_block(source: &str, span: SourceSpan) -> Result<(), TemplateError> {
    validation_engine()
        .compile(source)
        .map(|_| ())
        .map_err(|error| {
            TemplateError::expression(format!("Invalid code block: {}", error), span)
        })
}

struct PythonCompiler;

impl ExpressionCompiler for PythonCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        _registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        let trimmed = payload.trim();
        if trimmed.is_empty() {
            return Err(TemplateError::expression("Empty expression.", span));
        }
        let prepared = prepare_code(trimmed);
        validate_code_expression(&prepared, span)?;
        Ok(ExprCandidate::Code { source: prepared })
    }
}

struct StringCompiler;

impl ExpressionCompiler for StringCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        let parts = parse_string_template(payload, span, registry)?;
        Ok(ExprCandidate::StringTemplate { parts })
    }
}

struct ExistsCompiler;

impl ExpressionCompiler for ExistsCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        Ok(ExprCandidate::Exists {
            inner: Box::new(registry.parse_candidate(payload, span)?),
        })
    }
}

struct NotCompiler;

impl ExpressionCompiler for NotCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        Ok(ExprCandidate::Not {
            inner: Box::new(registry.parse_candidate(payload, span)?),
        })
    }
}

struct StructureCompiler;

impl ExpressionCompiler for StructureCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        Ok(ExprCandidate::Structure {
            inner: Box::new(registry.parse_candidate(payload, span)?),
        })
    }
}

struct ImportCompiler;

fn dotted_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)*$")
            .expect("dotted path regex must compile")
    })
}

impl ExpressionCompiler for ImportCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        _registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        let path = payload.trim();
        if !dotted_re().is_match(path) {
            return Err(TemplateError::expression(
                format!("Invalid import path: \"{}\".", path),
                span,
            ));
        }
        Ok(ExprCandidate::Import {
            path: path.to_string(),
        })
    }
}

struct LoadCompiler;

impl ExpressionCompiler for LoadCompiler {
    fn compile(
        &self,
        payload: &str,
        span: SourceSpan,
        _registry: &ExpressionRegistry,
    ) -> Result<ExprCandidate, TemplateError> {
        let path = payload.trim();
        if path.is_empty() {
            return Err(TemplateError::expression("Empty load path.", span));
        }
        Ok(ExprCandidate::Load {
            path: path.to_string(),
        })
    }
}

/// Convenience constructor for a literal string candidate, used by the
/// implicit-i18n lowering.
pub fn literal_candidate(value: &str) -> ExprCandidate {
    ExprCandidate::Literal {
        value: TplValue::Str(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petal_core::TextPartIr;

    fn registry() -> ExpressionRegistry {
        ExpressionRegistry::with_defaults("python", false)
    }

    fn parse(source: &str) -> ExpressionIr {
        registry()
            .parse_expression(source, SourceSpan::synthetic())
            .expect("expression should compile")
    }

    #[test]
    fn pipe_splits_outside_brackets_only() {
        assert_eq!(split_candidates("a | b | c"), vec!["a ", " b ", " c"]);
        assert_eq!(split_candidates("f(a | b) | c"), vec!["f(a | b) ", " c"]);
        assert_eq!(split_candidates("[a | b]"), vec!["[a | b]"]);
        assert_eq!(split_candidates("'a | b'"), vec!["'a | b'"]);
    }

    #[test]
    fn doubled_pipe_is_the_literal_pipe() {
        assert_eq!(split_candidates("a || b"), vec!["a | b"]);
        assert_eq!(split_candidates("a ||| b"), vec!["a |", " b"]);
    }

    #[test]
    fn default_prefix_applies_when_absent() {
        let expression = parse("x + 1");
        assert_eq!(expression.candidates.len(), 1);
        assert!(matches!(
            &expression.candidates[0],
            ExprCandidate::Code { source } if source == "x + 1"
        ));
    }

    #[test]
    fn single_quoted_literals_are_normalized() {
        assert_eq!(
            normalize_string_literals("'Hello, ' + name"),
            "\"Hello, \" + name"
        );
        assert_eq!(
            normalize_string_literals(r#"'it\'s' + "a 'b'""#),
            r#""it's" + "a 'b'""#
        );
        assert_eq!(normalize_string_literals(r#"'say "hi"'"#), r#""say \"hi\"""#);
    }

    #[test]
    fn default_identifier_is_rewritten_for_the_evaluator() {
        assert_eq!(rewrite_default_identifier("default"), "__default");
        assert_eq!(rewrite_default_identifier("x == default"), "x == __default");
        assert_eq!(
            rewrite_default_identifier("defaulted + my_default"),
            "defaulted + my_default"
        );
        assert_eq!(rewrite_default_identifier("\"default\""), "\"default\"");
        assert!(matches!(
            &parse("default").candidates[0],
            ExprCandidate::Code { source } if source == "__default"
        ));
    }

    #[test]
    fn typed_prefixes_produce_typed_candidates() {
        assert!(matches!(
            &parse("exists: x").candidates[0],
            ExprCandidate::Exists { .. }
        ));
        assert!(matches!(
            &parse("not: x").candidates[0],
            ExprCandidate::Not { .. }
        ));
        assert!(matches!(
            &parse("structure: body").candidates[0],
            ExprCandidate::Structure { .. }
        ));
        assert!(matches!(
            &parse("import: module.name").candidates[0],
            ExprCandidate::Import { path } if path == "module.name"
        ));
        assert!(matches!(
            &parse("load: ../layout.pt").candidates[0],
            ExprCandidate::Load { path } if path == "../layout.pt"
        ));
    }

    #[test]
    fn nested_prefixes_compose() {
        let expression = parse("not: exists: x");
        let ExprCandidate::Not { inner } = &expression.candidates[0] else {
            panic!("expected not candidate");
        };
        assert!(matches!(**inner, ExprCandidate::Exists { .. }));
    }

    #[test]
    fn string_expressions_keep_text_and_substitutions() {
        let expression = parse("string:Hello ${name}!");
        let ExprCandidate::StringTemplate { parts } = &expression.candidates[0] else {
            panic!("expected string template");
        };
        assert!(matches!(&parts[0], TextPartIr::Static(text) if text == "Hello "));
        assert!(matches!(&parts[1], TextPartIr::Expr(_)));
        assert!(matches!(&parts[2], TextPartIr::Static(text) if text == "!"));
    }

    #[test]
    fn entities_in_expression_source_are_decoded() {
        let expression = parse("a &lt; b &amp;&amp; c &gt; d");
        assert!(matches!(
            &expression.candidates[0],
            ExprCandidate::Code { source } if source == "a < b && c > d"
        ));
    }

    #[test]
    fn unknown_prefix_is_an_error_in_strict_mode_only() {
        let strict = ExpressionRegistry::with_defaults("python", true);
        assert!(strict
            .parse_expression("bogus: x", SourceSpan::synthetic())
            .is_err());

        // In lenient mode the whole text goes to the default compiler
        // instead; it fails there only if it is not valid code.
        let lenient = registry();
        assert!(lenient
            .parse_expression("bogus: x", SourceSpan::synthetic())
            .is_err());
    }

    #[test]
    fn invalid_payload_is_an_expression_error() {
        let error = registry()
            .parse_expression("1 +", SourceSpan::synthetic())
            .expect_err("should fail");
        assert!(matches!(error, TemplateError::Expression(_)));
        assert!(registry()
            .parse_expression("", SourceSpan::synthetic())
            .is_err());
    }

    #[test]
    fn pipe_chain_compiles_every_candidate() {
        let expression = parse("missing | 42");
        assert_eq!(expression.candidates.len(), 2);
    }
}
