use petal_core::{SourceSpan, TemplateError, TextPartIr};

use crate::tales::ExpressionRegistry;

/// Lower `${…}` substitutions in text, attribute values and comments.
/// `$$` reduces to a literal `$`; backslash escaping is deliberately
/// not supported. Braces are mandatory: a bare `$name` stays literal
/// text here.
pub fn lower_interpolation(
    text: &str,
    span: SourceSpan,
    registry: &ExpressionRegistry,
) -> Result<Vec<TextPartIr>, TemplateError> {
    split_dollar(text, span, registry, false)
}

/// The `string:` payload grammar: same substitution rules, but a bare
/// `$name` is a shorthand substitution.
pub fn parse_string_template(
    payload: &str,
    span: SourceSpan,
    registry: &ExpressionRegistry,
) -> Result<Vec<TextPartIr>, TemplateError> {
    split_dollar(payload, span, registry, true)
}

fn split_dollar(
    text: &str,
    span: SourceSpan,
    registry: &ExpressionRegistry,
    bare_names: bool,
) -> Result<Vec<TextPartIr>, TemplateError> {
    let mut parts: Vec<TextPartIr> = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    fn flush(parts: &mut Vec<TextPartIr>, literal: &mut String) {
        if !literal.is_empty() {
            parts.push(TextPartIr::Static(std::mem::take(literal)));
        }
    }

    while let Some(found) = rest.find('$') {
        literal.push_str(&rest[..found]);
        rest = &rest[found..];

        if rest.starts_with("$$") {
            literal.push('$');
            rest = &rest[2..];
            continue;
        }
        if let Some(after) = rest.strip_prefix("${") {
            let Some(body_len) = matching_brace(after) else {
                return Err(TemplateError::expression(
                    format!("Unterminated interpolation in {:?}.", truncated(text)),
                    span,
                ));
            };
            let body = &after[..body_len];
            flush(&mut parts, &mut literal);
            parts.push(TextPartIr::Expr(registry.parse_expression(body, span)?));
            rest = &after[body_len + 1..];
            continue;
        }
        if bare_names {
            let name_len = rest[1..]
                .char_indices()
                .take_while(|(_, ch)| ch.is_ascii_alphanumeric() || *ch == '_')
                .count();
            if name_len > 0 && rest[1..].chars().next().is_some_and(|ch| !ch.is_ascii_digit()) {
                let name = &rest[1..1 + name_len];
                flush(&mut parts, &mut literal);
                parts.push(TextPartIr::Expr(registry.parse_expression(name, span)?));
                rest = &rest[1 + name_len..];
                continue;
            }
        }
        literal.push('$');
        rest = &rest[1..];
    }
    literal.push_str(rest);
    flush(&mut parts, &mut literal);
    Ok(parts)
}

/// Byte length of the interpolation body: up to the brace matching the
/// opening `${`, with nesting and quote awareness.
fn matching_brace(text: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    for (index, ch) in text.char_indices() {
        if let Some(active) = quote {
            if ch == active {
                quote = None;
            }
            continue;
        }
        match ch {
            '\'' | '"' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                if depth == 0 {
                    return Some(index);
                }
                depth -= 1;
            }
            _ => {}
        }
    }
    None
}

/// Whether interpolating this text would produce any substitution.
pub fn has_interpolation(text: &str) -> bool {
    let mut rest = text;
    while let Some(found) = rest.find('$') {
        rest = &rest[found..];
        if rest.starts_with("$$") {
            rest = &rest[2..];
            continue;
        }
        if rest.starts_with("${") {
            return true;
        }
        rest = &rest[1..];
    }
    false
}

fn truncated(text: &str) -> String {
    text.chars().take(32).collect()
}
