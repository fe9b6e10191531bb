use std::collections::BTreeMap;
use std::sync::OnceLock;

use petal_core::{Settings, SourceSpan, TemplateError};
use petal_parser::{AttributeNode, ElementNode};
use regex::Regex;

use crate::namespaces::{
    is_control_namespace, NamespaceEnv, I18N_NS, META_NS, METAL_NS, PETAL_NS, TAL_NS,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatementKind {
    Define,
    Switch,
    Condition,
    Repeat,
    Case,
    Content,
    Replace,
    OmitTag,
    Attributes,
    OnError,
    DefineMacro,
    UseMacro,
    ExtendMacro,
    DefineSlot,
    FillSlot,
    I18nTranslate,
    I18nDomain,
    I18nContext,
    I18nSource,
    I18nTarget,
    I18nName,
    I18nAttributes,
    I18nData,
    MetaInterpolation,
}

/// One recognized control attribute, value not yet expression-parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub kind: StatementKind,
    /// Raw attribute value; clause grammars split and entity-decode it.
    pub value: String,
    pub span: SourceSpan,
}

/// The result of the namespace filter on one element.
#[derive(Debug, Clone)]
pub struct BoundElement {
    pub statements: BTreeMap<StatementKind, Statement>,
    /// Attributes surviving into the output, source order preserved.
    pub passthrough: Vec<AttributeNode>,
    /// True when the element itself lives in a control namespace
    /// (e.g. `<tal:block>`): the tag is always omitted.
    pub control_element: bool,
}

fn tal_statement(local: &str) -> Option<StatementKind> {
    match local {
        "define" => Some(StatementKind::Define),
        "switch" => Some(StatementKind::Switch),
        "condition" => Some(StatementKind::Condition),
        "repeat" => Some(StatementKind::Repeat),
        "case" => Some(StatementKind::Case),
        "content" => Some(StatementKind::Content),
        "replace" => Some(StatementKind::Replace),
        "omit-tag" => Some(StatementKind::OmitTag),
        "attributes" => Some(StatementKind::Attributes),
        "on-error" => Some(StatementKind::OnError),
        _ => None,
    }
}

fn metal_statement(local: &str) -> Option<StatementKind> {
    match local {
        "define-macro" => Some(StatementKind::DefineMacro),
        "use-macro" => Some(StatementKind::UseMacro),
        "extend-macro" => Some(StatementKind::ExtendMacro),
        "define-slot" => Some(StatementKind::DefineSlot),
        "fill-slot" => Some(StatementKind::FillSlot),
        _ => None,
    }
}

fn i18n_statement(local: &str) -> Option<StatementKind> {
    match local {
        "translate" => Some(StatementKind::I18nTranslate),
        "domain" => Some(StatementKind::I18nDomain),
        "context" => Some(StatementKind::I18nContext),
        "source" => Some(StatementKind::I18nSource),
        "target" => Some(StatementKind::I18nTarget),
        "name" => Some(StatementKind::I18nName),
        "attributes" => Some(StatementKind::I18nAttributes),
        "data" => Some(StatementKind::I18nData),
        _ => None,
    }
}

fn statement_for(namespace: &str, local: &str) -> Option<StatementKind> {
    match namespace {
        TAL_NS | PETAL_NS => tal_statement(local),
        METAL_NS => metal_statement(local),
        I18N_NS => i18n_statement(local),
        META_NS => match local {
            "interpolation" => Some(StatementKind::MetaInterpolation),
            _ => None,
        },
        _ => None,
    }
}

/// Extract control attributes from an element, leaving the rest as
/// passthrough output attributes. `env` must already include the
/// element's own namespace declarations.
pub fn bind_element(
    element: &ElementNode,
    env: &NamespaceEnv,
    settings: &Settings,
) -> Result<BoundElement, TemplateError> {
    let mut statements = BTreeMap::new();
    let mut passthrough = Vec::new();

    let control_element = element
        .prefix()
        .and_then(|prefix| env.resolve(prefix))
        .map(is_control_namespace)
        .unwrap_or(false);

    for attribute in &element.attributes {
        // Declarations of control namespaces are stripped with their
        // attributes.
        if let Some(prefix) = attribute.name.strip_prefix("xmlns:") {
            let declared = attribute.decoded_value().unwrap_or_default();
            if is_control_namespace(&declared) {
                continue;
            }
            if settings.restricted_namespace && env.resolve(prefix) == Some(declared.as_str()) {
                return Err(TemplateError::language(
                    format!("Namespace \"{}\" is outside the recognised set.", declared),
                    attribute.span,
                ));
            }
            passthrough.push(attribute.clone());
            continue;
        }

        let resolved = resolve_attribute(attribute, env, settings);
        match resolved {
            ResolvedAttribute::Statement(namespace, local) => {
                match statement_for(namespace, &local) {
                    Some(kind) => {
                        let statement = Statement {
                            kind,
                            value: attribute.raw_value.clone().unwrap_or_default(),
                            span: attribute.span,
                        };
                        if statements.insert(kind, statement).is_some() {
                            return Err(TemplateError::language(
                                format!("Duplicate statement \"{}\".", attribute.name),
                                attribute.span,
                            ));
                        }
                    }
                    None => {
                        return Err(TemplateError::language(
                            format!("Unknown control attribute \"{}\".", attribute.name),
                            attribute.span,
                        ));
                    }
                }
            }
            ResolvedAttribute::Foreign => {
                if settings.strict || settings.restricted_namespace {
                    return Err(TemplateError::language(
                        format!(
                            "Attribute \"{}\" uses a namespace outside the recognised set.",
                            attribute.name
                        ),
                        attribute.span,
                    ));
                }
                passthrough.push(attribute.clone());
            }
            ResolvedAttribute::Plain => passthrough.push(attribute.clone()),
        }
    }

    if statements.contains_key(&StatementKind::Content)
        && statements.contains_key(&StatementKind::Replace)
    {
        return Err(TemplateError::language(
            "\"content\" and \"replace\" are mutually exclusive on one element.",
            element.span,
        ));
    }

    Ok(BoundElement {
        statements,
        passthrough,
        control_element,
    })
}

enum ResolvedAttribute<'a> {
    Statement(&'a str, String),
    Foreign,
    Plain,
}

fn resolve_attribute<'a>(
    attribute: &AttributeNode,
    env: &'a NamespaceEnv,
    settings: &Settings,
) -> ResolvedAttribute<'a> {
    if let Some((prefix, local)) = attribute.name.split_once(':') {
        if prefix == "xml" {
            return ResolvedAttribute::Plain;
        }
        return match env.resolve(prefix) {
            Some(uri) if is_control_namespace(uri) => {
                // Borrow the canonical constant, not the env entry.
                let canonical = canonical_namespace(uri);
                ResolvedAttribute::Statement(canonical, local.to_string())
            }
            Some(_) => ResolvedAttribute::Foreign,
            None => ResolvedAttribute::Foreign,
        };
    }

    if settings.enable_data_attributes {
        for (marker, namespace) in [
            ("data-tal-", TAL_NS),
            ("data-metal-", METAL_NS),
            ("data-i18n-", I18N_NS),
            ("data-meta-", META_NS),
        ] {
            if let Some(local) = attribute.name.strip_prefix(marker) {
                return ResolvedAttribute::Statement(namespace, local.to_string());
            }
        }
    }

    ResolvedAttribute::Plain
}

fn canonical_namespace(uri: &str) -> &'static str {
    match uri {
        TAL_NS => TAL_NS,
        METAL_NS => METAL_NS,
        I18N_NS => I18N_NS,
        META_NS => META_NS,
        _ => PETAL_NS,
    }
}

static ENTITY_RE: OnceLock<Regex> = OnceLock::new();
static DEFINE_RE: OnceLock<Regex> = OnceLock::new();
static SUBST_RE: OnceLock<Regex> = OnceLock::new();
static ATTR_RE: OnceLock<Regex> = OnceLock::new();

fn entity_re() -> &'static Regex {
    ENTITY_RE.get_or_init(|| {
        Regex::new(r"&(#?)(x?)([0-9]{1,5}|[0-9A-Za-z]{1,8});").expect("entity regex must compile")
    })
}

/// Split an attribute value into sub-statements at undoubled `;`.
/// `;;` is the literal semicolon, and the terminating semicolon of an
/// entity reference never splits.
pub fn split_clauses(value: &str) -> Vec<String> {
    // Shield entity semicolons by doubling them first, exactly like
    // the literal-semicolon escape.
    let mut shielded = String::with_capacity(value.len());
    let mut cursor = 0usize;
    for found in entity_re().find_iter(value) {
        shielded.push_str(&value[cursor..found.end()]);
        shielded.push(';');
        cursor = found.end();
    }
    shielded.push_str(&value[cursor..]);

    let protected = shielded.replace(";;", "\0");
    let mut parts: Vec<String> = protected
        .split(';')
        .map(|part| part.replace('\0', ";"))
        .collect();
    if parts.len() > 1 && parts.last().map(|part| part.trim().is_empty()) == Some(true) {
        parts.pop();
    }
    parts
}

/// A parsed `define` clause: scope qualifier, names, expression text.
#[derive(Debug, Clone, PartialEq)]
pub struct DefineClause {
    pub global: bool,
    pub names: Vec<String>,
    pub expression: String,
}

fn define_re() -> &'static Regex {
    DEFINE_RE.get_or_init(|| {
        Regex::new(
            r"(?s)^\s*(?:(global|local)\s+)?([A-Za-z_][-A-Za-z0-9_]*|\([A-Za-z_][-A-Za-z0-9_]*(?:\s*,\s*[A-Za-z_][-A-Za-z0-9_]*)*\))\s+(.*)$",
        )
        .expect("define regex must compile")
    })
}

pub fn parse_defines(value: &str, span: SourceSpan) -> Result<Vec<DefineClause>, TemplateError> {
    let mut out = Vec::new();
    for part in split_clauses(value) {
        if part.trim().is_empty() {
            continue;
        }
        let Some(captures) = define_re().captures(&part) else {
            return Err(TemplateError::language(
                format!("Invalid define clause: \"{}\".", part.trim()),
                span,
            ));
        };
        let global = captures.get(1).map(|m| m.as_str()) == Some("global");
        let name_group = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
        let names = if let Some(stripped) = name_group
            .strip_prefix('(')
            .and_then(|inner| inner.strip_suffix(')'))
        {
            stripped
                .split(',')
                .map(|name| name.trim().to_string())
                .collect()
        } else {
            vec![name_group.to_string()]
        };
        let expression = captures
            .get(3)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        if expression.is_empty() {
            return Err(TemplateError::language(
                format!("Define clause is missing an expression: \"{}\".", part.trim()),
                span,
            ));
        }
        out.push(DefineClause {
            global,
            names,
            expression,
        });
    }
    if out.is_empty() {
        return Err(TemplateError::language("Empty define statement.", span));
    }
    Ok(out)
}

/// A content/replace/on-error clause: substitution mode plus
/// expression text.
#[derive(Debug, Clone, PartialEq)]
pub struct SubstitutionClause {
    pub structure: bool,
    pub expression: String,
}

fn subst_re() -> &'static Regex {
    SUBST_RE.get_or_init(|| {
        Regex::new(r"(?s)^\s*(?:(text|structure)\s+)?(.*)$").expect("subst regex must compile")
    })
}

pub fn parse_substitution(
    value: &str,
    span: SourceSpan,
) -> Result<SubstitutionClause, TemplateError> {
    let Some(captures) = subst_re().captures(value) else {
        return Err(TemplateError::language(
            "Invalid content substitution syntax.",
            span,
        ));
    };
    let structure = captures.get(1).map(|m| m.as_str()) == Some("structure");
    let expression = captures
        .get(2)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    if expression.is_empty() {
        return Err(TemplateError::language(
            "Empty substitution expression.",
            span,
        ));
    }
    Ok(SubstitutionClause {
        structure,
        expression,
    })
}

/// One `attributes` clause: attribute name (None for the dict splat
/// form) plus expression text.
fn attr_re() -> &'static Regex {
    ATTR_RE.get_or_init(|| {
        Regex::new(r#"(?s)^\s*([^\s{}'"]+)\s+([^\s].*)$"#).expect("attr regex must compile")
    })
}

pub fn parse_attribute_clauses(
    value: &str,
    span: SourceSpan,
) -> Result<Vec<(Option<String>, String)>, TemplateError> {
    let mut out = Vec::new();
    let mut seen = Vec::new();
    for part in split_clauses(value) {
        if part.trim().is_empty() {
            continue;
        }
        let (name, expression) = match attr_re().captures(&part) {
            Some(captures) => (
                Some(captures[1].to_string()),
                captures[2].trim().to_string(),
            ),
            None => (None, part.trim().to_string()),
        };
        if let Some(name) = &name {
            let folded = name.to_lowercase();
            if seen.contains(&folded) {
                return Err(TemplateError::language(
                    format!("Duplicate attribute name \"{}\" in attributes.", name),
                    span,
                ));
            }
            seen.push(folded);
        }
        out.push((name, expression));
    }
    Ok(out)
}

/// `i18n:attributes` clause list: attribute name plus optional msgid.
pub fn parse_i18n_attributes(
    value: &str,
    span: SourceSpan,
) -> Result<Vec<(String, Option<String>)>, TemplateError> {
    let mut out = Vec::new();
    for part in split_clauses(value) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let mut words = part.split_whitespace();
        let Some(name) = words.next() else {
            continue;
        };
        let msgid = words.next().map(|word| word.to_string());
        if words.next().is_some() {
            return Err(TemplateError::language(
                format!("Invalid i18n attributes clause: \"{}\".", part),
                span,
            ));
        }
        out.push((name.to_string(), msgid));
    }
    Ok(out)
}
