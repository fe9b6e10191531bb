use std::collections::BTreeMap;

use petal_core::{
    AttrValueIr, AttributeIr, DefineBinding, DefineIr, ElementIr, ExprCandidate, ExpressionIr,
    FallbackTag, InsertIr, IrNode, MacroIr, OmitTagIr, RepeatIr, Settings, SourceSpan,
    TemplateError, TextPartIr, TplValue, TranslateIr, UseMacroIr, BUILTIN_NAMES, RESERVED_NAMES,
};
use petal_parser::{decode_entities, CommentVariant, Document, ElementNode, TextNode, XmlNode};

use crate::i18n::I18nContext;
use crate::interpolation::lower_interpolation;
use crate::namespaces::NamespaceEnv;
use crate::statements::{
    bind_element, parse_attribute_clauses, parse_defines, parse_i18n_attributes,
    parse_substitution, BoundElement, Statement, StatementKind,
};
use crate::tales::{prepare_code, validate_code_block, ExpressionRegistry};

/// Per-subtree compile state threaded through the recursion.
#[derive(Debug, Clone)]
struct State {
    env: NamespaceEnv,
    interpolation: bool,
    switch_depth: usize,
    in_use_macro: bool,
    i18n: I18nContext,
}

pub struct Codegen<'a> {
    settings: &'a Settings,
    registry: &'a ExpressionRegistry,
    macros: BTreeMap<String, MacroIr>,
}

impl<'a> Codegen<'a> {
    pub fn new(settings: &'a Settings, registry: &'a ExpressionRegistry) -> Self {
        Self {
            settings,
            registry,
            macros: BTreeMap::new(),
        }
    }

    pub fn compile_document(
        mut self,
        document: &Document,
    ) -> Result<(Vec<IrNode>, BTreeMap<String, MacroIr>), TemplateError> {
        let state = State {
            env: NamespaceEnv::root(),
            interpolation: true,
            switch_depth: 0,
            in_use_macro: false,
            i18n: I18nContext::default(),
        };
        let mut root = self.compile_nodes(&document.children, &state)?;
        merge_static(&mut root);
        let mut macros = std::mem::take(&mut self.macros);
        for macro_ir in macros.values_mut() {
            merge_static(&mut macro_ir.body);
        }
        Ok((root, macros))
    }

    fn compile_nodes(
        &mut self,
        nodes: &[XmlNode],
        state: &State,
    ) -> Result<Vec<IrNode>, TemplateError> {
        let mut out = Vec::new();
        for node in nodes {
            match node {
                XmlNode::Element(element) => {
                    if let Some(compiled) = self.compile_element(element, state, false)? {
                        out.push(compiled);
                    }
                }
                XmlNode::Text(text) => self.compile_text(text, state, &mut out)?,
                XmlNode::Comment(comment) => match comment.variant {
                    CommentVariant::Drop => {}
                    CommentVariant::Verbatim => out.push(IrNode::Static {
                        text: comment.raw.clone(),
                    }),
                    CommentVariant::Standard => {
                        let interpolate = state.interpolation
                            && self.settings.enable_comment_interpolation
                            && comment.raw.contains('$');
                        if interpolate {
                            let parts =
                                lower_interpolation(&comment.raw, comment.span, self.registry)?;
                            push_text_parts(parts, comment.span, &mut out);
                        } else {
                            out.push(IrNode::Static {
                                text: comment.raw.clone(),
                            });
                        }
                    }
                },
                XmlNode::Pi(pi) => {
                    if pi.target == "python" {
                        let code = prepare_code(pi.content.trim());
                        validate_code_block(&code, pi.span)?;
                        out.push(IrNode::CodeBlock {
                            code,
                            span: pi.span,
                        });
                    } else {
                        out.push(IrNode::Static {
                            text: pi.raw.clone(),
                        });
                    }
                }
                XmlNode::Cdata(raw) | XmlNode::Doctype(raw) | XmlNode::XmlDecl(raw) => {
                    out.push(IrNode::Static {
                        text: raw.raw.clone(),
                    })
                }
            }
        }
        Ok(out)
    }

    fn compile_text(
        &mut self,
        text: &TextNode,
        state: &State,
        out: &mut Vec<IrNode>,
    ) -> Result<(), TemplateError> {
        if state.interpolation && text.raw.contains('$') {
            let parts = lower_interpolation(&text.raw, text.span, self.registry)?;
            push_text_parts(parts, text.span, out);
            return Ok(());
        }
        if self.settings.implicit_i18n_translate && !text.raw.trim().is_empty() {
            out.push(IrNode::Insert(InsertIr {
                expr: ExpressionIr::single(
                    text.raw.trim(),
                    text.span,
                    ExprCandidate::Literal {
                        value: TplValue::Str(decode_entities(&text.raw)),
                    },
                ),
                escape: true,
                default: Vec::new(),
                translate: true,
                span: text.span,
            }));
            return Ok(());
        }
        out.push(IrNode::Static {
            text: text.raw.clone(),
        });
        Ok(())
    }

    /// Compile one element into at most one IR node. `consume_fill`
    /// marks an element already claimed as a slot filler.
    fn compile_element(
        &mut self,
        element: &ElementNode,
        parent_state: &State,
        consume_fill: bool,
    ) -> Result<Option<IrNode>, TemplateError> {
        let env = parent_state.env.enter(element);
        let bound = bind_element(element, &env, self.settings)?;
        let mut state = State {
            env,
            ..parent_state.clone()
        };
        self.apply_subtree_statements(&bound, &mut state)?;

        let statements = &bound.statements;
        if statements.contains_key(&StatementKind::FillSlot) && !consume_fill {
            if !state.in_use_macro {
                return Err(TemplateError::language(
                    "\"fill-slot\" must be a descendant of a \"use-macro\" element.",
                    element.span,
                ));
            }
            // Collected by the enclosing use-macro; nothing renders
            // in place.
            return Ok(None);
        }
        if let Some(statement) = statements.get(&StatementKind::Case) {
            if state.switch_depth == 0 {
                return Err(TemplateError::language(
                    "\"case\" requires an enclosing \"switch\" element.",
                    statement.span,
                ));
            }
        }

        let use_macro = statements
            .get(&StatementKind::UseMacro)
            .or_else(|| statements.get(&StatementKind::ExtendMacro));

        let mut node = if let Some(statement) = use_macro {
            self.compile_use_macro(element, statement, &state)?
        } else {
            self.compile_plain_element(element, &bound, &state)?
        };

        node = self.wrap_element(node, element, &bound)?;
        Ok(Some(node))
    }

    fn apply_subtree_statements(
        &self,
        bound: &BoundElement,
        state: &mut State,
    ) -> Result<(), TemplateError> {
        if let Some(statement) = bound.statements.get(&StatementKind::MetaInterpolation) {
            match statement.value.trim() {
                "off" | "false" => state.interpolation = false,
                "on" | "true" => state.interpolation = true,
                other => {
                    return Err(TemplateError::language(
                        format!("Invalid interpolation setting \"{}\".", other),
                        statement.span,
                    ))
                }
            }
        }
        let assign = |target: &mut Option<String>, statement: &Statement| {
            let value = statement.value.trim();
            *target = if value.is_empty() {
                None
            } else {
                Some(value.to_string())
            };
        };
        if let Some(statement) = bound.statements.get(&StatementKind::I18nDomain) {
            assign(&mut state.i18n.domain, statement);
        }
        if let Some(statement) = bound.statements.get(&StatementKind::I18nContext) {
            assign(&mut state.i18n.context, statement);
        }
        if let Some(statement) = bound.statements.get(&StatementKind::I18nSource) {
            assign(&mut state.i18n.source, statement);
        }
        if let Some(statement) = bound.statements.get(&StatementKind::I18nTarget) {
            assign(&mut state.i18n.target, statement);
        }
        Ok(())
    }

    fn compile_use_macro(
        &mut self,
        element: &ElementNode,
        statement: &Statement,
        state: &State,
    ) -> Result<IrNode, TemplateError> {
        let expr = self
            .registry
            .parse_expression(&statement.value, statement.span)?;
        let extend = statement.kind == StatementKind::ExtendMacro;
        let mut fillers = BTreeMap::new();
        let filler_state = State {
            in_use_macro: true,
            ..state.clone()
        };
        self.collect_fillers(&element.children, &filler_state, &mut fillers)?;
        Ok(IrNode::UseMacro(UseMacroIr {
            expr,
            fillers,
            extend,
            span: element.span,
        }))
    }

    /// Find `fill-slot` elements anywhere under a `use-macro` element
    /// and compile each as a filler body.
    fn collect_fillers(
        &mut self,
        children: &[XmlNode],
        state: &State,
        fillers: &mut BTreeMap<String, Vec<IrNode>>,
    ) -> Result<(), TemplateError> {
        for child in children {
            let XmlNode::Element(element) = child else {
                continue;
            };
            let env = state.env.enter(element);
            let bound = bind_element(element, &env, self.settings)?;
            if let Some(statement) = bound.statements.get(&StatementKind::FillSlot) {
                let name = statement.value.trim().to_string();
                if name.is_empty() {
                    return Err(TemplateError::language(
                        "Empty \"fill-slot\" name.",
                        statement.span,
                    ));
                }
                if let Some(compiled) = self.compile_element(element, state, true)? {
                    fillers.insert(name, vec![compiled]);
                }
                continue;
            }
            self.collect_fillers(&element.children, state, fillers)?;
        }
        Ok(())
    }

    fn compile_plain_element(
        &mut self,
        element: &ElementNode,
        bound: &BoundElement,
        state: &State,
    ) -> Result<IrNode, TemplateError> {
        let statements = &bound.statements;
        let child_state = State {
            switch_depth: state.switch_depth
                + usize::from(statements.contains_key(&StatementKind::Switch)),
            ..state.clone()
        };
        let children_ir = self.compile_nodes(&element.children, &child_state)?;

        let attributes = self.build_attributes(bound, state)?;
        let omit = if bound.control_element {
            OmitTagIr::Always
        } else if let Some(statement) = statements.get(&StatementKind::OmitTag) {
            if statement.value.trim().is_empty() {
                OmitTagIr::Always
            } else {
                OmitTagIr::Expr(
                    self.registry
                        .parse_expression(&statement.value, statement.span)?,
                )
            }
        } else {
            OmitTagIr::Never
        };

        // Body: content substitution, then the translation capture.
        let mut body = children_ir;
        if let Some(statement) = statements.get(&StatementKind::Content) {
            let clause = parse_substitution(&statement.value, statement.span)?;
            let expr = self
                .registry
                .parse_expression(&clause.expression, statement.span)?;
            body = vec![IrNode::Insert(InsertIr {
                expr,
                escape: !clause.structure,
                default: body,
                translate: false,
                span: statement.span,
            })];
        }
        if statements.contains_key(&StatementKind::I18nTranslate)
            || statements.contains_key(&StatementKind::I18nData)
        {
            body = vec![self.build_translate(statements, body, element.span, state)?];
        }

        let element_ir = ElementIr {
            tag: element.name.clone(),
            attributes,
            body,
            omit,
            self_closing: element.self_closing,
            span: element.span,
        };
        let mut node = IrNode::Element(Box::new(element_ir));

        if let Some(statement) = statements.get(&StatementKind::Replace) {
            let clause = parse_substitution(&statement.value, statement.span)?;
            let expr = self
                .registry
                .parse_expression(&clause.expression, statement.span)?;
            node = IrNode::Insert(InsertIr {
                expr,
                escape: !clause.structure,
                default: vec![node],
                translate: false,
                span: statement.span,
            });
        }
        Ok(node)
    }

    fn build_translate(
        &mut self,
        statements: &BTreeMap<StatementKind, Statement>,
        body: Vec<IrNode>,
        span: SourceSpan,
        state: &State,
    ) -> Result<IrNode, TemplateError> {
        let msgid = statements
            .get(&StatementKind::I18nTranslate)
            .map(|statement| statement.value.trim())
            .filter(|value| !value.is_empty())
            .map(|value| value.to_string());
        let data = statements
            .get(&StatementKind::I18nData)
            .map(|statement| {
                self.registry
                    .parse_expression(&statement.value, statement.span)
            })
            .transpose()?;
        Ok(IrNode::Translate(TranslateIr {
            msgid,
            domain: state.i18n.domain.clone(),
            context: state.i18n.context.clone(),
            source_language: state.i18n.source.clone(),
            target_language: state.i18n.target.clone(),
            data,
            body,
            span,
        }))
    }

    /// Nest the control statements around the element node in the
    /// canonical execution order, innermost first: i18n-name,
    /// on-error, case, repeat, condition, switch, define,
    /// define-slot. Source order of the attributes never matters.
    fn wrap_element(
        &mut self,
        mut node: IrNode,
        element: &ElementNode,
        bound: &BoundElement,
    ) -> Result<IrNode, TemplateError> {
        let statements = &bound.statements;

        if let Some(statement) = statements.get(&StatementKind::I18nName) {
            let name = statement.value.trim().to_string();
            if name.is_empty() {
                return Err(TemplateError::language(
                    "Empty \"i18n:name\".",
                    statement.span,
                ));
            }
            node = IrNode::I18nName {
                name,
                body: vec![node],
                span: statement.span,
            };
        }

        if let Some(statement) = statements.get(&StatementKind::OnError) {
            let clause = parse_substitution(&statement.value, statement.span)?;
            let handler = self
                .registry
                .parse_expression(&clause.expression, statement.span)?;
            node = IrNode::OnError {
                handler,
                structure: clause.structure,
                fallback: fallback_tag(element, bound),
                body: vec![node],
                span: statement.span,
            };
        }

        if let Some(statement) = statements.get(&StatementKind::Case) {
            let expr = self
                .registry
                .parse_expression(&statement.value, statement.span)?;
            node = IrNode::Case {
                expr,
                body: vec![node],
                span: statement.span,
            };
        }

        if let Some(statement) = statements.get(&StatementKind::Repeat) {
            let clauses = parse_defines(&statement.value, statement.span)?;
            if clauses.len() != 1 {
                return Err(TemplateError::language(
                    "\"repeat\" accepts exactly one clause.",
                    statement.span,
                ));
            }
            let clause = &clauses[0];
            if clause.global {
                return Err(TemplateError::language(
                    "\"repeat\" does not accept the global qualifier.",
                    statement.span,
                ));
            }
            self.check_binding_names(&clause.names, statement.span)?;
            let expr = self
                .registry
                .parse_expression(&clause.expression, statement.span)?;
            node = IrNode::Repeat(RepeatIr {
                names: clause.names.clone(),
                expr,
                body: vec![node],
                span: statement.span,
            });
        }

        if let Some(statement) = statements.get(&StatementKind::Condition) {
            let expr = self
                .registry
                .parse_expression(&statement.value, statement.span)?;
            node = IrNode::Condition {
                expr,
                body: vec![node],
                span: statement.span,
            };
        }

        if let Some(statement) = statements.get(&StatementKind::Switch) {
            let expr = self
                .registry
                .parse_expression(&statement.value, statement.span)?;
            node = IrNode::Switch {
                expr,
                body: vec![node],
                span: statement.span,
            };
        }

        if let Some(statement) = statements.get(&StatementKind::Define) {
            let clauses = parse_defines(&statement.value, statement.span)?;
            let mut bindings = Vec::new();
            for clause in &clauses {
                self.check_binding_names(&clause.names, statement.span)?;
                bindings.push(DefineBinding {
                    names: clause.names.clone(),
                    expr: self
                        .registry
                        .parse_expression(&clause.expression, statement.span)?,
                    global: clause.global,
                });
            }
            node = IrNode::Define(DefineIr {
                bindings,
                body: vec![node],
                span: statement.span,
            });
        }

        if let Some(statement) = statements.get(&StatementKind::DefineSlot) {
            let name = statement.value.trim().to_string();
            if name.is_empty() {
                return Err(TemplateError::language(
                    "Empty \"define-slot\" name.",
                    statement.span,
                ));
            }
            node = IrNode::DefineSlot {
                name,
                default: vec![node],
                span: statement.span,
            };
        }

        if let Some(statement) = statements.get(&StatementKind::DefineMacro) {
            let name = statement.value.trim().to_string();
            if name.is_empty() {
                return Err(TemplateError::language(
                    "Empty \"define-macro\" name.",
                    statement.span,
                ));
            }
            if self.macros.contains_key(&name) {
                return Err(TemplateError::language(
                    format!("Duplicate macro name \"{}\".", name),
                    statement.span,
                ));
            }
            let mut slots = Vec::new();
            collect_slot_names(&node, &mut slots);
            slots.sort();
            if let Some(duplicate) = slots.windows(2).find(|pair| pair[0] == pair[1]) {
                return Err(TemplateError::language(
                    format!("Duplicate slot name \"{}\" in macro \"{}\".", duplicate[0], name),
                    statement.span,
                ));
            }
            self.macros.insert(
                name.clone(),
                MacroIr {
                    name,
                    slots,
                    body: vec![node.clone()],
                    span: element.span,
                },
            );
        }

        Ok(node)
    }

    fn check_binding_names(
        &self,
        names: &[String],
        span: SourceSpan,
    ) -> Result<(), TemplateError> {
        if !self.settings.strict {
            return Ok(());
        }
        for name in names {
            if RESERVED_NAMES.contains(&name.as_str()) || BUILTIN_NAMES.contains(&name.as_str()) {
                return Err(TemplateError::language(
                    format!("\"{}\" is a reserved name.", name),
                    span,
                ));
            }
        }
        Ok(())
    }

    /// Merge static attributes with `tal:attributes` and
    /// `i18n:attributes` into a single ordered write plan.
    fn build_attributes(
        &mut self,
        bound: &BoundElement,
        state: &State,
    ) -> Result<Vec<AttributeIr>, TemplateError> {
        let mut attributes: Vec<AttributeIr> = Vec::new();

        for attribute in &bound.passthrough {
            let space = if attribute.space.is_empty() {
                " ".to_string()
            } else if self.settings.trim_attribute_space {
                " ".to_string()
            } else {
                attribute.space.clone()
            };
            let value = match &attribute.raw_value {
                None => AttrValueIr::Static { raw: String::new() },
                Some(raw) => {
                    if state.interpolation && raw.contains('$') {
                        AttrValueIr::Interpolated {
                            parts: lower_interpolation(raw, attribute.span, self.registry)?,
                        }
                    } else {
                        AttrValueIr::Static { raw: raw.clone() }
                    }
                }
            };
            let lowered = attribute.name.to_lowercase();
            attributes.push(AttributeIr {
                name: attribute.name.clone(),
                value,
                quote: if attribute.quote.is_empty() && attribute.raw_value.is_some() {
                    "\"".to_string()
                } else {
                    attribute.quote.clone()
                },
                space,
                eq: if attribute.raw_value.is_none() {
                    String::new()
                } else {
                    attribute.eq.clone()
                },
                boolean: self.settings.boolean_attributes.contains(&lowered),
                translate: None,
                span: attribute.span,
            });
        }

        if let Some(statement) = bound.statements.get(&StatementKind::Attributes) {
            for (name, expression) in
                parse_attribute_clauses(&statement.value, statement.span)?
            {
                let expr = self
                    .registry
                    .parse_expression(&expression, statement.span)?;
                match name {
                    None => attributes.push(AttributeIr {
                        name: String::new(),
                        value: AttrValueIr::Dynamic {
                            expr,
                            static_default: None,
                        },
                        quote: "\"".to_string(),
                        space: " ".to_string(),
                        eq: "=".to_string(),
                        boolean: false,
                        translate: None,
                        span: statement.span,
                    }),
                    Some(name) => {
                        let lowered = name.to_lowercase();
                        let boolean = self.settings.boolean_attributes.contains(&lowered);
                        match attributes
                            .iter_mut()
                            .find(|attribute| attribute.name.to_lowercase() == lowered)
                        {
                            Some(existing) => {
                                let static_default = match &existing.value {
                                    AttrValueIr::Static { raw } => Some(raw.clone()),
                                    _ => None,
                                };
                                // Casing of the produced name follows
                                // the directive.
                                existing.name = name;
                                existing.boolean = boolean;
                                existing.value = AttrValueIr::Dynamic {
                                    expr,
                                    static_default,
                                };
                                if existing.eq.is_empty() {
                                    existing.eq = "=".to_string();
                                }
                                if existing.quote.is_empty() {
                                    existing.quote = "\"".to_string();
                                }
                            }
                            None => attributes.push(AttributeIr {
                                name,
                                value: AttrValueIr::Dynamic {
                                    expr,
                                    static_default: None,
                                },
                                quote: "\"".to_string(),
                                space: " ".to_string(),
                                eq: "=".to_string(),
                                boolean,
                                translate: None,
                                span: statement.span,
                            }),
                        }
                    }
                }
            }
        }

        if let Some(statement) = bound.statements.get(&StatementKind::I18nAttributes) {
            for (name, msgid) in parse_i18n_attributes(&statement.value, statement.span)? {
                let lowered = name.to_lowercase();
                match attributes
                    .iter_mut()
                    .find(|attribute| attribute.name.to_lowercase() == lowered)
                {
                    Some(existing) => {
                        existing.translate = Some(msgid.unwrap_or_default());
                    }
                    None => attributes.push(AttributeIr {
                        name: name.clone(),
                        value: AttrValueIr::Static { raw: name },
                        quote: "\"".to_string(),
                        space: " ".to_string(),
                        eq: "=".to_string(),
                        boolean: false,
                        translate: Some(msgid.unwrap_or_default()),
                        span: statement.span,
                    }),
                }
            }
        }

        for attribute in attributes.iter_mut() {
            if attribute.translate.is_none()
                && self
                    .settings
                    .implicit_i18n_attributes
                    .contains(&attribute.name.to_lowercase())
            {
                attribute.translate = Some(String::new());
            }
        }

        Ok(attributes)
    }
}

fn fallback_tag(element: &ElementNode, bound: &BoundElement) -> Option<FallbackTag> {
    if bound.control_element {
        return None;
    }
    Some(FallbackTag {
        tag: element.name.clone(),
        attributes: bound
            .passthrough
            .iter()
            .filter_map(|attribute| {
                attribute.raw_value.as_ref().map(|raw| {
                    (
                        attribute.name.clone(),
                        raw.clone(),
                        if attribute.quote.is_empty() {
                            "\"".to_string()
                        } else {
                            attribute.quote.clone()
                        },
                        if attribute.space.is_empty() {
                            " ".to_string()
                        } else {
                            attribute.space.clone()
                        },
                        attribute.eq.clone(),
                    )
                })
            })
            .collect(),
        self_closing: element.self_closing,
    })
}

fn push_text_parts(parts: Vec<TextPartIr>, span: SourceSpan, out: &mut Vec<IrNode>) {
    for part in parts {
        match part {
            TextPartIr::Static(text) => out.push(IrNode::Static { text }),
            TextPartIr::Expr(expr) => out.push(IrNode::Insert(InsertIr {
                expr,
                escape: true,
                default: Vec::new(),
                translate: false,
                span,
            })),
        }
    }
}

fn collect_slot_names(node: &IrNode, out: &mut Vec<String>) {
    let children: &[IrNode] = match node {
        IrNode::DefineSlot { name, default, .. } => {
            out.push(name.clone());
            default
        }
        IrNode::Element(element) => &element.body,
        IrNode::Define(define) => &define.body,
        IrNode::Condition { body, .. }
        | IrNode::Switch { body, .. }
        | IrNode::Case { body, .. }
        | IrNode::OnError { body, .. }
        | IrNode::I18nName { body, .. } => body,
        IrNode::Repeat(repeat) => &repeat.body,
        IrNode::Translate(translate) => &translate.body,
        IrNode::Insert(insert) => &insert.default,
        _ => return,
    };
    for child in children {
        collect_slot_names(child, out);
    }
}

/// Merge adjacent static runs so the emitted program concatenates as
/// few buffer tokens as possible.
pub fn merge_static(nodes: &mut Vec<IrNode>) {
    let mut merged: Vec<IrNode> = Vec::with_capacity(nodes.len());
    for mut node in nodes.drain(..) {
        descend_static(&mut node);
        match (merged.last_mut(), &node) {
            (Some(IrNode::Static { text: previous }), IrNode::Static { text }) => {
                previous.push_str(text);
            }
            _ => merged.push(node),
        }
    }
    *nodes = merged;
}

fn descend_static(node: &mut IrNode) {
    match node {
        IrNode::Element(element) => merge_static(&mut element.body),
        IrNode::Define(define) => merge_static(&mut define.body),
        IrNode::Condition { body, .. }
        | IrNode::Switch { body, .. }
        | IrNode::Case { body, .. }
        | IrNode::OnError { body, .. }
        | IrNode::I18nName { body, .. } => merge_static(body),
        IrNode::Repeat(repeat) => merge_static(&mut repeat.body),
        IrNode::Translate(translate) => merge_static(&mut translate.body),
        IrNode::Insert(insert) => merge_static(&mut insert.default),
        IrNode::UseMacro(use_macro) => {
            for body in use_macro.fillers.values_mut() {
                merge_static(body);
            }
        }
        IrNode::DefineSlot { default, .. } => merge_static(default),
        IrNode::Static { .. } | IrNode::CodeBlock { .. } => {}
    }
}
