use std::collections::BTreeMap;
use std::sync::Arc;

use petal_compiler::compile_template;
use petal_core::{RenderErrorKind, Settings, TemplateError, TplValue};

use crate::translate::Translator;

use super::{RenderEngine, RenderOptions};

fn engine_for(source: &str, settings: Settings) -> RenderEngine {
    let program = compile_template(source, "test.pt", &settings).expect("compile should pass");
    RenderEngine::new(Arc::new(program), Arc::new(settings))
}

fn render_with(source: &str, variables: &[(&str, TplValue)], settings: Settings) -> String {
    let engine = engine_for(source, settings);
    let variables: BTreeMap<String, TplValue> = variables
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    engine
        .render(&variables, &RenderOptions::default(), BTreeMap::new())
        .expect("render should pass")
}

fn render(source: &str, variables: &[(&str, TplValue)]) -> String {
    render_with(source, variables, Settings::default())
}

fn render_err(source: &str, variables: &[(&str, TplValue)]) -> TemplateError {
    let engine = engine_for(source, Settings::default());
    let variables: BTreeMap<String, TplValue> = variables
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect();
    engine
        .render(&variables, &RenderOptions::default(), BTreeMap::new())
        .expect_err("render should fail")
}

fn string(value: &str) -> TplValue {
    TplValue::Str(value.to_string())
}

fn ints(values: &[i64]) -> TplValue {
    TplValue::Array(values.iter().map(|value| TplValue::Int(*value)).collect())
}

#[test]
fn content_inserts_an_expression_result() {
    let out = render(
        r#"<p tal:content="'Hello, ' + name">x</p>"#,
        &[("name", string("World"))],
    );
    assert_eq!(out, "<p>Hello, World</p>");
}

#[test]
fn repeat_renders_each_item_with_loop_state() {
    let out = render(
        r#"<ul><li tal:repeat="i range(3)" tal:content="repeat.i.number"/></ul>"#,
        &[],
    );
    assert_eq!(out, "<ul><li>1</li><li>2</li><li>3</li></ul>");
}

#[test]
fn attributes_drop_on_none_and_revert_on_default() {
    let out = render(r#"<a tal:attributes="href None" href="/x">k</a>"#, &[]);
    assert_eq!(out, "<a>k</a>");

    let out = render(r#"<a tal:attributes="href default" href="/x">k</a>"#, &[]);
    assert_eq!(out, "<a href=\"/x\">k</a>");
}

#[test]
fn boolean_attributes_render_name_or_vanish() {
    let source = r#"<input type="checkbox" tal:attributes="checked ok"/>"#;
    let checked = render(source, &[("ok", TplValue::Bool(true))]);
    assert_eq!(checked, "<input type=\"checkbox\" checked=\"checked\" />");

    let unchecked = render(source, &[("ok", TplValue::Bool(false))]);
    assert_eq!(unchecked, "<input type=\"checkbox\" />");
}

#[test]
fn interpolation_escapes_by_default_and_structure_skips_it() {
    let escaped = render(r#"<div>${'A & B'}</div>"#, &[]);
    assert_eq!(escaped, "<div>A &amp; B</div>");

    let raw = render(r#"<div>${structure:'<em>x</em>'}</div>"#, &[]);
    assert_eq!(raw, "<div><em>x</em></div>");

    let marked = render(
        r#"<div tal:content="m">x</div>"#,
        &[("m", TplValue::Markup("<b>ok</b>".to_string()))],
    );
    assert_eq!(marked, "<div><b>ok</b></div>");
}

#[test]
fn double_dollar_renders_a_single_dollar() {
    assert_eq!(render("<p>$${x} $$5</p>", &[]), "<p>${x} $5</p>");
    let out = render(r#"<a title="$$ saved">k</a>"#, &[]);
    assert_eq!(out, "<a title=\"$ saved\">k</a>");
}

#[test]
fn macro_slots_substitute_filler_subtrees() {
    let out = render(
        concat!(
            r#"<html metal:define-macro="main"><body><div metal:define-slot="content">default</div></body></html>"#,
            r#"<x metal:use-macro="main"><p metal:fill-slot="content">filled</p></x>"#,
        ),
        &[],
    );
    // The defining element renders inline with its default, the
    // caller gets the filler inside the macro's outer markup.
    assert_eq!(
        out,
        concat!(
            "<html><body><div>default</div></body></html>",
            "<html><body><p>filled</p></body></html>",
        )
    );
}

#[test]
fn unfilled_slots_render_their_default() {
    let out = render(
        concat!(
            r#"<div metal:define-macro="m" tal:omit-tag=""><i metal:define-slot="s">d</i></div>"#,
            r#"<x metal:use-macro="m"><p metal:fill-slot="other">ignored</p></x>"#,
        ),
        &[],
    );
    // Unknown fills are silently discarded.
    assert_eq!(out, "<i>d</i><i>d</i>");
}

#[test]
fn extend_macro_composes_filler_layers_outward_in() {
    let source = concat!(
        r#"<div metal:define-macro="parent" tal:omit-tag=""><s metal:define-slot="t">P</s></div>"#,
        r#"<div metal:define-macro="child" metal:extend-macro="parent"><s metal:fill-slot="t">C</s></div>"#,
        r#"<x metal:use-macro="child"><s metal:fill-slot="t">X</s></x>"#,
        r#"<y metal:use-macro="child"/>"#,
    );
    // Inline renders of the defining elements come first; then the
    // caller's filler wins over the extension's, and a caller without
    // a filler still sees the extension's.
    assert_eq!(
        render(source, &[]),
        "<s>P</s><s>C</s><s>X</s><s>C</s>"
    );
}

#[test]
fn pipe_fallback_tries_candidates_in_order() {
    let out = render(r#"<p tal:content="missing | other.x | 'fallback'"/>"#, &[]);
    assert_eq!(out, "<p>fallback</p>");

    let out = render(
        r#"<p tal:content="missing | name"/>"#,
        &[("name", string("present"))],
    );
    assert_eq!(out, "<p>present</p>");
}

#[test]
fn pipe_fallback_does_not_catch_the_last_candidate() {
    let error = render_err(r#"<p tal:content="missing | also_missing"/>"#, &[]);
    let TemplateError::Render(render_error) = error else {
        panic!("expected a render error");
    };
    assert!(render_error.is_original(RenderErrorKind::Name));
    assert_eq!(render_error.expression, "missing | also_missing");
    assert!(render_error.filename.as_deref() == Some("test.pt"));
}

#[test]
fn switch_renders_the_first_matching_case_only() {
    let source = concat!(
        r#"<div tal:switch="x">"#,
        r#"<p tal:case="1">one</p>"#,
        r#"<p tal:case="1">again</p>"#,
        r#"<p tal:case="default">other</p>"#,
        r#"</div>"#,
    );
    assert_eq!(
        render(source, &[("x", TplValue::Int(1))]),
        "<div><p>one</p></div>"
    );
    assert_eq!(
        render(source, &[("x", TplValue::Int(9))]),
        "<div><p>other</p></div>"
    );
}

#[test]
fn repeat_scope_never_leaks() {
    let source = concat!(
        r#"<div>"#,
        r#"<p tal:repeat="i items" tal:content="i"/>"#,
        r#"<p tal:condition="exists: i">var leaked</p>"#,
        r#"<p tal:condition="exists: repeat.i.number">entry leaked</p>"#,
        r#"</div>"#,
    );
    let out = render(source, &[("items", ints(&[7]))]);
    assert_eq!(out, "<div><p>7</p></div>");
}

#[test]
fn nested_repeat_shadows_and_restores_the_entry() {
    let source = concat!(
        r#"<i tal:repeat="i range(2)" tal:omit-tag="">"#,
        r#"<b tal:repeat="i range(1)" tal:content="repeat.i.length" tal:omit-tag=""/>"#,
        r#"${repeat.i.length}"#,
        r#"</i>"#,
    );
    assert_eq!(render(source, &[]), "1212");
}

#[test]
fn define_scopes_locally_and_globally() {
    let out = render(
        concat!(
            r#"<div><b tal:define="x 1" tal:content="x">?</b>"#,
            r#"<i tal:condition="exists: x">local leaked</i></div>"#,
        ),
        &[],
    );
    assert_eq!(out, "<div><b>1</b></div>");

    let out = render(
        concat!(
            r#"<div><b tal:define="global g 5">.</b>"#,
            r#"<i tal:content="g">?</i></div>"#,
        ),
        &[],
    );
    assert_eq!(out, "<div><b>.</b><i>5</i></div>");
}

#[test]
fn tuple_unpacking_binds_by_position() {
    let pairs = TplValue::Array(vec![ints(&[1, 2]), ints(&[3, 4])]);
    let out = render(
        r#"<p tal:repeat="(a, b) pairs" tal:content="string:$a-$b"/>"#,
        &[("pairs", pairs)],
    );
    assert_eq!(out, "<p>1-2</p><p>3-4</p>");
}

#[test]
fn omit_tag_drops_the_tag_and_keeps_the_body() {
    assert_eq!(render(r#"<div tal:omit-tag="">x</div>"#, &[]), "x");
    assert_eq!(
        render(r#"<div tal:omit-tag="False">x</div>"#, &[]),
        "<div>x</div>"
    );
    assert_eq!(render(r#"<tal:block tal:content="'y'"/>"#, &[]), "y");
}

#[test]
fn replace_substitutes_the_whole_element() {
    assert_eq!(render(r#"<p tal:replace="'new'">old</p>"#, &[]), "new");
    assert_eq!(
        render(r#"<p tal:replace="default">old</p>"#, &[]),
        "<p>old</p>"
    );
}

#[test]
fn content_default_keeps_the_original_body() {
    assert_eq!(
        render(r#"<p tal:content="default">old</p>"#, &[]),
        "<p>old</p>"
    );
}

#[test]
fn condition_controls_rendering() {
    let source = r#"<p tal:condition="flag">on</p>"#;
    assert_eq!(render(source, &[("flag", TplValue::Bool(true))]), "<p>on</p>");
    assert_eq!(render(source, &[("flag", TplValue::Bool(false))]), "");
    assert_eq!(render(source, &[("flag", TplValue::Default)]), "<p>on</p>");
}

#[test]
fn on_error_substitutes_with_static_attributes() {
    let out = render(
        r#"<p class="note" tal:on-error="string:oops" tal:content="boom">x</p>"#,
        &[],
    );
    assert_eq!(out, "<p class=\"note\">oops</p>");
}

#[test]
fn on_error_binds_the_error_variable() {
    let out = render(
        r#"<p tal:on-error="error.kind" tal:content="nope">x</p>"#,
        &[],
    );
    assert_eq!(out, "<p>Name</p>");
}

#[test]
fn code_blocks_bind_into_the_current_scope() {
    let out = render(
        r#"<div><?python let x = 40 + 2; ?><p tal:content="x"/></div>"#,
        &[],
    );
    assert_eq!(out, "<div><p>42</p></div>");
}

#[test]
fn code_blocks_can_rebind_existing_variables() {
    let out = render(
        r#"<div tal:define="x 1"><?python x = x + 1; ?><p tal:content="x"/></div>"#,
        &[],
    );
    assert_eq!(out, "<div><p>2</p></div>");
}

#[test]
fn string_expressions_interpolate() {
    let out = render(
        r#"<p tal:content="string:Hi $name, ${1 + 1}!"/>"#,
        &[("name", string("Ada"))],
    );
    assert_eq!(out, "<p>Hi Ada, 2!</p>");
}

#[test]
fn exists_and_not_compose() {
    let out = render(
        concat!(
            r#"<p tal:condition="exists: name">have</p>"#,
            r#"<p tal:condition="not: exists: missing">lack</p>"#,
        ),
        &[("name", string("x"))],
    );
    assert_eq!(out, "<p>have</p><p>lack</p>");
}

#[test]
fn attribute_interpolation_follows_the_value_rules() {
    let out = render(
        r#"<a href="${url}" title="go ${url}">k</a>"#,
        &[("url", string("/y"))],
    );
    assert_eq!(out, "<a href=\"/y\" title=\"go /y\">k</a>");

    let dropped = render(r#"<a href="${url}">k</a>"#, &[("url", TplValue::None)]);
    assert_eq!(dropped, "<a>k</a>");
}

#[test]
fn comment_interpolation_honours_the_setting() {
    let on = render("<div><!-- v=${'1'} --></div>", &[]);
    assert_eq!(on, "<div><!-- v=1 --></div>");

    let settings = Settings {
        enable_comment_interpolation: false,
        ..Settings::default()
    };
    let off = render_with("<div><!-- v=${'1'} --></div>", &[], settings);
    assert_eq!(off, "<div><!-- v=${'1'} --></div>");
}

#[test]
fn none_and_false_emit_nothing_in_content_position() {
    assert_eq!(render(r#"<p tal:content="None"/>"#, &[]), "<p></p>");
    assert_eq!(render(r#"<p tal:content="False"/>"#, &[]), "<p></p>");
    assert_eq!(render(r#"<p tal:content="True"/>"#, &[]), "<p>true</p>");
}

struct BracketTranslator;

impl Translator for BracketTranslator {
    fn translate(
        &self,
        msgid: &str,
        domain: Option<&str>,
        _mapping: &BTreeMap<String, String>,
        _context: Option<&str>,
        _target_language: Option<&str>,
        _default: Option<&str>,
    ) -> Option<String> {
        Some(match domain {
            Some(domain) => format!("[{}:{}]", domain, msgid),
            None => format!("[{}]", msgid),
        })
    }
}

fn render_translated(source: &str) -> String {
    let engine = engine_for(source, Settings::default());
    let options = RenderOptions {
        translator: Arc::new(BracketTranslator),
        ..RenderOptions::default()
    };
    engine
        .render(&BTreeMap::new(), &options, BTreeMap::new())
        .expect("render should pass")
}

#[test]
fn translation_uses_explicit_msgid_and_lexical_domain() {
    let out = render_translated(
        r#"<div i18n:domain="store"><p i18n:translate="cart">Cart</p></div>"#,
    );
    assert_eq!(out, "<div><p>[store:cart]</p></div>");
}

#[test]
fn translation_derives_msgid_with_name_placeholders() {
    let out = render_translated(
        r#"<p i18n:translate="">Hello <b i18n:name="who">World</b>!</p>"#,
    );
    assert_eq!(out, "<p>[Hello ${who}!]</p>");

    // The null backend falls back to the rendered default text with
    // substitutions applied.
    let out = render(
        r#"<p i18n:translate="">Hello <b i18n:name="who">World</b>!</p>"#,
        &[],
    );
    assert_eq!(out, "<p>Hello <b>World</b>!</p>");
}

#[test]
fn i18n_attributes_translate_attribute_values() {
    let out = render_translated(r#"<a title="Close" i18n:attributes="title">x</a>"#);
    assert_eq!(out, "<a title=\"[Close]\">x</a>");
}

#[test]
fn keyword_arguments_shadow_builtins_for_one_render() {
    let engine = engine_for(r#"<p tal:content="who"/>"#, Settings::default());
    let kwargs = BTreeMap::from([("who".to_string(), string("kw"))]);
    let out = engine
        .render(&BTreeMap::new(), &RenderOptions::default(), kwargs)
        .expect("render should pass");
    assert_eq!(out, "<p>kw</p>");

    // The next render starts clean.
    assert!(engine
        .render(&BTreeMap::new(), &RenderOptions::default(), BTreeMap::new())
        .is_err());
}

#[test]
fn macros_are_exposed_by_name() {
    let engine = engine_for(
        r#"<div metal:define-macro="header"><h1 tal:content="title">t</h1></div>"#,
        Settings::default(),
    );
    assert_eq!(engine.macro_names(), vec!["header".to_string()]);
    let out = engine
        .render_macro(
            "header",
            &BTreeMap::from([("title".to_string(), string("Hi"))]),
            &RenderOptions::default(),
            BTreeMap::new(),
        )
        .expect("macro render should pass");
    assert_eq!(out, "<div><h1>Hi</h1></div>");
    assert!(engine
        .render_macro("missing", &BTreeMap::new(), &RenderOptions::default(), BTreeMap::new())
        .is_err());
}

#[test]
fn renders_share_the_engine_read_only() {
    let engine = Arc::new(engine_for(
        r#"<p tal:repeat="i range(50)" tal:content="repeat.i.number"/>"#,
        Settings::default(),
    ));
    let mut handles = Vec::new();
    for _ in 0..4 {
        let engine = engine.clone();
        handles.push(std::thread::spawn(move || {
            engine
                .render(&BTreeMap::new(), &RenderOptions::default(), BTreeMap::new())
                .expect("parallel render should pass")
        }));
    }
    let outputs: Vec<String> = handles
        .into_iter()
        .map(|handle| handle.join().expect("thread should join"))
        .collect();
    assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn letters_and_romans_are_reachable_from_expressions() {
    let out = render(
        r#"<i tal:repeat="i range(3)" tal:content="string:${repeat.i.letter}${repeat.i.Roman}" tal:omit-tag=""/>"#,
        &[],
    );
    assert_eq!(out, "aIbIIcIII");
}

#[test]
fn render_errors_snapshot_the_scope() {
    let error = render_err(r#"<p tal:define="x 3" tal:content="x + boom"/>"#, &[]);
    let TemplateError::Render(render_error) = error else {
        panic!("expected render error");
    };
    assert_eq!(render_error.variables.get("x").map(String::as_str), Some("3"));
    assert!(render_error.expression.contains("boom"));
}
