pub mod cli_args;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use petal_api::{Settings, TemplateLoader, TplValue};
use petal_core::value_from_json;

use cli_args::{CheckArgs, RenderArgs};

pub fn run_render(args: &RenderArgs) -> Result<String> {
    let mut settings = Settings::from_env();
    settings.strict |= args.strict;
    settings.trim_attribute_space |= args.trim_attribute_space;
    if args.no_cache {
        settings.cache_directory = None;
    }
    settings.search_path = search_path_for(&args.template, &args.search_path);

    let variables = match &args.data {
        Some(path) => load_variables(path)?,
        None => BTreeMap::new(),
    };

    let loader = TemplateLoader::new(settings);
    let template = loader
        .load(&args.template)
        .with_context(|| format!("failed to load {}", args.template.display()))?;
    let output = template
        .render(&variables, BTreeMap::new())
        .with_context(|| format!("failed to render {}", args.template.display()))?;
    Ok(output)
}

pub fn run_check(args: &CheckArgs) -> Result<()> {
    let mut settings = Settings::from_env();
    settings.strict |= args.strict;
    settings.cache_directory = None;
    settings.search_path = search_path_for(&args.template, &[]);

    let loader = TemplateLoader::new(settings);
    let template = loader
        .load(&args.template)
        .with_context(|| format!("failed to load {}", args.template.display()))?;
    template
        .macros()
        .with_context(|| format!("compile failed for {}", args.template.display()))?;
    Ok(())
}

fn search_path_for(template: &Path, extra: &[std::path::PathBuf]) -> Vec<std::path::PathBuf> {
    let mut out = Vec::new();
    if let Some(parent) = template.parent() {
        if !parent.as_os_str().is_empty() {
            out.push(parent.to_path_buf());
        }
    }
    out.extend(extra.iter().cloned());
    out
}

fn load_variables(path: &Path) -> Result<BTreeMap<String, TplValue>> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let json: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("invalid JSON in {}", path.display()))?;
    match value_from_json(json) {
        TplValue::Map(map) => Ok(map),
        other => bail!(
            "{} must hold a JSON object at the top level, got {}",
            path.display(),
            other.type_name()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).expect("write fixture");
        path
    }

    #[test]
    fn render_produces_template_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write(
            dir.path(),
            "page.pt",
            r#"<p tal:content="name">x</p>"#,
        );
        let data = write(dir.path(), "vars.json", r#"{"name": "World"}"#);

        let args = RenderArgs {
            template,
            data: Some(data),
            search_path: Vec::new(),
            strict: false,
            trim_attribute_space: false,
            no_cache: true,
            output: None,
        };
        let output = run_render(&args).expect("render should pass");
        assert_eq!(output, "<p>World</p>");
    }

    #[test]
    fn render_rejects_non_object_data() {
        let dir = tempfile::tempdir().expect("tempdir");
        let template = write(dir.path(), "page.pt", "<p>static</p>");
        let data = write(dir.path(), "vars.json", "[1, 2]");
        let args = RenderArgs {
            template,
            data: Some(data),
            search_path: Vec::new(),
            strict: false,
            trim_attribute_space: false,
            no_cache: true,
            output: None,
        };
        assert!(run_render(&args).is_err());
    }

    #[test]
    fn check_reports_compile_errors() {
        let dir = tempfile::tempdir().expect("tempdir");
        let good = write(dir.path(), "good.pt", "<p>fine</p>");
        assert!(run_check(&CheckArgs {
            template: good,
            strict: false,
        })
        .is_ok());

        let bad = write(dir.path(), "bad.pt", r#"<p tal:bogus="x">y</p>"#);
        assert!(run_check(&CheckArgs {
            template: bad,
            strict: false,
        })
        .is_err());
    }

    #[test]
    fn render_resolves_load_paths_from_the_template_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        write(
            dir.path(),
            "layout.pt",
            r#"<div metal:define-macro="main"><i metal:define-slot="s">d</i></div>"#,
        );
        let page = write(
            dir.path(),
            "page.pt",
            concat!(
                r#"<x metal:use-macro="load: layout.pt">"#,
                r#"<b metal:fill-slot="s">filled</b></x>"#,
            ),
        );
        let args = RenderArgs {
            template: page,
            data: None,
            search_path: Vec::new(),
            strict: false,
            trim_attribute_space: false,
            no_cache: true,
            output: None,
        };
        let output = run_render(&args).expect("render should pass");
        assert_eq!(output, "<div><b>filled</b></div>");
    }
}
