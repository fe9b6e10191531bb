use petal_core::{digest_bytes, Program, Settings, TemplateError, ENGINE_VERSION};
use petal_parser::{decode_source, parse};

use crate::codegen::Codegen;
use crate::tales::ExpressionRegistry;

/// Compile decoded template text into a program.
pub fn compile_template(
    source: &str,
    filename: &str,
    settings: &Settings,
) -> Result<Program, TemplateError> {
    let registry =
        ExpressionRegistry::with_defaults(&settings.default_expression, settings.strict);
    compile_with_registry(source, filename, settings, &registry)
}

/// Compile with a caller-extended expression registry.
pub fn compile_with_registry(
    source: &str,
    filename: &str,
    settings: &Settings,
    registry: &ExpressionRegistry,
) -> Result<Program, TemplateError> {
    let annotate = |error: TemplateError| error.annotate(filename, source);
    let document = parse(source).map_err(annotate)?;
    let (root, macros) = Codegen::new(settings, registry)
        .compile_document(&document)
        .map_err(annotate)?;
    Ok(Program {
        source_name: filename.to_string(),
        engine_version: ENGINE_VERSION.to_string(),
        source_digest: digest_bytes(source.as_bytes()),
        settings_digest: settings.codegen_digest(),
        root,
        macros,
        source: settings.debug.then(|| source.to_string()),
    })
}

/// Compile byte input, negotiating the encoding first.
pub fn compile_bytes(
    bytes: &[u8],
    filename: &str,
    settings: &Settings,
) -> Result<Program, TemplateError> {
    let source = decode_source(bytes, settings.encoding.as_deref());
    compile_template(&source, filename, settings)
}
