mod attributes;
mod eval;
mod render;
#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use petal_core::{
    IrNode, Program, RenderError, RenderErrorKind, Settings, TemplateError, TplValue,
};
use rhai::AST;

use crate::bridge::build_engine;
use crate::repeat::RepeatDict;
use crate::scope::ScopeStack;
use crate::translate::{NullTranslator, Translator};

/// Resolves `load:` paths, cross-template macros and `import:`
/// symbols for the runtime. The template driver supplies the
/// implementation; a bare engine renders self-contained programs only.
pub trait MacroResolver: Send + Sync {
    /// Resolve a template path relative to the referencing template.
    fn locate(&self, path: &str, relative_to: &str) -> Result<String, TemplateError>;

    /// Load the compiled program for a located path.
    fn load(&self, located: &str) -> Result<Arc<Program>, TemplateError>;

    /// Resolve a dotted `import:` path.
    fn import_symbol(&self, dotted: &str) -> Result<TplValue, TemplateError> {
        Err(TemplateError::render(RenderError::new(
            RenderErrorKind::Import,
            format!("Cannot import \"{}\": no resolver is configured.", dotted),
            dotted,
        )))
    }
}

/// Per-render collaborators.
#[derive(Clone)]
pub struct RenderOptions {
    pub translator: Arc<dyn Translator>,
    pub resolver: Option<Arc<dyn MacroResolver>>,
    /// Custom callback invoked when `on-error` catches a failure.
    pub on_error_handler: Option<Arc<dyn Fn(&RenderError) + Send + Sync>>,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            translator: Arc::new(NullTranslator),
            resolver: None,
            on_error_handler: None,
        }
    }
}

/// Interpreter for a compiled program. One engine per cooked template;
/// renders share it read-only and carry their own mutable state.
pub struct RenderEngine {
    program: Arc<Program>,
    settings: Arc<Settings>,
    rhai: rhai::Engine,
    ast_cache: Mutex<HashMap<String, Arc<AST>>>,
}

impl RenderEngine {
    pub fn new(program: Arc<Program>, settings: Arc<Settings>) -> Self {
        Self {
            program,
            settings,
            rhai: build_engine(),
            ast_cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn program(&self) -> &Arc<Program> {
        &self.program
    }

    pub fn macro_names(&self) -> Vec<String> {
        self.program.macros.keys().cloned().collect()
    }

    /// Render the whole template with a variable mapping and
    /// render-time keyword arguments.
    pub fn render(
        &self,
        variables: &BTreeMap<String, TplValue>,
        options: &RenderOptions,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Result<String, TemplateError> {
        self.render_nodes_entry(&self.program.root, variables, options, kwargs)
    }

    /// Render one named macro with the same signature as `render`.
    pub fn render_macro(
        &self,
        name: &str,
        variables: &BTreeMap<String, TplValue>,
        options: &RenderOptions,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Result<String, TemplateError> {
        let Some(macro_ir) = self.program.macros.get(name) else {
            return Err(TemplateError::Language(petal_core::ErrorDetail::new(
                format!("Unknown macro \"{}\".", name),
            )));
        };
        self.render_nodes_entry(&macro_ir.body, variables, options, kwargs)
    }

    fn render_nodes_entry(
        &self,
        nodes: &[IrNode],
        variables: &BTreeMap<String, TplValue>,
        options: &RenderOptions,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Result<String, TemplateError> {
        let mut ctx = Ctx::new(self, options, variables.clone(), kwargs);
        ctx.render_nodes(nodes)
            .map_err(|error| self.annotate(error))?;
        Ok(ctx.buffer.concat())
    }

    fn annotate(&self, error: TemplateError) -> TemplateError {
        match &self.program.source {
            Some(source) => error.annotate(&self.program.source_name, source),
            None => error.annotate(&self.program.source_name, ""),
        }
    }

    /// Fetch or compile the evaluator AST for an expression source.
    pub(crate) fn compiled_expression(&self, source: &str) -> Result<Arc<AST>, TemplateError> {
        self.compiled(source, true)
    }

    pub(crate) fn compiled_block(&self, source: &str) -> Result<Arc<AST>, TemplateError> {
        self.compiled(source, false)
    }

    fn compiled(&self, source: &str, expression: bool) -> Result<Arc<AST>, TemplateError> {
        let mut cache = self
            .ast_cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(ast) = cache.get(source) {
            return Ok(ast.clone());
        }
        let compiled = if expression {
            self.rhai.compile_expression(source)
        } else {
            self.rhai.compile(source)
        };
        // Payload syntax was validated at template compile; failures
        // here are internal.
        let ast = compiled.map_err(|error| {
            TemplateError::render(RenderError::new(
                RenderErrorKind::Internal,
                format!("Expression failed to compile at render time: {}", error),
                source,
            ))
        })?;
        let ast = Arc::new(ast);
        cache.insert(source.to_string(), ast.clone());
        Ok(ast)
    }
}

pub(crate) struct SwitchFrame {
    pub value: TplValue,
    pub matched: bool,
}

/// One layer of slot fillers. A plain `use-macro` pushes a barrier
/// layer (outer fillers become invisible); `extend-macro` layers
/// compose on top of the existing stack.
pub(crate) struct SlotLayer {
    pub fillers: BTreeMap<String, Vec<IrNode>>,
    pub barrier: bool,
}

/// Per-render mutable state.
pub(crate) struct Ctx<'a> {
    pub engine: &'a RenderEngine,
    pub options: &'a RenderOptions,
    pub buffer: Vec<String>,
    pub scope: ScopeStack,
    pub repeat: RepeatDict,
    pub switches: Vec<SwitchFrame>,
    pub slots: Vec<SlotLayer>,
    /// Program stack; the top supplies macro lookups and the base for
    /// relative `load:` paths.
    pub programs: Vec<Arc<Program>>,
    /// Active translation captures, innermost last.
    pub i18n_capture: Vec<BTreeMap<String, String>>,
}

impl<'a> Ctx<'a> {
    fn new(
        engine: &'a RenderEngine,
        options: &'a RenderOptions,
        variables: BTreeMap<String, TplValue>,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Self {
        Self {
            engine,
            options,
            buffer: Vec::new(),
            scope: ScopeStack::new(&engine.settings.extra_builtins, kwargs, variables),
            repeat: RepeatDict::new(),
            switches: Vec::new(),
            slots: Vec::new(),
            programs: vec![engine.program.clone()],
            i18n_capture: Vec::new(),
        }
    }

    pub(crate) fn settings(&self) -> &Settings {
        &self.engine.settings
    }

    pub(crate) fn current_program(&self) -> &Arc<Program> {
        self.programs.last().unwrap_or(&self.engine.program)
    }

    /// Render into a detached buffer and return the joined text.
    pub(crate) fn render_to_string(&mut self, nodes: &[IrNode]) -> Result<String, TemplateError> {
        let saved = std::mem::take(&mut self.buffer);
        let result = self.render_nodes(nodes);
        let captured = std::mem::replace(&mut self.buffer, saved);
        result?;
        Ok(captured.concat())
    }
}
