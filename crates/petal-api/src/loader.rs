use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use log::debug;
use petal_core::{ErrorDetail, Program, Settings, TemplateError};
use petal_runtime::MacroResolver;
use walkdir::WalkDir;

use crate::cache::DiskCache;
use crate::template::Template;

/// Filesystem template loader: resolves `load:` paths relative to the
/// referencing template and against the configured search roots, and
/// memoizes compiled programs per canonical path.
pub struct TemplateLoader {
    settings: Arc<Settings>,
    cache: Option<DiskCache>,
    programs: Mutex<HashMap<PathBuf, Arc<Program>>>,
}

impl TemplateLoader {
    pub fn new(settings: Settings) -> Arc<Self> {
        let cache = settings.cache_directory.clone().map(DiskCache::new);
        Arc::new(Self {
            settings: Arc::new(settings),
            cache,
            programs: Mutex::new(HashMap::new()),
        })
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    /// Load a template by name or path, wired back to this loader for
    /// `load:` and cross-template macros.
    pub fn load(self: &Arc<Self>, name: impl AsRef<Path>) -> Result<Template, TemplateError> {
        let path = self.resolve(name.as_ref(), None)?;
        let mut template = Template::from_file(path, (*self.settings).clone())?;
        template.set_resolver(self.clone());
        Ok(template)
    }

    /// Resolve a template reference: relative to the referencing
    /// template first, then each search root in order.
    pub fn resolve(
        &self,
        name: &Path,
        relative_to: Option<&Path>,
    ) -> Result<PathBuf, TemplateError> {
        if name.is_absolute() && name.exists() {
            return canonical(name);
        }
        if let Some(base) = relative_to.and_then(Path::parent) {
            let candidate = base.join(name);
            if candidate.exists() {
                return canonical(&candidate);
            }
        }
        for root in &self.settings.search_path {
            let candidate = root.join(name);
            if candidate.exists() {
                return canonical(&candidate);
            }
        }
        if name.exists() {
            return canonical(name);
        }
        Err(TemplateError::Language(ErrorDetail::new(format!(
            "Template \"{}\" not found on the search path.",
            name.display()
        ))))
    }

    /// Compile (or fetch) the program for a canonical path.
    pub fn program(&self, path: &Path) -> Result<Arc<Program>, TemplateError> {
        if let Some(found) = self
            .programs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(path)
        {
            return Ok(found.clone());
        }
        let bytes = std::fs::read(path).map_err(|error| {
            TemplateError::Language(ErrorDetail::new(format!(
                "Cannot read template \"{}\": {}",
                path.display(),
                error
            )))
        })?;
        let source_digest = petal_core::digest_bytes(&bytes);
        let settings_digest = self.settings.codegen_digest();
        let program = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(source_digest, settings_digest));
        let program = match program {
            Some(found) => found,
            None => {
                debug!("compiling template {}", path.display());
                let compiled = petal_compiler::compile_bytes(
                    &bytes,
                    &path.to_string_lossy(),
                    &self.settings,
                )?;
                if let Some(cache) = &self.cache {
                    cache.store(&compiled, Some(path));
                }
                compiled
            }
        };
        let program = Arc::new(program);
        self.programs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(path.to_path_buf(), program.clone());
        Ok(program)
    }

    /// Enumerate template files under the search roots.
    pub fn list(&self) -> Vec<PathBuf> {
        let mut out = Vec::new();
        for root in &self.settings.search_path {
            for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
                if !entry.file_type().is_file() {
                    continue;
                }
                let path = entry.path();
                let extension = path
                    .extension()
                    .and_then(|extension| extension.to_str())
                    .unwrap_or_default();
                if matches!(extension, "pt" | "html" | "xml") {
                    out.push(path.to_path_buf());
                }
            }
        }
        out.sort();
        out
    }
}

fn canonical(path: &Path) -> Result<PathBuf, TemplateError> {
    path.canonicalize().map_err(|error| {
        TemplateError::Language(ErrorDetail::new(format!(
            "Cannot resolve template path \"{}\": {}",
            path.display(),
            error
        )))
    })
}

impl MacroResolver for TemplateLoader {
    fn locate(&self, path: &str, relative_to: &str) -> Result<String, TemplateError> {
        let resolved = self.resolve(Path::new(path), Some(Path::new(relative_to)))?;
        Ok(resolved.to_string_lossy().into_owned())
    }

    fn load(&self, located: &str) -> Result<Arc<Program>, TemplateError> {
        self.program(Path::new(located))
    }
}
