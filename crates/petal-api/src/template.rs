use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::SystemTime;

use log::debug;
use petal_core::{digest_bytes, ErrorDetail, Settings, TemplateError, TplValue};
use petal_runtime::{MacroResolver, RenderEngine, RenderOptions};

use crate::cache::DiskCache;

#[derive(Debug, Clone)]
enum SourceKind {
    Text(String),
    File(PathBuf),
}

/// File metadata digest used by auto-reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    length: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let metadata = std::fs::metadata(path).ok()?;
        Some(Self {
            modified: metadata.modified().ok(),
            length: metadata.len(),
        })
    }
}

struct Cooked {
    engine: RenderEngine,
    stamp: Option<FileStamp>,
}

/// A template instance. Cooks lazily on the first render unless eager
/// mode is configured; the `uncooked → cooking → cooked` transition is
/// serialized by a lock, and subsequent renders read the installed
/// artifact lock-free.
pub struct Template {
    source: SourceKind,
    filename: String,
    settings: Arc<Settings>,
    resolver: Option<Arc<dyn MacroResolver>>,
    cache: Option<DiskCache>,
    cooked: RwLock<Option<Arc<Cooked>>>,
    cook_lock: Mutex<()>,
}

impl Template {
    pub fn from_string(
        source: impl Into<String>,
        settings: Settings,
    ) -> Result<Self, TemplateError> {
        let template = Self::build(SourceKind::Text(source.into()), "<string>", settings);
        template.maybe_cook_eagerly()?;
        Ok(template)
    }

    pub fn from_file(path: impl Into<PathBuf>, settings: Settings) -> Result<Self, TemplateError> {
        let path = path.into();
        let filename = path.to_string_lossy().into_owned();
        let template = Self::build(SourceKind::File(path), &filename, settings);
        template.maybe_cook_eagerly()?;
        Ok(template)
    }

    fn build(source: SourceKind, filename: &str, settings: Settings) -> Self {
        let cache = settings.cache_directory.clone().map(DiskCache::new);
        Self {
            source,
            filename: filename.to_string(),
            settings: Arc::new(settings),
            resolver: None,
            cache,
            cooked: RwLock::new(None),
            cook_lock: Mutex::new(()),
        }
    }

    fn maybe_cook_eagerly(&self) -> Result<(), TemplateError> {
        if self.settings.eager || self.settings.debug {
            self.cooked()?;
        }
        Ok(())
    }

    pub fn set_resolver(&mut self, resolver: Arc<dyn MacroResolver>) {
        self.resolver = Some(resolver);
    }

    pub fn settings(&self) -> &Arc<Settings> {
        &self.settings
    }

    pub fn render(
        &self,
        variables: &BTreeMap<String, TplValue>,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Result<String, TemplateError> {
        self.render_with(variables, &self.default_options(), kwargs)
    }

    pub fn render_with(
        &self,
        variables: &BTreeMap<String, TplValue>,
        options: &RenderOptions,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Result<String, TemplateError> {
        self.cooked()?.engine.render(variables, options, kwargs)
    }

    /// Named macros of the compiled template, enumerable.
    pub fn macros(&self) -> Result<Vec<String>, TemplateError> {
        Ok(self.cooked()?.engine.macro_names())
    }

    pub fn render_macro(
        &self,
        name: &str,
        variables: &BTreeMap<String, TplValue>,
        kwargs: BTreeMap<String, TplValue>,
    ) -> Result<String, TemplateError> {
        self.cooked()?
            .engine
            .render_macro(name, variables, &self.default_options(), kwargs)
    }

    fn default_options(&self) -> RenderOptions {
        RenderOptions {
            resolver: self.resolver.clone(),
            ..RenderOptions::default()
        }
    }

    fn current(&self) -> Option<Arc<Cooked>> {
        let cooked = self
            .cooked
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()?;
        if self.settings.auto_reload {
            if let SourceKind::File(path) = &self.source {
                if FileStamp::read(path) != cooked.stamp {
                    debug!("template {} changed on disk, re-cooking", self.filename);
                    return None;
                }
            }
        }
        Some(cooked)
    }

    fn cooked(&self) -> Result<Arc<Cooked>, TemplateError> {
        if let Some(cooked) = self.current() {
            return Ok(cooked);
        }
        // Exclusive cook: concurrent first renders serialize here and
        // install exactly one artifact.
        let _guard = self
            .cook_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(cooked) = self.current() {
            return Ok(cooked);
        }

        let (bytes, stamp) = match &self.source {
            SourceKind::Text(text) => (text.clone().into_bytes(), None),
            SourceKind::File(path) => {
                let bytes = std::fs::read(path).map_err(|error| {
                    TemplateError::Language(ErrorDetail::new(format!(
                        "Cannot read template \"{}\": {}",
                        self.filename, error
                    )))
                })?;
                (bytes, FileStamp::read(path))
            }
        };

        let source_digest = digest_bytes(&bytes);
        let settings_digest = self.settings.codegen_digest();
        let program = self
            .cache
            .as_ref()
            .and_then(|cache| cache.load(source_digest, settings_digest));
        let program = match program {
            Some(found) => found,
            None => {
                let compiled =
                    petal_compiler::compile_bytes(&bytes, &self.filename, &self.settings)?;
                if let Some(cache) = &self.cache {
                    let source_path = match &self.source {
                        SourceKind::File(path) => Some(path.as_path()),
                        SourceKind::Text(_) => None,
                    };
                    cache.store(&compiled, source_path);
                }
                compiled
            }
        };

        let cooked = Arc::new(Cooked {
            engine: RenderEngine::new(Arc::new(program), self.settings.clone()),
            stamp,
        });
        *self
            .cooked
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(cooked.clone());
        Ok(cooked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(entries: &[(&str, &str)]) -> BTreeMap<String, TplValue> {
        entries
            .iter()
            .map(|(name, value)| (name.to_string(), TplValue::Str(value.to_string())))
            .collect()
    }

    #[test]
    fn lazy_cook_happens_on_first_render() {
        let template = Template::from_string(
            r#"<p tal:content="name">x</p>"#,
            Settings::default(),
        )
        .expect("template should build");
        assert!(template.cooked.read().expect("lock").is_none());
        let out = template
            .render(&vars(&[("name", "World")]), BTreeMap::new())
            .expect("render should pass");
        assert_eq!(out, "<p>World</p>");
        assert!(template.cooked.read().expect("lock").is_some());
    }

    #[test]
    fn eager_mode_cooks_at_construction() {
        let settings = Settings {
            eager: true,
            ..Settings::default()
        };
        let template =
            Template::from_string("<p>static</p>", settings).expect("template should build");
        assert!(template.cooked.read().expect("lock").is_some());

        let invalid = Template::from_string(
            "<p><div></p>",
            Settings {
                eager: true,
                ..Settings::default()
            },
        );
        assert!(invalid.is_err());
    }

    #[test]
    fn concurrent_first_renders_install_one_artifact() {
        let template = Arc::new(
            Template::from_string(
                r#"<p tal:repeat="i range(20)" tal:content="repeat.i.number"/>"#,
                Settings::default(),
            )
            .expect("template should build"),
        );
        let mut handles = Vec::new();
        for _ in 0..8 {
            let template = template.clone();
            handles.push(std::thread::spawn(move || {
                template
                    .render(&BTreeMap::new(), BTreeMap::new())
                    .expect("render should pass")
            }));
        }
        let outputs: Vec<String> = handles
            .into_iter()
            .map(|handle| handle.join().expect("join"))
            .collect();
        assert!(outputs.windows(2).all(|pair| pair[0] == pair[1]));
    }

    #[test]
    fn auto_reload_recooks_on_change() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("page.pt");
        std::fs::write(&path, "<p>one</p>").expect("write");

        let template = Template::from_file(
            &path,
            Settings {
                auto_reload: true,
                ..Settings::default()
            },
        )
        .expect("template should build");
        assert_eq!(
            template.render(&BTreeMap::new(), BTreeMap::new()).expect("render"),
            "<p>one</p>"
        );

        // Content of a different length guarantees a fresh stamp even
        // on coarse mtime clocks.
        std::fs::write(&path, "<p>two!</p>").expect("write");
        assert_eq!(
            template.render(&BTreeMap::new(), BTreeMap::new()).expect("render"),
            "<p>two!</p>"
        );
    }

    #[test]
    fn disk_cache_round_trips_the_artifact() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            cache_directory: Some(dir.path().to_path_buf()),
            ..Settings::default()
        };
        let source = r#"<p tal:content="name">x</p>"#;
        let first = Template::from_string(source, settings.clone()).expect("template");
        let out = first
            .render(&vars(&[("name", "A")]), BTreeMap::new())
            .expect("render");
        assert_eq!(out, "<p>A</p>");

        // A second instance renders from the persisted artifact.
        let second = Template::from_string(source, settings).expect("template");
        let out = second
            .render(&vars(&[("name", "B")]), BTreeMap::new())
            .expect("render");
        assert_eq!(out, "<p>B</p>");
        assert!(std::fs::read_dir(dir.path())
            .expect("read dir")
            .filter_map(Result::ok)
            .any(|entry| entry.path().extension().is_some_and(|ext| ext == "json")));
    }

    #[test]
    fn macros_accessor_is_enumerable() {
        let template = Template::from_string(
            r#"<div metal:define-macro="one">1</div><div metal:define-macro="two">2</div>"#,
            Settings::default(),
        )
        .expect("template");
        assert_eq!(
            template.macros().expect("macros"),
            vec!["one".to_string(), "two".to_string()]
        );
        let out = template
            .render_macro("two", &BTreeMap::new(), BTreeMap::new())
            .expect("macro render");
        assert_eq!(out, "<div>2</div>");
    }
}
