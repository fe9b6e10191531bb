use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use petal_core::Program;

/// Shared on-disk artifact cache. One file per (source digest,
/// settings digest) pair; writers go through a temporary file and an
/// atomic rename, readers treat anything unreadable as a miss.
#[derive(Debug, Clone)]
pub struct DiskCache {
    directory: PathBuf,
}

impl DiskCache {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    fn artifact_path(&self, source_digest: u64, settings_digest: u64) -> PathBuf {
        self.directory
            .join(format!("{:016x}-{:016x}.json", source_digest, settings_digest))
    }

    /// Look up a cached artifact. Partial or stale files read as a
    /// miss, never as an error.
    pub fn load(&self, source_digest: u64, settings_digest: u64) -> Option<Program> {
        let path = self.artifact_path(source_digest, settings_digest);
        let bytes = fs::read(&path).ok()?;
        match serde_json::from_slice::<Program>(&bytes) {
            Ok(program)
                if program.source_digest == source_digest
                    && program.settings_digest == settings_digest
                    && program.engine_version == petal_core::ENGINE_VERSION =>
            {
                debug!("template cache hit: {}", path.display());
                Some(program)
            }
            Ok(_) => {
                debug!("template cache mismatch: {}", path.display());
                None
            }
            Err(error) => {
                debug!("unreadable cache entry {}: {}", path.display(), error);
                None
            }
        }
    }

    /// Persist an artifact. Failures are logged and swallowed; the
    /// cache is an optimization, not a dependency.
    pub fn store(&self, program: &Program, source_path: Option<&Path>) {
        if let Err(error) = self.try_store(program, source_path) {
            warn!("failed to write template cache: {}", error);
        }
    }

    fn try_store(&self, program: &Program, source_path: Option<&Path>) -> std::io::Result<()> {
        fs::create_dir_all(&self.directory)?;
        let path = self.artifact_path(program.source_digest, program.settings_digest);
        let temp = path.with_extension("tmp");
        let bytes = serde_json::to_vec(program)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::Other, error))?;
        fs::write(&temp, bytes)?;
        fs::rename(&temp, &path)?;
        if let Some(source) = source_path {
            // Sidecar recording the source path, for debugging only.
            let sidecar = path.with_extension("src");
            let _ = fs::write(sidecar, source.to_string_lossy().as_bytes());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use petal_compiler::compile_template;
    use petal_core::Settings;

    fn program() -> Program {
        compile_template("<p tal:content=\"x\">y</p>", "cached.pt", &Settings::default())
            .expect("compile should pass")
    }

    #[test]
    fn round_trip_stores_and_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new(dir.path());
        let program = program();
        cache.store(&program, Some(Path::new("/src/cached.pt")));

        let loaded = cache
            .load(program.source_digest, program.settings_digest)
            .expect("cache hit");
        assert_eq!(loaded, program);

        let sidecar = dir
            .path()
            .join(format!(
                "{:016x}-{:016x}.src",
                program.source_digest, program.settings_digest
            ));
        assert!(sidecar.exists());
    }

    #[test]
    fn different_settings_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new(dir.path());
        let program = program();
        cache.store(&program, None);
        assert!(cache.load(program.source_digest, program.settings_digest ^ 1).is_none());
        assert!(cache.load(program.source_digest ^ 1, program.settings_digest).is_none());
    }

    #[test]
    fn corrupt_entries_read_as_a_miss() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = DiskCache::new(dir.path());
        let program = program();
        let path = cache.artifact_path(program.source_digest, program.settings_digest);
        fs::create_dir_all(dir.path()).expect("mkdir");
        fs::write(&path, b"{ partial garbage").expect("write");
        assert!(cache.load(program.source_digest, program.settings_digest).is_none());
    }
}
