//! Model registry (spec.md §4.2, C2): scans the models directories, produces
//! a mapping from model id to descriptor, and deletes underlying files once
//! the cache confirms no live instance references them.

pub mod error;

pub use error::RegistryError;

use std::path::{Path, PathBuf};

use gateway_core::model::{parse_quantization, ModelDescriptor};
use parking_lot::RwLock;

use error::Result;

const MODEL_EXTENSIONS: &[&str] = &["gguf", "bin"];
const PROJECTOR_SUFFIXES: &[&str] = &["mmproj", "projector"];

/// Injected by the cache so the registry can refuse to delete a model file
/// that is currently backing a live child process.
pub trait LiveInstanceChecker: Send + Sync {
    fn is_loaded(&self, model_id: &str) -> bool;
}

/// A checker that always reports nothing is loaded, useful in tests and for
/// registries that never need delete support wired to a live cache.
pub struct NeverLoaded;

impl LiveInstanceChecker for NeverLoaded {
    fn is_loaded(&self, _model_id: &str) -> bool {
        false
    }
}

/// Scans one or more directories, in precedence order: when two
/// directories contain a file with the same stem, the first directory in
/// `directories` wins, deterministically and stably across scans.
pub struct ModelRegistry {
    directories: Vec<PathBuf>,
    descriptors: RwLock<std::collections::HashMap<String, ModelDescriptor>>,
}

impl ModelRegistry {
    pub fn new(directories: Vec<PathBuf>) -> Self {
        ModelRegistry { directories, descriptors: RwLock::new(std::collections::HashMap::new()) }
    }

    /// Walks every configured directory (in precedence order) and rebuilds
    /// the id → descriptor map. Non-model files and unreadable entries are
    /// skipped, not treated as fatal.
    pub fn scan_models(&self) -> Result<()> {
        let mut found = std::collections::HashMap::new();
        for dir in &self.directories {
            let entries = match std::fs::read_dir(dir) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(dir = %dir.display(), error = %e, "cannot read models directory, skipping");
                    continue;
                }
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let Some(descriptor) = self.describe(&path)? else { continue };
                // First directory wins: don't overwrite an id already seen
                // from a higher-precedence directory.
                found.entry(descriptor.id.clone()).or_insert(descriptor);
            }
        }
        let previously_loaded: std::collections::HashSet<String> = self
            .descriptors
            .read()
            .values()
            .filter(|d| d.is_loaded)
            .map(|d| d.id.clone())
            .collect();
        let mut found = found;
        for (id, descriptor) in found.iter_mut() {
            if previously_loaded.contains(id) {
                descriptor.is_loaded = true;
            }
        }
        *self.descriptors.write() = found;
        Ok(())
    }

    fn describe(&self, path: &Path) -> Result<Option<ModelDescriptor>> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
        if !MODEL_EXTENSIONS.contains(&ext.as_str()) {
            return Ok(None);
        }
        let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("").to_string();
        if is_projector_file(&stem) {
            return Ok(None);
        }
        let metadata = std::fs::metadata(path)?;
        // Spec.md §3 `ModelDescriptor`: "id, typically the filename stem" —
        // the stem itself, quantization tag included, so distinct quant
        // variants of the same model surface as distinct ids.
        let id = stem.clone();
        let quantization = parse_quantization(&stem);
        let projector_path = sibling_projector(path, &id);
        Ok(Some(ModelDescriptor {
            id,
            path: path.to_string_lossy().to_string(),
            size_bytes: metadata.len(),
            quantization,
            projector_path,
            is_loaded: false,
        }))
    }

    pub fn list_models(&self) -> Vec<ModelDescriptor> {
        self.descriptors.read().values().cloned().collect()
    }

    pub fn get_model(&self, id: &str) -> Result<ModelDescriptor> {
        self.descriptors.read().get(id).cloned().ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    /// Marks the advisory `is_loaded` flag. Owned by the registry, not
    /// authoritative over the cache's actual instance table.
    pub fn mark_loaded(&self, id: &str, loaded: bool) -> Result<()> {
        let mut descriptors = self.descriptors.write();
        let descriptor = descriptors.get_mut(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        descriptor.is_loaded = loaded;
        Ok(())
    }

    /// Unlinks the underlying file after `checker` confirms no live instance
    /// references it (spec.md §4.2).
    pub fn delete_model(&self, id: &str, checker: &dyn LiveInstanceChecker) -> Result<()> {
        if checker.is_loaded(id) {
            return Err(RegistryError::ModelInUse(id.to_string()));
        }
        let path = {
            let descriptors = self.descriptors.read();
            descriptors.get(id).ok_or_else(|| RegistryError::NotFound(id.to_string()))?.path.clone()
        };
        std::fs::remove_file(&path)?;
        self.descriptors.write().remove(id);
        tracing::info!(model_id = %id, "deleted model file");
        Ok(())
    }
}

fn is_projector_file(stem: &str) -> bool {
    let lower = stem.to_lowercase();
    PROJECTOR_SUFFIXES.iter().any(|s| lower.contains(s))
}

fn sibling_projector(path: &Path, id: &str) -> Option<String> {
    let parent = path.parent()?;
    for suffix in PROJECTOR_SUFFIXES {
        for ext in MODEL_EXTENSIONS {
            let candidate = parent.join(format!("{id}.{suffix}.{ext}"));
            if candidate.is_file() {
                return Some(candidate.to_string_lossy().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(dir: &Path, name: &str, size: usize) {
        fs::write(dir.join(name), vec![0u8; size]).unwrap();
    }

    #[test]
    fn scan_discovers_models_and_parses_quantization() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "llama-3-8b.Q4_K_M.gguf", 1024);
        let registry = ModelRegistry::new(vec![tmp.path().to_path_buf()]);
        registry.scan_models().unwrap();
        let models = registry.list_models();
        assert_eq!(models.len(), 1);
        assert_eq!(models[0].quantization, "Q4_K_M");
        assert_eq!(models[0].size_bytes, 1024);
    }

    #[test]
    fn scan_skips_projector_files() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "llava-7b.Q4_K_M.gguf", 10);
        touch(tmp.path(), "llava-7b.Q4_K_M.mmproj.gguf", 5);
        let registry = ModelRegistry::new(vec![tmp.path().to_path_buf()]);
        registry.scan_models().unwrap();
        assert_eq!(registry.list_models().len(), 1);
    }

    #[test]
    fn first_directory_wins_on_id_collision() {
        let primary = tempfile::tempdir().unwrap();
        let secondary = tempfile::tempdir().unwrap();
        touch(primary.path(), "m1.gguf", 10);
        touch(secondary.path(), "m1.gguf", 9999);
        let registry = ModelRegistry::new(vec![primary.path().to_path_buf(), secondary.path().to_path_buf()]);
        registry.scan_models().unwrap();
        let descriptor = registry.get_model("m1").unwrap();
        assert_eq!(descriptor.size_bytes, 10);
    }

    #[test]
    fn delete_refuses_when_checker_reports_loaded() {
        struct AlwaysLoaded;
        impl LiveInstanceChecker for AlwaysLoaded {
            fn is_loaded(&self, _id: &str) -> bool {
                true
            }
        }
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "m1.gguf", 10);
        let registry = ModelRegistry::new(vec![tmp.path().to_path_buf()]);
        registry.scan_models().unwrap();
        let result = registry.delete_model("m1", &AlwaysLoaded);
        assert!(matches!(result, Err(RegistryError::ModelInUse(_))));
    }

    #[test]
    fn delete_removes_file_and_descriptor() {
        let tmp = tempfile::tempdir().unwrap();
        touch(tmp.path(), "m1.gguf", 10);
        let registry = ModelRegistry::new(vec![tmp.path().to_path_buf()]);
        registry.scan_models().unwrap();
        registry.delete_model("m1", &NeverLoaded).unwrap();
        assert!(registry.get_model("m1").is_err());
        assert!(!tmp.path().join("m1.gguf").exists());
    }

    #[test]
    fn get_model_not_found() {
        let registry = ModelRegistry::new(vec![]);
        assert!(matches!(registry.get_model("missing"), Err(RegistryError::NotFound(_))));
    }
}
