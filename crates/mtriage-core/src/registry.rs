//! Analyser registry and directory discovery

use crate::analyser::{is_camel_case, AnalyserDescriptor, BindingTable};
use crate::error::RegistryError;
use crate::manifest::AnalyserManifest;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Analyser registry for lookup by name
#[derive(Debug, Default, Clone)]
pub struct Registry {
    /// All registered analysers by name
    analysers: BTreeMap<String, Arc<AnalyserDescriptor>>,
}

/// Outcome of scanning analyser directories
#[derive(Debug)]
pub struct Discovery {
    pub registry: Registry,

    /// Entries that failed to load; each is isolated to one analyser
    pub failures: Vec<RegistryError>,

    /// Later definitions ignored because the name was already taken
    pub collisions: Vec<Collision>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collision {
    pub name: String,
    pub kept: Option<PathBuf>,
    pub ignored: PathBuf,
}

impl Registry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. Returns `false` (and keeps the existing entry)
    /// when the name is already taken.
    pub fn register(&mut self, descriptor: AnalyserDescriptor) -> bool {
        if self.analysers.contains_key(&descriptor.name) {
            return false;
        }
        info!(
            "Registering analyser: {} ({} -> {})",
            descriptor.name, descriptor.in_etype, descriptor.out_etype
        );
        self.analysers
            .insert(descriptor.name.clone(), Arc::new(descriptor));
        true
    }

    /// Scan each root for analyser directories and bind them to code.
    ///
    /// Roots are scanned in order and entries within a root by name. A broken
    /// entry is recorded in [`Discovery::failures`] without stopping the
    /// scan; the first definition of a name wins. Fails only when entries
    /// were found and none of them loaded.
    pub fn discover(roots: &[PathBuf], bindings: &BindingTable) -> Result<Discovery, RegistryError> {
        let mut registry = Registry::new();
        let mut failures = Vec::new();
        let mut collisions = Vec::new();
        let mut seen = 0usize;

        for root in roots {
            if !root.is_dir() {
                warn!("Analyser root {} does not exist, skipping", root.display());
                continue;
            }

            for dir in Self::analyser_dirs(root)? {
                seen += 1;
                let name = dir
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();

                if let Some(existing) = registry.get(&name) {
                    warn!(
                        "Analyser '{}' at {} ignored: already loaded from {}",
                        name,
                        dir.display(),
                        existing
                            .dir
                            .as_deref()
                            .map(|d| d.display().to_string())
                            .unwrap_or_default()
                    );
                    collisions.push(Collision {
                        name,
                        kept: existing.dir.clone(),
                        ignored: dir,
                    });
                    continue;
                }

                match Self::load_entry(&name, &dir, bindings) {
                    Ok(descriptor) => {
                        registry.register(descriptor);
                    }
                    Err(e) => {
                        warn!("Skipping analyser at {}: {}", dir.display(), e);
                        failures.push(e);
                    }
                }
            }
        }

        if seen > 0 && registry.is_empty() {
            return Err(RegistryError::NothingDiscovered {
                failed: failures.len(),
            });
        }

        info!(
            "Discovered {} analysers ({} failed, {} collisions)",
            registry.len(),
            failures.len(),
            collisions.len()
        );

        Ok(Discovery {
            registry,
            failures,
            collisions,
        })
    }

    /// Subdirectories of `root`, sorted, hidden ones skipped
    fn analyser_dirs(root: &Path) -> Result<Vec<PathBuf>, RegistryError> {
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            dirs.push(entry.path());
        }
        dirs.sort();
        Ok(dirs)
    }

    fn load_entry(
        name: &str,
        dir: &Path,
        bindings: &BindingTable,
    ) -> Result<AnalyserDescriptor, RegistryError> {
        if !is_camel_case(name) {
            return Err(RegistryError::malformed(
                name,
                "directory name is not CamelCase",
            ));
        }

        let manifest = AnalyserManifest::load(dir).map_err(|e| RegistryError::malformed(name, e))?;

        let binding = manifest.module.clone().unwrap_or_else(|| name.to_string());
        let analyser = bindings.get(&binding).ok_or_else(|| {
            RegistryError::malformed(name, format!("no analyser code bound as '{binding}'"))
        })?;

        debug!("Loaded metadata for {} from {}", name, dir.display());
        AnalyserDescriptor::new(name, manifest, Some(dir.to_path_buf()), analyser)
    }

    /// Get analyser by name
    pub fn get(&self, name: &str) -> Option<Arc<AnalyserDescriptor>> {
        self.analysers.get(name).cloned()
    }

    /// All registered analyser names, sorted
    pub fn names(&self) -> Vec<String> {
        self.analysers.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<AnalyserDescriptor>> {
        self.analysers.values()
    }

    pub fn len(&self) -> usize {
        self.analysers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.analysers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysers::Identity;
    use crate::manifest::MANIFEST_FILE;

    fn write_analyser(root: &Path, name: &str, manifest: &str) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(MANIFEST_FILE), manifest).unwrap();
    }

    fn bindings() -> BindingTable {
        BindingTable::builtin().with("FooBar", Arc::new(Identity))
    }

    #[test]
    fn test_registry_register() {
        let mut registry = Registry::new();
        let manifest = AnalyserManifest::new("identity", vec![]);
        let descriptor =
            AnalyserDescriptor::new("Identity", manifest.clone(), None, Arc::new(Identity)).unwrap();
        assert!(registry.register(descriptor));

        let again = AnalyserDescriptor::new("Identity", manifest, None, Arc::new(Identity)).unwrap();
        assert!(!registry.register(again));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_discover_isolates_broken_entries() {
        let root = tempfile::tempdir().unwrap();
        write_analyser(root.path(), "Identity", "desc: pass through\n");
        write_analyser(root.path(), "foo_bar", "desc: bad name\n");
        write_analyser(root.path(), "FooBar", "args: []\n");
        write_analyser(root.path(), "Unbound", "desc: no code\n");
        std::fs::write(root.path().join("README.md"), "not an analyser").unwrap();

        let discovery = Registry::discover(&[root.path().to_path_buf()], &bindings()).unwrap();

        assert_eq!(discovery.registry.names(), vec!["Identity".to_string()]);
        assert_eq!(discovery.failures.len(), 3);
        let failed: Vec<String> = discovery
            .failures
            .iter()
            .map(|e| match e {
                RegistryError::MalformedAnalyser { name, .. } => name.clone(),
                other => panic!("unexpected error {other}"),
            })
            .collect();
        assert_eq!(failed, vec!["FooBar", "Unbound", "foo_bar"]);
    }

    #[test]
    fn test_first_root_wins_on_collision() {
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        write_analyser(first.path(), "Identity", "desc: first\n");
        write_analyser(second.path(), "Identity", "desc: second\n");

        let roots = vec![first.path().to_path_buf(), second.path().to_path_buf()];
        let discovery = Registry::discover(&roots, &bindings()).unwrap();

        assert_eq!(discovery.registry.get("Identity").unwrap().desc, "first");
        assert_eq!(discovery.collisions.len(), 1);
        assert_eq!(discovery.collisions[0].ignored, second.path().join("Identity"));
    }

    #[test]
    fn test_all_failed_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        write_analyser(root.path(), "Unbound", "desc: no code\n");
        let err = Registry::discover(&[root.path().to_path_buf()], &bindings()).unwrap_err();
        assert!(matches!(err, RegistryError::NothingDiscovered { failed: 1 }));
    }

    #[test]
    fn test_missing_root_is_skipped() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("nope");
        let discovery = Registry::discover(&[missing], &bindings()).unwrap();
        assert!(discovery.registry.is_empty());
    }

    #[test]
    fn test_module_key_selects_binding() {
        let root = tempfile::tempdir().unwrap();
        write_analyser(root.path(), "PassThrough", "desc: alias\nmodule: Identity\n");
        let discovery = Registry::discover(&[root.path().to_path_buf()], &bindings()).unwrap();
        assert!(discovery.registry.get("PassThrough").is_some());
    }
}
