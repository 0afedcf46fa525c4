//! Per-analyser metadata files (`info.yaml`)

use crate::error::{RegistryError, SchemaError};
use crate::schema::{ArgSchema, ArgSpec};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File name of the metadata file inside an analyser directory
pub const MANIFEST_FILE: &str = "info.yaml";

/// Analyser metadata loaded from YAML
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyserManifest {
    /// Description
    pub desc: String,

    /// Configurable arguments, in declaration order
    #[serde(default)]
    pub args: Vec<ArgSpec>,

    /// Cache version (increment to invalidate all cached results)
    #[serde(default = "default_version")]
    pub version: u32,

    /// Files, relative to the analyser directory, that `build` must find
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<PathBuf>,

    /// Binding name in the code table (defaults to the directory name)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
}

fn default_version() -> u32 {
    1
}

impl AnalyserManifest {
    pub fn new(desc: impl Into<String>, args: Vec<ArgSpec>) -> Self {
        Self {
            desc: desc.into(),
            args,
            version: default_version(),
            requires: Vec::new(),
            module: None,
        }
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(contents)
    }

    /// Load `<dir>/info.yaml`
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let contents = std::fs::read_to_string(dir.as_ref().join(MANIFEST_FILE))?;
        Ok(Self::from_yaml_str(&contents)?)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Build the argument schema declared by this manifest
    pub fn schema(&self) -> Result<ArgSchema, SchemaError> {
        ArgSchema::from_specs(self.args.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ArgKind;

    #[test]
    fn test_parse_manifest() {
        let manifest = AnalyserManifest::from_yaml_str(
            r#"
desc: Keep confident predictions
args:
  - name: threshold
    desc: minimum score
    required: false
    input: number
    default: 0.5
  - name: labels
    desc: labels to keep
    required: true
    input: list
"#,
        )
        .unwrap();

        assert_eq!(manifest.desc, "Keep confident predictions");
        assert_eq!(manifest.version, 1);
        assert!(manifest.module.is_none());
        let schema = manifest.schema().unwrap();
        assert_eq!(schema.len(), 2);
        assert_eq!(schema.get("labels").unwrap().input, ArgKind::List);
        assert!(schema.get("labels").unwrap().required);
    }

    #[test]
    fn test_missing_desc_is_an_error() {
        assert!(AnalyserManifest::from_yaml_str("args: []\n").is_err());
    }

    #[test]
    fn test_unknown_input_kind_is_an_error() {
        let yaml = "desc: x\nargs:\n  - name: a\n    input: colour\n";
        assert!(AnalyserManifest::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_load_from_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "desc: x\nversion: 3\nrequires: [weights.bin]\nmodule: Other\n",
        )
        .unwrap();
        let manifest = AnalyserManifest::load(dir.path()).unwrap();
        assert_eq!(manifest.version, 3);
        assert_eq!(manifest.requires, vec![PathBuf::from("weights.bin")]);
        assert_eq!(manifest.module.as_deref(), Some("Other"));
    }

    #[test]
    fn test_yaml_roundtrip_keeps_defaults() {
        let manifest = AnalyserManifest::new(
            "desc",
            vec![ArgSpec {
                name: "example".to_string(),
                desc: "an example".to_string(),
                required: false,
                input: ArgKind::String,
                default: Some(serde_json::json!("hello")),
            }],
        );
        let parsed = AnalyserManifest::from_yaml_str(&manifest.to_yaml().unwrap()).unwrap();
        assert_eq!(parsed, manifest);
    }
}
