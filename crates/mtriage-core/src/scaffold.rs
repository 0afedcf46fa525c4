//! Generator for new analyser directories

use crate::analyser::is_camel_case;
use crate::error::ScaffoldError;
use crate::manifest::{AnalyserManifest, MANIFEST_FILE};
use crate::schema::{ArgKind, ArgSpec};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::info;

/// Source file written next to `info.yaml`
pub const CORE_FILE: &str = "core.rs";

const CORE_TEMPLATE: &str = r#"use async_trait::async_trait;
use mtriage_core::{Analyser, AnalyserError, Context, Element, Etype, ResolvedConfig};

/// Register with `BindingTable::bind("{name}", Arc::new({name}))`
pub struct {name};

#[async_trait]
impl Analyser for {name} {
    fn in_etype(&self) -> Etype {
        Etype::Any
    }

    fn out_etype(&self) -> Etype {
        Etype::Any
    }

    fn expected_args(&self) -> &[&'static str] {
        &["example"]
    }

    async fn analyse_element(
        &self,
        _ctx: &Context,
        element: Element,
        config: &ResolvedConfig,
    ) -> Result<Element, AnalyserError> {
        let _example = config.get_str("example");
        Ok(element)
    }
}
"#;

fn example_arg() -> ArgSpec {
    ArgSpec {
        name: "example".to_string(),
        desc: "an example argument".to_string(),
        required: false,
        input: ArgKind::String,
        default: Some(serde_json::Value::from("hello")),
    }
}

/// Create `<root>/<name>/` holding an `info.yaml` and a template `core.rs`.
///
/// Nothing is written when the name is rejected or the directory exists.
pub fn create_analyser(root: &Path, name: &str, desc: &str) -> Result<PathBuf, ScaffoldError> {
    if !is_camel_case(name) {
        return Err(ScaffoldError::InvalidName(name.to_string()));
    }

    let manifest = AnalyserManifest::new(desc, vec![example_arg()]);
    let yaml = manifest.to_yaml()?;
    let core = CORE_TEMPLATE.replace("{name}", name);

    // Creating the directory is the existence check: only one caller wins
    std::fs::create_dir_all(root)?;
    let dir = root.join(name);
    match std::fs::create_dir(&dir) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            return Err(ScaffoldError::AlreadyExists(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    }
    std::fs::write(dir.join(MANIFEST_FILE), yaml)?;
    std::fs::write(dir.join(CORE_FILE), core)?;

    info!("Created analyser {} at {}", name, dir.display());
    Ok(dir)
}
