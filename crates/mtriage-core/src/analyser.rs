//! Analyser trait, binding table and descriptors

use crate::context::Context;
use crate::element::Element;
use crate::error::{AnalyserError, RegistryError};
use crate::etype::Etype;
use crate::manifest::AnalyserManifest;
use crate::schema::{ArgSchema, ResolvedConfig};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Core analyser trait - every analyser implementation must provide this
///
/// `analyse_element` must be referentially transparent in `(element, config)`:
/// cached results are reused on that assumption.
#[async_trait]
pub trait Analyser: Send + Sync {
    /// Etype accepted as input
    fn in_etype(&self) -> Etype;

    /// Etype of every produced element
    fn out_etype(&self) -> Etype;

    /// Argument names the implementation reads from its config.
    ///
    /// Checked against the metadata schema at registration time.
    fn expected_args(&self) -> &[&'static str] {
        &[]
    }

    /// Whether elements may be analysed concurrently. When false, at most
    /// one element is inside this step at a time.
    fn in_parallel(&self) -> bool {
        true
    }

    /// Prepare external dependencies (model weights, tools, ...)
    async fn build(&self, _ctx: &Context) -> Result<(), AnalyserError> {
        Ok(())
    }

    /// Called once per run and step before any element is analysed
    async fn setup(&self, _ctx: &Context, _config: &ResolvedConfig) -> Result<(), AnalyserError> {
        Ok(())
    }

    /// Called once per run and step after every traversal has finished,
    /// including runs that aborted. Only steps whose `setup` succeeded are
    /// torn down.
    async fn teardown(
        &self,
        _ctx: &Context,
        _config: &ResolvedConfig,
    ) -> Result<(), AnalyserError> {
        Ok(())
    }

    /// Transform one element into its successor.
    ///
    /// Return [`AnalyserError::Retry`] to have the element offered again (up
    /// to [`Context::max_attempts`] times) or [`AnalyserError::Skip`] to drop
    /// it without failing its traversal.
    async fn analyse_element(
        &self,
        ctx: &Context,
        element: Element,
        config: &ResolvedConfig,
    ) -> Result<Element, AnalyserError>;
}

/// Explicit table of analyser implementations, keyed by binding name
#[derive(Clone, Default)]
pub struct BindingTable {
    bindings: BTreeMap<String, Arc<dyn Analyser>>,
}

impl BindingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Table holding the analysers shipped with this crate
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.bind("Identity", Arc::new(crate::analysers::Identity));
        table.bind("MediaMeta", Arc::new(crate::analysers::MediaMeta));
        table.bind("LabelFilter", Arc::new(crate::analysers::LabelFilter));
        table
    }

    /// Bind `analyser` under `name`, replacing any previous binding
    pub fn bind(&mut self, name: impl Into<String>, analyser: Arc<dyn Analyser>) -> &mut Self {
        self.bindings.insert(name.into(), analyser);
        self
    }

    pub fn with(mut self, name: impl Into<String>, analyser: Arc<dyn Analyser>) -> Self {
        self.bind(name, analyser);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Analyser>> {
        self.bindings.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Analyser names are CamelCase: mixed case, ASCII alphanumeric, no underscore
pub fn is_camel_case(name: &str) -> bool {
    !name.is_empty()
        && name.chars().all(|c| c.is_ascii_alphanumeric())
        && name != name.to_ascii_lowercase()
        && name != name.to_ascii_uppercase()
}

/// A registered analyser: metadata plus its bound implementation
pub struct AnalyserDescriptor {
    pub name: String,
    pub desc: String,
    pub in_etype: Etype,
    pub out_etype: Etype,
    pub schema: ArgSchema,

    /// Cache version, part of every fingerprint
    pub version: u32,

    /// Directory the analyser was discovered in
    pub dir: Option<PathBuf>,

    /// Files `build` must find, relative to `dir`
    pub requires: Vec<PathBuf>,

    analyser: Arc<dyn Analyser>,
}

impl AnalyserDescriptor {
    /// Bind `analyser` to its metadata, checking the name and that every
    /// argument the code reads is declared in the schema
    pub fn new(
        name: impl Into<String>,
        manifest: AnalyserManifest,
        dir: Option<PathBuf>,
        analyser: Arc<dyn Analyser>,
    ) -> Result<Self, RegistryError> {
        let name = name.into();
        if !is_camel_case(&name) {
            return Err(RegistryError::malformed(&name, "name is not CamelCase"));
        }

        let schema = manifest
            .schema()
            .map_err(|e| RegistryError::malformed(&name, e))?;

        if let Some(missing) = analyser
            .expected_args()
            .iter()
            .find(|arg| !schema.contains(arg))
        {
            return Err(RegistryError::malformed(
                &name,
                format!("code reads argument '{missing}' which info.yaml does not declare"),
            ));
        }

        Ok(Self {
            name,
            desc: manifest.desc,
            in_etype: analyser.in_etype(),
            out_etype: analyser.out_etype(),
            schema,
            version: manifest.version,
            dir,
            requires: manifest.requires,
            analyser,
        })
    }

    pub fn analyser(&self) -> &Arc<dyn Analyser> {
        &self.analyser
    }

    /// Whether `produced` honours the declared output etype
    pub fn honours_output(&self, produced: Etype) -> bool {
        self.out_etype == Etype::Any || self.out_etype == produced
    }
}

impl fmt::Debug for AnalyserDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnalyserDescriptor")
            .field("name", &self.name)
            .field("in_etype", &self.in_etype)
            .field("out_etype", &self.out_etype)
            .field("schema", &self.schema)
            .field("version", &self.version)
            .field("dir", &self.dir)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ArgKind, ArgSpec};

    struct ReadsModel;

    #[async_trait]
    impl Analyser for ReadsModel {
        fn in_etype(&self) -> Etype {
            Etype::Image
        }

        fn out_etype(&self) -> Etype {
            Etype::CvJson
        }

        fn expected_args(&self) -> &[&'static str] {
            &["model"]
        }

        async fn analyse_element(
            &self,
            _ctx: &Context,
            element: Element,
            _config: &ResolvedConfig,
        ) -> Result<Element, AnalyserError> {
            Ok(element)
        }
    }

    fn model_arg() -> ArgSpec {
        ArgSpec {
            name: "model".to_string(),
            desc: String::new(),
            required: true,
            input: ArgKind::String,
            default: None,
        }
    }

    #[test]
    fn test_camel_case_rule() {
        assert!(is_camel_case("fooBar"));
        assert!(is_camel_case("KerasPretrained"));
        assert!(is_camel_case("Identity"));
        assert!(!is_camel_case("foo_bar"));
        assert!(!is_camel_case("FOOBAR"));
        assert!(!is_camel_case("foobar"));
        assert!(!is_camel_case(""));
        assert!(!is_camel_case("Foo Bar"));
    }

    #[test]
    fn test_descriptor_takes_etypes_from_code() {
        let manifest = AnalyserManifest::new("detector", vec![model_arg()]);
        let descriptor =
            AnalyserDescriptor::new("ReadsModel", manifest, None, Arc::new(ReadsModel)).unwrap();
        assert_eq!(descriptor.in_etype, Etype::Image);
        assert_eq!(descriptor.out_etype, Etype::CvJson);
        assert!(descriptor.honours_output(Etype::CvJson));
        assert!(!descriptor.honours_output(Etype::Json));
    }

    #[test]
    fn test_undeclared_expected_arg_is_malformed() {
        let manifest = AnalyserManifest::new("detector", vec![]);
        let err = AnalyserDescriptor::new("ReadsModel", manifest, None, Arc::new(ReadsModel))
            .unwrap_err();
        assert!(matches!(err, RegistryError::MalformedAnalyser { ref name, .. } if name == "ReadsModel"));
    }

    #[test]
    fn test_non_camel_case_name_is_malformed() {
        let manifest = AnalyserManifest::new("detector", vec![model_arg()]);
        assert!(AnalyserDescriptor::new("reads_model", manifest, None, Arc::new(ReadsModel)).is_err());
    }

    #[test]
    fn test_builtin_table() {
        let table = BindingTable::builtin();
        assert_eq!(table.len(), 3);
        assert!(table.get("Identity").is_some());
        assert!(table.get("Missing").is_none());
    }
}
