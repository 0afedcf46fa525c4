//! Pipeline composition: name resolution, config validation and etype checks

use crate::analyser::AnalyserDescriptor;
use crate::error::CompositionError;
use crate::etype::Etype;
use crate::registry::Registry;
use crate::schema::ResolvedConfig;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// One step as written by the user: analyser name plus raw config
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepConfig {
    pub analyser: String,

    #[serde(default)]
    pub config: Map<String, Value>,
}

impl StepConfig {
    pub fn new(analyser: impl Into<String>) -> Self {
        Self {
            analyser: analyser.into(),
            config: Map::new(),
        }
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: Value) -> Self {
        self.config.insert(name.into(), value);
        self
    }
}

/// A validated step of a composed pipeline
#[derive(Debug, Clone)]
pub struct PipelineStep {
    /// Position in the pipeline
    pub index: usize,

    /// The analyser to execute
    pub descriptor: Arc<AnalyserDescriptor>,

    /// Config validated against the analyser's schema
    pub config: ResolvedConfig,
}

impl PipelineStep {
    pub fn analyser_name(&self) -> &str {
        &self.descriptor.name
    }
}

/// A fully type-checked pipeline, ready to execute
#[derive(Debug, Clone)]
pub struct PipelineSpec {
    /// Pipeline name, also the cache namespace
    pub name: String,

    /// Steps to execute in order
    pub steps: Vec<PipelineStep>,
}

impl PipelineSpec {
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Input etype of the first step
    pub fn in_etype(&self) -> Option<Etype> {
        self.steps.first().map(|s| s.descriptor.in_etype)
    }

    /// Output etype of the final step
    pub fn out_etype(&self) -> Option<Etype> {
        self.steps.last().map(|s| s.descriptor.out_etype)
    }

    /// Copy with every relative `path` argument joined onto `base`
    pub fn resolve_paths(&self, base: &Path) -> PipelineSpec {
        let steps = self
            .steps
            .iter()
            .map(|step| PipelineStep {
                index: step.index,
                descriptor: Arc::clone(&step.descriptor),
                config: step.config.resolve_paths(base),
            })
            .collect();
        PipelineSpec {
            name: self.name.clone(),
            steps,
        }
    }
}

/// Builds [`PipelineSpec`]s against a registry
pub struct Composer<'a> {
    registry: &'a Registry,
}

impl<'a> Composer<'a> {
    pub fn new(registry: &'a Registry) -> Self {
        Self { registry }
    }

    /// Resolve, validate and type-check `steps`.
    ///
    /// Runs entirely before execution; no analyser code is invoked. The
    /// first failing step aborts composition.
    pub fn compose(
        &self,
        name: impl Into<String>,
        steps: &[StepConfig],
    ) -> Result<PipelineSpec, CompositionError> {
        let name = name.into();
        if steps.is_empty() {
            return Err(CompositionError::EmptyPipeline);
        }

        let mut resolved = Vec::with_capacity(steps.len());
        for (index, step) in steps.iter().enumerate() {
            let descriptor = self.registry.get(&step.analyser).ok_or_else(|| {
                CompositionError::UnknownAnalyser {
                    step: index,
                    name: step.analyser.clone(),
                }
            })?;

            let config = descriptor.schema.validate(&step.config).map_err(|source| {
                CompositionError::InvalidConfig {
                    step: index,
                    analyser: descriptor.name.clone(),
                    source,
                }
            })?;

            debug!("Step {}: {} config resolved", index, descriptor.name);
            resolved.push(PipelineStep {
                index,
                descriptor,
                config,
            });
        }

        for pair in resolved.windows(2) {
            let (prev, cur) = (&pair[0], &pair[1]);
            if !Etype::compatible(prev.descriptor.out_etype, cur.descriptor.in_etype) {
                return Err(CompositionError::TypeMismatch {
                    step: cur.index,
                    analyser: cur.descriptor.name.clone(),
                    expected: cur.descriptor.in_etype,
                    got: prev.descriptor.out_etype,
                });
            }
        }

        info!("Composed pipeline '{}': {} steps", name, resolved.len());
        Ok(PipelineSpec {
            name,
            steps: resolved,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::Analyser;
    use crate::analysers::Identity;
    use crate::context::Context;
    use crate::element::Element;
    use crate::error::{AnalyserError, SchemaError};
    use crate::manifest::AnalyserManifest;
    use crate::schema::{ArgKind, ArgSpec};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Typed {
        input: Etype,
        output: Etype,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Analyser for Typed {
        fn in_etype(&self) -> Etype {
            self.input
        }

        fn out_etype(&self) -> Etype {
            self.output
        }

        async fn analyse_element(
            &self,
            _ctx: &Context,
            element: Element,
            _config: &ResolvedConfig,
        ) -> Result<Element, AnalyserError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(element)
        }
    }

    fn registry(calls: &Arc<AtomicUsize>) -> Registry {
        let mut registry = Registry::new();
        let typed = |name: &str, input, output, args: Vec<ArgSpec>| {
            AnalyserDescriptor::new(
                name,
                AnalyserManifest::new(name, args),
                None,
                Arc::new(Typed {
                    input,
                    output,
                    calls: Arc::clone(calls),
                }),
            )
            .unwrap()
        };
        registry.register(typed(
            "ImageTagger",
            Etype::Image,
            Etype::Image,
            vec![ArgSpec {
                name: "threshold".to_string(),
                desc: String::new(),
                required: false,
                input: ArgKind::Number,
                default: Some(json!(0.5)),
            }],
        ));
        registry.register(typed("TextReader", Etype::Text, Etype::Json, vec![]));
        registry.register(
            AnalyserDescriptor::new(
                "Identity",
                AnalyserManifest::new("identity", vec![]),
                None,
                Arc::new(Identity),
            )
            .unwrap(),
        );
        registry
    }

    #[test]
    fn test_compose_resolves_defaults() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(&calls);
        let spec = Composer::new(&registry)
            .compose("p", &[StepConfig::new("ImageTagger"), StepConfig::new("Identity")])
            .unwrap();
        assert_eq!(spec.len(), 2);
        assert_eq!(spec.steps[0].config.get_f64("threshold"), Some(0.5));
        assert_eq!(spec.in_etype(), Some(Etype::Image));
        assert_eq!(spec.out_etype(), Some(Etype::Any));
    }

    #[test]
    fn test_type_mismatch_makes_no_transform_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(&calls);
        let err = Composer::new(&registry)
            .compose("p", &[StepConfig::new("ImageTagger"), StepConfig::new("TextReader")])
            .unwrap_err();
        assert_eq!(
            err,
            CompositionError::TypeMismatch {
                step: 1,
                analyser: "TextReader".to_string(),
                expected: Etype::Text,
                got: Etype::Image,
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_any_bridges_concrete_types() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(&calls);
        let spec = Composer::new(&registry).compose(
            "p",
            &[
                StepConfig::new("ImageTagger"),
                StepConfig::new("Identity"),
                StepConfig::new("Identity"),
                StepConfig::new("TextReader"),
            ],
        );
        assert!(spec.is_ok());
    }

    #[test]
    fn test_unknown_analyser() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(&calls);
        let err = Composer::new(&registry)
            .compose("p", &[StepConfig::new("Identity"), StepConfig::new("Nope")])
            .unwrap_err();
        assert_eq!(
            err,
            CompositionError::UnknownAnalyser {
                step: 1,
                name: "Nope".to_string()
            }
        );
    }

    #[test]
    fn test_invalid_config_reports_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = registry(&calls);
        let err = Composer::new(&registry)
            .compose(
                "p",
                &[
                    StepConfig::new("Identity"),
                    StepConfig::new("ImageTagger").with_arg("threshold", json!("high")),
                ],
            )
            .unwrap_err();
        match err {
            CompositionError::InvalidConfig {
                step,
                analyser,
                source: SchemaError::InvalidArgType { .. },
            } => {
                assert_eq!(step, 1);
                assert_eq!(analyser, "ImageTagger");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_empty_pipeline() {
        let registry = Registry::new();
        assert_eq!(
            Composer::new(&registry).compose("p", &[]).unwrap_err(),
            CompositionError::EmptyPipeline
        );
    }

    #[test]
    fn test_step_config_from_yaml() {
        let step: StepConfig =
            serde_yaml::from_str("analyser: LabelFilter\nconfig:\n  labels: [person]\n").unwrap();
        assert_eq!(step.analyser, "LabelFilter");
        assert_eq!(step.config["labels"], json!(["person"]));

        let bare: StepConfig = serde_yaml::from_str("analyser: Identity\n").unwrap();
        assert!(bare.config.is_empty());
    }
}
