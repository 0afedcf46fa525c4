//! Stage orchestrator: drives elements through a composed pipeline
//!
//! Every input element is an independent traversal. Traversals run
//! concurrently, bounded by [`Context::max_parallel`]; the steps of one
//! traversal run strictly in order. Each step is keyed by a fingerprint and
//! looked up in the [`ResultStore`] before any analyser code runs, so an
//! interrupted run resumes from the last persisted step.
//!
//! Every step's analyser is set up once before the first traversal starts
//! and torn down once after the last one ends. Steps whose analyser is not
//! [`in_parallel`](crate::analyser::Analyser::in_parallel) admit one element
//! at a time.

use crate::cache::{fingerprint, MemoryStore, ResultStore, StageOutcome, StageResult};
use crate::composer::{PipelineSpec, PipelineStep};
use crate::context::{Context, ExecutionMode};
use crate::element::Element;
use crate::error::{AnalyserError, OrchestratorError, StoreError};
use crate::etype::Etype;
use crate::export::{export_results, ExportReport};
use crate::registry::Registry;
use crate::state::{PipelineState, StepState};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Which analysers `build` prepares
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildFilter {
    /// Only these analysers, when set
    pub whitelist: Option<Vec<String>>,

    /// Never these analysers
    pub blacklist: Vec<String>,
}

impl BuildFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn only<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: Some(names.into_iter().map(Into::into).collect()),
            blacklist: Vec::new(),
        }
    }

    pub fn except<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            whitelist: None,
            blacklist: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn selects(&self, name: &str) -> bool {
        let listed = self
            .whitelist
            .as_ref()
            .map_or(true, |names| names.iter().any(|n| n == name));
        listed && !self.blacklist.iter().any(|n| n == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildFailure {
    pub analyser: String,
    pub reason: String,
}

/// Outcome of preparing analysers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub built: Vec<String>,
    pub failed: Vec<BuildFailure>,
}

impl BuildReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// One step of one traversal
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub state: StepState,
    pub result: StageResult,
}

/// One element's pass through the pipeline
#[derive(Debug)]
pub struct TraversalReport {
    pub element_id: String,
    pub input_fingerprint: String,

    /// `Completed` or `Aborted`
    pub state: PipelineState,
    pub steps: Vec<StepRecord>,

    /// Output of the final step, when every step produced one
    pub output: Option<Element>,

    /// Why the traversal was aborted
    pub failure: Option<OrchestratorError>,
}

impl TraversalReport {
    pub fn is_completed(&self) -> bool {
        self.state == PipelineState::Completed
    }

    /// Completed, but an analyser dropped the element on the way
    pub fn is_skipped(&self) -> bool {
        self.steps
            .last()
            .is_some_and(|record| record.state == StepState::Skipped)
    }
}

/// Result of executing a pipeline over a set of inputs
#[derive(Debug)]
pub struct RunReport {
    pub pipeline: String,
    pub mode: ExecutionMode,

    /// `Completed` when every traversal completed, `Aborted` otherwise
    pub state: PipelineState,

    /// One report per input element, in input order
    pub traversals: Vec<TraversalReport>,

    /// Steps whose analyser was invoked
    pub executed: usize,

    /// Steps taken from the result store
    pub resolved: usize,
    pub duration: Duration,
}

impl RunReport {
    pub fn completed(&self) -> usize {
        self.traversals.iter().filter(|t| t.is_completed()).count()
    }

    pub fn aborted(&self) -> usize {
        self.traversals.len() - self.completed()
    }

    pub fn skipped(&self) -> usize {
        self.traversals.iter().filter(|t| t.is_skipped()).count()
    }

    pub fn outputs(&self) -> impl Iterator<Item = &Element> {
        self.traversals.iter().filter_map(|t| t.output.as_ref())
    }
}

/// Executes composed pipelines against a result store
pub struct Orchestrator {
    context: Context,
    store: Arc<dyn ResultStore>,
}

impl Orchestrator {
    pub fn new(context: Context, store: Arc<dyn ResultStore>) -> Self {
        Self { context, store }
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn store(&self) -> &Arc<dyn ResultStore> {
        &self.store
    }

    /// Prepare the selected analysers.
    ///
    /// Each analyser's `requires` files must exist under its directory before
    /// its `build` hook runs. Failures are collected per analyser.
    pub async fn build(&self, registry: &Registry, filter: &BuildFilter) -> BuildReport {
        let mut report = BuildReport::default();

        for descriptor in registry.iter().filter(|d| filter.selects(&d.name)) {
            info!("Building analyser: {}", descriptor.name);

            let missing = descriptor.requires.iter().find_map(|required| {
                let path = match &descriptor.dir {
                    Some(dir) => dir.join(required),
                    None => self.context.resolve(required),
                };
                (!path.exists()).then_some(path)
            });

            let outcome = match missing {
                Some(path) => Err(format!("required file {} not found", path.display())),
                None => descriptor
                    .analyser()
                    .build(&self.context)
                    .await
                    .map_err(|e| e.to_string()),
            };

            match outcome {
                Ok(()) => report.built.push(descriptor.name.clone()),
                Err(reason) => {
                    warn!("Build of {} failed: {}", descriptor.name, reason);
                    report.failed.push(BuildFailure {
                        analyser: descriptor.name.clone(),
                        reason,
                    });
                }
            }
        }

        info!(
            "Build finished: {} built, {} failed",
            report.built.len(),
            report.failed.len()
        );
        report
    }

    /// Execute `spec` over every input element
    pub async fn run(
        &self,
        spec: &PipelineSpec,
        inputs: Vec<Element>,
    ) -> Result<RunReport, OrchestratorError> {
        self.execute(spec, inputs).await
    }

    /// Execute `spec` over the first [`Context::develop_sample`] inputs
    pub async fn develop(
        &self,
        spec: &PipelineSpec,
        inputs: Vec<Element>,
    ) -> Result<RunReport, OrchestratorError> {
        let sample: Vec<Element> = inputs
            .into_iter()
            .take(self.context.develop_sample)
            .collect();
        let orchestrator = Orchestrator::new(
            self.context.clone().with_mode(ExecutionMode::Develop),
            Arc::clone(&self.store),
        );
        orchestrator.execute(spec, sample).await
    }

    /// Execute `spec` over synthetic inputs against a throw-away store
    pub async fn test(&self, spec: &PipelineSpec) -> Result<RunReport, OrchestratorError> {
        let etype = spec.in_etype().unwrap_or(Etype::Any);
        let inputs = (0..self.context.test_elements)
            .map(|index| Element::synthetic(etype, index))
            .collect();
        let orchestrator = Orchestrator::new(
            self.context.clone().with_mode(ExecutionMode::Test),
            Arc::new(MemoryStore::new()),
        );
        orchestrator.execute(spec, inputs).await
    }

    /// Write the stored outputs `spec` produced for `inputs` to `out_dir`.
    ///
    /// The fingerprint chain of every input is recomputed the way `run`
    /// computes it, so results stored for other configs or other inputs are
    /// never exported. Without `step`, the deepest step any input reached is
    /// exported.
    pub fn export(
        &self,
        spec: &PipelineSpec,
        inputs: &[Element],
        step: Option<usize>,
        out_dir: &Path,
    ) -> Result<ExportReport, OrchestratorError> {
        let spec = spec.resolve_paths(&self.context.base_dir);
        let depth = step.map_or(spec.len(), |step| step + 1);

        let mut chains = Vec::with_capacity(inputs.len());
        for element in inputs {
            chains.push(stored_chain(self.store.as_ref(), &spec, element, depth)?);
        }

        let step = match step {
            Some(step) => step,
            None => chains
                .iter()
                .map(Vec::len)
                .max()
                .and_then(|reached| reached.checked_sub(1))
                .ok_or_else(|| OrchestratorError::NothingToExport(spec.name.clone()))?,
        };

        let results: Vec<StageResult> = chains
            .into_iter()
            .filter_map(|chain| chain.into_iter().nth(step))
            .collect();
        if results.is_empty() {
            return Err(OrchestratorError::NothingToExport(spec.name.clone()));
        }
        debug!("Exporting {} results of step {}", results.len(), step);
        export_results(&results, out_dir)
    }

    /// Remove stored results of `pipeline` (one step, or all of them)
    pub fn clean(&self, pipeline: &str, step: Option<usize>) -> Result<usize, OrchestratorError> {
        let removed = self.store.remove(pipeline, step)?;
        match step {
            Some(step) => info!("Removed {} results of {} step {}", removed, pipeline, step),
            None => info!("Removed {} results of {}", removed, pipeline),
        }
        Ok(removed)
    }

    async fn execute(
        &self,
        spec: &PipelineSpec,
        inputs: Vec<Element>,
    ) -> Result<RunReport, OrchestratorError> {
        if inputs.is_empty() {
            return Err(OrchestratorError::NoElements(spec.name.clone()));
        }

        let mut state = PipelineState::Composing;
        state.advance(PipelineState::Ready)?;

        let spec = Arc::new(spec.resolve_paths(&self.context.base_dir));
        let total = inputs.len();
        let max_parallel = self.context.max_parallel.max(1);

        info!("=== Pipeline '{}' Started ({:?}) ===", spec.name, self.context.mode);
        info!("Steps: {}", spec.len());
        info!("Elements: {}", total);
        info!("Max concurrent: {}", max_parallel);

        state.advance(PipelineState::Executing)?;
        let start_time = Instant::now();

        let (ready, setup_failure) = self.setup_steps(&spec).await;
        let outcome = match setup_failure {
            Some(failure) => Err(failure),
            None => self.drive(&spec, inputs, max_parallel).await,
        };
        self.teardown_steps(&spec.steps[..ready]).await;

        let traversals = match outcome {
            Ok(traversals) => traversals,
            Err(fatal) => {
                state.advance(PipelineState::Aborted)?;
                warn!("Pipeline '{}' aborted: {}", spec.name, fatal);
                return Err(fatal);
            }
        };

        let (mut executed, mut resolved) = (0, 0);
        for record in traversals.iter().flat_map(|t| &t.steps) {
            match record.state {
                StepState::Resolved => resolved += 1,
                StepState::Succeeded | StepState::Failed | StepState::Skipped => executed += 1,
                StepState::Pending | StepState::Running => {}
            }
        }

        let next = if traversals.iter().all(TraversalReport::is_completed) {
            PipelineState::Completed
        } else {
            PipelineState::Aborted
        };
        state.advance(next)?;

        let report = RunReport {
            pipeline: spec.name.clone(),
            mode: self.context.mode,
            state,
            traversals,
            executed,
            resolved,
            duration: start_time.elapsed(),
        };

        info!("=== Pipeline '{}' {} ===", report.pipeline, report.state);
        info!("Total time: {:.2}s", report.duration.as_secs_f64());
        info!(
            "Traversals: {} completed ({} skipped), {} aborted; steps: {} executed, {} from cache",
            report.completed(),
            report.skipped(),
            report.aborted(),
            report.executed,
            report.resolved
        );

        Ok(report)
    }

    /// Set up every step in order, stopping at the first failure.
    ///
    /// Returns how many steps were set up, which is the prefix that needs a
    /// teardown.
    async fn setup_steps(&self, spec: &PipelineSpec) -> (usize, Option<OrchestratorError>) {
        for (ready, step) in spec.steps.iter().enumerate() {
            let name = step.analyser_name();
            debug!("Setting up step {} ({})", step.index, name);
            if let Err(cause) = step
                .descriptor
                .analyser()
                .setup(&self.context, &step.config)
                .await
            {
                return (
                    ready,
                    Some(OrchestratorError::Setup {
                        step: step.index,
                        analyser: name.to_string(),
                        cause,
                    }),
                );
            }
        }
        (spec.len(), None)
    }

    /// Tear down `steps` in reverse order. Failures are logged only.
    async fn teardown_steps(&self, steps: &[PipelineStep]) {
        for step in steps.iter().rev() {
            if let Err(e) = step
                .descriptor
                .analyser()
                .teardown(&self.context, &step.config)
                .await
            {
                warn!(
                    "Teardown of step {} ({}) failed: {}",
                    step.index,
                    step.analyser_name(),
                    e
                );
            }
        }
    }

    /// Run one traversal per input and collect the reports in input order.
    ///
    /// A fatal traversal error aborts the others; they are drained before
    /// returning so no analyser call outlives the run.
    async fn drive(
        &self,
        spec: &Arc<PipelineSpec>,
        inputs: Vec<Element>,
        max_parallel: usize,
    ) -> Result<Vec<TraversalReport>, OrchestratorError> {
        let total = inputs.len();
        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let gates: Arc<Vec<Option<Semaphore>>> = Arc::new(
            spec.steps
                .iter()
                .map(|step| (!step.descriptor.analyser().in_parallel()).then(|| Semaphore::new(1)))
                .collect(),
        );

        let mut tasks = JoinSet::new();
        for (position, element) in inputs.into_iter().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let gates = Arc::clone(&gates);
            let spec = Arc::clone(spec);
            let context = self.context.clone();
            let store = Arc::clone(&self.store);

            tasks.spawn(async move {
                let _permit = semaphore.acquire().await;
                let report = traverse(&context, store.as_ref(), &spec, &gates, element).await;
                (position, report)
            });
        }

        let mut traversals = Vec::with_capacity(total);
        while let Some(joined) = tasks.join_next().await {
            let (position, report) = joined?;
            match report {
                Ok(report) => traversals.push((position, report)),
                Err(fatal) => {
                    tasks.abort_all();
                    while tasks.join_next().await.is_some() {}
                    return Err(fatal);
                }
            }
        }
        traversals.sort_by_key(|(position, _)| *position);
        Ok(traversals.into_iter().map(|(_, report)| report).collect())
    }
}

/// Stored results of `element`'s traversal in step order, up to `depth`
/// steps and stopping at the first step missing from the store
fn stored_chain(
    store: &dyn ResultStore,
    spec: &PipelineSpec,
    element: &Element,
    depth: usize,
) -> Result<Vec<StageResult>, StoreError> {
    let mut upstream = element.fingerprint();
    let mut chain = Vec::new();
    for step in spec.steps.iter().take(depth) {
        let key = fingerprint(
            step.analyser_name(),
            step.descriptor.version,
            &step.config,
            &upstream,
        );
        let Some(result) = store.get(&spec.name, step.index, &key)? else {
            break;
        };
        let Some(output) = result.output() else {
            break;
        };
        upstream = output.fingerprint();
        chain.push(result);
    }
    Ok(chain)
}

fn stage_result(
    spec: &PipelineSpec,
    step: &PipelineStep,
    fingerprint: String,
    input_fingerprint: String,
    outcome: StageOutcome,
    duration: Duration,
) -> StageResult {
    StageResult {
        pipeline: spec.name.clone(),
        step_index: step.index,
        analyser: step.analyser_name().to_string(),
        fingerprint,
        input_fingerprint,
        outcome,
        duration,
        created_at: SystemTime::now(),
    }
}

/// Drive one element through every step.
///
/// Step failures abort only this traversal and are reported in the returned
/// [`TraversalReport`]. A skipped element completes the traversal without an
/// output. An `Err` is fatal for the whole run.
async fn traverse(
    ctx: &Context,
    store: &dyn ResultStore,
    spec: &PipelineSpec,
    gates: &[Option<Semaphore>],
    element: Element,
) -> Result<TraversalReport, OrchestratorError> {
    let mut state = PipelineState::Ready;
    state.advance(PipelineState::Executing)?;

    let element_id = element.id.clone();
    let input_fingerprint = element.fingerprint();
    let mut upstream = input_fingerprint.clone();
    let mut current = element;
    let mut steps = Vec::with_capacity(spec.len());

    for step in &spec.steps {
        let name = step.analyser_name();
        let key = fingerprint(name, step.descriptor.version, &step.config, &upstream);
        let mut step_state = StepState::Pending;

        if let Some(cached) = store.get(&spec.name, step.index, &key)? {
            if let Some(output) = cached.output() {
                step_state.advance(StepState::Resolved)?;
                debug!("{} step {} ({}): cache hit", element_id, step.index, name);
                current = output.clone();
                upstream = current.fingerprint();
                steps.push(StepRecord {
                    state: step_state,
                    result: cached,
                });
                continue;
            }
        }

        step_state.advance(StepState::Running)?;
        debug!("{} step {} ({}): executing", element_id, step.index, name);
        let serial = match gates.get(step.index).and_then(Option::as_ref) {
            Some(gate) => gate.acquire().await.ok(),
            None => None,
        };
        let started = Instant::now();
        let outcome = execute_step(ctx, step, current).await;
        let duration = started.elapsed();
        drop(serial);

        let output = match outcome {
            Ok(output) => output,
            Err(OrchestratorError::ExecutionFailure {
                cause: AnalyserError::Skip(reason),
                ..
            }) => {
                step_state.advance(StepState::Skipped)?;
                state.advance(PipelineState::Completed)?;
                info!("{} skipped at step {} ({}): {}", element_id, step.index, name, reason);
                steps.push(StepRecord {
                    state: step_state,
                    result: stage_result(
                        spec,
                        step,
                        key,
                        upstream,
                        StageOutcome::Skipped(reason),
                        duration,
                    ),
                });
                return Ok(TraversalReport {
                    element_id,
                    input_fingerprint,
                    state,
                    steps,
                    output: None,
                    failure: None,
                });
            }
            Err(failure) => {
                step_state.advance(StepState::Failed)?;
                state.advance(PipelineState::Aborted)?;
                warn!("{} aborted at step {} ({}): {}", element_id, step.index, name, failure);
                steps.push(StepRecord {
                    state: step_state,
                    result: stage_result(
                        spec,
                        step,
                        key,
                        upstream,
                        StageOutcome::Failed(failure.to_string()),
                        duration,
                    ),
                });
                return Ok(TraversalReport {
                    element_id,
                    input_fingerprint,
                    state,
                    steps,
                    output: None,
                    failure: Some(failure),
                });
            }
        };

        if !step.descriptor.honours_output(output.etype) {
            return Err(OrchestratorError::ContractViolation {
                step: step.index,
                analyser: name.to_string(),
                expected: step.descriptor.out_etype,
                got: output.etype,
            });
        }

        let result = stage_result(
            spec,
            step,
            key,
            upstream,
            StageOutcome::Succeeded(output.clone()),
            duration,
        );
        if !store.put_if_absent(&result)? {
            debug!("{} step {}: result already stored", element_id, step.index);
        }
        step_state.advance(StepState::Succeeded)?;
        if ctx.verbose {
            info!(
                "  ✓ {} step {} ({}) completed in {:.2}s",
                element_id,
                step.index,
                name,
                duration.as_secs_f64()
            );
        }

        upstream = output.fingerprint();
        current = output;
        steps.push(StepRecord {
            state: step_state,
            result,
        });
    }

    state.advance(PipelineState::Completed)?;
    Ok(TraversalReport {
        element_id,
        input_fingerprint,
        state,
        steps,
        output: Some(current),
        failure: None,
    })
}

/// Run one analyser on one element, under the stage timeout if configured.
///
/// A [`AnalyserError::Retry`] offers the element again until
/// [`Context::max_attempts`] calls were made; each call gets the full timeout.
async fn execute_step(
    ctx: &Context,
    step: &PipelineStep,
    element: Element,
) -> Result<Element, OrchestratorError> {
    let descriptor = &step.descriptor;
    let failure = |cause: AnalyserError| OrchestratorError::ExecutionFailure {
        step: step.index,
        analyser: descriptor.name.clone(),
        cause,
    };

    if !Etype::compatible(element.etype, descriptor.in_etype) {
        return Err(failure(AnalyserError::InvalidInput(format!(
            "element '{}' is {}, {} accepts {}",
            element.id, element.etype, descriptor.name, descriptor.in_etype
        ))));
    }

    let attempts = ctx.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let call = descriptor
            .analyser()
            .analyse_element(ctx, element.clone(), &step.config);

        let result = match ctx.stage_timeout {
            Some(timeout_duration) => match tokio::time::timeout(timeout_duration, call).await {
                Ok(result) => result,
                Err(_) => {
                    return Err(OrchestratorError::Timeout {
                        step: step.index,
                        analyser: descriptor.name.clone(),
                        seconds: timeout_duration.as_secs(),
                    });
                }
            },
            None => call.await,
        };

        match result {
            Err(AnalyserError::Retry(reason)) if attempt < attempts => {
                debug!(
                    "{} step {} ({}): attempt {}/{} asked for a retry: {}",
                    element.id, step.index, descriptor.name, attempt, attempts, reason
                );
                attempt += 1;
            }
            other => return other.map_err(failure),
        }
    }
}
