//! Pipeline - タスクごとに名前付き step を順番に実行する
//!
//! - 各 step は `StepSignal` を返す（Continue / Stop / Fail）
//! - Fail はそのまま Decider の判定に渡る

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::app::RunContext;
use crate::domain::{Failure, ProcessingTask};
use crate::ports::{FetchedContent, ParsedDocument};

/// What a step tells the pipeline to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepSignal {
    Continue,
    /// Skip the remaining steps; the task still succeeds.
    Stop,
    Fail(Failure),
}

/// Mutable per-task state threaded through the steps.
#[derive(Debug, Clone)]
pub struct ProcessingState {
    pub task: ProcessingTask,
    pub content: Option<FetchedContent>,
    pub document: Option<ParsedDocument>,
    /// Links to offer to the frontier once the task succeeds.
    pub discovered: Vec<Url>,
    pub attributes: Map<String, Value>,
}

impl ProcessingState {
    pub fn new(task: ProcessingTask) -> Self {
        Self {
            task,
            content: None,
            document: None,
            discovered: Vec::new(),
            attributes: Map::new(),
        }
    }
}

/// One stage of a pipeline.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &str;

    async fn apply(&self, state: &mut ProcessingState, ctx: &RunContext) -> StepSignal;
}

/// An ordered, named sequence of steps, run one after another per task.
pub struct ProcessingPipeline {
    name: String,
    steps: Vec<Arc<dyn PipelineStep>>,
}

impl ProcessingPipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl PipelineStep + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Runs every step until one stops or fails.
    pub async fn run(&self, state: &mut ProcessingState, ctx: &RunContext) -> Result<(), Failure> {
        for step in &self.steps {
            match step.apply(state, ctx).await {
                StepSignal::Continue => {}
                StepSignal::Stop => {
                    debug!(pipeline = %self.name, step = step.name(), task = %state.task.id(), "pipeline stopped early");
                    return Ok(());
                }
                StepSignal::Fail(failure) => {
                    debug!(pipeline = %self.name, step = step.name(), task = %state.task.id(), %failure, "pipeline step failed");
                    return Err(failure);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ProcessingPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessingPipeline")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}

/// Copies the parsed document's links into `discovered`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectLinks;

#[async_trait]
impl PipelineStep for CollectLinks {
    fn name(&self) -> &str {
        "collect-links"
    }

    async fn apply(&self, state: &mut ProcessingState, _ctx: &RunContext) -> StepSignal {
        if let Some(doc) = &state.document {
            state.discovered.extend(doc.links.iter().cloned());
        }
        StepSignal::Continue
    }
}
