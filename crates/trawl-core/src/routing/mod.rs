//! Routing: pick a pipeline for a task, then run its steps in order.

mod pipeline;
mod route;

pub use pipeline::{CollectLinks, PipelineStep, ProcessingPipeline, ProcessingState, StepSignal};
pub use route::{CatchAll, HintMatcher, ProcessingRouteResolver, Route, RouteMatcher};
