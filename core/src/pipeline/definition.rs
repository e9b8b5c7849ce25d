// core/src/pipeline/definition.rs

//! The `Pipeline<TData, Err>` type and its construction.

use crate::core::step::{Finalizer, Handler, SkipCondition, StepDef};
use crate::error::PipelineError;
use std::collections::HashMap;

/// An ordered list of named async steps over a shared `ContextData<TData>`.
///
/// Each step may have `before`, `on` and `after` handlers, run in that order.
/// Finalizers run once after the steps, whatever happened.
pub struct Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  pub(crate) steps: Vec<StepDef<TData>>,
  pub(crate) before: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) on: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) after: HashMap<String, Vec<Handler<TData, Err>>>,
  pub(crate) finalizers: Vec<(String, Finalizer<TData, Err>)>,
  // Handlers registered against unknown step names; reported by `run`.
  pub(crate) unknown_steps: Vec<String>,
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  /// `(name, optional, skip_if)` per step, in execution order.
  pub fn new(step_defs: &[(&str, bool, Option<SkipCondition<TData>>)]) -> Self {
    let steps = step_defs
      .iter()
      .map(|(name, optional, skip_if)| StepDef {
        name: (*name).to_string(),
        optional: *optional,
        skip_if: skip_if.clone(),
      })
      .collect();

    Self {
      steps,
      before: HashMap::new(),
      on: HashMap::new(),
      after: HashMap::new(),
      finalizers: Vec::new(),
      unknown_steps: Vec::new(),
    }
  }

  pub(crate) fn has_step(&self, step_name: &str) -> bool {
    self.steps.iter().any(|s| s.name == step_name)
  }
}
