// core/src/core/step.rs

use super::ContextData;
use std::future::Future;
use std::pin::Pin;

/// Evaluated right before a step; `true` skips it.
pub type SkipCondition<TData> = std::sync::Arc<dyn Fn(&TData) -> bool + Send + Sync + 'static>;

pub type HandlerFuture<Out> = Pin<Box<dyn Future<Output = Out> + Send>>;

/// A step handler. Receives a clone of the shared context.
pub type Handler<TData, Err> =
  Box<dyn Fn(ContextData<TData>) -> HandlerFuture<Result<super::PipelineControl, Err>> + Send + Sync>;

/// Runs after the steps on every exit path: completion, stop or error.
pub type Finalizer<TData, Err> = Box<dyn Fn(ContextData<TData>) -> HandlerFuture<Result<(), Err>> + Send + Sync>;

#[derive(Clone)]
pub struct StepDef<T: 'static + Send + Sync> {
  pub name: String,
  /// An optional step with no handlers is skipped instead of failing the run.
  pub optional: bool,
  pub skip_if: Option<SkipCondition<T>>,
}

impl<T: 'static + Send + Sync> std::fmt::Debug for StepDef<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StepDef")
      .field("name", &self.name)
      .field("optional", &self.optional)
      .field("skip_if_present", &self.skip_if.is_some())
      .finish()
  }
}
