// core/src/pipeline/execution.rs

//! `Pipeline::run`.

use crate::core::context_data::ContextData;
use crate::core::control::{PipelineControl, PipelineResult};
use crate::core::step::Handler;
use crate::error::PipelineError;
use crate::pipeline::definition::Pipeline;
use tracing::{event, span, Instrument, Level};

enum PhaseOutcome<Err> {
  Continue,
  Stop,
  Failed(Err),
}

impl<TData, Err> Pipeline<TData, Err>
where
  TData: 'static + Send + Sync,
  Err: std::error::Error + From<PipelineError> + Send + Sync + 'static,
{
  /// Runs every step against `ctx_data`, then every finalizer.
  ///
  /// A finalizer error is logged and does not replace the steps' outcome.
  pub async fn run(&self, ctx_data: ContextData<TData>) -> Result<PipelineResult, Err> {
    let run_span = span!(
      Level::INFO,
      "Pipeline::run",
      context_type = %std::any::type_name::<TData>(),
      num_steps = self.steps.len()
    );

    async {
      let outcome = self.run_steps(&ctx_data).await;
      self.run_finalizers(&ctx_data).await;
      match &outcome {
        Ok(result) => event!(Level::DEBUG, ?result, "Pipeline finished."),
        Err(e) => event!(Level::ERROR, error = %e, "Pipeline failed."),
      }
      outcome
    }
    .instrument(run_span)
    .await
  }

  async fn run_steps(&self, ctx_data: &ContextData<TData>) -> Result<PipelineResult, Err> {
    if let Some(step_name) = self.unknown_steps.first() {
      return Err(Err::from(PipelineError::StepNotFound {
        step_name: step_name.clone(),
      }));
    }

    for (step_idx, step_def) in self.steps.iter().enumerate() {
      let step_name = step_def.name.as_str();

      if let Some(skip_if) = &step_def.skip_if {
        let skip = ctx_data.with(|data| skip_if(data));
        if skip {
          event!(Level::DEBUG, step_name, "Step skipped by condition.");
          continue;
        }
      }

      let phases = [self.before.get(step_name), self.on.get(step_name), self.after.get(step_name)];
      if phases.iter().all(|p| p.map_or(true, |v| v.is_empty())) {
        if step_def.optional {
          event!(Level::DEBUG, step_name, "Optional step has no handlers, skipping.");
          continue;
        }
        return Err(Err::from(PipelineError::HandlerMissing {
          step_name: step_def.name.clone(),
        }));
      }

      let step_span = span!(Level::INFO, "pipeline_step", step_name, step_index = step_idx);
      let outcome = async {
        for handlers in phases.into_iter().flatten() {
          match Self::run_phase(handlers, ctx_data).await {
            PhaseOutcome::Continue => {}
            other => return other,
          }
        }
        PhaseOutcome::Continue
      }
      .instrument(step_span)
      .await;

      match outcome {
        PhaseOutcome::Continue => {}
        PhaseOutcome::Stop => {
          event!(Level::INFO, step_name, "Pipeline stopped by handler.");
          return Ok(PipelineResult::Stopped);
        }
        PhaseOutcome::Failed(e) => {
          event!(Level::WARN, step_name, error = %e, "Step handler failed.");
          return Err(e);
        }
      }
    }

    Ok(PipelineResult::Completed)
  }

  async fn run_phase(handlers: &[Handler<TData, Err>], ctx_data: &ContextData<TData>) -> PhaseOutcome<Err> {
    for handler_fn in handlers {
      match handler_fn(ctx_data.clone()).await {
        Ok(PipelineControl::Continue) => {}
        Ok(PipelineControl::Stop) => return PhaseOutcome::Stop,
        Err(e) => return PhaseOutcome::Failed(e),
      }
    }
    PhaseOutcome::Continue
  }

  async fn run_finalizers(&self, ctx_data: &ContextData<TData>) {
    for (name, finalizer) in &self.finalizers {
      let span = span!(Level::DEBUG, "pipeline_finalizer", finalizer = name.as_str());
      if let Err(e) = finalizer(ctx_data.clone()).instrument(span).await {
        event!(Level::WARN, finalizer = name.as_str(), error = %e, "Finalizer failed.");
      }
    }
  }
}
