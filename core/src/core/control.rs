// core/src/core/control.rs

//! Flow signals returned by step handlers and the outcome of a whole run.

/// Returned by every step handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineControl {
  /// Go on with the remaining handlers and steps.
  Continue,
  /// Halt here. Remaining handlers and steps are skipped; finalizers still run.
  Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineResult {
  /// Every non-skipped step ran.
  Completed,
  /// A handler returned `PipelineControl::Stop`.
  Stopped,
}
