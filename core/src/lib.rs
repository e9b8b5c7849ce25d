// src/lib.rs

//! teapay: the payment back end of a tea storefront.
//!
//!  - `order_number`: unique, parseable order numbers with duplicate-draft
//!    detection and a CAS-backed daily sequence.
//!  - `retry`: bounded retries with exponential backoff, jitter, error
//!    classification and manual-intervention escalation.
//!  - `callback`: the payment-result webhook, built as a pipeline of named
//!    steps guarded by a transaction record, a processing lease and
//!    conditional order updates.
//!
//! Persistence and outbound calls go through the traits in `store` and
//! `effects`; `store::MemoryStore` implements all of them in-process.

pub mod callback;
pub mod clock;
pub mod config;
pub mod core;
pub mod effects;
pub mod error;
pub mod model;
pub mod order_number;
pub mod pipeline;
pub mod retry;
pub mod store;

// --- Re-exports for the Public API ---

pub use crate::core::{ContextData, PipelineControl, PipelineResult, SkipCondition, StepDef};
pub use crate::pipeline::Pipeline;

pub use crate::callback::{AckCode, AckReason, CallbackAck, CallbackError, CallbackServices, PaymentCallbackHandler};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{CallbackConfig, Environment, OrderNumberConfig};
pub use crate::effects::{AlertSink, InventoryService, LoggingEffects, PostPaymentEffects};
pub use crate::error::{Classify, ConfigError, EffectError, ErrorKind, PipelineError, StoreError};
pub use crate::order_number::{GeneratedOrderNumber, MintMethod, OrderNumberError, OrderNumberGenerator};
pub use crate::retry::{RetryContext, RetryError, RetryExecutor, RetryOutcome, RetryStrategy, StrategyTable};
pub use crate::store::MemoryStore;
