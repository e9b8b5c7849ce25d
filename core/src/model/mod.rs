// core/src/model/mod.rs

pub mod journal;
pub mod order;
pub mod payment;

pub use journal::{
  CallbackErrorRecord, CallbackLogRecord, GenerationLogEntry, GenerationMethod, ManualInterventionAlert,
  RetryAttemptRecord, RetryFailureRecord, Severity, Urgency,
};
pub use order::{
  Order, OrderDraft, OrderItem, OrderStatus, PaymentErrorDetail, PaymentInfo, PaymentStatus, ShipmentTracking,
};
pub use payment::{
  NotificationFieldError, NotificationParams, PaymentNotification, ProcessingLock, TransactionOutcome,
  TransactionRecord,
};
