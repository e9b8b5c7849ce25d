// core/src/order_number/mod.rs

//! Order-number generation: duplicate-draft detection, a CAS-backed daily
//! sequence, and a fallback format for when the standard path breaks.

pub mod fingerprint;
pub mod format;
pub mod sequence;

pub use fingerprint::fingerprint;
pub use format::{channel_code, is_valid, DEFAULT_CHANNEL, parse, verify_check_digit, ParsedOrderNumber, StandardParts};
pub use sequence::SequenceAllocator;

use crate::clock::Clock;
use crate::config::OrderNumberConfig;
use crate::model::{GenerationLogEntry, GenerationMethod, OrderDraft};
use crate::store::{AuditLog, OrderStore, SequenceStore};
use rand::RngCore;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderNumberError {
  #[error("sequence {0} does not fit the four-digit field")]
  SequenceOverflow(u64),

  #[error("random source unavailable: {0}")]
  RandomUnavailable(String),

  #[error("unrecognized order number format: {0}")]
  Unrecognized(String),

  #[error("invalid request: {0}")]
  InvalidRequest(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MintMethod {
  Standard,
  Fallback,
  /// An identical pending draft already had a number.
  Existing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GeneratedOrderNumber {
  pub order_number: String,
  pub method: MintMethod,
}

pub struct OrderNumberGenerator {
  orders: Arc<dyn OrderStore>,
  sequences: SequenceAllocator,
  audit: Arc<dyn AuditLog>,
  clock: Arc<dyn Clock>,
  config: OrderNumberConfig,
}

impl OrderNumberGenerator {
  pub fn new(
    orders: Arc<dyn OrderStore>,
    sequence_store: Arc<dyn SequenceStore>,
    audit: Arc<dyn AuditLog>,
    clock: Arc<dyn Clock>,
    config: OrderNumberConfig,
  ) -> Self {
    let sequences = SequenceAllocator::new(
      sequence_store,
      clock.clone(),
      config.sequence_max_retries,
      config.sequence_backoff_step,
    );
    Self {
      orders,
      sequences,
      audit,
      clock,
      config,
    }
  }

  /// Returns the number of an identical pending draft from the same owner if
  /// one was created inside the duplicate window, otherwise mints a new one.
  #[instrument(
    name = "OrderNumberGenerator::generate",
    skip(self, draft),
    fields(total_amount = draft.total_amount, items = draft.items.len())
  )]
  pub async fn generate(
    &self,
    owner_id: &str,
    channel: &str,
    draft: &OrderDraft,
  ) -> Result<GeneratedOrderNumber, OrderNumberError> {
    if owner_id.trim().is_empty() {
      return Err(OrderNumberError::InvalidRequest("owner id is required".into()));
    }

    if let Some(existing) = self.check_existing(owner_id, draft).await {
      info!(order_number = %existing, "duplicate draft, reusing order number");
      return Ok(GeneratedOrderNumber {
        order_number: existing,
        method: MintMethod::Existing,
      });
    }

    self.mint(owner_id, channel, draft.total_amount, draft.items.len()).await
  }

  /// Finds a pending order of `owner_id` with the same fingerprint inside the
  /// duplicate window. Lookup failures are treated as "no duplicate".
  #[instrument(name = "OrderNumberGenerator::check_existing", skip(self, draft))]
  pub async fn check_existing(&self, owner_id: &str, draft: &OrderDraft) -> Option<String> {
    let window = match chrono::Duration::from_std(self.config.duplicate_window) {
      Ok(w) => w,
      Err(e) => {
        warn!(error = %e, "duplicate window out of range, skipping duplicate check");
        return None;
      }
    };
    let since = self.clock.now() - window;
    let wanted = fingerprint(&draft.items, draft.total_amount);

    match self.orders.find_recent_pending(owner_id, draft.total_amount, since).await {
      Ok(candidates) => candidates
        .into_iter()
        .find(|o| fingerprint(&o.items, o.total_amount) == wanted)
        .map(|o| o.order_number),
      Err(e) => {
        warn!(error = %e, "duplicate check failed, proceeding with a new number");
        None
      }
    }
  }

  /// Mints `count` numbers for one owner without duplicate detection.
  #[instrument(name = "OrderNumberGenerator::generate_batch", skip(self))]
  pub async fn generate_batch(
    &self,
    count: usize,
    owner_id: &str,
    channel: &str,
  ) -> Result<Vec<String>, OrderNumberError> {
    if count == 0 || count > self.config.max_batch_size {
      return Err(OrderNumberError::InvalidRequest(format!(
        "batch size must be between 1 and {}",
        self.config.max_batch_size
      )));
    }
    if owner_id.trim().is_empty() {
      return Err(OrderNumberError::InvalidRequest("owner id is required".into()));
    }

    let mut numbers = Vec::with_capacity(count);
    for i in 0..count {
      if i > 0 && !self.config.batch_pause.is_zero() {
        tokio::time::sleep(self.config.batch_pause).await;
      }
      numbers.push(self.mint(owner_id, channel, 0, 0).await?.order_number);
    }
    Ok(numbers)
  }

  pub fn validate(&self, order_number: &str) -> bool {
    is_valid(order_number)
  }

  pub fn parse(&self, order_number: &str) -> Result<ParsedOrderNumber, OrderNumberError> {
    parse(order_number)
  }

  async fn mint(
    &self,
    owner_id: &str,
    channel: &str,
    total_amount: i64,
    item_count: usize,
  ) -> Result<GeneratedOrderNumber, OrderNumberError> {
    let code = channel_code(channel);
    let hash = format::user_hash(owner_id);

    let (order_number, method) = match self.mint_standard(code, &hash).await {
      Ok(n) => (n, GenerationMethod::Standard),
      Err(e) => {
        warn!(error = %e, "standard order number failed, using fallback format");
        (self.mint_fallback(code, &hash)?, GenerationMethod::Fallback)
      }
    };

    let entry = GenerationLogEntry {
      order_number: order_number.clone(),
      owner_id: owner_id.to_string(),
      channel: channel.to_string(),
      total_amount,
      item_count,
      method,
      generated_at: self.clock.now(),
    };
    if let Err(e) = self.audit.record_generation(&entry).await {
      warn!(error = %e, order_number = %order_number, "failed to record order number generation");
    }

    debug!(order_number = %order_number, ?method, "order number minted");
    Ok(GeneratedOrderNumber {
      order_number,
      method: match method {
        GenerationMethod::Standard => MintMethod::Standard,
        GenerationMethod::Fallback => MintMethod::Fallback,
      },
    })
  }

  async fn mint_standard(&self, code: &str, hash: &str) -> Result<String, OrderNumberError> {
    let prefix = format::date_prefix(self.clock.now(), self.config.utc_offset_secs);
    let sequence = self.sequences.next(&prefix).await;
    format::format_standard(&prefix, code, sequence, hash)
  }

  fn mint_fallback(&self, code: &str, hash: &str) -> Result<String, OrderNumberError> {
    let mut random = [0u8; 4];
    rand::rngs::OsRng
      .try_fill_bytes(&mut random)
      .map_err(|e| OrderNumberError::RandomUnavailable(e.to_string()))?;
    Ok(format::format_fallback(
      self.clock.now().timestamp_millis(),
      code,
      hash,
      &random,
    ))
  }
}
