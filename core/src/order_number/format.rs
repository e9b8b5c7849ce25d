// core/src/order_number/format.rs

//! Layout of order numbers.
//!
//! Standard: `YYYYMMDD` + channel (2) + sequence (4) + user hash (6) + check (2),
//! 22 characters, e.g. `20240301020042A1B2C3F0`.
//! Fallback: `FB` + epoch millis + channel + user hash + 8 random hex chars,
//! all uppercase hex/digits after the prefix.

use super::OrderNumberError;
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const STANDARD_LEN: usize = 22;
pub const FALLBACK_PREFIX: &str = "FB";
pub const MAX_SEQUENCE: u64 = 9999;
pub const DEFAULT_CHANNEL_CODE: &str = "01";
/// Channel assumed when a caller does not name one.
pub const DEFAULT_CHANNEL: &str = "mini-program";

/// Two-digit code for a channel tag. Unknown tags map to `01`.
pub fn channel_code(channel: &str) -> &'static str {
  match channel {
    DEFAULT_CHANNEL => "02",
    "h5" => "03",
    "app" => "04",
    "admin" => "09",
    _ => DEFAULT_CHANNEL_CODE,
  }
}

/// The business day of `now` as `YYYYMMDD`, shifted by `utc_offset_secs`.
pub fn date_prefix(now: DateTime<Utc>, utc_offset_secs: i32) -> String {
  match FixedOffset::east_opt(utc_offset_secs) {
    Some(offset) => now.with_timezone(&offset).format("%Y%m%d").to_string(),
    None => now.format("%Y%m%d").to_string(),
  }
}

/// First six uppercase hex chars of SHA-256(owner_id).
pub fn user_hash(owner_id: &str) -> String {
  let digest = Sha256::digest(owner_id.as_bytes());
  hex::encode_upper(&digest[..3])
}

/// Two uppercase hex chars derived from SHA-256 of the preceding fields.
pub fn check_digit(body: &str) -> String {
  let digest = Sha256::digest(body.as_bytes());
  hex::encode_upper(&digest[..1])
}

pub fn format_standard(
  date_prefix: &str,
  channel_code: &str,
  sequence: u64,
  user_hash: &str,
) -> Result<String, OrderNumberError> {
  if sequence > MAX_SEQUENCE {
    return Err(OrderNumberError::SequenceOverflow(sequence));
  }
  let body = format!("{}{}{:04}{}", date_prefix, channel_code, sequence, user_hash);
  let check = check_digit(&body);
  Ok(format!("{}{}", body, check))
}

pub fn format_fallback(epoch_millis: i64, channel_code: &str, user_hash: &str, random: &[u8; 4]) -> String {
  format!(
    "{}{}{}{}{}",
    FALLBACK_PREFIX,
    epoch_millis,
    channel_code,
    user_hash,
    hex::encode_upper(random)
  )
}

fn is_upper_hex(s: &str) -> bool {
  !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}

fn is_standard(s: &str) -> bool {
  s.len() == STANDARD_LEN && s.is_ascii() && s[..14].bytes().all(|b| b.is_ascii_digit()) && is_upper_hex(&s[14..])
}

fn is_fallback(s: &str) -> bool {
  s.strip_prefix(FALLBACK_PREFIX).map_or(false, is_upper_hex)
}

/// Structural check only. Use [`verify_check_digit`] to also validate the check field.
pub fn is_valid(s: &str) -> bool {
  is_standard(s) || is_fallback(s)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StandardParts {
  pub date_prefix: String,
  pub date: Option<NaiveDate>,
  pub channel_code: String,
  pub sequence: u32,
  pub user_hash: String,
  pub check_digit: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "format", rename_all = "lowercase")]
pub enum ParsedOrderNumber {
  Standard(StandardParts),
  Fallback { raw: String },
}

pub fn parse(s: &str) -> Result<ParsedOrderNumber, OrderNumberError> {
  if is_standard(s) {
    let date_prefix = &s[0..8];
    let sequence = s[10..14]
      .parse::<u32>()
      .map_err(|_| OrderNumberError::Unrecognized(s.to_string()))?;
    return Ok(ParsedOrderNumber::Standard(StandardParts {
      date_prefix: date_prefix.to_string(),
      date: NaiveDate::parse_from_str(date_prefix, "%Y%m%d").ok(),
      channel_code: s[8..10].to_string(),
      sequence,
      user_hash: s[14..20].to_string(),
      check_digit: s[20..22].to_string(),
    }));
  }
  if is_fallback(s) {
    return Ok(ParsedOrderNumber::Fallback { raw: s.to_string() });
  }
  Err(OrderNumberError::Unrecognized(s.to_string()))
}

/// True for standard numbers whose check field matches their body. Fallback
/// numbers carry no check field and always return false.
pub fn verify_check_digit(s: &str) -> bool {
  is_standard(s) && check_digit(&s[..20]) == s[20..]
}
