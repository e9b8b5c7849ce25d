// core/src/callback/signature.rs

//! Notification signatures, HMAC-SHA256 flavour: every non-empty field except
//! `sign`, sorted by key, joined as `k=v&k=v`, then `&key=<api key>` appended.
//! The MAC key is the API key and the signature is uppercase hex.

use crate::model::NotificationParams;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const SIGN_FIELD: &str = "sign";
pub const SIGN_TYPE_FIELD: &str = "sign_type";
pub const HMAC_SHA256: &str = "HMAC-SHA256";

pub fn signing_string(params: &NotificationParams, api_key: &str) -> String {
  let mut joined = params
    .iter()
    .filter(|(k, v)| k.as_str() != SIGN_FIELD && !v.is_empty())
    .map(|(k, v)| format!("{}={}", k, v))
    .collect::<Vec<_>>()
    .join("&");
  joined.push_str("&key=");
  joined.push_str(api_key);
  joined
}

fn mac_for(params: &NotificationParams, api_key: &str) -> Result<HmacSha256, hmac::digest::InvalidLength> {
  let mut mac = HmacSha256::new_from_slice(api_key.as_bytes())?;
  mac.update(signing_string(params, api_key).as_bytes());
  Ok(mac)
}

pub fn sign(params: &NotificationParams, api_key: &str) -> Result<String, hmac::digest::InvalidLength> {
  Ok(hex::encode_upper(mac_for(params, api_key)?.finalize().into_bytes()))
}

/// Constant-time check of the `sign` field. Notifications declaring a sign
/// type other than HMAC-SHA256 are rejected.
pub fn verify(params: &NotificationParams, api_key: &str) -> bool {
  if let Some(sign_type) = params.get(SIGN_TYPE_FIELD) {
    if !sign_type.is_empty() && sign_type != HMAC_SHA256 {
      return false;
    }
  }
  let provided = match params.get(SIGN_FIELD).and_then(|s| hex::decode(s).ok()) {
    Some(bytes) => bytes,
    None => return false,
  };
  match mac_for(params, api_key) {
    Ok(mac) => mac.verify_slice(&provided).is_ok(),
    Err(_) => false,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn params() -> NotificationParams {
    [
      ("appid", "wx2421b1c4370ec43b"),
      ("mch_id", "10000100"),
      ("out_trade_no", "O1"),
      ("transaction_id", "T1"),
      ("result_code", "SUCCESS"),
      ("attach", ""),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
  }

  #[test]
  fn signing_string_sorts_and_skips_empty_and_sign() {
    let mut p = params();
    p.insert("sign".into(), "XYZ".into());
    assert_eq!(
      signing_string(&p, "secret"),
      "appid=wx2421b1c4370ec43b&mch_id=10000100&out_trade_no=O1&result_code=SUCCESS&transaction_id=T1&key=secret"
    );
  }

  #[test]
  fn signed_params_verify_and_tampering_fails() {
    let mut p = params();
    let sig = sign(&p, "secret").expect("hmac accepts any key length");
    assert_eq!(sig.len(), 64);
    assert_eq!(sig, sig.to_uppercase());
    p.insert("sign".into(), sig);
    assert!(verify(&p, "secret"));
    assert!(!verify(&p, "other-secret"));

    p.insert("result_code".into(), "FAIL".into());
    assert!(!verify(&p, "secret"));
  }

  #[test]
  fn missing_or_garbled_sign_fails() {
    let mut p = params();
    assert!(!verify(&p, "secret"));
    p.insert("sign".into(), "not-hex".into());
    assert!(!verify(&p, "secret"));
  }

  #[test]
  fn md5_sign_type_is_rejected() {
    let mut p = params();
    p.insert("sign_type".into(), "MD5".into());
    let sig = sign(&p, "secret").expect("hmac accepts any key length");
    p.insert("sign".into(), sig);
    assert!(!verify(&p, "secret"));
  }
}
