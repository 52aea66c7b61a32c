use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::app_error::{AppError, AppResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum age (either direction) of a signed timestamp, in seconds.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify a `Stripe-Signature` style header (`t=<unix>,v1=<hex>[,v1=...]`) over the raw body.
///
/// Every failure maps to [`AppError::InvalidSignature`]; callers must not mutate anything
/// before this returns `Ok`.
pub fn verify(payload: &str, signature_header: &str, secret: &str, now: i64) -> AppResult<()> {
    let mut timestamp: Option<&str> = None;
    let mut signatures: Vec<&str> = Vec::new();

    for part in signature_header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = Some(value),
            "v1" => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(AppError::InvalidSignature)?;
    if signatures.is_empty() {
        return Err(AppError::InvalidSignature);
    }
    let ts: i64 = timestamp.parse().map_err(|_| AppError::InvalidSignature)?;

    let expected = compute_signature(secret, timestamp, payload)?;
    if !signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected))
    {
        return Err(AppError::InvalidSignature);
    }

    if (now - ts).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(timestamp = ts, now, "Webhook signature timestamp outside tolerance");
        return Err(AppError::InvalidSignature);
    }

    Ok(())
}

pub fn compute_signature(secret: &str, timestamp: &str, payload: &str) -> AppResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| AppError::Internal("HMAC error".into()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

pub fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}
