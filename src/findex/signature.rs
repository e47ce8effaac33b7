//! Callback request authentication / 回调请求签名校验
//!
//! Body layout: `signature (32) || expiration timestamp (8, big endian seconds) || data`.
//! The signing key is derived per index and per callback from a 16-byte seed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_SEED_LENGTH: usize = 16;
pub const CALLBACK_SIGNATURE_LENGTH: usize = 32;
pub const TIMESTAMP_LENGTH: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    #[error("Body of request is too small ({0} bytes), not enough bytes to read signature.")]
    MissingSignature(usize),
    #[error("Body of request is too small ({0} bytes), not enough bytes to read expiration timestamp.")]
    MissingTimestamp(usize),
    #[error("signature seed must be {SIGNATURE_SEED_LENGTH} bytes, got {0}")]
    InvalidSeed(usize),
    #[error("invalid callback signature")]
    InvalidSignature,
    #[error("Request expired (current time is {current}, expiration time is {expiration})")]
    Expired { current: u64, expiration: u64 },
}

/// Seconds since Unix epoch / 当前 Unix 时间戳（秒）
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn derive_key(seed: &[u8], public_id: &str) -> Result<[u8; 32], SignatureError> {
    if seed.len() != SIGNATURE_SEED_LENGTH {
        return Err(SignatureError::InvalidSeed(seed.len()));
    }
    let mut mac = HmacSha256::new_from_slice(seed)
        .map_err(|_| SignatureError::InvalidSeed(seed.len()))?;
    mac.update(public_id.as_bytes());

    let mut key = [0u8; 32];
    key.copy_from_slice(&mac.finalize().into_bytes());
    Ok(key)
}

fn body_mac(key: &[u8; 32], timestamp: &[u8], data: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|_| SignatureError::InvalidSeed(key.len()))?;
    mac.update(timestamp);
    mac.update(data);
    Ok(mac)
}

/// Build a signed callback body / 生成带签名的回调请求体
pub fn sign_body(
    seed: &[u8],
    public_id: &str,
    expiration: u64,
    data: &[u8],
) -> Result<Vec<u8>, SignatureError> {
    let key = derive_key(seed, public_id)?;
    let timestamp = expiration.to_be_bytes();
    let signature = body_mac(&key, &timestamp, data)?.finalize().into_bytes();

    let mut body = Vec::with_capacity(CALLBACK_SIGNATURE_LENGTH + TIMESTAMP_LENGTH + data.len());
    body.extend_from_slice(&signature);
    body.extend_from_slice(&timestamp);
    body.extend_from_slice(data);
    Ok(body)
}

/// Verify a callback body and return its data / 校验回调请求体并返回数据部分
///
/// Signature first, expiration second.
pub fn check_body_signature(
    body: &[u8],
    public_id: &str,
    seed: &[u8],
    now: u64,
) -> Result<Vec<u8>, SignatureError> {
    if body.len() < CALLBACK_SIGNATURE_LENGTH {
        return Err(SignatureError::MissingSignature(body.len()));
    }
    if body.len() < CALLBACK_SIGNATURE_LENGTH + TIMESTAMP_LENGTH {
        return Err(SignatureError::MissingTimestamp(body.len()));
    }

    let (signature, rest) = body.split_at(CALLBACK_SIGNATURE_LENGTH);
    let (timestamp, data) = rest.split_at(TIMESTAMP_LENGTH);

    let key = derive_key(seed, public_id)?;
    body_mac(&key, timestamp, data)?
        .verify_slice(signature)
        .map_err(|_| SignatureError::InvalidSignature)?;

    let mut timestamp_bytes = [0u8; TIMESTAMP_LENGTH];
    timestamp_bytes.copy_from_slice(timestamp);
    let expiration = u64::from_be_bytes(timestamp_bytes);

    if now > expiration {
        return Err(SignatureError::Expired { current: now, expiration });
    }

    Ok(data.to_vec())
}
