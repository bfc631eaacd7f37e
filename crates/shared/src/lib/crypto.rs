use alloy_primitives::{keccak256, Address};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use serde::Serialize;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Failed to serialize value for hashing: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to parse hex: {0}")]
    FromHex(#[from] hex::FromHexError),

    #[error("Failed to parse address {0}")]
    MalformedAddress(String),

    #[error("Malformed signature: expected 65 bytes, got {0}")]
    MalformedSignature(usize),

    #[error("Invalid recovery id {0}")]
    InvalidRecoveryId(u8),

    #[error("Signature verification failed: {0}")]
    Signature(#[from] k256::ecdsa::Error),

    #[error("Signer mismatch: expected {expected}, recovered {recovered}")]
    SignerMismatch { expected: Address, recovered: Address },
}

/// Renders a JSON value with recursively sorted object keys and no
/// insignificant whitespace. Hashes and signatures are computed over this
/// form, so two serializations of the same value always agree.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_scalar(&Value::String((*key).clone()), out);
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => write_scalar(scalar, out),
    }
}

fn write_scalar(value: &Value, out: &mut String) {
    // Scalars (and plain strings) cannot fail to serialize.
    let rendered = serde_json::to_string(value).expect("scalar JSON serialization is infallible");
    out.push_str(&rendered);
}

/// `0x`-prefixed lowercase keccak-256 of the canonical JSON form.
pub fn calculate_hash<T: Serialize>(value: &T) -> Result<String, CryptoError> {
    let as_value = serde_json::to_value(value)?;
    let digest = keccak256(canonical_json(&as_value).as_bytes());
    Ok(format!("0x{}", hex::encode(digest)))
}

pub fn check_hash_matches<T: Serialize>(hash: &str, value: &T) -> bool {
    match calculate_hash(value) {
        Ok(computed) => computed == hash,
        Err(_) => false,
    }
}

pub fn decode_secret(private_key_raw: &str) -> Result<SigningKey, CryptoError> {
    let key_str = private_key_raw.split("0x").last().unwrap_or("").trim();
    let key_bytes = hex::decode(key_str)?;
    let key = SigningKey::from_slice(&key_bytes)?;
    Ok(key)
}

pub fn address_from_secret(secret: &SigningKey) -> Address {
    address_from_verifying_key(secret.verifying_key())
}

fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    // Uncompressed SEC1 point: 0x04 tag byte, then 64 bytes of public key.
    let digest = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&digest[12..])
}

/// Recoverable ECDSA over the keccak of the canonical JSON form, encoded as
/// 65 bytes `r || s || v` with the Ethereum v = 27/28 convention.
pub fn sign<T: Serialize>(secret: &SigningKey, value: &T) -> Result<String, CryptoError> {
    let as_value = serde_json::to_value(value)?;
    let digest = keccak256(canonical_json(&as_value).as_bytes());
    let (signature, recovery_id) = secret.sign_prehash_recoverable(digest.as_slice())?;

    let mut encoded = [0u8; 65];
    encoded[..64].copy_from_slice(&signature.to_bytes());
    encoded[64] = 27 + recovery_id.to_byte();
    Ok(format!("0x{}", hex::encode(encoded)))
}

/// Recovers the signer and compares it against `address`. Fails loudly on
/// malformed input and on signer mismatch alike.
pub fn validate_signature<T: Serialize>(
    address: &str,
    signature: &str,
    value: &T,
) -> Result<(), CryptoError> {
    let expected =
        Address::from_str(address).map_err(|_| CryptoError::MalformedAddress(address.to_owned()))?;

    let signature_bytes = hex::decode(signature.trim_start_matches("0x"))?;
    if signature_bytes.len() != 65 {
        return Err(CryptoError::MalformedSignature(signature_bytes.len()));
    }
    let parsed = Signature::from_slice(&signature_bytes[..64])?;
    let v = signature_bytes[64];
    let recovery_byte = if v >= 27 { v - 27 } else { v };
    let recovery_id =
        RecoveryId::from_byte(recovery_byte).ok_or(CryptoError::InvalidRecoveryId(v))?;

    let as_value = serde_json::to_value(value)?;
    let digest = keccak256(canonical_json(&as_value).as_bytes());
    let recovered_key = VerifyingKey::recover_from_prehash(digest.as_slice(), &parsed, recovery_id)?;
    let recovered = address_from_verifying_key(&recovered_key);

    if recovered != expected {
        return Err(CryptoError::SignerMismatch { expected, recovered });
    }
    Ok(())
}
