use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use super::LineItem;

/// Hex SHA-256 over a period's line items, independent of row order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn from_hex(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex chars, for log lines.
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Each item is encoded canonically (length-prefixed fields, amount with
/// trailing zeros stripped, meta in key order), the encodings are sorted, and
/// the sorted sequence is hashed. Equal multisets of items hash equal.
pub fn fingerprint(items: &[LineItem]) -> Fingerprint {
    let mut encoded: Vec<Vec<u8>> = items.iter().map(encode_item).collect();
    encoded.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update((encoded.len() as u64).to_le_bytes());
    for item in &encoded {
        hasher.update((item.len() as u64).to_le_bytes());
        hasher.update(item);
    }
    let hex: String = hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect();
    Fingerprint(hex)
}

fn encode_item(item: &LineItem) -> Vec<u8> {
    let mut buf = Vec::new();
    push_field(&mut buf, item.energy_type.as_bytes());
    push_field(&mut buf, item.charge_amount.normalize().to_string().as_bytes());
    push_field(&mut buf, &(item.meta.len() as u32).to_le_bytes());
    for (k, v) in &item.meta {
        push_field(&mut buf, k.as_bytes());
        push_field(&mut buf, v.as_bytes());
    }
    buf
}

fn push_field(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}
