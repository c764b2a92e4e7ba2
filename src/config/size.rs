//! Human-readable sizes: a decimal integer with an optional K, M or G
//! suffix (base 1000, case-insensitive).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Error type for size parsing.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SizeError {
    #[error("size is empty")]
    Empty,
    #[error("invalid size {0:?} (expected e.g. 500, 64K, 1M, 2G)")]
    Invalid(String),
    #[error("size {0:?} is too large")]
    Overflow(String),
}

/// Parse `"1M"` → `1_000_000`.
pub fn parse_size(input: &str) -> Result<u64, SizeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SizeError::Empty);
    }

    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, suffix) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(SizeError::Invalid(input.to_string()));
    }

    let multiplier: u64 = match suffix.trim().to_ascii_uppercase().as_str() {
        "" => 1,
        "K" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        _ => return Err(SizeError::Invalid(input.to_string())),
    };

    digits
        .parse::<u64>()
        .ok()
        .and_then(|value| value.checked_mul(multiplier))
        .ok_or_else(|| SizeError::Overflow(input.to_string()))
}

/// A size as written in the config file: a bare integer or a suffixed string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeValue {
    Count(u64),
    Text(String),
}

impl SizeValue {
    pub fn resolve(&self) -> Result<u64, SizeError> {
        match self {
            SizeValue::Count(n) => Ok(*n),
            SizeValue::Text(s) => parse_size(s),
        }
    }
}

impl From<&str> for SizeValue {
    fn from(s: &str) -> Self {
        SizeValue::Text(s.to_string())
    }
}

impl fmt::Display for SizeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeValue::Count(n) => write!(f, "{}", n),
            SizeValue::Text(s) => f.write_str(s),
        }
    }
}
