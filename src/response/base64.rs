//! Base64 encoding and decoding utilities

use base64::{engine::general_purpose::STANDARD, Engine};
use crate::error::{AppError, Result};

/// Strip a `data:image/...;base64,` prefix if present
fn payload(data: &str) -> &str {
    match data.split_once(',') {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => data,
    }
}

/// Encode binary data to base64 string
pub fn encode(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decode base64 string to binary data
pub fn decode(encoded: &str) -> Result<Vec<u8>> {
    STANDARD
        .decode(payload(encoded).trim())
        .map_err(|e| AppError::InvalidRequest(format!("Invalid base64 data: {}", e)))
}

/// Check if a string is valid base64
pub fn is_valid(data: &str) -> bool {
    STANDARD.decode(payload(data).trim()).is_ok()
}
