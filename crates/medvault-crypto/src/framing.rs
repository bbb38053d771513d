//! Base64 framing for transport
//!
//! Producers upstream (URL parameters, pasted codes, other encoders) disagree
//! on alphabet and padding. Everything that turns text back into bytes goes
//! through [`normalize`] first:
//! ```text
//! strip whitespace → map '-' '_' to '+' '/' → validate alphabet → pad to 4
//! ```
//! Encoding always emits the canonical standard alphabet with padding.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine;

use crate::error::{CryptoError, CryptoResult};

/// Standard alphabet, canonical padding, zero trailing bits. Each byte string
/// has exactly one accepted encoding, so an altered character never decodes
/// to the original bytes.
const CANONICAL: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_allow_trailing_bits(false)
        .with_decode_padding_mode(DecodePaddingMode::RequireCanonical),
);

/// Bring `input` into canonical base64 form.
///
/// Fails with `MalformedInput` when the input is empty, not UTF-8, or holds
/// characters outside `[A-Za-z0-9+/_=-]` once whitespace is removed.
pub fn normalize(input: impl AsRef<[u8]>) -> CryptoResult<String> {
    let raw = input.as_ref();
    if raw.is_empty() {
        return Err(CryptoError::MalformedInput("empty base64 input".into()));
    }
    let text = std::str::from_utf8(raw)
        .map_err(|_| CryptoError::MalformedInput("base64 input is not text".into()))?;

    let mut out = String::with_capacity(text.len() + 3);
    for c in text.chars().filter(|c| !c.is_whitespace()) {
        let mapped = match c {
            '-' => '+',
            '_' => '/',
            other => other,
        };
        if !(mapped.is_ascii_alphanumeric() || matches!(mapped, '+' | '/' | '=')) {
            return Err(CryptoError::MalformedInput(format!(
                "invalid base64 character {mapped:?}"
            )));
        }
        out.push(mapped);
    }

    if out.is_empty() {
        return Err(CryptoError::MalformedInput(
            "base64 input is only whitespace".into(),
        ));
    }

    let pad = (4 - out.len() % 4) % 4;
    out.extend(std::iter::repeat('=').take(pad));
    Ok(out)
}

/// Decode an already-canonical base64 string.
pub fn decode(canonical: &str) -> CryptoResult<Vec<u8>> {
    CANONICAL
        .decode(canonical)
        .map_err(|e| CryptoError::Decode(e.to_string()))
}

/// Report whether `input` normalizes and decodes. Never fails.
pub fn is_valid(input: impl AsRef<[u8]>) -> bool {
    normalize(input).and_then(|s| decode(&s)).is_ok()
}

/// Encode raw bytes as canonical base64 text.
pub fn encode_bytes(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Normalize and decode base64 text into raw bytes.
pub fn decode_bytes(input: impl AsRef<[u8]>) -> CryptoResult<Vec<u8>> {
    decode(&normalize(input)?)
}
