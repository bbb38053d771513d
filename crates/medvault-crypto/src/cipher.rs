//! AES-256-GCM envelope encryption/decryption
//!
//! Envelope format (binary, then base64-framed for transport):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! AAD = "v1:{user_id}:{record_id}:{kind}"   (only when an AuthContext is given)
//! ```
//!
//! Nonces are generated here and never accepted from callers, so two
//! encryptions under one key cannot share a nonce by construction.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use rand::RngCore;

use crate::error::{CryptoError, CryptoResult};
use crate::framing;
use crate::{KEY_SIZE, NONCE_SIZE, TAG_SIZE};

/// Record binding carried as associated data.
///
/// A ciphertext sealed for one `(user, record, kind)` fails to open under any
/// other, which stops an envelope being replayed against a different record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    user_id: String,
    record_id: String,
    kind: String,
}

impl AuthContext {
    /// Build a context. Fields must be non-empty and free of `:` so the
    /// serialized form is unambiguous.
    pub fn new(
        user_id: impl Into<String>,
        record_id: impl Into<String>,
        kind: impl Into<String>,
    ) -> CryptoResult<Self> {
        let ctx = Self {
            user_id: user_id.into(),
            record_id: record_id.into(),
            kind: kind.into(),
        };
        for (name, value) in [
            ("user_id", &ctx.user_id),
            ("record_id", &ctx.record_id),
            ("kind", &ctx.kind),
        ] {
            if value.is_empty() || value.contains(':') {
                return Err(CryptoError::MalformedInput(format!(
                    "auth context {name} must be non-empty and contain no ':'"
                )));
            }
        }
        Ok(ctx)
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn record_id(&self) -> &str {
        &self.record_id
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Canonical associated-data bytes.
    pub fn to_aad(&self) -> Vec<u8> {
        format!("v1:{}:{}:{}", self.user_id, self.record_id, self.kind).into_bytes()
    }

    /// Context for the filename envelope that accompanies this record's
    /// content. The extra `:filename` segment cannot come from [`AuthContext::new`].
    pub(crate) fn for_filename(&self) -> Self {
        Self {
            user_id: self.user_id.clone(),
            record_id: self.record_id.clone(),
            kind: format!("{}:filename", self.kind),
        }
    }
}

/// Encrypt into a raw `[nonce][ciphertext][tag]` buffer.
pub fn encrypt_raw(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    aad: Option<&AuthContext>,
) -> CryptoResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let aad_bytes = aad.map(AuthContext::to_aad).unwrap_or_default();

    let ciphertext = cipher
        .encrypt(
            nonce,
            Payload {
                msg: plaintext,
                aad: &aad_bytes,
            },
        )
        .map_err(|e| CryptoError::MalformedInput(format!("AES-256-GCM encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Decrypt a raw `[nonce][ciphertext][tag]` buffer.
///
/// Truncation, a wrong key, tampering and an AAD mismatch all return
/// `DecryptionFailed`.
pub fn decrypt_raw(
    envelope: &[u8],
    key: &[u8; KEY_SIZE],
    aad: Option<&AuthContext>,
) -> CryptoResult<Vec<u8>> {
    if envelope.len() < NONCE_SIZE + TAG_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = envelope.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.into());

    let aad_bytes = aad.map(AuthContext::to_aad).unwrap_or_default();

    cipher
        .decrypt(
            nonce,
            Payload {
                msg: ciphertext,
                aad: &aad_bytes,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Encrypt and frame: returns `base64(nonce || ciphertext || tag)`.
pub fn encrypt(
    plaintext: &[u8],
    key: &[u8; KEY_SIZE],
    aad: Option<&AuthContext>,
) -> CryptoResult<String> {
    Ok(framing::encode_bytes(&encrypt_raw(plaintext, key, aad)?))
}

/// Unframe and decrypt a base64 envelope.
///
/// Bad framing is reported as `MalformedInput`/`Decode` before any crypto runs.
pub fn decrypt(
    envelope: &str,
    key: &[u8; KEY_SIZE],
    aad: Option<&AuthContext>,
) -> CryptoResult<Vec<u8>> {
    decrypt_raw(&framing::decode_bytes(envelope)?, key, aad)
}

/// Round-trip a probe under a throwaway key.
pub(crate) fn self_test() -> CryptoResult<()> {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    let probe = b"medvault-self-test";
    let sealed = encrypt_raw(probe, &key, None)?;
    let opened = decrypt_raw(&sealed, &key, None)?;
    if opened != probe {
        return Err(CryptoError::DecryptionFailed);
    }
    Ok(())
}
