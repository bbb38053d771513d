//! Key hierarchy below the master key: salts, purpose-bound sub-keys, and the
//! login auth key.
//!
//! ```text
//! password + vault salt ──Argon2id──► MasterKey
//!                                        └─HKDF-SHA256(info = purpose)──► SubKey
//! password + auth salt  ──Argon2id──► AuthKey ──SHA-256──► auth_key_hash (sent to backend)
//! ```

use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use zeroize::{Zeroize, Zeroizing};

use crate::error::{CryptoError, CryptoResult};
use crate::framing;
use crate::kdf::MasterKey;
use crate::KEY_SIZE;

/// Purpose label for centralized-mode file content.
pub const FILE_ENCRYPTION_PURPOSE: &str = "file_encryption_v1";

/// Length of freshly generated salts.
pub const SALT_SIZE: usize = 16;

/// Shortest salt Argon2 accepts.
pub const MIN_SALT_SIZE: usize = 8;

/// Public, non-secret KDF salt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Salt(Vec<u8>);

impl Salt {
    /// Wrap externally supplied salt bytes.
    ///
    /// An empty salt is `MissingSalt`; one shorter than [`MIN_SALT_SIZE`] is
    /// rejected rather than silently padded.
    pub fn new(bytes: impl Into<Vec<u8>>) -> CryptoResult<Self> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(CryptoError::MissingSalt);
        }
        if bytes.len() < MIN_SALT_SIZE {
            return Err(CryptoError::MalformedInput(format!(
                "salt too short: {} bytes (minimum {MIN_SALT_SIZE})",
                bytes.len()
            )));
        }
        Ok(Self(bytes))
    }

    /// Generate a random 16-byte salt.
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse a base64-framed salt as delivered by the auth backend.
    pub fn from_b64(encoded: &str) -> CryptoResult<Self> {
        if encoded.trim().is_empty() {
            return Err(CryptoError::MissingSalt);
        }
        Self::new(framing::decode_bytes(encoded)?)
    }

    pub fn to_b64(&self) -> String {
        framing::encode_bytes(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// A 256-bit purpose-bound key derived from the master key. Zeroized on drop.
pub struct SubKey {
    bytes: [u8; KEY_SIZE],
}

impl SubKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SubKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Login authentication key. Only its hash ever leaves the client.
pub struct AuthKey {
    bytes: [u8; KEY_SIZE],
}

impl AuthKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for AuthKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for AuthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Derive `length` bytes from the master key via HKDF-SHA256 with an empty
/// salt and `purpose` as the info string.
pub fn derive_sub_key(
    master: &MasterKey,
    purpose: &str,
    length: usize,
) -> CryptoResult<Zeroizing<Vec<u8>>> {
    if purpose.is_empty() {
        return Err(CryptoError::MalformedInput(
            "sub-key purpose label must not be empty".into(),
        ));
    }
    let hkdf = Hkdf::<Sha256>::new(None, master.as_bytes());
    let mut okm = Zeroizing::new(vec![0u8; length]);
    hkdf.expand(purpose.as_bytes(), &mut okm)
        .map_err(|e| CryptoError::InvalidParams(format!("HKDF expand to {length} bytes: {e}")))?;
    Ok(okm)
}

impl MasterKey {
    /// Derive the 256-bit sub-key for `purpose`.
    pub fn sub_key(&self, purpose: &str) -> CryptoResult<SubKey> {
        let okm = derive_sub_key(self, purpose, KEY_SIZE)?;
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&okm);
        Ok(SubKey::from_bytes(bytes))
    }
}

/// One-way SHA-256 of the auth key, lowercase hex. This is what the backend
/// stores and compares.
pub fn hash_auth_key(auth_key: &AuthKey) -> String {
    hex::encode(Sha256::digest(auth_key.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_master_key() -> MasterKey {
        MasterKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_sub_key_known_answer() {
        // HKDF-SHA256(ikm = 0x2a * 32, salt = none, info = "file_encryption_v1")
        let sub = test_master_key().sub_key(FILE_ENCRYPTION_PURPOSE).unwrap();
        assert_eq!(
            hex::encode(sub.as_bytes()),
            "77c4892e0ac3c6f059985f44f0dd37c65237b6c77ef6a3b76710a022fea9e800"
        );
    }

    #[test]
    fn test_sub_key_domain_separation() {
        let master = test_master_key();
        let a = master.sub_key("purposeA").unwrap();
        let b = master.sub_key("purposeB").unwrap();

        assert_ne!(
            a.as_bytes(),
            b.as_bytes(),
            "different purposes must produce different keys"
        );
        assert_ne!(a.as_bytes(), master.as_bytes());
    }

    #[test]
    fn test_sub_key_deterministic() {
        let master = test_master_key();
        let a = master.sub_key("records").unwrap();
        let b = master.sub_key("records").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_derive_sub_key_lengths() {
        let master = test_master_key();
        assert_eq!(derive_sub_key(&master, "x", 16).unwrap().len(), 16);
        assert_eq!(derive_sub_key(&master, "x", 64).unwrap().len(), 64);

        // a 64-byte expansion extends the 32-byte one
        let short = derive_sub_key(&master, "x", 32).unwrap();
        let long = derive_sub_key(&master, "x", 64).unwrap();
        assert_eq!(&long[..32], &short[..]);
    }

    #[test]
    fn test_derive_sub_key_rejects_empty_purpose() {
        let result = derive_sub_key(&test_master_key(), "", 32);
        assert!(matches!(result, Err(CryptoError::MalformedInput(_))));
    }

    #[test]
    fn test_derive_sub_key_rejects_oversized_output() {
        // HKDF-SHA256 caps output at 255 * 32 bytes
        let result = derive_sub_key(&test_master_key(), "x", 255 * 32 + 1);
        assert!(matches!(result, Err(CryptoError::InvalidParams(_))));
    }

    #[test]
    fn test_salt_rules() {
        assert_eq!(Salt::new(Vec::new()), Err(CryptoError::MissingSalt));
        assert!(matches!(
            Salt::new(vec![1u8; 7]),
            Err(CryptoError::MalformedInput(_))
        ));
        assert!(Salt::new(vec![1u8; 8]).is_ok());
    }

    #[test]
    fn test_salt_from_b64() {
        let salt = Salt::from_b64("dGVzdHNhbHQ=").unwrap();
        assert_eq!(salt.as_bytes(), b"testsalt");
        assert_eq!(salt.to_b64(), "dGVzdHNhbHQ=");

        assert_eq!(Salt::from_b64(""), Err(CryptoError::MissingSalt));
        assert_eq!(Salt::from_b64("   "), Err(CryptoError::MissingSalt));
    }

    #[test]
    fn test_salt_generate() {
        let s1 = Salt::generate();
        let s2 = Salt::generate();
        assert_eq!(s1.as_bytes().len(), SALT_SIZE);
        assert_ne!(s1, s2, "random salts must differ");
    }

    #[test]
    fn test_hash_auth_key() {
        let key = AuthKey::from_bytes([7u8; KEY_SIZE]);
        let h1 = hash_auth_key(&key);
        let h2 = hash_auth_key(&key);

        assert_eq!(h1.len(), 64);
        assert_eq!(h1, h2);
        assert_ne!(h1, hex::encode(key.as_bytes()));
    }

    #[test]
    fn test_debug_redacts() {
        let sub = SubKey::from_bytes([9u8; KEY_SIZE]);
        assert!(format!("{sub:?}").contains("REDACTED"));
        let auth = AuthKey::from_bytes([9u8; KEY_SIZE]);
        assert!(format!("{auth:?}").contains("REDACTED"));
    }
}
