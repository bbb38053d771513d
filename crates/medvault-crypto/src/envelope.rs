//! Self-describing envelope wrapper
//!
//! ```json
//! { "version": 1,
//!   "kdf": {"alg": "argon2id", "params": {"m": 65536, "t": 3, "p": 4}},
//!   "encryption": {"alg": "aes-256-gcm"},
//!   "data_b64": "<base64(nonce || ciphertext || tag)>" }
//! ```
//!
//! Decoding fails closed: an unknown version or algorithm is rejected before
//! `data_b64` is looked at.

use serde::{Deserialize, Serialize};

use crate::cipher::{self, AuthContext};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::KdfParams;
use crate::KEY_SIZE;

pub const ENVELOPE_VERSION: u32 = 1;
pub const KDF_ALG: &str = "argon2id";
pub const ENCRYPTION_ALG: &str = "aes-256-gcm";

/// Argon2id cost parameters as recorded on the wire
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfCost {
    pub m: u32,
    pub t: u32,
    pub p: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfDescriptor {
    pub alg: String,
    pub params: KdfCost,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionDescriptor {
    pub alg: String,
}

/// An AES-256-GCM envelope plus the parameters needed to reopen it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedStructure {
    /// Wrapper format version
    pub version: u32,
    /// How the key was derived
    pub kdf: KdfDescriptor,
    /// How the payload was sealed
    pub encryption: EncryptionDescriptor,
    /// Base64-framed `nonce || ciphertext || tag`
    pub data_b64: String,
}

/// Just enough of the document to check the version before trusting its shape.
#[derive(Deserialize)]
struct VersionProbe {
    version: u32,
}

impl EncryptedStructure {
    /// Encrypt `plaintext` and describe it.
    pub fn seal(
        plaintext: &[u8],
        key: &[u8; KEY_SIZE],
        aad: Option<&AuthContext>,
        params: &KdfParams,
    ) -> CryptoResult<Self> {
        Ok(Self::wrap(cipher::encrypt(plaintext, key, aad)?, params))
    }

    /// Describe an already-framed envelope.
    pub fn wrap(data_b64: String, params: &KdfParams) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            kdf: KdfDescriptor {
                alg: KDF_ALG.into(),
                params: KdfCost {
                    m: params.mem_cost_kib,
                    t: params.time_cost,
                    p: params.parallelism,
                },
            },
            encryption: EncryptionDescriptor {
                alg: ENCRYPTION_ALG.into(),
            },
            data_b64,
        }
    }

    /// Check version and algorithms against what this build supports.
    pub fn validate(&self) -> CryptoResult<()> {
        if self.version != ENVELOPE_VERSION {
            return Err(CryptoError::UnsupportedVersion(format!(
                "envelope version {}",
                self.version
            )));
        }
        if self.encryption.alg != ENCRYPTION_ALG {
            return Err(CryptoError::UnsupportedVersion(format!(
                "encryption algorithm {:?}",
                self.encryption.alg
            )));
        }
        if self.kdf.alg != KDF_ALG {
            return Err(CryptoError::UnsupportedVersion(format!(
                "kdf algorithm {:?}",
                self.kdf.alg
            )));
        }
        Ok(())
    }

    /// Validate, then decrypt the payload.
    pub fn open(&self, key: &[u8; KEY_SIZE], aad: Option<&AuthContext>) -> CryptoResult<Vec<u8>> {
        self.validate()?;
        cipher::decrypt(&self.data_b64, key, aad)
    }

    /// The KDF parameters recorded at seal time.
    pub fn kdf_params(&self) -> KdfParams {
        KdfParams {
            mem_cost_kib: self.kdf.params.m,
            time_cost: self.kdf.params.t,
            parallelism: self.kdf.params.p,
        }
    }

    pub fn to_json(&self) -> CryptoResult<String> {
        serde_json::to_string(self).map_err(|e| CryptoError::Serialization(e.to_string()))
    }

    /// Parse and validate a wrapper document.
    ///
    /// The version is checked first, so a future format with a different
    /// shape still reports `UnsupportedVersion` rather than a parse error.
    pub fn from_json(data: &[u8]) -> CryptoResult<Self> {
        let probe: VersionProbe = serde_json::from_slice(data)
            .map_err(|e| CryptoError::MalformedInput(format!("envelope header: {e}")))?;
        if probe.version != ENVELOPE_VERSION {
            tracing::warn!(version = probe.version, "rejecting unsupported envelope version");
            return Err(CryptoError::UnsupportedVersion(format!(
                "envelope version {}",
                probe.version
            )));
        }

        let structure: Self = serde_json::from_slice(data)
            .map_err(|e| CryptoError::MalformedInput(format!("envelope body: {e}")))?;
        if let Err(e) = structure.validate() {
            tracing::warn!(error = %e, "rejecting envelope");
            return Err(e);
        }
        Ok(structure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_SIZE] = [7u8; KEY_SIZE];

    fn sealed() -> EncryptedStructure {
        EncryptedStructure::seal(b"discharge summary", &KEY, None, &KdfParams::default()).unwrap()
    }

    #[test]
    fn test_structure_roundtrip() {
        let structure = sealed();
        let json = structure.to_json().unwrap();
        let restored = EncryptedStructure::from_json(json.as_bytes()).unwrap();

        assert_eq!(restored, structure);
        assert_eq!(restored.open(&KEY, None).unwrap(), b"discharge summary");
    }

    #[test]
    fn test_wire_field_names() {
        let value: serde_json::Value = serde_json::from_str(&sealed().to_json().unwrap()).unwrap();

        assert_eq!(value["version"], 1);
        assert_eq!(value["kdf"]["alg"], "argon2id");
        assert_eq!(value["kdf"]["params"]["m"], 65536);
        assert_eq!(value["kdf"]["params"]["t"], 3);
        assert_eq!(value["kdf"]["params"]["p"], 4);
        assert_eq!(value["encryption"]["alg"], "aes-256-gcm");
        assert!(value["data_b64"].is_string());
    }

    #[test]
    fn test_kdf_params_recorded() {
        let params = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 2,
            parallelism: 1,
        };
        let structure = EncryptedStructure::seal(b"x", &KEY, None, &params).unwrap();
        assert_eq!(structure.kdf_params(), params);
    }

    #[test]
    fn test_rejects_future_version_with_unknown_shape() {
        let doc = br#"{"version": 2, "payload": {"chunks": []}}"#;
        assert!(matches!(
            EncryptedStructure::from_json(doc),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_cipher() {
        let mut structure = sealed();
        structure.encryption.alg = "chacha20-poly1305".into();
        let json = structure.to_json().unwrap();

        assert!(matches!(
            EncryptedStructure::from_json(json.as_bytes()),
            Err(CryptoError::UnsupportedVersion(_))
        ));
        assert!(matches!(
            structure.open(&KEY, None),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_rejects_unknown_kdf() {
        let mut structure = sealed();
        structure.kdf.alg = "scrypt".into();
        assert!(matches!(
            structure.validate(),
            Err(CryptoError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn test_rejects_non_json() {
        assert!(matches!(
            EncryptedStructure::from_json(b"\x00\x01binary"),
            Err(CryptoError::MalformedInput(_))
        ));
    }

    #[test]
    fn test_open_wrong_key() {
        assert_eq!(
            sealed().open(&[8u8; KEY_SIZE], None),
            Err(CryptoError::DecryptionFailed)
        );
    }
}
