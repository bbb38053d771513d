//! File encryption pipeline: whole files in, upload forms out (and back).
//!
//! Two modes, chosen per file:
//!   - Centralized: content sealed under the session master key's
//!     `file_encryption_v1` sub-key; the filename travels in clear.
//!   - Zero-knowledge: a one-off Argon2id key from a file password and a
//!     fresh salt seals both content and filename. Neither the backend nor the
//!     session key can open it.
//!
//! Steps inside one call run strictly in order:
//! derive → encrypt/decrypt → frame. No key is used before its derivation
//! completes, and no key outlives the call.

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use zeroize::Zeroizing;

use medvault_core::config::CryptoConfig;

use crate::cipher::{self, AuthContext};
use crate::envelope::EncryptedStructure;
use crate::error::{CryptoError, CryptoResult};
use crate::framing;
use crate::kdf::{self, Credential, KdfParams};
use crate::keys::{Salt, FILE_ENCRYPTION_PURPOSE};
use crate::session::KeyManager;
use crate::KEY_SIZE;

/// How a file is protected.
pub enum EncryptionMode {
    /// Session master key; plaintext filename.
    Centralized,
    /// Per-file password. Consumed by the call and zeroized on every path.
    ZeroKnowledge { password: SecretString },
}

impl std::fmt::Debug for EncryptionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Centralized => f.write_str("Centralized"),
            Self::ZeroKnowledge { .. } => f.write_str("ZeroKnowledge"),
        }
    }
}

/// A plaintext file as supplied by the upload UI or returned on download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlainFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Upload transport form. The backend stores these fields byte-for-byte and
/// returns them unchanged on download.
///
/// `file` carries the JSON [`EncryptedStructure`]; it is sent as the multipart
/// file part, so it is skipped when the text fields are serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadForm {
    #[serde(skip)]
    pub file: Vec<u8>,
    #[serde(with = "flag")]
    pub is_encrypted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    pub mime_type: String,
    pub original_size: u64,
}

impl UploadForm {
    /// Multipart text fields, in wire names. Absent optional fields are omitted.
    pub fn text_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("isEncrypted", flag::render(self.is_encrypted).to_string())];
        if let Some(salt) = &self.salt {
            fields.push(("salt", salt.clone()));
        }
        if let Some(name) = &self.encrypted_filename {
            fields.push(("encryptedFilename", name.clone()));
        }
        if let Some(name) = &self.original_filename {
            fields.push(("originalFilename", name.clone()));
        }
        fields.push(("mimeType", self.mime_type.clone()));
        fields.push(("originalSize", self.original_size.to_string()));
        fields
    }
}

/// `isEncrypted` is "1"/"0" on the wire.
mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn render(value: bool) -> &'static str {
        if value {
            "1"
        } else {
            "0"
        }
    }

    pub(super) fn serialize<S: Serializer>(value: &bool, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(render(*value))
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
        match String::deserialize(d)?.as_str() {
            "1" | "true" => Ok(true),
            "0" | "false" | "" => Ok(false),
            other => Err(serde::de::Error::custom(format!(
                "isEncrypted must be \"1\" or \"0\", got {other:?}"
            ))),
        }
    }
}

/// Fresh random salt for a zero-knowledge file.
pub fn generate_file_salt() -> Salt {
    Salt::generate()
}

/// Ready handle to the vault's file operations.
///
/// Built by [`FileCrypto::init`], which validates cost parameters and
/// self-tests the cipher before returning.
#[derive(Debug, Clone)]
pub struct FileCrypto {
    params: KdfParams,
    require_aad: bool,
    keys: KeyManager,
}

impl FileCrypto {
    pub async fn init(config: &CryptoConfig, keys: KeyManager) -> CryptoResult<Self> {
        let params = KdfParams::from(config);
        params.validate()?;

        tokio::task::spawn_blocking(cipher::self_test)
            .await
            .map_err(|e| CryptoError::Task(format!("cipher self-test: {e}")))??;

        info!(
            mem_cost_kib = params.mem_cost_kib,
            time_cost = params.time_cost,
            parallelism = params.parallelism,
            require_aad = config.require_aad,
            "crypto backend ready"
        );

        Ok(Self {
            params,
            require_aad: config.require_aad,
            keys,
        })
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// Derive login keys, install the master key in the session, and return
    /// the auth key hash for the backend.
    pub async fn login(&self, credential: Credential, vault_salt: Salt) -> CryptoResult<String> {
        let keys = kdf::derive_login_keys_async(credential, vault_salt, self.params.clone()).await?;
        self.keys.set_key(keys.master_key);
        info!("session unlocked");
        Ok(keys.auth_key_hash)
    }

    pub fn logout(&self) {
        self.keys.clear();
    }

    /// Encrypt a file for upload.
    pub async fn encrypt_file(
        &self,
        file: &PlainFile,
        mode: EncryptionMode,
        ctx: Option<&AuthContext>,
    ) -> CryptoResult<UploadForm> {
        self.check_context(ctx)?;
        match mode {
            EncryptionMode::Centralized => self.encrypt_centralized(file, ctx),
            EncryptionMode::ZeroKnowledge { password } => {
                self.encrypt_zero_knowledge(file, password, ctx).await
            }
        }
    }

    /// Decrypt a downloaded form.
    ///
    /// The envelope header is validated first, so an unsupported version is
    /// reported even when a zero-knowledge password is missing.
    pub async fn decrypt_file(
        &self,
        form: &UploadForm,
        password: Option<SecretString>,
        ctx: Option<&AuthContext>,
    ) -> CryptoResult<PlainFile> {
        self.check_context(ctx)?;
        let structure = EncryptedStructure::from_json(&form.file)?;

        let file = if form.is_encrypted {
            self.decrypt_zero_knowledge(form, &structure, password, ctx).await?
        } else {
            self.decrypt_centralized(form, &structure, ctx)?
        };

        if file.bytes.len() as u64 != form.original_size {
            warn!(
                expected = form.original_size,
                actual = file.bytes.len(),
                "decrypted size differs from recorded originalSize"
            );
        }
        Ok(file)
    }

    fn encrypt_centralized(
        &self,
        file: &PlainFile,
        ctx: Option<&AuthContext>,
    ) -> CryptoResult<UploadForm> {
        let sub_key = {
            let master = self.keys.get_key().ok_or(CryptoError::MissingKey)?;
            master.sub_key(FILE_ENCRYPTION_PURPOSE)?
        };

        let payload = Zeroizing::new(framing::encode_bytes(&file.bytes));
        let structure =
            EncryptedStructure::seal(payload.as_bytes(), sub_key.as_bytes(), ctx, &self.params)?;

        info!(mode = "centralized", bytes = file.bytes.len(), "file encrypted");

        Ok(UploadForm {
            file: structure.to_json()?.into_bytes(),
            is_encrypted: false,
            salt: None,
            encrypted_filename: None,
            original_filename: Some(file.name.clone()),
            mime_type: file.mime_type.clone(),
            original_size: file.bytes.len() as u64,
        })
    }

    async fn encrypt_zero_knowledge(
        &self,
        file: &PlainFile,
        password: SecretString,
        ctx: Option<&AuthContext>,
    ) -> CryptoResult<UploadForm> {
        if password.expose_secret().is_empty() {
            return Err(CryptoError::PasswordRequired);
        }

        let salt = generate_file_salt();
        let file_key =
            kdf::derive_master_key_async(password, salt.clone(), self.params.clone()).await?;

        let structure =
            EncryptedStructure::seal(&file.bytes, file_key.as_bytes(), ctx, &self.params)?;
        let name_ctx = ctx.map(AuthContext::for_filename);
        let encrypted_filename =
            cipher::encrypt(file.name.as_bytes(), file_key.as_bytes(), name_ctx.as_ref())?;

        info!(mode = "zero-knowledge", bytes = file.bytes.len(), "file encrypted");

        Ok(UploadForm {
            file: structure.to_json()?.into_bytes(),
            is_encrypted: true,
            salt: Some(salt.to_b64()),
            encrypted_filename: Some(encrypted_filename),
            original_filename: None,
            mime_type: file.mime_type.clone(),
            original_size: file.bytes.len() as u64,
        })
    }

    fn decrypt_centralized(
        &self,
        form: &UploadForm,
        structure: &EncryptedStructure,
        ctx: Option<&AuthContext>,
    ) -> CryptoResult<PlainFile> {
        let name = form.original_filename.clone().ok_or_else(|| {
            CryptoError::MalformedInput("centralized upload has no originalFilename".into())
        })?;
        let sub_key = {
            let master = self.keys.get_key().ok_or(CryptoError::MissingKey)?;
            master.sub_key(FILE_ENCRYPTION_PURPOSE)?
        };

        let payload = Zeroizing::new(open_with_legacy_fallback(
            &structure.data_b64,
            sub_key.as_bytes(),
            ctx,
        )?);
        let bytes = if payload.is_empty() {
            Vec::new()
        } else {
            framing::decode_bytes(payload.as_slice())?
        };

        info!(mode = "centralized", bytes = bytes.len(), "file decrypted");

        Ok(PlainFile {
            name,
            mime_type: form.mime_type.clone(),
            bytes,
        })
    }

    async fn decrypt_zero_knowledge(
        &self,
        form: &UploadForm,
        structure: &EncryptedStructure,
        password: Option<SecretString>,
        ctx: Option<&AuthContext>,
    ) -> CryptoResult<PlainFile> {
        let password = match password {
            Some(p) if !p.expose_secret().is_empty() => p,
            _ => return Err(CryptoError::PasswordRequired),
        };
        let salt = Salt::from_b64(form.salt.as_deref().unwrap_or_default())?;
        let encrypted_name = form.encrypted_filename.as_deref().ok_or_else(|| {
            CryptoError::MalformedInput("zero-knowledge upload has no encryptedFilename".into())
        })?;

        // Re-derive with the parameters recorded at upload, not today's config.
        // They are unauthenticated input: bound them before Argon2id allocates.
        // A change inside the bounds yields a different key and fails the tag.
        let params = structure.kdf_params();
        params.check_recorded(&self.params)?;
        let file_key = kdf::derive_master_key_async(password, salt, params).await?;

        let bytes = open_with_legacy_fallback(&structure.data_b64, file_key.as_bytes(), ctx)?;
        let name_ctx = ctx.map(AuthContext::for_filename);
        let name_bytes = Zeroizing::new(cipher::decrypt(
            encrypted_name,
            file_key.as_bytes(),
            name_ctx.as_ref(),
        )?);
        let name = std::str::from_utf8(&name_bytes)
            .map_err(|_| CryptoError::MalformedInput("decrypted filename is not UTF-8".into()))?
            .to_owned();

        info!(mode = "zero-knowledge", bytes = bytes.len(), "file decrypted");

        Ok(PlainFile {
            name,
            mime_type: form.mime_type.clone(),
            bytes,
        })
    }

    fn check_context(&self, ctx: Option<&AuthContext>) -> CryptoResult<()> {
        if self.require_aad && ctx.is_none() {
            return Err(CryptoError::MissingAuthContext);
        }
        Ok(())
    }
}

/// Decrypt `data_b64`, tolerating one extra layer of base64 from legacy
/// producers.
///
/// The retry happens at most once and only when the decoded bytes are
/// themselves base64 text; its outcome is final.
fn open_with_legacy_fallback(
    data_b64: &str,
    key: &[u8; KEY_SIZE],
    aad: Option<&AuthContext>,
) -> CryptoResult<Vec<u8>> {
    let outer = framing::decode_bytes(data_b64)?;
    match cipher::decrypt_raw(&outer, key, aad) {
        Err(CryptoError::DecryptionFailed) => {
            let inner = match std::str::from_utf8(&outer) {
                Ok(text) if framing::is_valid(text) => text,
                _ => return Err(CryptoError::DecryptionFailed),
            };
            warn!("envelope is double base64 encoded; retrying once");
            let inner = framing::decode_bytes(inner).map_err(|_| CryptoError::DecryptionFailed)?;
            cipher::decrypt_raw(&inner, key, aad)
        }
        other => other,
    }
}
