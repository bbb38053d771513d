//! Key derivation: Argon2id password → master key, plus the login auth key

use argon2::{Algorithm, Argon2, Params, Version};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use medvault_core::config::CryptoConfig;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{hash_auth_key, AuthKey, Salt, SALT_SIZE};
use crate::KEY_SIZE;

/// Domain prefix for the auth-key salt. Keeps the auth key on a different
/// Argon2id input than the master key even though both start from one password.
const AUTH_SALT_DOMAIN: &[u8] = b"medvault-auth-salt-v1";

/// A 256-bit master key derived from a password via Argon2id.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct MasterKey {
    bytes: [u8; KEY_SIZE],
}

impl MasterKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Argon2id parameters for KDF
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl From<&CryptoConfig> for KdfParams {
    fn from(config: &CryptoConfig) -> Self {
        Self {
            mem_cost_kib: config.argon2_mem_cost_kib,
            time_cost: config.argon2_time_cost,
            parallelism: config.argon2_parallelism,
        }
    }
}

/// Most lanes accepted from a stored envelope.
pub const MAX_RECORDED_PARALLELISM: u32 = 16;

/// Stored memory and time costs may exceed the local ones by at most this factor.
pub const RECORDED_COST_FACTOR: u32 = 4;

impl KdfParams {
    /// Reject parameters Argon2id would refuse, before any password is touched.
    pub fn validate(&self) -> CryptoResult<()> {
        self.argon2_params().map(|_| ())
    }

    /// Check parameters read from a stored envelope before running Argon2id
    /// with them.
    ///
    /// Memory and time may reach [`RECORDED_COST_FACTOR`] times `local`, or
    /// the defaults if those are higher; lanes are capped at
    /// [`MAX_RECORDED_PARALLELISM`]. Anything else is `InvalidParams`.
    pub fn check_recorded(&self, local: &KdfParams) -> CryptoResult<()> {
        let defaults = KdfParams::default();
        let max_mem = local
            .mem_cost_kib
            .saturating_mul(RECORDED_COST_FACTOR)
            .max(defaults.mem_cost_kib);
        let max_time = local
            .time_cost
            .saturating_mul(RECORDED_COST_FACTOR)
            .max(defaults.time_cost);

        if self.mem_cost_kib > max_mem
            || self.time_cost > max_time
            || self.parallelism > MAX_RECORDED_PARALLELISM
        {
            tracing::warn!(
                mem_cost_kib = self.mem_cost_kib,
                time_cost = self.time_cost,
                parallelism = self.parallelism,
                "rejecting out-of-range recorded KDF parameters"
            );
            return Err(CryptoError::InvalidParams(format!(
                "recorded m={} t={} p={} exceeds limits m<={max_mem} t<={max_time} p<={MAX_RECORDED_PARALLELISM}",
                self.mem_cost_kib, self.time_cost, self.parallelism
            )));
        }
        self.validate()
    }

    fn argon2_params(&self) -> CryptoResult<Params> {
        Params::new(
            self.mem_cost_kib,
            self.time_cost,
            self.parallelism,
            Some(KEY_SIZE),
        )
        .map_err(|e| CryptoError::InvalidParams(e.to_string()))
    }
}

/// Login credential. Exists only while keys are being derived.
#[derive(Debug)]
pub struct Credential {
    pub password: SecretString,
    pub identity: String,
}

/// Everything a login or signup produces: the session master key (kept
/// client-side) and the auth key hash (sent to the backend).
#[derive(Debug)]
pub struct LoginKeys {
    pub master_key: MasterKey,
    pub auth_key_hash: String,
}

/// Derive a 256-bit master key from a password and salt using Argon2id.
///
/// Deterministic for identical `(password, salt, params)`. The salt is public
/// and stored server-side or next to the ciphertext.
pub fn derive_master_key(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<MasterKey> {
    let mut key = [0u8; KEY_SIZE];
    argon2id_into(password, salt, params, &mut key)?;
    Ok(MasterKey::from_bytes(key))
}

/// Derive the login auth key.
///
/// Runs Argon2id over the same password but with a salt bound to the
/// identity and a separate domain, so neither key reveals the other.
pub fn derive_auth_key(
    credential: &Credential,
    vault_salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<AuthKey> {
    let salt = auth_salt(&credential.identity, vault_salt)?;
    let mut key = [0u8; KEY_SIZE];
    argon2id_into(&credential.password, &salt, params, &mut key)?;
    Ok(AuthKey::from_bytes(key))
}

/// Derive both login outputs from one credential.
pub fn derive_login_keys(
    credential: &Credential,
    vault_salt: &Salt,
    params: &KdfParams,
) -> CryptoResult<LoginKeys> {
    let master_key = derive_master_key(&credential.password, vault_salt, params)?;
    let auth_key = derive_auth_key(credential, vault_salt, params)?;
    Ok(LoginKeys {
        master_key,
        auth_key_hash: hash_auth_key(&auth_key),
    })
}

/// [`derive_master_key`] on the blocking pool. Dropping the future abandons
/// the derivation result; the password is zeroized when the task finishes.
pub async fn derive_master_key_async(
    password: SecretString,
    salt: Salt,
    params: KdfParams,
) -> CryptoResult<MasterKey> {
    tokio::task::spawn_blocking(move || derive_master_key(&password, &salt, &params))
        .await
        .map_err(|e| CryptoError::Task(format!("master key derivation: {e}")))?
}

/// [`derive_login_keys`] on the blocking pool.
pub async fn derive_login_keys_async(
    credential: Credential,
    vault_salt: Salt,
    params: KdfParams,
) -> CryptoResult<LoginKeys> {
    tokio::task::spawn_blocking(move || derive_login_keys(&credential, &vault_salt, &params))
        .await
        .map_err(|e| CryptoError::Task(format!("login key derivation: {e}")))?
}

fn argon2id_into(
    password: &SecretString,
    salt: &Salt,
    params: &KdfParams,
    out: &mut [u8; KEY_SIZE],
) -> CryptoResult<()> {
    let password = password.expose_secret();
    if password.is_empty() {
        return Err(CryptoError::MalformedInput("password must not be empty".into()));
    }

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params.argon2_params()?);

    tracing::debug!(
        mem_cost_kib = params.mem_cost_kib,
        time_cost = params.time_cost,
        parallelism = params.parallelism,
        salt_len = salt.as_bytes().len(),
        "running Argon2id"
    );

    argon2
        .hash_password_into(password.as_bytes(), salt.as_bytes(), out)
        .map_err(|e| CryptoError::InvalidParams(format!("Argon2id KDF failed: {e}")))
}

/// SHA-256(domain || len(identity) || identity || vault_salt), truncated to 16 bytes.
fn auth_salt(identity: &str, vault_salt: &Salt) -> CryptoResult<Salt> {
    let identity = identity.trim().to_lowercase();
    let mut hasher = Sha256::new();
    hasher.update(AUTH_SALT_DOMAIN);
    hasher.update((identity.len() as u64).to_be_bytes());
    hasher.update(identity.as_bytes());
    hasher.update(vault_salt.as_bytes());
    Salt::new(hasher.finalize()[..SALT_SIZE].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    fn salt(byte: u8) -> Salt {
        Salt::new(vec![byte; 16]).unwrap()
    }

    #[test]
    fn test_kdf_known_answer() {
        // Argon2id v0x13, m=1024 t=1 p=1, salt "testsalt"
        let key = derive_master_key(
            &SecretString::from("Correct-Horse-1!"),
            &Salt::from_b64("dGVzdHNhbHQ=").unwrap(),
            &fast_params(),
        )
        .unwrap();

        assert_eq!(
            hex::encode(key.as_bytes()),
            "c285e548c3cead0adccc70707e4454a595ecb4b257bf683e4dbbb593256afae7"
        );
    }

    #[test]
    fn test_kdf_deterministic() {
        let password = SecretString::from("test-passphrase-123");
        let params = fast_params();

        let key1 = derive_master_key(&password, &salt(1), &params).unwrap();
        let key2 = derive_master_key(&password, &salt(1), &params).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    #[test]
    fn test_kdf_different_passwords() {
        let params = fast_params();

        let key1 = derive_master_key(&SecretString::from("password-a"), &salt(1), &params).unwrap();
        let key2 = derive_master_key(&SecretString::from("password-b"), &salt(1), &params).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passwords must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let password = SecretString::from("same-password");
        let params = fast_params();

        let key1 = derive_master_key(&password, &salt(1), &params).unwrap();
        let key2 = derive_master_key(&password, &salt(2), &params).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_kdf_each_cost_parameter_changes_output() {
        let password = SecretString::from("same-password");
        let base = fast_params();
        let reference = derive_master_key(&password, &salt(1), &base).unwrap();

        let variants = [
            KdfParams { mem_cost_kib: 2048, ..base.clone() },
            KdfParams { time_cost: 2, ..base.clone() },
            KdfParams { parallelism: 2, ..base.clone() },
        ];
        for params in &variants {
            let key = derive_master_key(&password, &salt(1), params).unwrap();
            assert_ne!(key.as_bytes(), reference.as_bytes(), "{params:?}");
        }
    }

    #[test]
    fn test_kdf_empty_password_rejected() {
        let result = derive_master_key(&SecretString::from(""), &salt(1), &fast_params());
        assert!(matches!(result, Err(CryptoError::MalformedInput(_))));
    }

    #[test]
    fn test_kdf_invalid_params_rejected() {
        let params = KdfParams {
            mem_cost_kib: 1024,
            time_cost: 0,
            parallelism: 1,
        };
        assert!(matches!(params.validate(), Err(CryptoError::InvalidParams(_))));

        let result = derive_master_key(&SecretString::from("pw"), &salt(1), &params);
        assert!(matches!(result, Err(CryptoError::InvalidParams(_))));
    }

    #[test]
    fn test_params_from_config() {
        let config = CryptoConfig::default();
        assert_eq!(KdfParams::from(&config), KdfParams::default());
    }

    #[test]
    fn test_auth_key_separate_from_master_key() {
        let credential = Credential {
            password: SecretString::from("hunter2-but-longer"),
            identity: "patient@example.org".into(),
        };
        let params = fast_params();

        let master = derive_master_key(&credential.password, &salt(3), &params).unwrap();
        let auth = derive_auth_key(&credential, &salt(3), &params).unwrap();

        assert_ne!(master.as_bytes(), auth.as_bytes());
    }

    #[test]
    fn test_check_recorded_bounds() {
        let local = fast_params();

        assert!(fast_params().check_recorded(&local).is_ok());
        assert!(KdfParams::default().check_recorded(&local).is_ok());

        for recorded in [
            KdfParams { mem_cost_kib: u32::MAX, ..fast_params() },
            KdfParams { time_cost: u32::MAX, ..fast_params() },
            KdfParams { parallelism: MAX_RECORDED_PARALLELISM + 1, ..fast_params() },
            KdfParams { mem_cost_kib: 65536 + 1, ..fast_params() },
        ] {
            assert!(
                matches!(recorded.check_recorded(&local), Err(CryptoError::InvalidParams(_))),
                "{recorded:?} should be rejected"
            );
        }

        let generous = KdfParams {
            mem_cost_kib: 65536,
            time_cost: 3,
            parallelism: 4,
        };
        let four_times = KdfParams {
            mem_cost_kib: 4 * 65536,
            time_cost: 12,
            parallelism: 4,
        };
        assert!(four_times.check_recorded(&generous).is_ok());
        assert!(KdfParams { time_cost: 13, ..four_times }
            .check_recorded(&generous)
            .is_err());
    }

    #[test]
    fn test_auth_key_bound_to_identity() {
        let params = fast_params();
        let a = Credential {
            password: SecretString::from("shared-password"),
            identity: "a@example.org".into(),
        };
        let b = Credential {
            password: SecretString::from("shared-password"),
            identity: "b@example.org".into(),
        };
        let same_as_a = Credential {
            password: SecretString::from("shared-password"),
            identity: "  A@Example.org ".into(),
        };

        let ka = derive_auth_key(&a, &salt(4), &params).unwrap();
        let kb = derive_auth_key(&b, &salt(4), &params).unwrap();
        let ka2 = derive_auth_key(&same_as_a, &salt(4), &params).unwrap();

        assert_ne!(ka.as_bytes(), kb.as_bytes());
        assert_eq!(ka.as_bytes(), ka2.as_bytes(), "identity is case/space insensitive");
    }

    #[test]
    fn test_login_keys() {
        let credential = Credential {
            password: SecretString::from("Correct-Horse-1!"),
            identity: "doc@example.org".into(),
        };
        let keys = derive_login_keys(&credential, &salt(5), &fast_params()).unwrap();

        assert_eq!(keys.auth_key_hash.len(), 64);
        assert_ne!(keys.auth_key_hash, hex::encode(keys.master_key.as_bytes()));
        assert!(format!("{keys:?}").contains("REDACTED"));
    }

    #[tokio::test]
    async fn test_async_derivation_matches_sync() {
        let password = SecretString::from("async-password");
        let sync_key = derive_master_key(&password, &salt(6), &fast_params()).unwrap();
        let async_key = derive_master_key_async(
            SecretString::from("async-password"),
            salt(6),
            fast_params(),
        )
        .await
        .unwrap();

        assert_eq!(sync_key.as_bytes(), async_key.as_bytes());
    }
}
