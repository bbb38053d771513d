//! medvault-crypto: client-side zero-knowledge encryption for MedVault
//!
//! Everything secret is derived and used on the client. The backend only ever
//! sees ciphertext envelopes, public salts, and the auth key hash.
//!
//! Key hierarchy:
//! ```text
//! password + vault salt ──Argon2id──► Master Key (256-bit, session slot, 15 min idle)
//!   └── File Key: HKDF-SHA256(master, info="file_encryption_v1")   centralized mode
//! file password + per-file salt ──Argon2id──► File Key              zero-knowledge mode
//! password + identity-bound salt ──Argon2id──► Auth Key ──SHA-256──► auth_key_hash
//! ```
//!
//! Envelope: `base64(nonce[12] || AES-256-GCM ciphertext || tag[16])`, wrapped
//! in a versioned JSON [`EncryptedStructure`].

pub mod cipher;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod kdf;
pub mod keys;
pub mod pipeline;
pub mod session;

pub use cipher::{decrypt, encrypt, AuthContext};
pub use envelope::EncryptedStructure;
pub use error::{CryptoError, CryptoResult};
pub use kdf::{derive_login_keys, derive_master_key, Credential, KdfParams, LoginKeys, MasterKey};
pub use keys::{derive_sub_key, hash_auth_key, Salt, SubKey};
pub use pipeline::{generate_file_salt, EncryptionMode, FileCrypto, PlainFile, UploadForm};
pub use session::{KeyManager, KeyState};

/// Size of a master or file key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;
