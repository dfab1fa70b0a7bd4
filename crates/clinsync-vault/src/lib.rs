//! # clinsync-vault
//!
//! Encrypted-at-rest credential storage and retrieval.
//!
//! Credentials are provisioned by an external flow and read here per
//! (organization, service). The stored envelope is decrypted with a
//! process-wide AES-256-GCM key; three envelope shapes are accepted for
//! backward compatibility (see [`CredentialEnvelope`]). Decrypted values
//! are cached in memory with a TTL.

pub mod cache;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod vault;

pub use cache::{CacheStats, CredentialCache};
pub use crypto::CredentialCipher;
pub use envelope::CredentialEnvelope;
pub use error::{CredentialError, CredentialResult};
pub use vault::CredentialVault;
