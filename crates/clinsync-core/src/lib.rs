//! # clinsync-core
//!
//! Shared leaf types for the clinsync practice sync engine.
//!
//! This crate holds the contracts shared between the credential vault and
//! the clients that consume decrypted credentials. It deliberately has no
//! I/O dependencies.

pub mod credentials;

pub use credentials::ApiCredentials;

/// Service name under which practice-API credentials are provisioned.
///
/// Other integrations (messaging, identity provider) share the same
/// credential table but use their own service names.
pub const PRACTICE_SERVICE: &str = "practice_api";

/// Source system identifier recorded on every sync run.
pub const SOURCE_SYSTEM: &str = "practice_api";
