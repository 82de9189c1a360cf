//! Cryptographic primitives for tenant secrets
//!
//! Provides:
//! - AES-256-GCM envelopes for upstream secrets at rest
//! - Argon2id password hashing for tenant logins

pub mod cipher;
pub mod password;

pub use cipher::{decrypt, encrypt, MasterKey};
pub use password::{hash_password, verify_password};
