//! Relaygate Common Library
//!
//! Shared code for the Relaygate gateway including:
//! - Secret sealing and password hashing
//! - Signed tokens, API keys and credential resolution
//! - Fixed-window rate accounting and usage metering
//! - Custom domain verification lifecycle
//! - Audit trail
//! - Database models, repository and Redis counters
//! - Error types, configuration and metrics

pub mod audit;
pub mod auth;
pub mod cache;
pub mod clock;
pub mod config;
pub mod connections;
pub mod crypto;
pub mod db;
pub mod domains;
pub mod errors;
pub mod metrics;
pub mod rate;
pub mod store;
pub mod tenants;

// Re-export commonly used types
pub use errors::{AppError, Result};
pub use config::AppConfig;
pub use db::{DbPool, Repository};
pub use clock::{Clock, SystemClock};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
