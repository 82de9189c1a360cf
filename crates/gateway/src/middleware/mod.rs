//! Gateway middleware and extractors

pub mod auth;
pub mod metrics;
pub mod rate_limit;

pub use auth::{OperatorSession, TenantSession};
