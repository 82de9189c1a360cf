//! API handlers module

pub mod api_keys;
pub mod audit;
pub mod connections;
pub mod domains;
pub mod health;
pub mod proxy;
pub mod tenants;

use relaygate_common::errors::{AppError, Result};
use validator::Validate;

/// Run derived validation on a request body
pub(crate) fn validate<T: Validate>(request: &T) -> Result<()> {
    request.validate().map_err(|e| AppError::Validation {
        message: e.to_string(),
        field: e.field_errors().keys().next().map(|f| f.to_string()),
    })
}
