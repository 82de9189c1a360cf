//! SeaORM entity models
//!
//! Database entities for Relaygate

mod api_key;
mod audit_log;
mod custom_domain;
mod tenant;
mod upstream_connection;

pub use tenant::{
    Entity as TenantEntity,
    Model as Tenant,
    ActiveModel as TenantActiveModel,
    Column as TenantColumn,
};

pub use upstream_connection::{
    Entity as UpstreamConnectionEntity,
    Model as UpstreamConnection,
    ActiveModel as UpstreamConnectionActiveModel,
    Column as UpstreamConnectionColumn,
};

pub use api_key::{
    Entity as ApiKeyEntity,
    Model as ApiKey,
    ActiveModel as ApiKeyActiveModel,
    Column as ApiKeyColumn,
    ApiKeyStatus,
};

pub use custom_domain::{
    Entity as CustomDomainEntity,
    Model as CustomDomain,
    ActiveModel as CustomDomainActiveModel,
    Column as CustomDomainColumn,
};

pub use audit_log::{
    Entity as AuditLogEntity,
    Model as AuditEntry,
    ActiveModel as AuditLogActiveModel,
    Column as AuditLogColumn,
};
