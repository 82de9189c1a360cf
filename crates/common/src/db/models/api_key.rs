//! API key entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// API key status; revocation is one-way
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiKeyStatus {
    Active,
    Revoked,
}

impl From<String> for ApiKeyStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "active" => ApiKeyStatus::Active,
            _ => ApiKeyStatus::Revoked,
        }
    }
}

impl From<ApiKeyStatus> for String {
    fn from(status: ApiKeyStatus) -> Self {
        match status {
            ApiKeyStatus::Active => "active".to_string(),
            ApiKeyStatus::Revoked => "revoked".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub connection_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text", unique)]
    pub key_digest: String,

    #[sea_orm(column_type = "Text")]
    pub key_prefix: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub last_used_at: Option<DateTimeWithTimeZone>,

    pub revoked_at: Option<DateTimeWithTimeZone>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn key_status(&self) -> ApiKeyStatus {
        ApiKeyStatus::from(self.status.clone())
    }

    pub fn is_active(&self) -> bool {
        self.key_status() == ApiKeyStatus::Active
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenant::Entity",
        from = "Column::TenantId",
        to = "super::tenant::Column::Id",
        on_delete = "Cascade"
    )]
    Tenant,

    #[sea_orm(
        belongs_to = "super::upstream_connection::Entity",
        from = "Column::ConnectionId",
        to = "super::upstream_connection::Column::Id",
        on_delete = "Cascade"
    )]
    UpstreamConnection,
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl Related<super::upstream_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UpstreamConnection.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
