//! Custom domain entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domains::{DomainStatus, SslStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "custom_domains")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    /// Normalized hostname, globally unique
    #[sea_orm(column_type = "Text", unique)]
    pub hostname: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    #[sea_orm(column_type = "Text")]
    pub ssl_status: String,

    #[sea_orm(column_type = "Text")]
    pub verification_token: String,

    #[sea_orm(column_type = "Text")]
    pub txt_record_name: String,

    /// Monotonic count of verification attempts
    pub check_count: i32,

    pub last_check_at: Option<DateTimeWithTimeZone>,

    pub verified_at: Option<DateTimeWithTimeZone>,

    pub ssl_requested_at: Option<DateTimeWithTimeZone>,

    pub ssl_issued_at: Option<DateTimeWithTimeZone>,

    pub ssl_expires_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "Text", nullable)]
    pub last_error: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    /// Get the domain status as an enum
    pub fn domain_status(&self) -> DomainStatus {
        DomainStatus::from(self.status.clone())
    }

    /// Get the certificate status as an enum
    pub fn certificate_status(&self) -> SslStatus {
        SslStatus::from(self.ssl_status.clone())
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
}

impl Related<super::tenant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
