//! Tenant entity

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::tenants::{PlanTier, TenantStatus};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub name: String,

    #[sea_orm(column_type = "Text", unique)]
    pub email: String,

    #[serde(skip_serializing)]
    #[sea_orm(column_type = "Text")]
    pub password_hash: String,

    #[sea_orm(column_type = "Text")]
    pub plan: String,

    #[sea_orm(column_type = "Text")]
    pub status: String,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn plan_tier(&self) -> PlanTier {
        PlanTier::from(self.plan.clone())
    }

    pub fn tenant_status(&self) -> TenantStatus {
        TenantStatus::from(self.status.clone())
    }

    pub fn is_active(&self) -> bool {
        self.tenant_status() == TenantStatus::Active
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::upstream_connection::Entity")]
    UpstreamConnections,

    #[sea_orm(has_many = "super::api_key::Entity")]
    ApiKeys,

    #[sea_orm(has_many = "super::custom_domain::Entity")]
    CustomDomains,
}

impl Related<super::upstream_connection::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::UpstreamConnections.def()
    }
}

impl Related<super::api_key::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::ApiKeys.def()
    }
}

impl Related<super::custom_domain::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::CustomDomains.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
