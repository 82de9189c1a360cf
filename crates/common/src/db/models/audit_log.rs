//! Audit log entity (append-only)

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::audit::ActorKind;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    #[sea_orm(column_type = "Text")]
    pub actor_id: String,

    #[sea_orm(column_type = "Text")]
    pub actor_kind: String,

    #[sea_orm(column_type = "Text")]
    pub action: String,

    #[sea_orm(column_type = "Text", nullable)]
    pub resource_type: Option<String>,

    #[sea_orm(column_type = "Text", nullable)]
    pub resource_id: Option<String>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub detail: Option<serde_json::Value>,

    pub created_at: DateTimeWithTimeZone,
}

impl Model {
    pub fn actor(&self) -> ActorKind {
        ActorKind::from(self.actor_kind.clone())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
