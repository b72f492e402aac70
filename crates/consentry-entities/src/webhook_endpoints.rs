use async_trait::async_trait;
use consentry_core::DBDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_endpoints")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub url: String,
    /// Shared HMAC secret; never serialized into API responses
    #[serde(skip_serializing)]
    pub secret: String,
    /// JSON array of subscribed event type strings
    #[sea_orm(column_type = "Text")]
    pub events: String,
    pub is_active: bool,
    pub description: Option<String>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

impl Model {
    /// Subscribed event type strings. A corrupt column reads as no
    /// subscriptions rather than an error so one bad row cannot block a
    /// dispatch to every other endpoint.
    pub fn event_names(&self) -> Vec<String> {
        serde_json::from_str(&self.events).unwrap_or_default()
    }

    pub fn is_subscribed_to(&self, event_type: &str) -> bool {
        self.event_names().iter().any(|e| e == event_type)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::webhook_deliveries::Entity")]
    Deliveries,
}

impl Related<super::webhook_deliveries::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Deliveries.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.is_active.is_not_set() {
                self.is_active = Set(true);
            }
        }
        self.updated_at = Set(now);

        Ok(self)
    }
}
