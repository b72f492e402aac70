use async_trait::async_trait;
use consentry_core::DBDateTime;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};

use crate::DeliveryStatus;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "webhook_deliveries")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Weak reference; the endpoint may be deleted while its history stays
    pub endpoint_id: i32,
    pub event_type: String,
    /// Exact serialized envelope that was signed and sent
    #[sea_orm(column_type = "Text")]
    pub payload: String,
    pub status: DeliveryStatus,
    pub response_status: Option<i32>,
    /// Receiver response, truncated before it is stored
    #[sea_orm(column_type = "Text", nullable)]
    pub response_body: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub error_message: Option<String>,
    pub attempts: i32,
    pub delivered_at: Option<DBDateTime>,
    pub next_retry_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

impl Model {
    pub fn is_terminal(&self) -> bool {
        self.status == DeliveryStatus::Delivered
            || (self.status == DeliveryStatus::Failed && self.next_retry_at.is_none())
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::webhook_endpoints::Entity",
        from = "Column::EndpointId",
        to = "super::webhook_endpoints::Column::Id"
    )]
    Endpoint,
}

impl Related<super::webhook_endpoints::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Endpoint.def()
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
            if self.status.is_not_set() {
                self.status = Set(DeliveryStatus::Pending);
            }
            if self.attempts.is_not_set() {
                self.attempts = Set(0);
            }
        }
        if self.updated_at.is_not_set() || !insert {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivery(status: DeliveryStatus, next_retry_at: Option<DBDateTime>) -> Model {
        let now = chrono::Utc::now();
        Model {
            id: 1,
            endpoint_id: 1,
            event_type: "bounty.created".to_string(),
            payload: "{}".to_string(),
            status,
            response_status: None,
            response_body: None,
            error_message: None,
            attempts: 1,
            delivered_at: None,
            next_retry_at,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_terminal_states() {
        let now = chrono::Utc::now();
        assert!(delivery(DeliveryStatus::Delivered, None).is_terminal());
        assert!(delivery(DeliveryStatus::Failed, None).is_terminal());
        assert!(!delivery(DeliveryStatus::Failed, Some(now)).is_terminal());
        assert!(!delivery(DeliveryStatus::Pending, None).is_terminal());
    }
}
