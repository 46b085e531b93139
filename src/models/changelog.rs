use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Create,
    Update,
    Delete,
    StatusChange,
}

impl ChangeAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Delete => "delete",
            ChangeAction::StatusChange => "status_change",
        }
    }

    pub fn from_str(value: &str) -> Option<ChangeAction> {
        match value {
            "create" => Some(ChangeAction::Create),
            "update" => Some(ChangeAction::Update),
            "delete" => Some(ChangeAction::Delete),
            "status_change" => Some(ChangeAction::StatusChange),
            _ => None,
        }
    }
}

/// One append-only history row. `prev_hash`/`hash` chain entries together
/// (SHA-256 over previous hash + payload) for tamper evidence.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ChangeLogEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub action: ChangeAction,
    pub changed_by: Option<Uuid>,
    #[schema(value_type = Object)]
    pub changes: Value,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbChangeLogEntry {
    pub id: Uuid,
    pub product_id: Uuid,
    pub action: String,
    pub changed_by: Option<Uuid>,
    pub changes: String,
    pub prev_hash: Option<String>,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

impl From<DbChangeLogEntry> for ChangeLogEntry {
    fn from(value: DbChangeLogEntry) -> Self {
        ChangeLogEntry {
            id: value.id,
            product_id: value.product_id,
            action: ChangeAction::from_str(&value.action).unwrap_or(ChangeAction::Update),
            changed_by: value.changed_by,
            changes: serde_json::from_str(&value.changes)
                .unwrap_or_else(|_| Value::Object(Default::default())),
            prev_hash: value.prev_hash,
            hash: value.hash,
            created_at: value.created_at,
        }
    }
}
