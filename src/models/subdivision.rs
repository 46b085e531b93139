use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::SubdivisionScope;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subdivision {
    pub id: Uuid,
    /// Unique, immutable after creation; used in storage paths and lookups.
    pub code: String,
    pub name: String,
    pub description: String,
    pub manager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbSubdivision {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    pub manager_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbSubdivision> for Subdivision {
    fn from(value: DbSubdivision) -> Self {
        Subdivision {
            id: value.id,
            code: value.code,
            name: value.name,
            description: value.description,
            manager_id: value.manager_id,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

impl DbSubdivision {
    pub fn scope(&self) -> SubdivisionScope {
        SubdivisionScope {
            id: self.id,
            manager_id: self.manager_id,
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubdivisionCreateRequest {
    #[schema(example = "CEH-01")]
    pub code: String,
    #[schema(example = "Assembly shop No. 1")]
    pub name: String,
    pub description: Option<String>,
    pub manager_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SubdivisionUpdateRequest {
    /// Immutable; sending a different value is a validation error.
    pub code: Option<String>,
    pub name: Option<String>,
    pub description: Option<String>,
    /// Reassigns the designated manager when present.
    pub manager_id: Option<Uuid>,
    /// Clears the manager; mutually exclusive with `manager_id`.
    #[serde(default)]
    pub remove_manager: bool,
}

/// List entry with the per-subdivision product count (home page data).
#[derive(Debug, Serialize, ToSchema)]
pub struct SubdivisionSummary {
    #[serde(flatten)]
    pub subdivision: Subdivision,
    pub product_count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct StatusStat {
    pub status: String,
    pub count: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SubdivisionListResponse {
    pub subdivisions: Vec<SubdivisionSummary>,
    pub total_products: i64,
    pub status_stats: Vec<StatusStat>,
}
