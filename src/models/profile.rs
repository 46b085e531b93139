use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppResult;
use crate::utils::utc_now;

/// Membership binding: one user, at most one home subdivision.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Profile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subdivision_id: Option<Uuid>,
    pub phone: String,
    pub position: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProfile {
    pub id: Uuid,
    pub user_id: Uuid,
    pub subdivision_id: Option<Uuid>,
    pub phone: String,
    pub position: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<DbProfile> for Profile {
    fn from(value: DbProfile) -> Self {
        Profile {
            id: value.id,
            user_id: value.user_id,
            subdivision_id: value.subdivision_id,
            phone: value.phone,
            position: value.position,
            created_at: value.created_at,
            updated_at: value.updated_at,
        }
    }
}

/// Get-or-create the membership record for a user. Called explicitly from
/// the registration flow (and the seed CLI) so that every user always has a
/// queryable, possibly-empty, home-subdivision slot. Idempotent.
pub async fn ensure_profile(pool: &SqlitePool, user_id: Uuid) -> AppResult<DbProfile> {
    if let Some(existing) = fetch_by_user(pool, user_id).await? {
        return Ok(existing);
    }

    let now = utc_now();
    sqlx::query(
        "INSERT INTO profiles (id, user_id, subdivision_id, phone, position, created_at, updated_at) \
         VALUES (?, ?, NULL, '', '', ?, ?) ON CONFLICT(user_id) DO NOTHING",
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    // Re-read rather than trusting our insert: a concurrent creator may have
    // won the ON CONFLICT race.
    fetch_by_user(pool, user_id)
        .await?
        .ok_or_else(|| crate::errors::AppError::internal("profile missing after ensure"))
}

pub async fn fetch_by_user(pool: &SqlitePool, user_id: Uuid) -> AppResult<Option<DbProfile>> {
    let profile = sqlx::query_as::<_, DbProfile>(
        "SELECT id, user_id, subdivision_id, phone, position, created_at, updated_at \
         FROM profiles WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(profile)
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProfileBindRequest {
    /// Code of the subdivision to bind as home. Omitted keeps the current
    /// binding.
    pub subdivision_code: Option<String>,
    /// Clears the home binding; mutually exclusive with `subdivision_code`.
    #[serde(default)]
    pub clear_subdivision: bool,
    pub phone: Option<String>,
    pub position: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RoleGrantRequest {
    #[schema(example = "Editor")]
    pub role: String,
}
