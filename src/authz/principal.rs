use std::collections::HashSet;

use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::errors::{AppError, AppResult};

use super::Role;

/// Snapshot of an authenticated caller: identity flags, role set and the
/// optional home-subdivision binding. Loaded once per request and handed to
/// the pure engine.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user_id: Uuid,
    pub is_superuser: bool,
    pub roles: HashSet<Role>,
    pub home_subdivision: Option<Uuid>,
}

impl Principal {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            user_id,
            is_superuser: false,
            roles: HashSet::new(),
            home_subdivision: None,
        }
    }

    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn with_home(mut self, subdivision_id: Uuid) -> Self {
        self.home_subdivision = Some(subdivision_id);
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    pub fn is_home(&self, subdivision_id: Uuid) -> bool {
        self.home_subdivision == Some(subdivision_id)
    }

    /// Whether the caller may administer cross-subdivision resources (user
    /// bindings, role grants, subdivision creation).
    pub fn is_admin(&self) -> bool {
        self.is_superuser || self.has_role(Role::SuperAdmin)
    }

    /// Load the minimal authorization inputs for a user: superuser flag,
    /// role names and the profile's subdivision binding. Unknown role names
    /// in the store are skipped.
    pub async fn load(pool: &SqlitePool, user_id: Uuid) -> AppResult<Principal> {
        let user_row = sqlx::query("SELECT is_superuser FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| AppError::unauthorized("unknown user"))?;

        let is_superuser: i64 = user_row.get("is_superuser");

        let role_rows = sqlx::query(
            "SELECT r.name FROM roles r JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let roles: HashSet<Role> = role_rows
            .iter()
            .filter_map(|row| Role::from_name(row.get::<&str, _>("name")))
            .collect();

        let home_subdivision: Option<Uuid> =
            sqlx::query_scalar("SELECT subdivision_id FROM profiles WHERE user_id = ?")
                .bind(user_id)
                .fetch_optional(pool)
                .await?
                .flatten();

        Ok(Principal {
            user_id,
            is_superuser: is_superuser != 0,
            roles,
            home_subdivision,
        })
    }
}
