use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{Principal, Role};
use crate::errors::{AppError, AppResult};
use crate::jwt::AuthUser;
use crate::models::profile::{self, Profile, ProfileBindRequest, RoleGrantRequest};
use crate::utils::utc_now;

/// Membership view: the profile plus resolved role names and the home
/// subdivision code.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProfileResponse {
    #[serde(flatten)]
    pub profile: Profile,
    pub username: String,
    pub roles: Vec<String>,
    pub subdivision_code: Option<String>,
}

async fn require_admin(pool: &SqlitePool, user_id: Uuid) -> AppResult<Principal> {
    let principal = Principal::load(pool, user_id).await?;
    if !principal.is_admin() {
        return Err(AppError::forbidden("administrator access required"));
    }
    Ok(principal)
}

async fn build_profile_response(
    pool: &SqlitePool,
    user_id: Uuid,
) -> AppResult<ProfileResponse> {
    let username: String = sqlx::query_scalar("SELECT username FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;

    let db_profile = profile::ensure_profile(pool, user_id).await?;

    let subdivision_code: Option<String> = match db_profile.subdivision_id {
        Some(subdivision_id) => {
            sqlx::query_scalar("SELECT code FROM subdivisions WHERE id = ?")
                .bind(subdivision_id)
                .fetch_optional(pool)
                .await?
        }
        None => None,
    };

    let mut roles: Vec<String> = sqlx::query_scalar(
        "SELECT r.name FROM roles r JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = ?",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    roles.sort();

    Ok(ProfileResponse {
        profile: db_profile.into(),
        username,
        roles,
        subdivision_code,
    })
}

#[utoipa::path(
    get,
    path = "/users/{user_id}/profile",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    responses(
        (status = 200, description = "Membership details", body = ProfileResponse),
        (status = 403, description = "Not the caller's own profile and caller is not an administrator")
    )
)]
pub async fn get_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<ProfileResponse>> {
    if user_id != auth.user_id {
        require_admin(&state.pool, auth.user_id).await?;
    }

    let response = build_profile_response(&state.pool, user_id).await?;
    Ok(Json(response))
}

#[utoipa::path(
    put,
    path = "/users/{user_id}/profile",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = ProfileBindRequest,
    responses(
        (status = 200, description = "Membership updated", body = ProfileResponse),
        (status = 403, description = "Administrator access required"),
        (status = 422, description = "Rebind conflicts with the existing home subdivision")
    )
)]
pub async fn bind_profile(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<ProfileBindRequest>,
) -> AppResult<Json<ProfileResponse>> {
    require_admin(&state.pool, auth.user_id).await?;

    let db_profile = profile::ensure_profile(&state.pool, user_id).await?;

    if payload.clear_subdivision && payload.subdivision_code.is_some() {
        return Err(AppError::validation(
            "subdivision_code",
            "subdivision_code and clear_subdivision are mutually exclusive",
        ));
    }

    let new_subdivision_id: Option<Uuid> = if payload.clear_subdivision {
        None
    } else if let Some(code) = &payload.subdivision_code {
        let target: Option<(Uuid, String)> =
            sqlx::query_as("SELECT id, code FROM subdivisions WHERE code = ?")
                .bind(code)
                .fetch_optional(&state.pool)
                .await?;
        let (target_id, _) = target.ok_or_else(|| {
            AppError::validation("subdivision_code", format!("unknown subdivision {code}"))
        })?;

        // Rebinding to a different subdivision is rejected rather than
        // silently moved; the admin has to clear the binding first.
        if let Some(current_id) = db_profile.subdivision_id {
            if current_id != target_id {
                let current_code: String =
                    sqlx::query_scalar("SELECT code FROM subdivisions WHERE id = ?")
                        .bind(current_id)
                        .fetch_one(&state.pool)
                        .await?;
                return Err(AppError::validation(
                    "subdivision_code",
                    format!("user is already bound to subdivision {current_code}"),
                ));
            }
        }

        Some(target_id)
    } else {
        // Omitted means untouched, matching the other partial-update fields.
        db_profile.subdivision_id
    };

    let phone = payload.phone.unwrap_or_else(|| db_profile.phone.clone());
    let position = payload
        .position
        .unwrap_or_else(|| db_profile.position.clone());

    sqlx::query(
        "UPDATE profiles SET subdivision_id = ?, phone = ?, position = ?, updated_at = ? \
         WHERE user_id = ?",
    )
    .bind(new_subdivision_id)
    .bind(&phone)
    .bind(&position)
    .bind(utc_now())
    .bind(user_id)
    .execute(&state.pool)
    .await?;

    let response = build_profile_response(&state.pool, user_id).await?;
    Ok(Json(response))
}

#[utoipa::path(
    post,
    path = "/users/{user_id}/roles",
    tag = "Users",
    params(("user_id" = Uuid, Path, description = "User id")),
    request_body = RoleGrantRequest,
    responses(
        (status = 200, description = "Role granted", body = ProfileResponse),
        (status = 403, description = "Administrator access required"),
        (status = 422, description = "Unknown role name")
    )
)]
pub async fn grant_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(user_id): Path<Uuid>,
    Json(payload): Json<RoleGrantRequest>,
) -> AppResult<Json<ProfileResponse>> {
    require_admin(&state.pool, auth.user_id).await?;

    let role = Role::from_name(&payload.role).ok_or_else(|| {
        AppError::validation("role", format!("unknown role {}", payload.role))
    })?;

    let role_id = ensure_role(&state.pool, role).await?;

    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(user_id, role_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(role_id)
    .bind(utc_now())
    .execute(&state.pool)
    .await?;

    let response = build_profile_response(&state.pool, user_id).await?;
    Ok(Json(response))
}

#[utoipa::path(
    delete,
    path = "/users/{user_id}/roles/{role}",
    tag = "Users",
    params(
        ("user_id" = Uuid, Path, description = "User id"),
        ("role" = String, Path, description = "Canonical role name")
    ),
    responses(
        (status = 204, description = "Role revoked"),
        (status = 403, description = "Administrator access required")
    )
)]
pub async fn revoke_role(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((user_id, role_name)): Path<(Uuid, String)>,
) -> AppResult<StatusCode> {
    require_admin(&state.pool, auth.user_id).await?;

    let role = Role::from_name(&role_name).ok_or_else(|| {
        AppError::validation("role", format!("unknown role {role_name}"))
    })?;

    sqlx::query(
        "DELETE FROM user_roles WHERE user_id = ? AND \
         role_id = (SELECT id FROM roles WHERE name = ?)",
    )
    .bind(user_id)
    .bind(role.as_str())
    .execute(&state.pool)
    .await?;

    Ok(StatusCode::NO_CONTENT)
}

/// Get-or-create the role row for a canonical role. Used here and by the
/// seed command.
pub async fn ensure_role(pool: &SqlitePool, role: Role) -> AppResult<Uuid> {
    if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM roles WHERE name = ?")
        .bind(role.as_str())
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO roles (id, name, description, created_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(id)
    .bind(role.as_str())
    .bind(role.description())
    .bind(utc_now())
    .execute(pool)
    .await?;

    sqlx::query_scalar::<_, Uuid>("SELECT id FROM roles WHERE name = ?")
        .bind(role.as_str())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::internal("role missing after ensure"))
}
