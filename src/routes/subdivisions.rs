use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz::{self, PermissionSet};
use crate::errors::{AppError, AppResult};
use crate::jwt::{AuthUser, MaybeAuthUser};
use crate::models::subdivision::{
    DbSubdivision, StatusStat, Subdivision, SubdivisionCreateRequest, SubdivisionListResponse,
    SubdivisionSummary, SubdivisionUpdateRequest,
};
use crate::routes::load_principal;
use crate::utils::utc_now;

const SUBDIVISION_COLUMNS: &str =
    "id, code, name, description, manager_id, created_at, updated_at";

pub(crate) async fn fetch_by_code(pool: &SqlitePool, code: &str) -> AppResult<DbSubdivision> {
    sqlx::query_as::<_, DbSubdivision>(&format!(
        "SELECT {SUBDIVISION_COLUMNS} FROM subdivisions WHERE code = ?"
    ))
    .bind(code)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("subdivision {code} not found")))
}

#[utoipa::path(
    get,
    path = "/subdivisions",
    tag = "Subdivisions",
    responses((status = 200, description = "All subdivisions with catalog totals", body = SubdivisionListResponse))
)]
pub async fn list_subdivisions(
    State(state): State<AppState>,
) -> AppResult<Json<SubdivisionListResponse>> {
    let rows = sqlx::query_as::<_, DbSubdivision>(&format!(
        "SELECT {SUBDIVISION_COLUMNS} FROM subdivisions ORDER BY code"
    ))
    .fetch_all(&state.pool)
    .await?;

    let counts: Vec<(Uuid, i64)> = sqlx::query_as(
        "SELECT subdivision_id, COUNT(1) FROM products GROUP BY subdivision_id",
    )
    .fetch_all(&state.pool)
    .await?;

    let subdivisions: Vec<SubdivisionSummary> = rows
        .into_iter()
        .map(|row| {
            let product_count = counts
                .iter()
                .find(|(id, _)| *id == row.id)
                .map(|(_, n)| *n)
                .unwrap_or(0);
            SubdivisionSummary {
                subdivision: row.into(),
                product_count,
            }
        })
        .collect();

    let total_products: i64 = counts.iter().map(|(_, n)| n).sum();

    let status_stats: Vec<StatusStat> =
        sqlx::query_as::<_, (String, i64)>("SELECT status, COUNT(1) FROM products GROUP BY status")
            .fetch_all(&state.pool)
            .await?
            .into_iter()
            .map(|(status, count)| StatusStat { status, count })
            .collect();

    Ok(Json(SubdivisionListResponse {
        subdivisions,
        total_products,
        status_stats,
    }))
}

#[utoipa::path(
    post,
    path = "/subdivisions",
    tag = "Subdivisions",
    request_body = SubdivisionCreateRequest,
    responses(
        (status = 201, description = "Subdivision created", body = Subdivision),
        (status = 403, description = "Caller is not an administrator"),
        (status = 422, description = "Code already registered")
    )
)]
pub async fn create_subdivision(
    State(state): State<AppState>,
    auth: AuthUser,
    Json(payload): Json<SubdivisionCreateRequest>,
) -> AppResult<(StatusCode, Json<Subdivision>)> {
    let principal = crate::authz::Principal::load(&state.pool, auth.user_id).await?;
    if !principal.is_admin() {
        return Err(AppError::forbidden("only administrators can create subdivisions"));
    }

    let code = crate::utils::normalize_code("code", &payload.code)?;

    if let Some(manager_id) = payload.manager_id {
        ensure_user_exists(&state.pool, manager_id).await?;
    }

    let now = utc_now();
    let id = Uuid::new_v4();

    let inserted = sqlx::query(
        "INSERT INTO subdivisions (id, code, name, description, manager_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(&code)
    .bind(&payload.name)
    .bind(payload.description.unwrap_or_default())
    .bind(payload.manager_id)
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await;

    if let Err(err) = inserted {
        let app_err = AppError::from(err);
        if app_err.is_unique_violation("subdivisions.code") {
            return Err(AppError::validation(
                "code",
                format!("subdivision code {code} is already registered"),
            ));
        }
        return Err(app_err);
    }

    let created = fetch_by_code(&state.pool, &code).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}",
    tag = "Subdivisions",
    params(("code" = String, Path, description = "Subdivision code")),
    responses(
        (status = 200, description = "Subdivision detail", body = SubdivisionSummary),
        (status = 404, description = "Unknown code")
    )
)]
pub async fn get_subdivision(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> AppResult<Json<SubdivisionSummary>> {
    let subdivision = fetch_by_code(&state.pool, &code).await?;

    let product_count: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM products WHERE subdivision_id = ?")
            .bind(subdivision.id)
            .fetch_one(&state.pool)
            .await?;

    Ok(Json(SubdivisionSummary {
        subdivision: subdivision.into(),
        product_count,
    }))
}

#[utoipa::path(
    put,
    path = "/subdivisions/{code}",
    tag = "Subdivisions",
    params(("code" = String, Path, description = "Subdivision code")),
    request_body = SubdivisionUpdateRequest,
    responses(
        (status = 200, description = "Subdivision updated", body = Subdivision),
        (status = 403, description = "Caller cannot manage this subdivision")
    )
)]
pub async fn update_subdivision(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
    Json(payload): Json<SubdivisionUpdateRequest>,
) -> AppResult<Json<Subdivision>> {
    let subdivision = fetch_by_code(&state.pool, &code).await?;
    let principal = crate::authz::Principal::load(&state.pool, auth.user_id).await?;

    if !authz::can_manage(Some(&principal), &subdivision.scope()) {
        return Err(AppError::forbidden("caller cannot manage this subdivision"));
    }

    // The code anchors storage paths and lookups; it never changes.
    if let Some(new_code) = &payload.code {
        if new_code != &subdivision.code {
            return Err(AppError::validation("code", "subdivision code is immutable"));
        }
    }

    if payload.remove_manager && payload.manager_id.is_some() {
        return Err(AppError::validation(
            "manager_id",
            "manager_id and remove_manager are mutually exclusive",
        ));
    }

    let manager_id = if payload.remove_manager {
        None
    } else if let Some(manager_id) = payload.manager_id {
        ensure_user_exists(&state.pool, manager_id).await?;
        Some(manager_id)
    } else {
        subdivision.manager_id
    };

    let name = payload.name.unwrap_or_else(|| subdivision.name.clone());
    let description = payload
        .description
        .unwrap_or_else(|| subdivision.description.clone());

    sqlx::query(
        "UPDATE subdivisions SET name = ?, description = ?, manager_id = ?, updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&description)
    .bind(manager_id)
    .bind(utc_now())
    .bind(subdivision.id)
    .execute(&state.pool)
    .await?;

    let updated = fetch_by_code(&state.pool, &code).await?;
    Ok(Json(updated.into()))
}

#[derive(Debug, Deserialize)]
pub struct DeleteConfirmQuery {
    pub confirm: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct DeleteResponse {
    pub deleted: String,
    pub products_removed: i64,
}

#[utoipa::path(
    delete,
    path = "/subdivisions/{code}",
    tag = "Subdivisions",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("confirm" = Option<String>, Query, description = "Must repeat the code to confirm")
    ),
    responses(
        (status = 200, description = "Subdivision and its catalog removed", body = DeleteResponse),
        (status = 403, description = "Caller cannot manage this subdivision"),
        (status = 422, description = "Missing or mismatched confirmation")
    )
)]
pub async fn delete_subdivision(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
    Query(query): Query<DeleteConfirmQuery>,
) -> AppResult<Json<DeleteResponse>> {
    let subdivision = fetch_by_code(&state.pool, &code).await?;
    let principal = crate::authz::Principal::load(&state.pool, auth.user_id).await?;

    if !authz::can_manage(Some(&principal), &subdivision.scope()) {
        return Err(AppError::forbidden("caller cannot manage this subdivision"));
    }

    // Destructive cascade; the client has to echo the code back.
    if query.confirm.as_deref() != Some(subdivision.code.as_str()) {
        return Err(AppError::validation(
            "confirm",
            format!("pass confirm={} to delete this subdivision", subdivision.code),
        ));
    }

    let products_removed: i64 =
        sqlx::query_scalar("SELECT COUNT(1) FROM products WHERE subdivision_id = ?")
            .bind(subdivision.id)
            .fetch_one(&state.pool)
            .await?;

    sqlx::query("DELETE FROM subdivisions WHERE id = ?")
        .bind(subdivision.id)
        .execute(&state.pool)
        .await?;

    tracing::info!(code = %subdivision.code, products_removed, "subdivision deleted");

    Ok(Json(DeleteResponse {
        deleted: subdivision.code,
        products_removed,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberInfo {
    pub user_id: Uuid,
    pub username: String,
    pub roles: Vec<String>,
    pub phone: String,
    pub position: String,
    pub is_manager: bool,
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/members",
    tag = "Subdivisions",
    params(("code" = String, Path, description = "Subdivision code")),
    responses((status = 200, description = "Users bound to this subdivision", body = [MemberInfo]))
)]
pub async fn list_members(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(code): Path<String>,
) -> AppResult<Json<Vec<MemberInfo>>> {
    let subdivision = fetch_by_code(&state.pool, &code).await?;

    let rows: Vec<(Uuid, String, String, String)> = sqlx::query_as(
        "SELECT u.id, u.username, p.phone, p.position \
         FROM profiles p JOIN users u ON u.id = p.user_id \
         WHERE p.subdivision_id = ? ORDER BY u.username",
    )
    .bind(subdivision.id)
    .fetch_all(&state.pool)
    .await?;

    let mut members = Vec::with_capacity(rows.len());
    for (user_id, username, phone, position) in rows {
        let mut roles: Vec<String> = sqlx::query_scalar(
            "SELECT r.name FROM roles r JOIN user_roles ur ON ur.role_id = r.id WHERE ur.user_id = ?",
        )
        .bind(user_id)
        .fetch_all(&state.pool)
        .await?;
        roles.sort();

        members.push(MemberInfo {
            user_id,
            username,
            roles,
            phone,
            position,
            is_manager: subdivision.manager_id == Some(user_id),
        });
    }

    Ok(Json(members))
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/permissions",
    tag = "Subdivisions",
    params(("code" = String, Path, description = "Subdivision code")),
    responses((status = 200, description = "Effective permissions for the caller", body = PermissionSet))
)]
pub async fn my_permissions(
    State(state): State<AppState>,
    maybe: MaybeAuthUser,
    Path(code): Path<String>,
) -> AppResult<Json<PermissionSet>> {
    let subdivision = fetch_by_code(&state.pool, &code).await?;
    let principal = load_principal(&state.pool, &maybe).await?;

    let perms = authz::resolve_permissions(principal.as_ref(), &subdivision.scope(), None);
    Ok(Json(perms))
}

async fn ensure_user_exists(pool: &SqlitePool, user_id: Uuid) -> AppResult<()> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM users WHERE id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    if count == 0 {
        return Err(AppError::validation("manager_id", "manager user does not exist"));
    }

    Ok(())
}
