use axum::extract::State;
use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app::AppState;
use crate::errors::AppResult;

/// Liveness report. The count query fails on an unmigrated database, not
/// just a dead one.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    pub db_ok: bool,
    pub catalog_size: Option<i64>,
    pub db_error: Option<String>,
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "Health",
    responses((status = 200, description = "Service and catalog store status", body = HealthResponse))
)]
pub async fn health(State(state): State<AppState>) -> AppResult<Json<HealthResponse>> {
    let db_check = sqlx::query_scalar::<_, i64>("SELECT COUNT(1) FROM products")
        .fetch_one(&state.pool)
        .await;

    let response = match db_check {
        Ok(count) => HealthResponse {
            status: "ok",
            db_ok: true,
            catalog_size: Some(count),
            db_error: None,
        },
        Err(err) => HealthResponse {
            status: "ok",
            db_ok: false,
            catalog_size: None,
            db_error: Some(err.to_string()),
        },
    };

    Ok(Json(response))
}
