use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::{AppError, AppResult};
use crate::events::{self, diff};
use crate::jwt::{AuthUser, MaybeAuthUser};
use crate::models::changelog::{ChangeAction, ChangeLogEntry, DbChangeLogEntry};
use crate::models::image::{DbProductImage, ProductImage};
use crate::models::product::{
    CodeCheckResponse, DbProduct, Product, ProductCreateRequest, ProductFilter, ProductStatus,
    ProductUpdateRequest, SearchQuery, MAX_QUANTITY, MIN_QUANTITY,
};
use crate::routes::{load_principal, subdivisions};
use crate::utils::utc_now;

const PRODUCT_COLUMNS: &str = "id, code, name, description, characteristics, subdivision_id, \
     created_by, status, condition, quantity, unit, location, storage_date, notes, \
     created_at, updated_at";

pub(crate) async fn fetch_product(
    pool: &SqlitePool,
    subdivision_id: Uuid,
    product_id: Uuid,
) -> AppResult<DbProduct> {
    sqlx::query_as::<_, DbProduct>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = ? AND subdivision_id = ?"
    ))
    .bind(product_id)
    .bind(subdivision_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("product not found in this subdivision"))
}

fn validate_quantity(quantity: u32) -> AppResult<()> {
    if !(MIN_QUANTITY..=MAX_QUANTITY).contains(&quantity) {
        return Err(AppError::validation(
            "quantity",
            format!("quantity must be between {MIN_QUANTITY} and {MAX_QUANTITY}"),
        ));
    }
    Ok(())
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/products",
    tag = "Products",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("status" = Option<ProductStatus>, Query, description = "Filter by status"),
        ("condition" = Option<String>, Query, description = "Filter by condition")
    ),
    responses((status = 200, description = "Products of the subdivision", body = [Product]))
)]
pub async fn list_products(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(filter): Query<ProductFilter>,
) -> AppResult<Json<Vec<Product>>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;

    let mut sql = format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE subdivision_id = ?"
    );
    if filter.status.is_some() {
        sql.push_str(" AND status = ?");
    }
    if filter.condition.is_some() {
        sql.push_str(" AND condition = ?");
    }
    sql.push_str(" ORDER BY created_at DESC");

    let mut query = sqlx::query_as::<_, DbProduct>(&sql).bind(subdivision.id);
    if let Some(status) = filter.status {
        query = query.bind(status.as_str());
    }
    if let Some(condition) = filter.condition {
        query = query.bind(condition.as_str());
    }

    let rows = query.fetch_all(&state.pool).await?;
    let products = rows
        .into_iter()
        .map(Product::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(products))
}

#[utoipa::path(
    post,
    path = "/subdivisions/{code}/products",
    tag = "Products",
    params(("code" = String, Path, description = "Subdivision code")),
    request_body = ProductCreateRequest,
    responses(
        (status = 201, description = "Product created", body = Product),
        (status = 403, description = "Caller cannot add products here"),
        (status = 422, description = "Duplicate code or invalid quantity")
    )
)]
pub async fn create_product(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(code): Path<String>,
    Json(payload): Json<ProductCreateRequest>,
) -> AppResult<(StatusCode, Json<Product>)> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let principal = authz::Principal::load(&state.pool, auth.user_id).await?;

    if !authz::can_add(Some(&principal), &subdivision.scope()) {
        return Err(AppError::forbidden("caller cannot add products in this subdivision"));
    }

    let product_code = crate::utils::normalize_code("code", &payload.code)?;

    // Friendly pre-check; the UNIQUE(code, subdivision_id) index backs it up
    // against races below.
    if product_code_taken(&state.pool, subdivision.id, &product_code, None).await? {
        return Err(duplicate_code_error(&product_code, &subdivision.code));
    }

    let quantity = payload.quantity.unwrap_or(MIN_QUANTITY);
    validate_quantity(quantity)?;

    let characteristics = payload
        .characteristics
        .unwrap_or_else(|| Value::Object(Default::default()));
    let status = payload.status.unwrap_or(ProductStatus::Available);
    let condition = payload
        .condition
        .unwrap_or(crate::models::product::ProductCondition::Used);

    let now = utc_now();
    let id = Uuid::new_v4();

    let inserted = sqlx::query(
        "INSERT INTO products (id, code, name, description, characteristics, subdivision_id, \
         created_by, status, condition, quantity, unit, location, storage_date, notes, \
         created_at, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(&product_code)
    .bind(&payload.name)
    .bind(payload.description.unwrap_or_default())
    .bind(serde_json::to_string(&characteristics).unwrap_or_else(|_| "{}".to_string()))
    .bind(subdivision.id)
    .bind(auth.user_id)
    .bind(status.as_str())
    .bind(condition.as_str())
    .bind(i64::from(quantity))
    .bind(payload.unit.unwrap_or_else(|| "pcs".to_string()))
    .bind(payload.location.unwrap_or_default())
    .bind(payload.storage_date)
    .bind(payload.notes.unwrap_or_default())
    .bind(now)
    .bind(now)
    .execute(&state.pool)
    .await;

    if let Err(err) = inserted {
        let app_err = AppError::from(err);
        if app_err.is_unique_violation("products.code") {
            return Err(duplicate_code_error(&product_code, &subdivision.code));
        }
        return Err(app_err);
    }

    let product: Product = fetch_product(&state.pool, subdivision.id, id).await?.try_into()?;

    events::emit_product_change(
        &state.event_bus,
        ChangeAction::Create,
        Some(auth.user_id),
        product.id,
        diff::product_diff(None, Some(&product)),
    );

    Ok((StatusCode::CREATED, Json(product)))
}

fn duplicate_code_error(product_code: &str, subdivision_code: &str) -> AppError {
    AppError::validation(
        "code",
        format!("product code {product_code} is already used in subdivision {subdivision_code}"),
    )
}

async fn product_code_taken(
    pool: &SqlitePool,
    subdivision_id: Uuid,
    code: &str,
    exclude: Option<Uuid>,
) -> AppResult<bool> {
    let count: i64 = match exclude {
        Some(id) => {
            sqlx::query_scalar(
                "SELECT COUNT(1) FROM products WHERE subdivision_id = ? AND code = ? AND id != ?",
            )
            .bind(subdivision_id)
            .bind(code)
            .bind(id)
            .fetch_one(pool)
            .await?
        }
        None => {
            sqlx::query_scalar("SELECT COUNT(1) FROM products WHERE subdivision_id = ? AND code = ?")
                .bind(subdivision_id)
                .bind(code)
                .fetch_one(pool)
                .await?
        }
    };
    Ok(count > 0)
}

#[derive(Debug, Deserialize)]
pub struct CodeQuery {
    pub code: String,
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/products/check-code",
    tag = "Products",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("code" = String, Query, description = "Candidate product code")
    ),
    responses((status = 200, description = "Availability of the candidate code", body = CodeCheckResponse))
)]
pub async fn check_product_code(
    State(state): State<AppState>,
    Path(code): Path<String>,
    Query(query): Query<CodeQuery>,
) -> AppResult<Json<CodeCheckResponse>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let candidate = query.code.trim();

    if candidate.is_empty() {
        return Ok(Json(CodeCheckResponse {
            valid: false,
            message: "code must not be empty".to_string(),
        }));
    }

    let taken = product_code_taken(&state.pool, subdivision.id, candidate, None).await?;
    Ok(Json(if taken {
        CodeCheckResponse {
            valid: false,
            message: format!("code {candidate} is already used in {}", subdivision.code),
        }
    } else {
        CodeCheckResponse {
            valid: true,
            message: format!("code {candidate} is available"),
        }
    }))
}

/// Detail payload with per-caller action flags, so the client never has to
/// replicate the permission rules.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProductDetail {
    #[serde(flatten)]
    pub product: Product,
    pub images: Vec<ProductImage>,
    pub can_edit: bool,
    pub can_delete: bool,
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/products/{id}",
    tag = "Products",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id")
    ),
    responses(
        (status = 200, description = "Product detail with images and action flags", body = ProductDetail),
        (status = 404, description = "Not found in this subdivision")
    )
)]
pub async fn get_product(
    State(state): State<AppState>,
    maybe: MaybeAuthUser,
    Path((code, id)): Path<(String, Uuid)>,
) -> AppResult<Json<ProductDetail>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product: Product = fetch_product(&state.pool, subdivision.id, id).await?.try_into()?;

    let principal = load_principal(&state.pool, &maybe).await?;
    let scope = subdivision.scope();
    let can_edit = authz::can_edit(principal.as_ref(), &scope, product.created_by);
    let can_delete = authz::can_delete(principal.as_ref(), &scope);

    let images: Vec<ProductImage> = sqlx::query_as::<_, DbProductImage>(
        "SELECT id, product_id, image_path, thumbnail_path, is_main, caption, uploaded_by, uploaded_at \
         FROM product_images WHERE product_id = ? ORDER BY is_main DESC, uploaded_at",
    )
    .bind(product.id)
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .map(ProductImage::from)
    .collect();

    Ok(Json(ProductDetail {
        product,
        images,
        can_edit,
        can_delete,
    }))
}

#[utoipa::path(
    put,
    path = "/subdivisions/{code}/products/{id}",
    tag = "Products",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id")
    ),
    request_body = ProductUpdateRequest,
    responses(
        (status = 200, description = "Product updated", body = Product),
        (status = 403, description = "Caller cannot edit this product")
    )
)]
pub async fn update_product(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, id)): Path<(String, Uuid)>,
    Json(payload): Json<ProductUpdateRequest>,
) -> AppResult<Json<Product>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let old: Product = fetch_product(&state.pool, subdivision.id, id).await?.try_into()?;

    let principal = authz::Principal::load(&state.pool, auth.user_id).await?;
    if !authz::can_edit(Some(&principal), &subdivision.scope(), old.created_by) {
        return Err(AppError::forbidden("caller cannot edit this product"));
    }

    let quantity = payload.quantity.unwrap_or(old.quantity);
    validate_quantity(quantity)?;

    let status = payload.status.unwrap_or(old.status);
    let condition = payload.condition.unwrap_or(old.condition);
    let name = payload.name.clone().unwrap_or_else(|| old.name.clone());
    let description = payload
        .description
        .clone()
        .unwrap_or_else(|| old.description.clone());
    let characteristics = payload
        .characteristics
        .clone()
        .unwrap_or_else(|| old.characteristics.clone());
    let unit = payload.unit.clone().unwrap_or_else(|| old.unit.clone());
    let location = payload
        .location
        .clone()
        .unwrap_or_else(|| old.location.clone());
    let storage_date = payload.storage_date.or(old.storage_date);
    let notes = payload.notes.clone().unwrap_or_else(|| old.notes.clone());

    sqlx::query(
        "UPDATE products SET name = ?, description = ?, characteristics = ?, status = ?, \
         condition = ?, quantity = ?, unit = ?, location = ?, storage_date = ?, notes = ?, \
         updated_at = ? WHERE id = ?",
    )
    .bind(&name)
    .bind(&description)
    .bind(serde_json::to_string(&characteristics).unwrap_or_else(|_| "{}".to_string()))
    .bind(status.as_str())
    .bind(condition.as_str())
    .bind(i64::from(quantity))
    .bind(&unit)
    .bind(&location)
    .bind(storage_date)
    .bind(&notes)
    .bind(utc_now())
    .bind(old.id)
    .execute(&state.pool)
    .await?;

    let updated: Product = fetch_product(&state.pool, subdivision.id, id).await?.try_into()?;

    // A status transition is recorded under its own action name so history
    // readers can spot lifecycle moves without diffing every entry.
    let action = if updated.status != old.status {
        ChangeAction::StatusChange
    } else {
        ChangeAction::Update
    };

    events::emit_product_change(
        &state.event_bus,
        action,
        Some(auth.user_id),
        updated.id,
        diff::product_diff(Some(&old), Some(&updated)),
    );

    Ok(Json(updated))
}

#[utoipa::path(
    delete,
    path = "/subdivisions/{code}/products/{id}",
    tag = "Products",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id")
    ),
    responses(
        (status = 204, description = "Product removed"),
        (status = 403, description = "Caller cannot delete here")
    )
)]
pub async fn delete_product(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, id)): Path<(String, Uuid)>,
) -> AppResult<StatusCode> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product: Product = fetch_product(&state.pool, subdivision.id, id).await?.try_into()?;

    let principal = authz::Principal::load(&state.pool, auth.user_id).await?;
    if !authz::can_delete(Some(&principal), &subdivision.scope()) {
        return Err(AppError::forbidden("caller cannot delete products in this subdivision"));
    }

    sqlx::query("DELETE FROM products WHERE id = ?")
        .bind(product.id)
        .execute(&state.pool)
        .await?;

    events::emit_product_change(
        &state.event_bus,
        ChangeAction::Delete,
        Some(auth.user_id),
        product.id,
        diff::product_diff(Some(&product), None),
    );

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/products/{id}/changes",
    tag = "Products",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id")
    ),
    responses((status = 200, description = "Change history, newest first", body = [ChangeLogEntry]))
)]
pub async fn list_changes(
    State(state): State<AppState>,
    Path((code, id)): Path<(String, Uuid)>,
) -> AppResult<Json<Vec<ChangeLogEntry>>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product = fetch_product(&state.pool, subdivision.id, id).await?;

    let entries: Vec<ChangeLogEntry> = sqlx::query_as::<_, DbChangeLogEntry>(
        "SELECT id, product_id, action, changed_by, changes, prev_hash, hash, created_at \
         FROM change_log WHERE product_id = ? ORDER BY created_at DESC, rowid DESC",
    )
    .bind(product.id)
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .map(ChangeLogEntry::from)
    .collect();

    Ok(Json(entries))
}

#[utoipa::path(
    get,
    path = "/products/search",
    tag = "Products",
    params(("q" = Option<String>, Query, description = "Search term")),
    responses((status = 200, description = "Cross-subdivision search results", body = [Product]))
)]
pub async fn search_products(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<Product>>> {
    let term = query.q.unwrap_or_default();
    let term = term.trim();
    if term.is_empty() {
        return Ok(Json(Vec::new()));
    }

    let pattern = format!("%{}%", term.to_lowercase());
    let rows = sqlx::query_as::<_, DbProduct>(&format!(
        "SELECT {PRODUCT_COLUMNS} FROM products WHERE \
         lower(code) LIKE ? OR lower(name) LIKE ? OR lower(description) LIKE ? OR lower(location) LIKE ? \
         ORDER BY created_at DESC LIMIT 50"
    ))
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .bind(&pattern)
    .fetch_all(&state.pool)
    .await?;

    let products = rows
        .into_iter()
        .map(Product::try_from)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Json(products))
}
