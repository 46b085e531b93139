use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::app::AppState;
use crate::authz;
use crate::errors::{AppError, AppResult};
use crate::events;
use crate::jwt::AuthUser;
use crate::models::image::{
    self, DbProductImage, ImageUploadRequest, ProductImage, MAX_IMAGE_BYTES,
};
use crate::routes::{products, subdivisions};
use crate::utils::utc_now;

const IMAGE_COLUMNS: &str =
    "id, product_id, image_path, thumbnail_path, is_main, caption, uploaded_by, uploaded_at";

async fn fetch_image(
    pool: &SqlitePool,
    product_id: Uuid,
    image_id: Uuid,
) -> AppResult<DbProductImage> {
    sqlx::query_as::<_, DbProductImage>(&format!(
        "SELECT {IMAGE_COLUMNS} FROM product_images WHERE id = ? AND product_id = ?"
    ))
    .bind(image_id)
    .bind(product_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found("image not found for this product"))
}

#[utoipa::path(
    get,
    path = "/subdivisions/{code}/products/{id}/images",
    tag = "Images",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id")
    ),
    responses((status = 200, description = "Images of the product, main first", body = [ProductImage]))
)]
pub async fn list_images(
    State(state): State<AppState>,
    Path((code, id)): Path<(String, Uuid)>,
) -> AppResult<Json<Vec<ProductImage>>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product = products::fetch_product(&state.pool, subdivision.id, id).await?;

    let images: Vec<ProductImage> = sqlx::query_as::<_, DbProductImage>(&format!(
        "SELECT {IMAGE_COLUMNS} FROM product_images WHERE product_id = ? \
         ORDER BY is_main DESC, uploaded_at"
    ))
    .bind(product.id)
    .fetch_all(&state.pool)
    .await?
    .into_iter()
    .map(ProductImage::from)
    .collect();

    Ok(Json(images))
}

#[utoipa::path(
    post,
    path = "/subdivisions/{code}/products/{id}/images",
    tag = "Images",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id")
    ),
    request_body = ImageUploadRequest,
    responses(
        (status = 201, description = "Image registered", body = ProductImage),
        (status = 403, description = "Caller cannot edit this product"),
        (status = 422, description = "Image exceeds the size cap")
    )
)]
pub async fn upload_image(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, id)): Path<(String, Uuid)>,
    Json(payload): Json<ImageUploadRequest>,
) -> AppResult<(StatusCode, Json<ProductImage>)> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product = products::fetch_product(&state.pool, subdivision.id, id).await?;

    let principal = authz::Principal::load(&state.pool, auth.user_id).await?;
    if !authz::can_edit(Some(&principal), &subdivision.scope(), product.created_by) {
        return Err(AppError::forbidden("caller cannot attach images to this product"));
    }

    if payload.size_bytes > MAX_IMAGE_BYTES {
        return Err(AppError::validation(
            "size_bytes",
            format!("image exceeds the {MAX_IMAGE_BYTES} byte limit"),
        ));
    }

    let filename = payload.filename.trim();
    if filename.is_empty() || filename.contains('/') {
        return Err(AppError::validation("filename", "filename must be a bare file name"));
    }

    let existing: i64 = sqlx::query_scalar("SELECT COUNT(1) FROM product_images WHERE product_id = ?")
        .bind(product.id)
        .fetch_one(&state.pool)
        .await?;

    // The first image of a product is always the main one.
    let is_main = existing == 0 || payload.is_main;
    let path = image::image_path(&subdivision.code, &product.code, filename);
    let image_id = Uuid::new_v4();

    let mut tx = state.pool.begin().await?;

    if is_main {
        sqlx::query("UPDATE product_images SET is_main = 0 WHERE product_id = ?")
            .bind(product.id)
            .execute(&mut *tx)
            .await?;
    }

    sqlx::query(
        "INSERT INTO product_images (id, product_id, image_path, thumbnail_path, is_main, \
         caption, uploaded_by, uploaded_at) VALUES (?, ?, ?, NULL, ?, ?, ?, ?)",
    )
    .bind(image_id)
    .bind(product.id)
    .bind(&path)
    .bind(i64::from(is_main))
    .bind(payload.caption.unwrap_or_default())
    .bind(auth.user_id)
    .bind(utc_now())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;

    events::emit_image_uploaded(&state.event_bus, Some(auth.user_id), image_id);

    let created = fetch_image(&state.pool, product.id, image_id).await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

#[utoipa::path(
    post,
    path = "/subdivisions/{code}/products/{id}/images/{image_id}/main",
    tag = "Images",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id"),
        ("image_id" = Uuid, Path, description = "Image id")
    ),
    responses(
        (status = 200, description = "Image promoted to main", body = ProductImage),
        (status = 403, description = "Caller cannot edit this product")
    )
)]
pub async fn set_main_image(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, id, image_id)): Path<(String, Uuid, Uuid)>,
) -> AppResult<Json<ProductImage>> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product = products::fetch_product(&state.pool, subdivision.id, id).await?;

    let principal = authz::Principal::load(&state.pool, auth.user_id).await?;
    if !authz::can_edit(Some(&principal), &subdivision.scope(), product.created_by) {
        return Err(AppError::forbidden("caller cannot edit this product"));
    }

    let image = fetch_image(&state.pool, product.id, image_id).await?;

    // Unset-then-set in one transaction keeps at most one main image per
    // product at every observable point.
    let mut tx = state.pool.begin().await?;
    sqlx::query("UPDATE product_images SET is_main = 0 WHERE product_id = ?")
        .bind(product.id)
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE product_images SET is_main = 1 WHERE id = ?")
        .bind(image.id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    let updated = fetch_image(&state.pool, product.id, image_id).await?;
    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/subdivisions/{code}/products/{id}/images/{image_id}",
    tag = "Images",
    params(
        ("code" = String, Path, description = "Subdivision code"),
        ("id" = Uuid, Path, description = "Product id"),
        ("image_id" = Uuid, Path, description = "Image id")
    ),
    responses(
        (status = 204, description = "Image removed"),
        (status = 403, description = "Caller cannot edit this product")
    )
)]
pub async fn delete_image(
    State(state): State<AppState>,
    auth: AuthUser,
    Path((code, id, image_id)): Path<(String, Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let subdivision = subdivisions::fetch_by_code(&state.pool, &code).await?;
    let product = products::fetch_product(&state.pool, subdivision.id, id).await?;

    let principal = authz::Principal::load(&state.pool, auth.user_id).await?;
    if !authz::can_edit(Some(&principal), &subdivision.scope(), product.created_by) {
        return Err(AppError::forbidden("caller cannot edit this product"));
    }

    let image = fetch_image(&state.pool, product.id, image_id).await?;
    let was_main = image.is_main != 0;

    let mut tx = state.pool.begin().await?;

    sqlx::query("DELETE FROM product_images WHERE id = ?")
        .bind(image.id)
        .execute(&mut *tx)
        .await?;

    // Deleting the main image promotes the oldest remaining one, so a
    // product with images always has a main image.
    if was_main {
        let next: Option<Uuid> = sqlx::query_scalar(
            "SELECT id FROM product_images WHERE product_id = ? ORDER BY uploaded_at, rowid LIMIT 1",
        )
        .bind(product.id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(next_id) = next {
            sqlx::query("UPDATE product_images SET is_main = 1 WHERE id = ?")
                .bind(next_id)
                .execute(&mut *tx)
                .await?;
        }
    }

    tx.commit().await?;

    Ok(StatusCode::NO_CONTENT)
}
