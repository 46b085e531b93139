use anyhow::{Context, Result};
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use tower::ServiceExt; // for `oneshot`
use uuid::Uuid;

use surplus_catalog::create_app;

async fn setup() -> Result<(Router, SqlitePool, TempDir)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true)
        .foreign_keys(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(
        std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"),
    )
    .await?;
    migrator.run(&pool).await?;

    std::env::set_var("JWT_SECRET", "test-secret");
    let app = create_app(pool.clone()).await?;
    Ok((app, pool, dir))
}

async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body_json: Option<Value>,
) -> Result<(StatusCode, Value)> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let body = match body_json {
        Some(value) => Body::from(value.to_string()),
        None => Body::empty(),
    };
    let resp = app.clone().oneshot(builder.body(body)?).await?;
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await?;
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes)?
    };
    Ok((status, value))
}

async fn register(app: &Router, username: &str) -> Result<(String, Uuid)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": username, "password": "testpass123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = Uuid::parse_str(body["user"]["id"].as_str().context("missing id")?)?;
    Ok((token, user_id))
}

async fn seed(app: &Router, pool: &SqlitePool) -> Result<(String, Uuid)> {
    let (token, admin_id) = register(app, "cascade_admin").await?;
    sqlx::query("UPDATE users SET is_superuser = 1 WHERE id = ?")
        .bind(admin_id)
        .execute(pool)
        .await?;

    let (status, body) = send(
        app,
        "POST",
        "/subdivisions",
        Some(&token),
        Some(json!({ "code": "SKLAD", "name": "Central warehouse" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    let (status, product) = send(
        app,
        "POST",
        "/subdivisions/SKLAD/products",
        Some(&token),
        Some(json!({ "code": "W-1", "name": "Crate of fittings" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    let product_id = Uuid::parse_str(product["id"].as_str().context("missing id")?)?;

    Ok((token, product_id))
}

#[tokio::test]
async fn delete_requires_code_confirmation() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, _) = seed(&app, &pool).await?;

    let (status, body) = send(&app, "DELETE", "/subdivisions/SKLAD", Some(&token), None).await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["field"], "confirm");

    let (status, body) = send(
        &app,
        "DELETE",
        "/subdivisions/SKLAD?confirm=WRONG",
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");

    // The subdivision is untouched after both refusals.
    let (status, _) = send(&app, "GET", "/subdivisions/SKLAD", None, None).await?;
    assert_eq!(status, StatusCode::OK);

    Ok(())
}

#[tokio::test]
async fn delete_cascades_to_products_images_and_history() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, product_id) = seed(&app, &pool).await?;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/subdivisions/SKLAD/products/{product_id}/images"),
        Some(&token),
        Some(json!({ "filename": "crate.jpg", "size_bytes": 2048 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        "DELETE",
        "/subdivisions/SKLAD?confirm=SKLAD",
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["deleted"], "SKLAD");
    assert_eq!(body["products_removed"], 1);

    let (status, _) = send(&app, "GET", "/subdivisions/SKLAD", None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Foreign keys sweep the dependent rows.
    for table in ["products", "product_images", "change_log"] {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(1) FROM {table}"))
            .fetch_one(&pool)
            .await?;
        assert_eq!(count, 0, "{table} should be empty after cascade");
    }

    Ok(())
}

#[tokio::test]
async fn subdivision_code_is_immutable() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, _) = seed(&app, &pool).await?;

    let (status, body) = send(
        &app,
        "PUT",
        "/subdivisions/SKLAD",
        Some(&token),
        Some(json!({ "code": "DEPOT", "name": "Renamed" })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["field"], "code");

    // Echoing the current code back is harmless.
    let (status, body) = send(
        &app,
        "PUT",
        "/subdivisions/SKLAD",
        Some(&token),
        Some(json!({ "code": "SKLAD", "name": "Renamed" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["name"], "Renamed");

    Ok(())
}

#[tokio::test]
async fn non_managers_cannot_delete() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    seed(&app, &pool).await?;

    let (outsider, _) = register(&app, "mere_mortal").await?;
    let (status, _) = send(
        &app,
        "DELETE",
        "/subdivisions/SKLAD?confirm=SKLAD",
        Some(&outsider),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn deleting_a_manager_clears_the_reference() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, _) = seed(&app, &pool).await?;

    let (_, manager_id) = register(&app, "doomed_manager").await?;
    let (status, body) = send(
        &app,
        "PUT",
        "/subdivisions/SKLAD",
        Some(&token),
        Some(json!({ "manager_id": manager_id })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["manager_id"], manager_id.to_string());

    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(manager_id)
        .execute(&pool)
        .await?;

    // ON DELETE SET NULL, not a dangling reference.
    let (status, body) = send(&app, "GET", "/subdivisions/SKLAD", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["manager_id"], Value::Null);

    Ok(())
}
