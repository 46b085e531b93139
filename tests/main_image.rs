use std::time::Duration;

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

/// Superuser + one subdivision + one product; returns (token, product images uri).
async fn seed_product(app: &Router, pool: &SqlitePool) -> Result<(String, String)> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "image_admin", "password": "testpass123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = Uuid::parse_str(body["user"]["id"].as_str().context("missing id")?)?;
    sqlx::query("UPDATE users SET is_superuser = 1 WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;

    let (status, _) = send(
        app,
        "POST",
        "/subdivisions",
        Some(&token),
        Some(json!({ "code": "CEH-01", "name": "Shop" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);

    let (status, product) = send(
        app,
        "POST",
        "/subdivisions/CEH-01/products",
        Some(&token),
        Some(json!({ "code": "NL-0042", "name": "Bearing" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    let uri = format!(
        "/subdivisions/CEH-01/products/{}/images",
        product["id"].as_str().context("missing product id")?
    );

    Ok((token, uri))
}

async fn upload(app: &Router, token: &str, uri: &str, filename: &str, is_main: bool) -> Result<Value> {
    let (status, body) = send(
        app,
        "POST",
        uri,
        Some(token),
        Some(json!({ "filename": filename, "size_bytes": 1024, "is_main": is_main })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    Ok(body)
}

fn main_ids(images: &Value) -> Vec<String> {
    images
        .as_array()
        .unwrap()
        .iter()
        .filter(|img| img["is_main"] == true)
        .map(|img| img["id"].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn exactly_one_main_image_at_all_times() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, uri) = seed_product(&app, &pool).await?;

    // First upload becomes main even without asking.
    let first = upload(&app, &token, &uri, "a.jpg", false).await?;
    assert_eq!(first["is_main"], true);
    assert_eq!(first["image_path"], "product_images/CEH-01/NL-0042/a.jpg");

    let second = upload(&app, &token, &uri, "b.jpg", false).await?;
    assert_eq!(second["is_main"], false);

    // Requesting main on upload displaces the current main.
    let third = upload(&app, &token, &uri, "c.jpg", true).await?;
    assert_eq!(third["is_main"], true);

    let (status, images) = send(&app, "GET", &uri, None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(main_ids(&images), vec![third["id"].as_str().unwrap().to_string()]);

    // Explicit promotion moves the flag, never duplicates it.
    let second_id = second["id"].as_str().unwrap();
    let (status, promoted) = send(
        &app,
        "POST",
        &format!("{uri}/{second_id}/main"),
        Some(&token),
        None,
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{promoted}");
    assert_eq!(promoted["is_main"], true);

    let (_, images) = send(&app, "GET", &uri, None, None).await?;
    assert_eq!(main_ids(&images), vec![second_id.to_string()]);

    Ok(())
}

#[tokio::test]
async fn deleting_main_promotes_oldest_remaining() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, uri) = seed_product(&app, &pool).await?;

    let first = upload(&app, &token, &uri, "a.jpg", false).await?;
    let second = upload(&app, &token, &uri, "b.jpg", false).await?;
    upload(&app, &token, &uri, "c.jpg", false).await?;

    let first_id = first["id"].as_str().unwrap();
    let (status, _) = send(&app, "DELETE", &format!("{uri}/{first_id}"), Some(&token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (_, images) = send(&app, "GET", &uri, None, None).await?;
    assert_eq!(images.as_array().map(|a| a.len()), Some(2));
    // The oldest remaining upload inherits the flag.
    assert_eq!(main_ids(&images), vec![second["id"].as_str().unwrap().to_string()]);

    Ok(())
}

#[tokio::test]
async fn oversized_upload_is_rejected() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, uri) = seed_product(&app, &pool).await?;

    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "filename": "huge.jpg", "size_bytes": 10 * 1024 * 1024 + 1 })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
    assert_eq!(body["field"], "size_bytes");

    // Exactly at the cap is allowed.
    let (status, body) = send(
        &app,
        "POST",
        &uri,
        Some(&token),
        Some(json!({ "filename": "cap.jpg", "size_bytes": 10 * 1024 * 1024 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{body}");

    Ok(())
}

#[tokio::test]
async fn thumbnail_worker_fills_reference() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let (token, uri) = seed_product(&app, &pool).await?;

    let image = upload(&app, &token, &uri, "front.jpg", false).await?;
    assert_eq!(image["thumbnail_path"], Value::Null);
    let image_id = image["id"].as_str().unwrap().to_string();

    // The worker runs off the event bus; poll until it has caught up.
    let mut thumbnail = None;
    for _ in 0..50 {
        let (_, images) = send(&app, "GET", &uri, None, None).await?;
        let found = images
            .as_array()
            .unwrap()
            .iter()
            .find(|img| img["id"] == Value::String(image_id.clone()))
            .and_then(|img| img["thumbnail_path"].as_str().map(str::to_string));
        if let Some(path) = found {
            thumbnail = Some(path);
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    assert_eq!(
        thumbnail.as_deref(),
        Some("product_thumbnails/CEH-01/NL-0042/thumb_front.jpg")
    );

    Ok(())
}
