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

async fn seed_admin(app: &Router, pool: &SqlitePool) -> Result<String> {
    let (status, body) = send(
        app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "audit_admin", "password": "testpass123" })),
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

    Ok(token)
}

/// The listener consumes the bus asynchronously; poll until the expected
/// number of entries has landed.
async fn wait_for_entries(
    app: &Router,
    token: &str,
    uri: &str,
    expected: usize,
) -> Result<Vec<Value>> {
    for _ in 0..50 {
        let (status, entries) = send(app, "GET", uri, Some(token), None).await?;
        assert_eq!(status, StatusCode::OK, "{entries}");
        let entries = entries.as_array().context("expected array")?.clone();
        if entries.len() >= expected {
            return Ok(entries);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    anyhow::bail!("change log never reached {expected} entries")
}

#[tokio::test]
async fn history_records_create_update_and_status_change() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = seed_admin(&app, &pool).await?;

    let (status, product) = send(
        &app,
        "POST",
        "/subdivisions/CEH-01/products",
        Some(&token),
        Some(json!({ "code": "H-1", "name": "Gearbox", "quantity": 2 })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    let product_uri = format!(
        "/subdivisions/CEH-01/products/{}",
        product["id"].as_str().unwrap()
    );
    let changes_uri = format!("{product_uri}/changes");

    // Plain field edit.
    let (status, _) = send(
        &app,
        "PUT",
        &product_uri,
        Some(&token),
        Some(json!({ "notes": "checked over" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    // Lifecycle move.
    let (status, _) = send(
        &app,
        "PUT",
        &product_uri,
        Some(&token),
        Some(json!({ "status": "written_off" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);

    let entries = wait_for_entries(&app, &token, &changes_uri, 3).await?;

    // Newest first.
    assert_eq!(entries[0]["action"], "status_change");
    assert_eq!(entries[1]["action"], "update");
    assert_eq!(entries[2]["action"], "create");

    // Diffs carry only the changed fields, as old/new pairs.
    assert_eq!(entries[0]["changes"]["status"]["old"], "available");
    assert_eq!(entries[0]["changes"]["status"]["new"], "written_off");
    assert_eq!(entries[1]["changes"]["notes"]["new"], "checked over");
    assert!(entries[1]["changes"].get("status").is_none());

    // The chain links backwards: each entry carries its predecessor's hash.
    assert_eq!(entries[2]["prev_hash"], Value::Null);
    assert_eq!(entries[1]["prev_hash"], entries[2]["hash"]);
    assert_eq!(entries[0]["prev_hash"], entries[1]["hash"]);

    Ok(())
}

#[tokio::test]
async fn history_attributes_the_actor() -> Result<()> {
    let (app, pool, _dir) = setup().await?;
    let token = seed_admin(&app, &pool).await?;

    let (status, product) = send(
        &app,
        "POST",
        "/subdivisions/CEH-01/products",
        Some(&token),
        Some(json!({ "code": "H-2", "name": "Valve" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED);
    let changes_uri = format!(
        "/subdivisions/CEH-01/products/{}/changes",
        product["id"].as_str().unwrap()
    );

    let entries = wait_for_entries(&app, &token, &changes_uri, 1).await?;
    let admin_id: Uuid = sqlx::query_scalar("SELECT id FROM users WHERE username = 'audit_admin'")
        .fetch_one(&pool)
        .await?;
    assert_eq!(entries[0]["changed_by"], admin_id.to_string());

    Ok(())
}
