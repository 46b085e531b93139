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
    assert_eq!(status, StatusCode::CREATED, "register failed: {body}");
    let token = body["token"].as_str().context("missing token")?.to_string();
    let user_id = Uuid::parse_str(body["user"]["id"].as_str().context("missing user id")?)?;
    Ok((token, user_id))
}

async fn make_superuser(pool: &SqlitePool, user_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE users SET is_superuser = 1 WHERE id = ?")
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[tokio::test]
async fn full_catalog_flow() -> Result<()> {
    let (app, pool, _dir) = setup().await?;

    // Admin registers and is promoted.
    let (admin_token, admin_id) = register(&app, "catalog_admin").await?;
    make_superuser(&pool, admin_id).await?;

    // Admin creates a subdivision.
    let (status, sub) = send(
        &app,
        "POST",
        "/subdivisions",
        Some(&admin_token),
        Some(json!({ "code": "CEH-01", "name": "Assembly shop No. 1" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{sub}");
    assert_eq!(sub["code"], "CEH-01");

    // An editor joins; admin grants the role and binds the home subdivision.
    let (editor_token, editor_id) = register(&app, "shop_editor").await?;
    let (status, body) = send(
        &app,
        "POST",
        &format!("/users/{editor_id}/roles"),
        Some(&admin_token),
        Some(json!({ "role": "Editor" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    let (status, body) = send(
        &app,
        "PUT",
        &format!("/users/{editor_id}/profile"),
        Some(&admin_token),
        Some(json!({ "subdivision_code": "CEH-01" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["subdivision_code"], "CEH-01");

    // The editor can now add products at home.
    let (status, product) = send(
        &app,
        "POST",
        "/subdivisions/CEH-01/products",
        Some(&editor_token),
        Some(json!({
            "code": "NL-0042",
            "name": "Bearing 6204, surplus batch",
            "quantity": 12,
            "condition": "new",
            "location": "Rack B, shelf 3"
        })),
    )
    .await?;
    assert_eq!(status, StatusCode::CREATED, "{product}");
    let product_id = product["id"].as_str().context("missing product id")?.to_string();
    assert_eq!(product["status"], "available");
    assert_eq!(product["quantity"], 12);

    // Listing and anonymous detail both work; the detail carries action flags.
    let (status, list) = send(&app, "GET", "/subdivisions/CEH-01/products", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list.as_array().map(|a| a.len()), Some(1));

    let detail_uri = format!("/subdivisions/CEH-01/products/{product_id}");
    let (status, detail) = send(&app, "GET", &detail_uri, Some(&editor_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["can_edit"], true);
    assert_eq!(detail["can_delete"], false);

    let (status, detail) = send(&app, "GET", &detail_uri, None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["can_edit"], false);

    // The editor updates their own record.
    let (status, updated) = send(
        &app,
        "PUT",
        &detail_uri,
        Some(&editor_token),
        Some(json!({ "status": "reserved", "notes": "held for line 3" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{updated}");
    assert_eq!(updated["status"], "reserved");
    assert_eq!(updated["notes"], "held for line 3");

    // Global search finds it by name fragment.
    let (status, hits) = send(&app, "GET", "/products/search?q=bearing", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().map(|a| a.len()), Some(1));
    assert_eq!(hits[0]["code"], "NL-0042");

    let (status, hits) = send(&app, "GET", "/products/search?q=nonexistent", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(hits.as_array().map(|a| a.len()), Some(0));

    // Subdivision list reports counts and status stats.
    let (status, overview) = send(&app, "GET", "/subdivisions", None, None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(overview["total_products"], 1);
    assert_eq!(overview["subdivisions"][0]["product_count"], 1);
    assert_eq!(overview["status_stats"][0]["status"], "reserved");

    // /auth/me reflects the editor's bindings.
    let (status, me) = send(&app, "GET", "/auth/me", Some(&editor_token), None).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["roles"], json!(["Editor"]));
    assert_eq!(me["home_subdivision_code"], "CEH-01");
    assert_eq!(me["created_products"], 1);

    // The admin deletes the product.
    let (status, _) = send(&app, "DELETE", &detail_uri, Some(&admin_token), None).await?;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _) = send(&app, "GET", &detail_uri, None, None).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    Ok(())
}

#[tokio::test]
async fn duplicate_username_is_rejected() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    register(&app, "taken_name").await?;
    let (status, body) = send(
        &app,
        "POST",
        "/auth/register",
        None,
        Some(json!({ "username": "taken_name", "password": "testpass123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::CONFLICT, "{body}");

    Ok(())
}

#[tokio::test]
async fn login_round_trip() -> Result<()> {
    let (app, _pool, _dir) = setup().await?;

    register(&app, "login_user").await?;

    let (status, body) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "login_user", "password": "testpass123" })),
    )
    .await?;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["token"].as_str().is_some());

    let (status, body) = send(
        &app,
        "POST",
        "/auth/login",
        None,
        Some(json!({ "username": "login_user", "password": "wrong-password" })),
    )
    .await?;
    assert_eq!(status, StatusCode::UNAUTHORIZED, "{body}");

    Ok(())
}
