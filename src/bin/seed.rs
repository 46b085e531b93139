//! Seed utility: provisions the canonical roles and an optional demo data
//! set for local development.
//!
//! ```text
//! cargo run --bin seed -- roles
//! cargo run --bin seed -- demo
//! ```

use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use uuid::Uuid;

use surplus_catalog::authz::Role;
use surplus_catalog::errors::AppResult;
use surplus_catalog::models::profile::ensure_profile;
use surplus_catalog::routes::profiles::ensure_role;
use surplus_catalog::utils::{hash_password, utc_now};
use surplus_catalog::db;

const DEMO_PASSWORD: &str = "testpass123";

#[derive(Parser)]
#[command(name = "seed", about = "Provision roles and demo data")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the canonical role rows (idempotent).
    Roles,
    /// Create roles plus demo subdivisions, users and bindings (idempotent).
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let pool = db::init().await?;

    match cli.command {
        Command::Roles => seed_roles(&pool).await?,
        Command::Demo => {
            seed_roles(&pool).await?;
            seed_demo(&pool).await?;
        }
    }

    Ok(())
}

async fn seed_roles(pool: &SqlitePool) -> AppResult<()> {
    for role in Role::ALL {
        ensure_role(pool, role).await?;
        tracing::info!(role = role.as_str(), "role ensured");
    }
    Ok(())
}

async fn seed_demo(pool: &SqlitePool) -> AppResult<()> {
    let admin_ceh1 = ensure_user(pool, "admin_ceh1", false).await?;
    let admin_ceh2 = ensure_user(pool, "admin_ceh2", false).await?;
    let viewer = ensure_user(pool, "viewer_user", false).await?;
    let editor = ensure_user(pool, "editor_user", false).await?;
    let super_admin = ensure_user(pool, "super_admin", true).await?;

    let ceh1 = ensure_subdivision(
        pool,
        "CEH-01",
        "Assembly shop No. 1",
        "Surplus stock of the first assembly shop",
        Some(admin_ceh1),
    )
    .await?;
    let ceh2 = ensure_subdivision(
        pool,
        "CEH-02",
        "Assembly shop No. 2",
        "Surplus stock of the second assembly shop",
        Some(admin_ceh2),
    )
    .await?;
    ensure_subdivision(pool, "SKLAD", "Central warehouse", "Shared storage", None).await?;

    grant(pool, viewer, Role::Viewer).await?;
    grant(pool, editor, Role::Editor).await?;
    grant(pool, admin_ceh1, Role::SubdivisionAdmin).await?;
    grant(pool, admin_ceh2, Role::SubdivisionAdmin).await?;
    grant(pool, super_admin, Role::SuperAdmin).await?;

    bind_home(pool, editor, ceh1).await?;
    bind_home(pool, admin_ceh1, ceh1).await?;
    bind_home(pool, admin_ceh2, ceh2).await?;

    tracing::info!("demo data ensured; all demo accounts use password {DEMO_PASSWORD}");
    Ok(())
}

async fn ensure_user(pool: &SqlitePool, username: &str, is_superuser: bool) -> AppResult<Uuid> {
    if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM users WHERE username = ?")
        .bind(username)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO users (id, username, password_hash, is_superuser, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(username)
    .bind(hash_password(DEMO_PASSWORD)?)
    .bind(i64::from(is_superuser))
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    ensure_profile(pool, id).await?;
    tracing::info!(%username, "demo user created");
    Ok(id)
}

async fn ensure_subdivision(
    pool: &SqlitePool,
    code: &str,
    name: &str,
    description: &str,
    manager_id: Option<Uuid>,
) -> AppResult<Uuid> {
    if let Some(id) = sqlx::query_scalar::<_, Uuid>("SELECT id FROM subdivisions WHERE code = ?")
        .bind(code)
        .fetch_optional(pool)
        .await?
    {
        return Ok(id);
    }

    let id = Uuid::new_v4();
    let now = utc_now();
    sqlx::query(
        "INSERT INTO subdivisions (id, code, name, description, manager_id, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(code)
    .bind(name)
    .bind(description)
    .bind(manager_id)
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    tracing::info!(%code, "demo subdivision created");
    Ok(id)
}

async fn grant(pool: &SqlitePool, user_id: Uuid, role: Role) -> AppResult<()> {
    let role_id = ensure_role(pool, role).await?;
    sqlx::query(
        "INSERT INTO user_roles (user_id, role_id, created_at) VALUES (?, ?, ?) \
         ON CONFLICT(user_id, role_id) DO NOTHING",
    )
    .bind(user_id)
    .bind(role_id)
    .bind(utc_now())
    .execute(pool)
    .await?;
    Ok(())
}

async fn bind_home(pool: &SqlitePool, user_id: Uuid, subdivision_id: Uuid) -> AppResult<()> {
    ensure_profile(pool, user_id).await?;
    sqlx::query("UPDATE profiles SET subdivision_id = ?, updated_at = ? WHERE user_id = ?")
        .bind(subdivision_id)
        .bind(utc_now())
        .bind(user_id)
        .execute(pool)
        .await?;
    Ok(())
}
