//! Domain events and their background consumers.
//!
//! Mutating handlers emit an event after the write commits; two detached
//! workers consume the bus: one projects product events into the append-only
//! `change_log`, the other fills in thumbnail references for uploaded
//! images. Both are fire-and-forget: a failed or lagging consumer never
//! fails the request that produced the event.

pub mod diff;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::models::changelog::ChangeAction;
use crate::models::image;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: &'static str,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(
        name: &'static str,
        actor_id: Option<Uuid>,
        subject_id: Option<Uuid>,
        payload: T,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name,
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

fn product_event_name(action: ChangeAction) -> &'static str {
    match action {
        ChangeAction::Create => "product.create",
        ChangeAction::Update => "product.update",
        ChangeAction::Delete => "product.delete",
        ChangeAction::StatusChange => "product.status_change",
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductChangePayload {
    pub product_id: Uuid,
    pub action: ChangeAction,
    pub changes: Value,
}

/// Emit a product mutation onto the bus. Call after the write commits.
pub fn emit_product_change(
    bus: &EventBus,
    action: ChangeAction,
    actor_id: Option<Uuid>,
    product_id: Uuid,
    changes: Value,
) {
    let payload = ProductChangePayload {
        product_id,
        action,
        changes,
    };
    let event = DomainEvent::new(
        product_event_name(action),
        actor_id,
        Some(product_id),
        serde_json::to_value(&payload).unwrap_or_default(),
    );
    // Fire and forget: a full or closed bus must not break the write path.
    let _ = bus.send(serde_json::to_value(event).unwrap_or_default());
}

/// Emit an upload notification for the thumbnail pipeline.
pub fn emit_image_uploaded(bus: &EventBus, actor_id: Option<Uuid>, image_id: Uuid) {
    let event = DomainEvent::new(
        "image.uploaded",
        actor_id,
        Some(image_id),
        serde_json::json!({ "image_id": image_id }),
    );
    let _ = bus.send(serde_json::to_value(event).unwrap_or_default());
}

/// Project product events into the `change_log` table, hash-chained.
///
/// `delete` events are traced but not inserted: change-log rows cascade away
/// with their product, so a delete entry could never be read back.
pub async fn start_change_log_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("change log listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "change log listener lagged; audit entries dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("");
        if !name.starts_with("product.") {
            continue;
        }

        let payload: ProductChangePayload = match event
            .get("payload")
            .cloned()
            .map(serde_json::from_value)
        {
            Some(Ok(payload)) => payload,
            _ => {
                tracing::error!(%name, "malformed product event payload");
                continue;
            }
        };

        if payload.action == ChangeAction::Delete {
            tracing::info!(product_id = %payload.product_id, "product deleted; history cascades");
            continue;
        }

        let actor_id = event
            .get("actor_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        if let Err(err) = insert_entry(&pool, &payload, actor_id).await {
            tracing::error!(%err, product_id = %payload.product_id, "failed to append change log entry");
        }
    }
}

async fn insert_entry(
    pool: &SqlitePool,
    payload: &ProductChangePayload,
    actor_id: Option<Uuid>,
) -> Result<(), sqlx::Error> {
    let changes_str = serde_json::to_string(&payload.changes).unwrap_or_else(|_| "{}".to_string());

    let prev_hash: Option<String> =
        sqlx::query_scalar("SELECT hash FROM change_log ORDER BY created_at DESC, rowid DESC LIMIT 1")
            .fetch_optional(pool)
            .await?
            .flatten();

    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    if let Some(ref prev) = prev_hash {
        hasher.update(prev.as_bytes());
    }
    hasher.update(changes_str.as_bytes());
    let hash = hex::encode(hasher.finalize());

    sqlx::query(
        "INSERT INTO change_log (id, product_id, action, changed_by, changes, prev_hash, hash, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(Uuid::new_v4())
    .bind(payload.product_id)
    .bind(payload.action.as_str())
    .bind(actor_id)
    .bind(&changes_str)
    .bind(&prev_hash)
    .bind(&hash)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(())
}

/// Populate thumbnail references for freshly uploaded images. Any failure
/// degrades to "no thumbnail yet" and is only logged.
pub async fn start_thumbnail_worker(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("thumbnail worker started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "thumbnail worker lagged; uploads stay un-thumbnailed");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if event.get("name").and_then(|v| v.as_str()) != Some("image.uploaded") {
            continue;
        }

        let image_id = event
            .pointer("/payload/image_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok());

        let Some(image_id) = image_id else {
            tracing::error!("image.uploaded event without image_id");
            continue;
        };

        if let Err(err) = generate_thumbnail(&pool, image_id).await {
            tracing::error!(%err, %image_id, "thumbnail generation failed");
        }
    }
}

async fn generate_thumbnail(pool: &SqlitePool, image_id: Uuid) -> Result<(), sqlx::Error> {
    let image_path: Option<String> =
        sqlx::query_scalar("SELECT image_path FROM product_images WHERE id = ?")
            .bind(image_id)
            .fetch_optional(pool)
            .await?;

    let Some(image_path) = image_path else {
        // The image may already be gone (product deleted under us).
        tracing::warn!(%image_id, "image vanished before thumbnailing");
        return Ok(());
    };

    let Some(thumb) = image::thumbnail_path(&image_path) else {
        tracing::warn!(%image_id, %image_path, "image path outside media layout; skipping thumbnail");
        return Ok(());
    };

    sqlx::query("UPDATE product_images SET thumbnail_path = ? WHERE id = ?")
        .bind(&thumb)
        .bind(image_id)
        .execute(pool)
        .await?;

    tracing::debug!(%image_id, %thumb, "thumbnail reference recorded");
    Ok(())
}
