use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

pub const MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProductImage {
    pub id: Uuid,
    pub product_id: Uuid,
    /// Reference into the media store, keyed by subdivision and product code.
    pub image_path: String,
    /// Populated asynchronously by the thumbnail worker; absent until then.
    pub thumbnail_path: Option<String>,
    pub is_main: bool,
    pub caption: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProductImage {
    pub id: Uuid,
    pub product_id: Uuid,
    pub image_path: String,
    pub thumbnail_path: Option<String>,
    pub is_main: i64,
    pub caption: String,
    pub uploaded_by: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

impl From<DbProductImage> for ProductImage {
    fn from(value: DbProductImage) -> Self {
        ProductImage {
            id: value.id,
            product_id: value.product_id,
            image_path: value.image_path,
            thumbnail_path: value.thumbnail_path,
            is_main: value.is_main != 0,
            caption: value.caption,
            uploaded_by: value.uploaded_by,
            uploaded_at: value.uploaded_at,
        }
    }
}

/// Upload registration. Binary storage mechanics live in the media
/// collaborator; the catalog records the reference and validates size.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ImageUploadRequest {
    #[schema(example = "bearing-front.jpg")]
    pub filename: String,
    pub size_bytes: u64,
    pub caption: Option<String>,
    /// Request main-image status; the first image of a product becomes main
    /// regardless.
    #[serde(default)]
    pub is_main: bool,
}

/// Media-store path for an original upload.
pub fn image_path(subdivision_code: &str, product_code: &str, filename: &str) -> String {
    format!("product_images/{subdivision_code}/{product_code}/{filename}")
}

/// Derived thumbnail reference for an original path. Returns `None` when the
/// original does not follow the media-store layout.
pub fn thumbnail_path(image_path: &str) -> Option<String> {
    let rest = image_path.strip_prefix("product_images/")?;
    let (dir, filename) = rest.rsplit_once('/')?;
    Some(format!("product_thumbnails/{dir}/thumb_{filename}"))
}
