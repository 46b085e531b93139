use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

pub const MIN_QUANTITY: u32 = 1;
pub const MAX_QUANTITY: u32 = 99_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductStatus {
    Available,
    Reserved,
    Used,
    WrittenOff,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Available => "available",
            ProductStatus::Reserved => "reserved",
            ProductStatus::Used => "used",
            ProductStatus::WrittenOff => "written_off",
        }
    }

    pub fn from_str(value: &str) -> Option<ProductStatus> {
        match value {
            "available" => Some(ProductStatus::Available),
            "reserved" => Some(ProductStatus::Reserved),
            "used" => Some(ProductStatus::Used),
            "written_off" => Some(ProductStatus::WrittenOff),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProductCondition {
    New,
    Used,
    Defective,
    ForParts,
}

impl ProductCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductCondition::New => "new",
            ProductCondition::Used => "used",
            ProductCondition::Defective => "defective",
            ProductCondition::ForParts => "for_parts",
        }
    }

    pub fn from_str(value: &str) -> Option<ProductCondition> {
        match value {
            "new" => Some(ProductCondition::New),
            "used" => Some(ProductCondition::Used),
            "defective" => Some(ProductCondition::Defective),
            "for_parts" => Some(ProductCondition::ForParts),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Product {
    pub id: Uuid,
    /// Unique within its subdivision, not globally.
    pub code: String,
    pub name: String,
    pub description: String,
    /// Free-form key-value attribute bag.
    #[schema(value_type = Object)]
    pub characteristics: Value,
    pub subdivision_id: Uuid,
    pub created_by: Option<Uuid>,
    pub status: ProductStatus,
    pub condition: ProductCondition,
    pub quantity: u32,
    pub unit: String,
    pub location: String,
    pub storage_date: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct DbProduct {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub description: String,
    pub characteristics: String,
    pub subdivision_id: Uuid,
    pub created_by: Option<Uuid>,
    pub status: String,
    pub condition: String,
    pub quantity: i64,
    pub unit: String,
    pub location: String,
    pub storage_date: Option<NaiveDate>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbProduct> for Product {
    type Error = AppError;

    fn try_from(value: DbProduct) -> Result<Self, Self::Error> {
        let status = ProductStatus::from_str(&value.status)
            .ok_or_else(|| AppError::internal(format!("unknown product status {:?}", value.status)))?;
        let condition = ProductCondition::from_str(&value.condition).ok_or_else(|| {
            AppError::internal(format!("unknown product condition {:?}", value.condition))
        })?;
        let characteristics = serde_json::from_str(&value.characteristics)
            .unwrap_or_else(|_| Value::Object(Default::default()));
        let quantity = u32::try_from(value.quantity)
            .map_err(|_| AppError::internal(format!("quantity {} out of range", value.quantity)))?;

        Ok(Product {
            id: value.id,
            code: value.code,
            name: value.name,
            description: value.description,
            characteristics,
            subdivision_id: value.subdivision_id,
            created_by: value.created_by,
            status,
            condition,
            quantity,
            unit: value.unit,
            location: value.location,
            storage_date: value.storage_date,
            notes: value.notes,
            created_at: value.created_at,
            updated_at: value.updated_at,
        })
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductCreateRequest {
    #[schema(example = "NL-0042")]
    pub code: String,
    #[schema(example = "Bearing 6204, surplus batch")]
    pub name: String,
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub characteristics: Option<Value>,
    pub status: Option<ProductStatus>,
    pub condition: Option<ProductCondition>,
    pub quantity: Option<u32>,
    #[schema(example = "pcs")]
    pub unit: Option<String>,
    #[schema(example = "Rack B, shelf 3")]
    pub location: Option<String>,
    pub storage_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductUpdateRequest {
    pub name: Option<String>,
    pub description: Option<String>,
    #[schema(value_type = Object)]
    pub characteristics: Option<Value>,
    pub status: Option<ProductStatus>,
    pub condition: Option<ProductCondition>,
    pub quantity: Option<u32>,
    pub unit: Option<String>,
    pub location: Option<String>,
    pub storage_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ProductFilter {
    pub status: Option<ProductStatus>,
    pub condition: Option<ProductCondition>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct SearchQuery {
    pub q: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CodeCheckResponse {
    pub valid: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(quantity: i64) -> DbProduct {
        let now = Utc::now();
        DbProduct {
            id: Uuid::new_v4(),
            code: "NL-1".into(),
            name: "Bearing".into(),
            description: String::new(),
            characteristics: "{}".into(),
            subdivision_id: Uuid::new_v4(),
            created_by: None,
            status: "available".into(),
            condition: "used".into(),
            quantity,
            unit: "pcs".into(),
            location: String::new(),
            storage_date: None,
            notes: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn row_conversion_checks_the_quantity_range() {
        assert_eq!(Product::try_from(row(5)).unwrap().quantity, 5);
        assert!(Product::try_from(row(-1)).is_err());
    }

    #[test]
    fn row_conversion_rejects_unknown_status() {
        let mut bad = row(1);
        bad.status = "mislaid".into();
        assert!(Product::try_from(bad).is_err());
    }
}
