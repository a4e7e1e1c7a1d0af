use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;
use uuid::Uuid;

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bag {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub handle: String,
    pub title: String,
    pub description: Option<String>,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BagItem {
    pub id: Uuid,
    pub bag_id: Uuid,
    pub name: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub photo_url: Option<String>,
    pub source_url: Option<String>,
    pub notes: Option<String>,
    pub sort_index: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BagDetail {
    pub bag: Bag,
    pub items: Vec<BagItem>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct NewBag {
    pub owner_id: Uuid,
    pub handle: String,
    pub title: String,
    pub description: Option<String>,
    pub is_public: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Serialize)]
pub struct NewBagItem {
    pub bag_id: Uuid,
    pub name: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    pub photo_url: Option<String>,
    pub source_url: Option<String>,
    pub notes: Option<String>,
    pub sort_index: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBagRequest {
    pub title: String,
    #[serde(default)]
    pub handle: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: bool,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BagPatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_public: Option<bool>,
}

#[skip_serializing_none]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub sort_index: Option<i32>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.brand.is_none()
            && self.price.is_none()
            && self.currency.is_none()
            && self.photo_url.is_none()
            && self.source_url.is_none()
            && self.notes.is_none()
            && self.sort_index.is_none()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub input: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeRequest {
    pub photos: PhotoList,
    #[serde(default)]
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PhotoList {
    Single(String),
    Multiple(Vec<String>),
}

impl PhotoList {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            PhotoList::Single(value) => vec![value],
            PhotoList::Multiple(values) => values,
        }
    }
}

/// Extraction output held in memory until the client confirms a save.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    pub name: String,
    pub brand: Option<String>,
    pub price: Option<f64>,
    pub currency: Option<String>,
    #[serde(default)]
    pub photo_candidates: Vec<String>,
    pub source_token: String,
    pub notes: Option<String>,
}

impl ExtractedItem {
    pub fn named(name: impl Into<String>, source_token: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            brand: None,
            price: None,
            currency: None,
            photo_candidates: Vec::new(),
            source_token: source_token.into(),
            notes: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SaveRequest {
    pub items: Vec<AcceptedItem>,
}

/// A client-confirmed (possibly edited) item ready to become a row.
#[derive(Debug, Clone, Deserialize)]
pub struct AcceptedItem {
    pub name: String,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub photo: Option<PhotoSource>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum PhotoSource {
    Url(String),
    Inline { data: String, content_type: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SaveReport {
    pub saved: usize,
    pub failed: usize,
    pub results: Vec<SaveResult>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveResult {
    Saved { index: usize, item: BagItem },
    Failed { index: usize, error: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReorderRequest {
    pub item_ids: Vec<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Error)]
#[error("operation `{op}` failed: {message}")]
pub struct ServiceError {
    op: &'static str,
    message: String,
    kind: ServiceErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    InvalidInput,
    Unauthorized,
    NotFound,
    Internal,
}

impl ServiceError {
    pub fn invalid_input(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
            kind: ServiceErrorKind::InvalidInput,
        }
    }

    pub fn unauthorized(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
            kind: ServiceErrorKind::Unauthorized,
        }
    }

    pub fn not_found(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
            kind: ServiceErrorKind::NotFound,
        }
    }

    pub fn internal(op: &'static str, message: impl Into<String>) -> Self {
        Self {
            op,
            message: message.into(),
            kind: ServiceErrorKind::Internal,
        }
    }

    pub fn op(&self) -> &'static str {
        self.op
    }

    pub fn kind(&self) -> ServiceErrorKind {
        self.kind
    }

    pub fn detail(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn photo_list_accepts_single_and_multiple() {
        let single: PhotoList = serde_json::from_str("\"https://cdn.example.com/a.jpg\"").unwrap();
        assert_eq!(single.into_vec().len(), 1);

        let multiple: PhotoList =
            serde_json::from_str("[\"https://a.example/1.jpg\",\"https://a.example/2.jpg\"]")
                .unwrap();
        assert_eq!(multiple.into_vec().len(), 2);
    }

    #[test]
    fn photo_source_untagged_forms() {
        let url: PhotoSource = serde_json::from_str("\"https://cdn.example.com/a.jpg\"").unwrap();
        assert!(matches!(url, PhotoSource::Url(_)));

        let inline: PhotoSource =
            serde_json::from_str(r#"{"data":"aGVsbG8=","content_type":"image/png"}"#).unwrap();
        assert!(matches!(inline, PhotoSource::Inline { .. }));
    }

    #[test]
    fn extracted_item_drops_empty_optionals_from_json() {
        let item = ExtractedItem::named("Air Max 90", "Nike Air Max, $120");
        let value = serde_json::to_value(&item).unwrap();
        assert!(value.get("brand").is_none());
        assert!(value.get("price").is_none());
        assert_eq!(value["name"], "Air Max 90");
    }

    #[test]
    fn item_patch_empty_detection() {
        assert!(ItemPatch::default().is_empty());
        let patch = ItemPatch {
            name: Some("renamed".into()),
            ..ItemPatch::default()
        };
        assert!(!patch.is_empty());
    }
}
