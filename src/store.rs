use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Bag, BagItem, BagPatch, ItemPatch, NewBag, NewBagItem, ServiceError};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store request failed: {0}")]
    Request(String),
    #[error("unexpected store payload: {0}")]
    Deserialize(String),
    #[error("row not found")]
    NotFound,
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ServiceError::not_found("store", "row not found"),
            other => ServiceError::internal("store", other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct StoreStats {
    pub bags: u64,
    pub items: u64,
}

/// Persistence seam for bags, items, and photo blobs. Handlers and the save
/// step only see this trait; the Supabase client implements it in production
/// and an in-memory store stands in under test.
#[async_trait]
pub trait BagStore: Send + Sync {
    async fn create_bag(&self, bag: NewBag) -> Result<Bag, StoreError>;
    async fn bags_for_owner(&self, owner_id: Uuid) -> Result<Vec<Bag>, StoreError>;
    async fn bag_by_id(&self, id: Uuid) -> Result<Option<Bag>, StoreError>;
    async fn bag_by_handle(&self, handle: &str) -> Result<Option<Bag>, StoreError>;
    async fn update_bag(&self, id: Uuid, patch: BagPatch) -> Result<Bag, StoreError>;
    /// Removes the bag and all of its items.
    async fn delete_bag(&self, id: Uuid) -> Result<(), StoreError>;

    /// Items ordered by ascending sort_index.
    async fn items_for_bag(&self, bag_id: Uuid) -> Result<Vec<BagItem>, StoreError>;
    async fn item_by_id(&self, id: Uuid) -> Result<Option<BagItem>, StoreError>;
    async fn insert_item(&self, item: NewBagItem) -> Result<BagItem, StoreError>;
    async fn update_item(&self, id: Uuid, patch: ItemPatch) -> Result<BagItem, StoreError>;
    async fn delete_item(&self, id: Uuid) -> Result<(), StoreError>;
    /// Highest sort_index currently in the bag, None when empty.
    async fn max_sort_index(&self, bag_id: Uuid) -> Result<Option<i32>, StoreError>;

    /// Stores a photo blob and returns its public URL.
    async fn upload_photo(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError>;

    async fn recent_bags(&self, limit: usize, public_only: bool) -> Result<Vec<Bag>, StoreError>;
    async fn stats(&self) -> Result<StoreStats, StoreError>;
}
