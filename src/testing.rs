//! In-memory doubles for the store and extractor seams. Test-only module.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::classify::ClassifiedToken;
use crate::extract::{Extract, ExtractFailure, FailureReason};
use crate::models::{Bag, BagItem, BagPatch, ExtractedItem, ItemPatch, NewBag, NewBagItem};
use crate::store::{BagStore, StoreError, StoreStats};

/// Scripted extraction strategy. By default every call succeeds with an item
/// echoing the token; failures and delays are opted into per instance.
pub struct MockExtractor {
    failure: Option<ExtractFailure>,
    delay: Option<Duration>,
    note: Option<String>,
    calls: AtomicUsize,
}

impl MockExtractor {
    pub fn completing() -> Self {
        Self {
            failure: None,
            delay: None,
            note: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(reason: FailureReason) -> Self {
        Self {
            failure: Some(ExtractFailure {
                reason,
                detail: "scripted failure".into(),
            }),
            ..Self::completing()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_note(mut self, note: &str) -> Self {
        self.note = Some(note.to_string());
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Extract for MockExtractor {
    async fn extract(&self, token: &ClassifiedToken) -> Result<ExtractedItem, ExtractFailure> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(failure) = &self.failure {
            return Err(failure.clone());
        }
        let mut item = ExtractedItem::named(token.raw.clone(), &token.raw);
        item.notes = self.note.clone();
        Ok(item)
    }
}

#[derive(Default)]
struct MemoryInner {
    bags: HashMap<Uuid, Bag>,
    items: HashMap<Uuid, BagItem>,
}

/// `BagStore` backed by hash maps, with per-call failure injection so the
/// save step's partial-tolerance policy can be exercised offline.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    fail_uploads: bool,
    fail_inserts_named: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every `upload_photo` call errors.
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Self::default()
        }
    }

    /// `insert_item` errors for rows with this exact name.
    pub fn failing_insert_named(name: &str) -> Self {
        Self {
            fail_inserts_named: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn seed_bag(&self, owner_id: Uuid) -> Bag {
        let bag = Bag {
            id: Uuid::new_v4(),
            owner_id,
            handle: format!("bag-{}", Uuid::new_v4().simple()),
            title: "test bag".into(),
            description: None,
            is_public: false,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.inner
            .lock()
            .unwrap()
            .bags
            .insert(bag.id, bag.clone());
        bag
    }

    pub fn item_count(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }
}

#[async_trait]
impl BagStore for MemoryStore {
    async fn create_bag(&self, bag: NewBag) -> Result<Bag, StoreError> {
        let row = Bag {
            id: Uuid::new_v4(),
            owner_id: bag.owner_id,
            handle: bag.handle,
            title: bag.title,
            description: bag.description,
            is_public: bag.is_public,
            created_at: Utc::now(),
            updated_at: None,
        };
        self.inner
            .lock()
            .unwrap()
            .bags
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn bags_for_owner(&self, owner_id: Uuid) -> Result<Vec<Bag>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut bags: Vec<Bag> = inner
            .bags
            .values()
            .filter(|bag| bag.owner_id == owner_id)
            .cloned()
            .collect();
        bags.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(bags)
    }

    async fn bag_by_id(&self, id: Uuid) -> Result<Option<Bag>, StoreError> {
        Ok(self.inner.lock().unwrap().bags.get(&id).cloned())
    }

    async fn bag_by_handle(&self, handle: &str) -> Result<Option<Bag>, StoreError> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .bags
            .values()
            .find(|bag| bag.handle == handle)
            .cloned())
    }

    async fn update_bag(&self, id: Uuid, patch: BagPatch) -> Result<Bag, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let bag = inner.bags.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(title) = patch.title {
            bag.title = title;
        }
        if let Some(description) = patch.description {
            bag.description = Some(description);
        }
        if let Some(is_public) = patch.is_public {
            bag.is_public = is_public;
        }
        bag.updated_at = Some(Utc::now());
        Ok(bag.clone())
    }

    async fn delete_bag(&self, id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().unwrap();
        inner.items.retain(|_, item| item.bag_id != id);
        inner.bags.remove(&id);
        Ok(())
    }

    async fn items_for_bag(&self, bag_id: Uuid) -> Result<Vec<BagItem>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut items: Vec<BagItem> = inner
            .items
            .values()
            .filter(|item| item.bag_id == bag_id)
            .cloned()
            .collect();
        items.sort_by_key(|item| item.sort_index);
        Ok(items)
    }

    async fn item_by_id(&self, id: Uuid) -> Result<Option<BagItem>, StoreError> {
        Ok(self.inner.lock().unwrap().items.get(&id).cloned())
    }

    async fn insert_item(&self, item: NewBagItem) -> Result<BagItem, StoreError> {
        if self.fail_inserts_named.as_deref() == Some(item.name.as_str()) {
            return Err(StoreError::Request("scripted insert failure".into()));
        }
        let row = BagItem {
            id: Uuid::new_v4(),
            bag_id: item.bag_id,
            name: item.name,
            brand: item.brand,
            price: item.price,
            currency: item.currency,
            photo_url: item.photo_url,
            source_url: item.source_url,
            notes: item.notes,
            sort_index: item.sort_index,
            created_at: Utc::now(),
        };
        self.inner
            .lock()
            .unwrap()
            .items
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn update_item(&self, id: Uuid, patch: ItemPatch) -> Result<BagItem, StoreError> {
        let mut inner = self.inner.lock().unwrap();
        let item = inner.items.get_mut(&id).ok_or(StoreError::NotFound)?;
        if let Some(name) = patch.name {
            item.name = name;
        }
        if let Some(brand) = patch.brand {
            item.brand = Some(brand);
        }
        if let Some(price) = patch.price {
            item.price = Some(price);
        }
        if let Some(currency) = patch.currency {
            item.currency = Some(currency);
        }
        if let Some(photo_url) = patch.photo_url {
            item.photo_url = Some(photo_url);
        }
        if let Some(source_url) = patch.source_url {
            item.source_url = Some(source_url);
        }
        if let Some(notes) = patch.notes {
            item.notes = Some(notes);
        }
        if let Some(sort_index) = patch.sort_index {
            item.sort_index = sort_index;
        }
        Ok(item.clone())
    }

    async fn delete_item(&self, id: Uuid) -> Result<(), StoreError> {
        self.inner.lock().unwrap().items.remove(&id);
        Ok(())
    }

    async fn max_sort_index(&self, bag_id: Uuid) -> Result<Option<i32>, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .items
            .values()
            .filter(|item| item.bag_id == bag_id)
            .map(|item| item.sort_index)
            .max())
    }

    async fn upload_photo(
        &self,
        key: &str,
        _bytes: Vec<u8>,
        _content_type: &str,
    ) -> Result<String, StoreError> {
        if self.fail_uploads {
            return Err(StoreError::Request("scripted upload failure".into()));
        }
        Ok(format!("memory://photos/{key}"))
    }

    async fn recent_bags(&self, limit: usize, public_only: bool) -> Result<Vec<Bag>, StoreError> {
        let inner = self.inner.lock().unwrap();
        let mut bags: Vec<Bag> = inner
            .bags
            .values()
            .filter(|bag| !public_only || bag.is_public)
            .cloned()
            .collect();
        bags.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        bags.truncate(limit);
        Ok(bags)
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let inner = self.inner.lock().unwrap();
        Ok(StoreStats {
            bags: inner.bags.len() as u64,
            items: inner.items.len() as u64,
        })
    }
}
