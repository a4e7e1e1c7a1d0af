//! The explicit save step: client-confirmed items become rows, one at a
//! time. Nothing in the streaming phase writes; everything durable happens
//! here, and one item's failure never rolls back its siblings.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::Client;
use tracing::warn;
use uuid::Uuid;

use crate::models::{AcceptedItem, Bag, NewBagItem, PhotoSource, SaveReport, SaveResult};
use crate::store::{BagStore, StoreError};

const MAX_PHOTO_BYTES: usize = 8 * 1024 * 1024;

/// Writes each accepted item as a row plus an optional mirrored photo.
/// `sort_index` continues after the bag's current maximum, so saved batches
/// append in the order the client confirmed them.
pub async fn save_items(
    store: &dyn BagStore,
    http: &Client,
    bag: &Bag,
    items: Vec<AcceptedItem>,
) -> Result<SaveReport, StoreError> {
    let mut next_index = store.max_sort_index(bag.id).await?.map_or(0, |max| max + 1);
    let mut results = Vec::with_capacity(items.len());
    let mut saved = 0usize;
    let mut failed = 0usize;

    for (index, accepted) in items.into_iter().enumerate() {
        match save_one(store, http, bag, accepted, next_index).await {
            Ok(item) => {
                saved += 1;
                next_index += 1;
                results.push(SaveResult::Saved { index, item });
            }
            Err(err) => {
                failed += 1;
                warn!(
                    target = "teed.save",
                    bag_id = %bag.id,
                    index,
                    error = %err,
                    "item save failed"
                );
                results.push(SaveResult::Failed {
                    index,
                    error: err.to_string(),
                });
            }
        }
    }

    Ok(SaveReport {
        saved,
        failed,
        results,
    })
}

async fn save_one(
    store: &dyn BagStore,
    http: &Client,
    bag: &Bag,
    accepted: AcceptedItem,
    sort_index: i32,
) -> Result<crate::models::BagItem, StoreError> {
    let name = accepted.name.trim().to_string();
    if name.is_empty() {
        return Err(StoreError::Request("item name is empty".into()));
    }

    let photo_url = match accepted.photo {
        Some(source) => Some(mirror_photo(store, http, bag.id, source).await?),
        None => None,
    };

    store
        .insert_item(NewBagItem {
            bag_id: bag.id,
            name,
            brand: accepted.brand,
            price: accepted.price.filter(|price| *price > 0.0),
            currency: accepted.currency,
            photo_url,
            source_url: accepted.source_url,
            notes: accepted.notes,
            sort_index,
        })
        .await
}

/// Re-hosts the photo in our own bucket so shared bags never hot-link a
/// third-party CDN. URL sources are fetched server-side; inline sources are
/// base64 payloads from the client.
async fn mirror_photo(
    store: &dyn BagStore,
    http: &Client,
    bag_id: Uuid,
    source: PhotoSource,
) -> Result<String, StoreError> {
    let (bytes, content_type) = match source {
        PhotoSource::Url(url) => fetch_photo(http, &url).await?,
        PhotoSource::Inline { data, content_type } => {
            let bytes = BASE64
                .decode(data.trim())
                .map_err(|err| StoreError::Request(format!("bad inline photo: {err}")))?;
            (bytes, content_type)
        }
    };

    if bytes.is_empty() {
        return Err(StoreError::Request("photo payload is empty".into()));
    }
    if bytes.len() > MAX_PHOTO_BYTES {
        return Err(StoreError::Request(format!(
            "photo of {} bytes exceeds the {MAX_PHOTO_BYTES} byte limit",
            bytes.len()
        )));
    }

    let key = format!(
        "{bag_id}/{}.{}",
        Uuid::new_v4().simple(),
        extension_for(&content_type)
    );
    store.upload_photo(&key, bytes, &content_type).await
}

async fn fetch_photo(http: &Client, url: &str) -> Result<(Vec<u8>, String), StoreError> {
    if !url.starts_with("http://") && !url.starts_with("https://") {
        return Err(StoreError::Request(format!("unsupported photo url: {url}")));
    }
    let response = http
        .get(url)
        .send()
        .await
        .map_err(|err| StoreError::Request(format!("photo fetch failed: {err}")))?;
    if !response.status().is_success() {
        return Err(StoreError::Request(format!(
            "photo fetch returned HTTP {}",
            response.status()
        )));
    }
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.split(';').next().unwrap_or(value).trim().to_string())
        .unwrap_or_else(|| "image/jpeg".to_string());
    let bytes = response
        .bytes()
        .await
        .map_err(|err| StoreError::Request(format!("photo body read failed: {err}")))?;
    Ok((bytes.to_vec(), content_type))
}

fn extension_for(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/avif" => "avif",
        _ => "jpg",
    }
}

/// Rewrites sort indices to match the client's full ordering. Every item
/// must belong to the bag; updates are per row, so a failure mid-way leaves
/// earlier rows reordered. The client re-reads the bag either way.
pub async fn reorder_items(
    store: &dyn BagStore,
    bag_id: Uuid,
    item_ids: &[Uuid],
) -> Result<(), StoreError> {
    let current = store.items_for_bag(bag_id).await?;
    if item_ids.len() != current.len()
        || !item_ids
            .iter()
            .all(|id| current.iter().any(|item| item.id == *id))
    {
        return Err(StoreError::Request(
            "reorder list must name every item in the bag exactly once".into(),
        ));
    }

    for (position, id) in item_ids.iter().enumerate() {
        store
            .update_item(
                *id,
                crate::models::ItemPatch {
                    sort_index: Some(position as i32),
                    ..crate::models::ItemPatch::default()
                },
            )
            .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::build_client;
    use crate::testing::MemoryStore;

    fn accepted(name: &str) -> AcceptedItem {
        AcceptedItem {
            name: name.to_string(),
            brand: None,
            price: None,
            currency: None,
            photo: None,
            source_url: None,
            notes: None,
        }
    }

    fn inline_photo(name: &str) -> AcceptedItem {
        AcceptedItem {
            photo: Some(PhotoSource::Inline {
                data: BASE64.encode(b"not a real jpeg"),
                content_type: "image/jpeg".into(),
            }),
            ..accepted(name)
        }
    }

    #[tokio::test]
    async fn saves_append_after_existing_sort_indices() {
        let store = MemoryStore::new();
        let bag = store.seed_bag(Uuid::new_v4());
        store
            .insert_item(NewBagItem {
                bag_id: bag.id,
                name: "existing".into(),
                brand: None,
                price: None,
                currency: None,
                photo_url: None,
                source_url: None,
                notes: None,
                sort_index: 4,
            })
            .await
            .unwrap();

        let report = save_items(
            &store,
            &build_client(),
            &bag,
            vec![accepted("driver"), accepted("putter")],
        )
        .await
        .unwrap();

        assert_eq!(report.saved, 2);
        let items = store.items_for_bag(bag.id).await.unwrap();
        let indices: Vec<i32> = items.iter().map(|item| item.sort_index).collect();
        assert_eq!(indices, vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn photo_upload_failure_spares_the_siblings() {
        let store = MemoryStore::failing_uploads();
        let bag = store.seed_bag(Uuid::new_v4());

        let report = save_items(
            &store,
            &build_client(),
            &bag,
            vec![accepted("first"), inline_photo("second"), accepted("third")],
        )
        .await
        .unwrap();

        assert_eq!(report.saved, 2);
        assert_eq!(report.failed, 1);
        assert!(matches!(report.results[1], SaveResult::Failed { index: 1, .. }));
        assert_eq!(store.item_count(), 2);
    }

    #[tokio::test]
    async fn row_insert_failure_is_reported_per_item() {
        let store = MemoryStore::failing_insert_named("cursed wedge");
        let bag = store.seed_bag(Uuid::new_v4());

        let report = save_items(
            &store,
            &build_client(),
            &bag,
            vec![accepted("fine"), accepted("cursed wedge")],
        )
        .await
        .unwrap();

        assert_eq!(report.saved, 1);
        assert_eq!(report.failed, 1);
        // The failed row's index is reused, so no gap appears.
        let items = store.items_for_bag(bag.id).await.unwrap();
        assert_eq!(items[0].sort_index, 0);
    }

    #[tokio::test]
    async fn inline_photo_lands_in_the_bucket() {
        let store = MemoryStore::new();
        let bag = store.seed_bag(Uuid::new_v4());

        let report = save_items(&store, &build_client(), &bag, vec![inline_photo("cap")])
            .await
            .unwrap();

        match &report.results[0] {
            SaveResult::Saved { item, .. } => {
                let url = item.photo_url.as_deref().expect("photo url");
                assert!(url.starts_with("memory://photos/"));
                assert!(url.ends_with(".jpg"));
            }
            other => panic!("expected Saved, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_names_fail_individually() {
        let store = MemoryStore::new();
        let bag = store.seed_bag(Uuid::new_v4());

        let report = save_items(
            &store,
            &build_client(),
            &bag,
            vec![accepted("   "), accepted("keeper")],
        )
        .await
        .unwrap();

        assert_eq!(report.saved, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn reorder_rejects_partial_lists() {
        let store = MemoryStore::new();
        let bag = store.seed_bag(Uuid::new_v4());
        let report = save_items(
            &store,
            &build_client(),
            &bag,
            vec![accepted("a"), accepted("b")],
        )
        .await
        .unwrap();
        let ids: Vec<Uuid> = report
            .results
            .iter()
            .filter_map(|result| match result {
                SaveResult::Saved { item, .. } => Some(item.id),
                SaveResult::Failed { .. } => None,
            })
            .collect();

        assert!(reorder_items(&store, bag.id, &ids[..1]).await.is_err());

        let reversed: Vec<Uuid> = ids.iter().rev().copied().collect();
        reorder_items(&store, bag.id, &reversed).await.unwrap();
        let items = store.items_for_bag(bag.id).await.unwrap();
        assert_eq!(items[0].name, "b");
        assert_eq!(items[1].name, "a");
    }
}
