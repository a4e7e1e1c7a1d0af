use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::http::build_client;
use crate::models::{Bag, BagItem, BagPatch, ItemPatch, NewBag, NewBagItem};
use crate::store::{BagStore, StoreError, StoreStats};

/// PostgREST + storage + auth client for a Supabase project. All row access
/// uses the service role key; end-user identity only flows through
/// [`SupabaseClient::fetch_auth_user`].
#[derive(Debug, Clone)]
pub struct SupabaseClient {
    base_url: String,
    service_key: String,
    photo_bucket: String,
    http: Client,
}

/// Identity payload from the hosted auth endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: Uuid,
    pub email: Option<String>,
}

impl SupabaseClient {
    pub fn from_env() -> Option<Self> {
        let base_url = std::env::var("SUPABASE_URL").ok()?;
        let service_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_SERVICE_KEY"))
            .or_else(|_| std::env::var("SUPABASE_KEY"))
            .ok()?;
        let photo_bucket =
            std::env::var("TEED_PHOTO_BUCKET").unwrap_or_else(|_| "item-photos".into());
        Some(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_key,
            photo_bucket,
            http: build_client(),
        })
    }

    /// Resolves a bearer token to the user it belongs to. An invalid or
    /// expired token is `Ok(None)`; transport problems are errors.
    pub async fn fetch_auth_user(&self, access_token: &str) -> Result<Option<AuthUser>, StoreError> {
        let url = format!("{}/auth/v1/user", self.base_url);
        let response = self
            .http
            .get(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {access_token}"))
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED
            || response.status() == reqwest::StatusCode::FORBIDDEN
        {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        let user: AuthUser = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        Ok(Some(user))
    }

    fn request(&self, method: Method, url: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
    }

    async fn fetch_rows<T: DeserializeOwned>(&self, url: String) -> Result<Vec<T>, StoreError> {
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))
    }

    async fn fetch_one<T: DeserializeOwned>(&self, url: String) -> Result<Option<T>, StoreError> {
        let mut rows: Vec<T> = self.fetch_rows(url).await?;
        Ok(rows.pop())
    }

    /// POST/PATCH with `Prefer: return=representation`; an empty
    /// representation means the filter matched nothing.
    async fn write_row<T, B>(&self, method: Method, url: String, body: &B) -> Result<T, StoreError>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let response = self
            .request(method, &url)
            .header("Prefer", "return=representation")
            .json(body)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        let mut rows: Vec<T> = response
            .json()
            .await
            .map_err(|err| StoreError::Deserialize(err.to_string()))?;
        rows.pop().ok_or(StoreError::NotFound)
    }

    async fn delete_where(&self, url: String) -> Result<(), StoreError> {
        let response = self
            .request(Method::DELETE, &url)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(())
    }

    async fn count_rows(&self, table: &str) -> Result<u64, StoreError> {
        let url = format!("{}/rest/v1/{table}?select=id", self.base_url);
        let response = self
            .request(Method::GET, &url)
            .header("Prefer", "count=exact")
            .header("Range", "0-0")
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        let header = response
            .headers()
            .get("content-range")
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        parse_content_range_total(&header)
            .ok_or_else(|| StoreError::Deserialize(format!("bad content-range: {header}")))
    }

    fn public_photo_url(&self, key: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{key}",
            self.base_url, self.photo_bucket
        )
    }
}

/// `content-range: 0-0/42` or `*/0` for an empty table.
fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

#[async_trait]
impl BagStore for SupabaseClient {
    async fn create_bag(&self, bag: NewBag) -> Result<Bag, StoreError> {
        let url = format!("{}/rest/v1/bags", self.base_url);
        self.write_row(Method::POST, url, &bag).await
    }

    async fn bags_for_owner(&self, owner_id: Uuid) -> Result<Vec<Bag>, StoreError> {
        let url = format!(
            "{}/rest/v1/bags?owner_id=eq.{owner_id}&select=*&order=created_at.desc",
            self.base_url
        );
        self.fetch_rows(url).await
    }

    async fn bag_by_id(&self, id: Uuid) -> Result<Option<Bag>, StoreError> {
        let url = format!(
            "{}/rest/v1/bags?id=eq.{id}&select=*&limit=1",
            self.base_url
        );
        self.fetch_one(url).await
    }

    async fn bag_by_handle(&self, handle: &str) -> Result<Option<Bag>, StoreError> {
        let url = format!(
            "{}/rest/v1/bags?handle=eq.{}&select=*&limit=1",
            self.base_url,
            urlencoding::encode(handle)
        );
        self.fetch_one(url).await
    }

    async fn update_bag(&self, id: Uuid, patch: BagPatch) -> Result<Bag, StoreError> {
        let url = format!("{}/rest/v1/bags?id=eq.{id}", self.base_url);
        self.write_row(Method::PATCH, url, &patch).await
    }

    async fn delete_bag(&self, id: Uuid) -> Result<(), StoreError> {
        let items_url = format!("{}/rest/v1/bag_items?bag_id=eq.{id}", self.base_url);
        self.delete_where(items_url).await?;
        let bag_url = format!("{}/rest/v1/bags?id=eq.{id}", self.base_url);
        self.delete_where(bag_url).await
    }

    async fn items_for_bag(&self, bag_id: Uuid) -> Result<Vec<BagItem>, StoreError> {
        let url = format!(
            "{}/rest/v1/bag_items?bag_id=eq.{bag_id}&select=*&order=sort_index.asc",
            self.base_url
        );
        self.fetch_rows(url).await
    }

    async fn item_by_id(&self, id: Uuid) -> Result<Option<BagItem>, StoreError> {
        let url = format!(
            "{}/rest/v1/bag_items?id=eq.{id}&select=*&limit=1",
            self.base_url
        );
        self.fetch_one(url).await
    }

    async fn insert_item(&self, item: NewBagItem) -> Result<BagItem, StoreError> {
        let url = format!("{}/rest/v1/bag_items", self.base_url);
        self.write_row(Method::POST, url, &item).await
    }

    async fn update_item(&self, id: Uuid, patch: ItemPatch) -> Result<BagItem, StoreError> {
        let url = format!("{}/rest/v1/bag_items?id=eq.{id}", self.base_url);
        self.write_row(Method::PATCH, url, &patch).await
    }

    async fn delete_item(&self, id: Uuid) -> Result<(), StoreError> {
        let url = format!("{}/rest/v1/bag_items?id=eq.{id}", self.base_url);
        self.delete_where(url).await
    }

    async fn max_sort_index(&self, bag_id: Uuid) -> Result<Option<i32>, StoreError> {
        #[derive(Deserialize)]
        struct SortRow {
            sort_index: i32,
        }
        let url = format!(
            "{}/rest/v1/bag_items?bag_id=eq.{bag_id}&select=sort_index&order=sort_index.desc&limit=1",
            self.base_url
        );
        let row: Option<SortRow> = self.fetch_one(url).await?;
        Ok(row.map(|row| row.sort_index))
    }

    async fn upload_photo(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<String, StoreError> {
        let url = format!(
            "{}/storage/v1/object/{}/{key}",
            self.base_url, self.photo_bucket
        );
        let response = self
            .request(Method::POST, &url)
            .header("Content-Type", content_type)
            .header("x-upsert", "true")
            .body(bytes)
            .send()
            .await
            .map_err(|err| StoreError::Request(err.to_string()))?;
        if !response.status().is_success() {
            return Err(StoreError::Request(format!("HTTP {}", response.status())));
        }
        Ok(self.public_photo_url(key))
    }

    async fn recent_bags(&self, limit: usize, public_only: bool) -> Result<Vec<Bag>, StoreError> {
        let filter = if public_only { "&is_public=eq.true" } else { "" };
        let url = format!(
            "{}/rest/v1/bags?select=*{filter}&order=created_at.desc&limit={limit}",
            self.base_url
        );
        self.fetch_rows(url).await
    }

    async fn stats(&self) -> Result<StoreStats, StoreError> {
        let bags = self.count_rows("bags").await?;
        let items = self.count_rows("bag_items").await?;
        Ok(StoreStats { bags, items })
    }
}
