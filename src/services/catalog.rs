use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::order::OrderType;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog item not found: {0}")]
    NotFound(String),
    #[error("catalog api error: {0}")]
    Api(String),
}

impl From<reqwest::Error> for CatalogError {
    fn from(err: reqwest::Error) -> Self {
        CatalogError::Api(err.to_string())
    }
}

/// Purchasable item as the content platform's catalog describes it. Prices
/// come from here, never from client input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: String,
    pub name: String,
    pub price_cents: i64,
    pub currency: String,
    /// Seat capacity for events and session resources.
    pub capacity: Option<i32>,
    /// Sessions granted per purchase, for session packs.
    pub sessions: Option<i32>,
}

/// Read-only view of the platform's catalog. This engine never writes to
/// it.
#[async_trait]
pub trait CatalogService: Send + Sync {
    async fn fetch_item(
        &self,
        order_type: OrderType,
        item_id: &str,
    ) -> Result<CatalogItem, CatalogError>;
}

pub struct HttpCatalog {
    base_url: String,
    http: reqwest::Client,
}

impl HttpCatalog {
    pub fn new(base_url: &str, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        }
    }
}

#[async_trait]
impl CatalogService for HttpCatalog {
    async fn fetch_item(
        &self,
        order_type: OrderType,
        item_id: &str,
    ) -> Result<CatalogItem, CatalogError> {
        let url = format!(
            "{}/api/catalog/{}/{}",
            self.base_url,
            order_type.as_str().to_lowercase(),
            item_id
        );
        let response = self.http.get(&url).send().await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(CatalogError::NotFound(item_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(CatalogError::Api(format!(
                "catalog returned {}",
                response.status()
            )));
        }
        Ok(response.json::<CatalogItem>().await?)
    }
}

/// In-memory catalog for tests, keyed by item id.
#[derive(Default)]
pub struct MockCatalog {
    pub items: Mutex<HashMap<String, CatalogItem>>,
}

impl MockCatalog {
    pub fn with_item(self, item: CatalogItem) -> Self {
        self.items.lock().unwrap().insert(item.id.clone(), item);
        self
    }
}

#[async_trait]
impl CatalogService for MockCatalog {
    async fn fetch_item(
        &self,
        _order_type: OrderType,
        item_id: &str,
    ) -> Result<CatalogItem, CatalogError> {
        self.items
            .lock()
            .unwrap()
            .get(item_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(item_id.to_string()))
    }
}
