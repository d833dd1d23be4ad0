use async_trait::async_trait;
use thiserror::Error;

use crate::models::CatalogRecord;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("request failed: {0}")]
    Request(String),
    #[error("invalid response: {0}")]
    Deserialize(String),
}

/// Lookup and single-field update against the item store, keyed by item name.
#[async_trait]
pub trait CatalogGateway: Send + Sync {
    async fn lookup(&self, item: &str) -> Result<Option<CatalogRecord>, CatalogError>;

    /// Writes `Model_3D` on every row named `item`; returns how many changed.
    async fn set_asset_reference(&self, item: &str, reference: &str)
    -> Result<usize, CatalogError>;
}
