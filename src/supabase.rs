use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};
use tracing::debug;
use urlencoding::encode;

use crate::catalog::{CatalogError, CatalogGateway};
use crate::config::CatalogConfig;
use crate::http::build_client;
use crate::models::CatalogRecord;

const RECORD_COLUMNS: &str = "Name,Image,Resized_Image,Model_3D";

#[derive(Debug, Clone)]
pub struct SupabaseCatalog {
    base_url: String,
    service_key: String,
    table: String,
    http: Client,
}

impl SupabaseCatalog {
    pub fn new(config: &CatalogConfig) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            service_key: config.service_key.clone(),
            table: config.table.clone(),
            http: build_client(),
        }
    }

    fn rows_url(&self, item: &str) -> String {
        format!(
            "{}/rest/v1/{}?Name=eq.{}",
            self.base_url,
            encode(&self.table),
            encode(item)
        )
    }
}

#[async_trait]
impl CatalogGateway for SupabaseCatalog {
    async fn lookup(&self, item: &str) -> Result<Option<CatalogRecord>, CatalogError> {
        let url = format!("{}&select={RECORD_COLUMNS}&limit=1", self.rows_url(item));
        let response = self
            .http
            .get(url)
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CatalogError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let mut payload: Vec<CatalogRecord> = response
            .json()
            .await
            .map_err(|err| CatalogError::Deserialize(err.to_string()))?;
        Ok(payload.pop())
    }

    async fn set_asset_reference(
        &self,
        item: &str,
        reference: &str,
    ) -> Result<usize, CatalogError> {
        let response = self
            .http
            .patch(self.rows_url(item))
            .header("apikey", &self.service_key)
            .header("Authorization", format!("Bearer {}", self.service_key))
            .header("Prefer", "return=representation")
            .json(&json!({ "Model_3D": reference }))
            .send()
            .await
            .map_err(|err| CatalogError::Request(err.to_string()))?;

        if !response.status().is_success() {
            return Err(CatalogError::Request(format!(
                "HTTP {}",
                response.status()
            )));
        }

        let updated: Vec<Value> = response
            .json()
            .await
            .map_err(|err| CatalogError::Deserialize(err.to_string()))?;
        debug!(target = "stager.catalog", item = %item, rows = updated.len(), "asset_reference_written");
        Ok(updated.len())
    }
}
