use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::config::StoreConfig;
use crate::error::MatchError;

/// One reference row: display name, embedding and public image URL.
/// Deserialized strictly at the store boundary; rows that do not match this
/// shape fail the whole page.
#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceRecord {
    pub name: String,
    pub embedding: Vec<f32>,
    pub image_url: String,
}

/// Read contract of the reference store: a total record count plus
/// fixed-size pages in stable store order.
#[async_trait]
pub trait ReferenceStore: Send + Sync {
    async fn count(&self) -> Result<u64, MatchError>;
    async fn page(&self, offset: u64, limit: u64) -> Result<Vec<ReferenceRecord>, MatchError>;
}

#[derive(Debug, Deserialize)]
struct CountRow {
    record_count: u64,
}

/// PostgREST-backed reference store. The HTTP client is injected so the
/// caller owns transport setup and connection pooling.
pub struct HttpReferenceStore {
    client: Client,
    config: StoreConfig,
}

impl HttpReferenceStore {
    pub fn new(client: Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn get(&self, table: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.config.url.trim_end_matches('/'), table);
        self.client
            .get(url)
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
    }
}

fn transport(err: reqwest::Error) -> MatchError {
    MatchError::StoreUnavailable(err.to_string())
}

#[async_trait]
impl ReferenceStore for HttpReferenceStore {
    async fn count(&self) -> Result<u64, MatchError> {
        let rows: Vec<CountRow> = self
            .get(&self.config.count_table)
            .query(&[("select", "record_count"), ("limit", "1")])
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)?;

        rows.first()
            .map(|row| row.record_count)
            .ok_or_else(|| MatchError::StoreUnavailable("record count not found".into()))
    }

    async fn page(&self, offset: u64, limit: u64) -> Result<Vec<ReferenceRecord>, MatchError> {
        self.get(&self.config.reference_table)
            .query(&[
                ("select", "name,embedding,image_url".to_string()),
                ("offset", offset.to_string()),
                ("limit", limit.to_string()),
            ])
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?
            .json()
            .await
            .map_err(transport)
    }
}
