use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use uuid::Uuid;

use crate::config::StoreConfig;
use crate::error::MatchError;
use crate::matcher::RankedMatch;

/// Everything persisted for one analysis: the requesting user, their
/// uploaded photo (when the upload succeeded) and the ranked matches.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisRecord {
    pub user_id: String,
    pub photo_url: Option<String>,
    pub results: Vec<RankedMatch>,
}

/// Write contract for persisting results. Failures here are reported by
/// the caller but never overturn an already-computed match.
#[async_trait]
pub trait ResultPublisher: Send + Sync {
    /// Store the user photo in the bucket, returning its public URL.
    async fn upload_photo(&self, data: &[u8], content_type: &str) -> Result<String, MatchError>;

    /// Persist the analysis envelope for `user_id`.
    async fn publish(&self, user_id: &str, analysis: &AnalysisRecord) -> Result<(), MatchError>;
}

/// Publisher writing to the same PostgREST/object-storage backend the
/// reference store lives in.
pub struct HttpPublisher {
    client: Client,
    config: StoreConfig,
}

impl HttpPublisher {
    pub fn new(client: Client, config: StoreConfig) -> Self {
        Self { client, config }
    }

    fn base(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }
}

fn transport(err: reqwest::Error) -> MatchError {
    MatchError::StoreUnavailable(err.to_string())
}

fn extension(content_type: &str) -> &'static str {
    match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/webp" => "webp",
        _ => "bin",
    }
}

#[async_trait]
impl ResultPublisher for HttpPublisher {
    async fn upload_photo(&self, data: &[u8], content_type: &str) -> Result<String, MatchError> {
        let object = format!("{}.{}", Uuid::new_v4(), extension(content_type));
        let bucket = &self.config.photo_bucket;

        self.client
            .post(format!(
                "{}/storage/v1/object/{}/{}",
                self.base(),
                bucket,
                object
            ))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data.to_vec())
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;

        Ok(format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base(),
            bucket,
            object
        ))
    }

    async fn publish(&self, user_id: &str, analysis: &AnalysisRecord) -> Result<(), MatchError> {
        self.client
            .post(format!(
                "{}/rest/v1/{}",
                self.base(),
                self.config.analysis_table
            ))
            .header("apikey", &self.config.api_key)
            .bearer_auth(&self.config.api_key)
            .header("Prefer", "return=minimal")
            .json(&json!({ "user_id": user_id, "analysis": analysis }))
            .send()
            .await
            .map_err(transport)?
            .error_for_status()
            .map_err(transport)?;

        Ok(())
    }
}
