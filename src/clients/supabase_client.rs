use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;

use crate::config::SinkSettings;
use crate::services::persistence::{DocumentSink, SinkError};

/// Writes document content into the `documents` table through Supabase's REST API.
#[derive(Debug)]
pub struct SupabaseSink {
    client: Client,
    base_url: String,
    api_key: String,
    service_role_key: String,
}

impl SupabaseSink {
    pub fn new(settings: SinkSettings) -> Result<Self, SinkError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: settings.base_url,
            api_key: settings.api_key,
            service_role_key: settings.service_role_key,
        })
    }

    fn documents_url(&self) -> String {
        format!("{}/rest/v1/documents", self.base_url)
    }
}

#[async_trait]
impl DocumentSink for SupabaseSink {
    /// Partial update of the document row's `content` column.
    async fn save(&self, doc_id: &str, content: &str) -> Result<(), SinkError> {
        let response = self
            .client
            .patch(self.documents_url())
            .query(&[("id", format!("eq.{}", doc_id))])
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.service_role_key))
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .json(&json!({ "content": content }))
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            return Err(SinkError::Status(status.as_u16()));
        }
        Ok(())
    }
}
