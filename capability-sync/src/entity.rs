//! Assistant persistence API client.
//!
//! Reads the server projection of an assistant and sends capability edits.
//! There is no retry or backoff here; the optimistic cache already covers the
//! latency, and callers decide what to do with a failed update.

use async_trait::async_trait;
use shared_types::{AssistantRecord, UpdateAssistantCapabilities};

use crate::config::SyncConfig;
use crate::error::EntityError;
use crate::registry::build_http_client;

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait EntityBackend {
    async fn fetch_entity(&self, entity_id: &str) -> Result<AssistantRecord, EntityError>;

    async fn update_allowed_capabilities(
        &self,
        entity_id: &str,
        capability_ids: &[String],
    ) -> Result<(), EntityError>;
}

#[derive(Debug, Clone)]
pub struct HttpEntityBackend {
    http: reqwest::Client,
    config: SyncConfig,
}

impl HttpEntityBackend {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            http: build_http_client(config),
            config: config.clone(),
        }
    }
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, EntityError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(EntityError::Status {
            status: status.as_u16(),
        })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl EntityBackend for HttpEntityBackend {
    async fn fetch_entity(&self, entity_id: &str) -> Result<AssistantRecord, EntityError> {
        let url = self.config.assistant_url(entity_id);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| EntityError::Transport(e.to_string()))?;
        let response = check_status(response)?;

        response
            .json::<AssistantRecord>()
            .await
            .map_err(|e| EntityError::Decode(e.to_string()))
    }

    async fn update_allowed_capabilities(
        &self,
        entity_id: &str,
        capability_ids: &[String],
    ) -> Result<(), EntityError> {
        let url = self.config.assistant_url(entity_id);
        let body = UpdateAssistantCapabilities {
            allowed_capabilities: capability_ids.to_vec(),
        };

        let response = self
            .http
            .patch(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EntityError::Transport(e.to_string()))?;
        check_status(response)?;

        tracing::info!(
            entity_id = %entity_id,
            count = capability_ids.len(),
            "Assistant capabilities saved"
        );
        Ok(())
    }
}
