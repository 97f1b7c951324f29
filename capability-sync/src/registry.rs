//! Capability registry client and the per-context snapshot slot.
//!
//! The client performs exactly one GET per fetch and keeps nothing. What a
//! UI context has loaded lives in a [`SnapshotSlot`], which also guards
//! against late results: a fetch that finishes after its context closed, or
//! after a newer fetch was started, is dropped instead of applied.

use async_trait::async_trait;
use shared_types::ActiveCapabilitiesResponse;
use std::sync::{Arc, PoisonError, RwLock};

use crate::config::SyncConfig;
use crate::error::RegistryUnavailable;
use crate::snapshot::CapabilitySnapshot;

/// Anything that can produce a fresh capability snapshot
#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
pub trait CapabilitySource {
    async fn fetch_snapshot(&self) -> Result<CapabilitySnapshot, RegistryUnavailable>;
}

/// HTTP client for `GET {api_base}/api/tools/active`
#[derive(Debug, Clone)]
pub struct CapabilityRegistryClient {
    http: reqwest::Client,
    url: String,
}

impl CapabilityRegistryClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self::with_client(build_http_client(config), config.registry_url())
    }

    pub fn with_client(http: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[cfg(not(target_arch = "wasm32"))]
pub(crate) fn build_http_client(config: &SyncConfig) -> reqwest::Client {
    match reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!(error = %e, "Failed to build HTTP client with timeout; using defaults");
            reqwest::Client::new()
        }
    }
}

#[cfg(target_arch = "wasm32")]
pub(crate) fn build_http_client(_config: &SyncConfig) -> reqwest::Client {
    reqwest::Client::new()
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
impl CapabilitySource for CapabilityRegistryClient {
    async fn fetch_snapshot(&self) -> Result<CapabilitySnapshot, RegistryUnavailable> {
        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(|e| RegistryUnavailable::transport(format!("Request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            tracing::warn!(url = %self.url, status = status.as_u16(), "Capability registry returned error status");
            return Err(RegistryUnavailable::status(status.as_u16()));
        }

        let body: ActiveCapabilitiesResponse = response
            .json()
            .await
            .map_err(|e| RegistryUnavailable::malformed(format!("Failed to parse JSON: {e}")))?;

        let snapshot = CapabilitySnapshot::from_records(body.tools, body.total)?;
        tracing::info!(
            url = %self.url,
            count = snapshot.len(),
            categories = snapshot.categories().len(),
            "Capability registry loaded"
        );
        Ok(snapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryStatus {
    /// Nothing fetched yet (or a fetch is in flight)
    Loading,
    Ready { count: usize },
    /// Last fetch failed; the capability list is treated as empty
    Unavailable { message: String },
}

/// Proof that a fetch was started; only the newest ticket may apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    generation: u64,
}

#[derive(Debug, Default)]
struct SlotState {
    snapshot: Option<Arc<CapabilitySnapshot>>,
    failure: Option<RegistryUnavailable>,
    issued: u64,
    closed: bool,
}

/// Latest registry data for one UI context (a mounted settings panel, a composer).
#[derive(Debug, Default)]
pub struct SnapshotSlot {
    state: RwLock<SlotState>,
}

impl SnapshotSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fetch. Any ticket issued earlier becomes stale.
    pub fn begin_fetch(&self) -> FetchTicket {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.issued += 1;
        FetchTicket {
            generation: state.issued,
        }
    }

    /// Apply a fetch result. Returns `false` when the result was dropped
    /// because the slot closed or a newer fetch was started.
    pub fn apply(
        &self,
        ticket: FetchTicket,
        result: Result<CapabilitySnapshot, RegistryUnavailable>,
    ) -> bool {
        self.apply_shared(ticket, result.map(Arc::new))
    }

    fn apply_shared(
        &self,
        ticket: FetchTicket,
        result: Result<Arc<CapabilitySnapshot>, RegistryUnavailable>,
    ) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        if state.closed {
            tracing::debug!("Dropping registry result for closed context");
            return false;
        }
        if ticket.generation != state.issued {
            tracing::debug!(
                ticket = ticket.generation,
                latest = state.issued,
                "Dropping superseded registry result"
            );
            return false;
        }

        match result {
            Ok(snapshot) => {
                state.snapshot = Some(snapshot);
                state.failure = None;
            }
            Err(err) => {
                tracing::warn!(error = %err, "Capability registry unavailable");
                state.snapshot = None;
                state.failure = Some(err);
            }
        }
        true
    }

    /// Fetch from `source` and apply the result if this slot is still live.
    pub async fn refresh(
        &self,
        source: &dyn CapabilitySource,
    ) -> Result<Arc<CapabilitySnapshot>, RegistryUnavailable> {
        let ticket = self.begin_fetch();
        let result = source.fetch_snapshot().await.map(Arc::new);
        self.apply_shared(ticket, result.clone());
        result
    }

    /// Mark the owning context as gone; later results are ignored.
    pub fn close(&self) {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    pub fn snapshot(&self) -> Option<Arc<CapabilitySnapshot>> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .snapshot
            .clone()
    }

    pub fn last_error(&self) -> Option<RegistryUnavailable> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .failure
            .clone()
    }

    pub fn status(&self) -> RegistryStatus {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        match (&state.snapshot, &state.failure) {
            (Some(snapshot), _) => RegistryStatus::Ready {
                count: snapshot.len(),
            },
            (None, Some(err)) => RegistryStatus::Unavailable {
                message: err.user_message().to_string(),
            },
            (None, None) => RegistryStatus::Loading,
        }
    }
}
