//! Adapter to the external dataset-analysis pipeline.
//!
//! The pipeline (profiling, PII scan, LLM recommendations, resource search)
//! runs as a separate service; this crate only gates it on token
//! availability. The contract is the single [`AnalysisEngine::analyze`]
//! call.

use async_trait::async_trait;
use std::sync::Arc;

/// Opaque analysis collaborator guarded by the consumption layer.
#[async_trait]
pub trait AnalysisEngine: Send + Sync {
    /// Run the full analysis for one uploaded work item and return the
    /// report document.
    async fn analyze(&self, work_item_id: &str) -> anyhow::Result<serde_json::Value>;
}

/// HTTP adapter posting to the analysis pipeline service.
pub struct RemoteAnalysisEngine {
    base_url: String,
    http: reqwest::Client,
}

impl RemoteAnalysisEngine {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    /// Build the engine when a pipeline URL is configured.
    pub fn from_config(base_url: Option<String>) -> Option<Arc<dyn AnalysisEngine>> {
        match base_url {
            Some(url) if !url.trim().is_empty() => {
                tracing::info!(%url, "analysis engine configured");
                Some(Arc::new(Self::new(url)))
            }
            _ => {
                tracing::warn!(
                    "ANALYSIS_ENGINE_URL not set - analyze endpoint will report 503"
                );
                None
            }
        }
    }
}

#[async_trait]
impl AnalysisEngine for RemoteAnalysisEngine {
    async fn analyze(&self, work_item_id: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/analyze/{}", self.base_url, work_item_id);
        let response = self.http.post(&url).send().await?.error_for_status()?;
        Ok(response.json().await?)
    }
}
