pub mod free_text;
pub mod infer;
pub mod oembed;
pub mod price;
pub mod product_page;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

use crate::classify::{ClassifiedToken, TokenKind};
use crate::llm::LlmClient;
use crate::models::ExtractedItem;

/// One extraction strategy. Implementations are keyed by token kind and
/// injected, so batch orchestration and tests never reach for globals.
#[async_trait]
pub trait Extract: Send + Sync {
    async fn extract(&self, token: &ClassifiedToken) -> Result<ExtractedItem, ExtractFailure>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    Timeout,
    Network,
    UpstreamStatus,
    EmptyResult,
}

impl FailureReason {
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::Timeout => "timeout",
            FailureReason::Network => "network",
            FailureReason::UpstreamStatus => "upstream_status",
            FailureReason::EmptyResult => "empty_result",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{detail}")]
pub struct ExtractFailure {
    pub reason: FailureReason,
    pub detail: String,
}

impl ExtractFailure {
    pub fn timeout(limit: Duration) -> Self {
        Self {
            reason: FailureReason::Timeout,
            detail: format!("no result within {}ms", limit.as_millis()),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::Network,
            detail: message.into(),
        }
    }

    pub fn upstream_status(status: reqwest::StatusCode) -> Self {
        Self {
            reason: FailureReason::UpstreamStatus,
            detail: format!("upstream returned HTTP {status}"),
        }
    }

    pub fn empty_result(message: impl Into<String>) -> Self {
        Self {
            reason: FailureReason::EmptyResult,
            detail: message.into(),
        }
    }
}

impl From<reqwest::Error> for ExtractFailure {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => ExtractFailure::upstream_status(status),
            None => ExtractFailure::network(err.to_string()),
        }
    }
}

/// The three strategies behind one dispatch surface.
#[derive(Clone)]
pub struct ExtractorSet {
    product: Arc<dyn Extract>,
    embed: Arc<dyn Extract>,
    free_text: Arc<dyn Extract>,
}

impl ExtractorSet {
    pub fn new(
        product: Arc<dyn Extract>,
        embed: Arc<dyn Extract>,
        free_text: Arc<dyn Extract>,
    ) -> Self {
        Self {
            product,
            embed,
            free_text,
        }
    }

    /// Wires the live strategies against the shared HTTP and LLM handles.
    pub fn standard(llm: Arc<LlmClient>, http: Client) -> Self {
        Self::new(
            Arc::new(product_page::ProductPageExtractor::new(http.clone())),
            Arc::new(oembed::OembedExtractor::new(http)),
            Arc::new(free_text::FreeTextExtractor::new(llm)),
        )
    }

    fn strategy_for(&self, kind: &TokenKind) -> &Arc<dyn Extract> {
        match kind {
            TokenKind::ProductUrl { .. } => &self.product,
            TokenKind::EmbedUrl { .. } => &self.embed,
            TokenKind::FreeText => &self.free_text,
        }
    }

    /// Runs the matching strategy under the per-token deadline. A strategy
    /// that overruns yields exactly one timeout failure for that token.
    pub async fn dispatch(
        &self,
        token: &ClassifiedToken,
        limit: Duration,
    ) -> Result<ExtractedItem, ExtractFailure> {
        let strategy = self.strategy_for(&token.kind);
        match tokio::time::timeout(limit, strategy.extract(token)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractFailure::timeout(limit)),
        }
    }
}
