//! Batch orchestration for bulk ingestion: validate and classify the pasted
//! input, then dispatch one extraction per token in input order, emitting
//! progress events into the response channel as each token settles.

use std::env;
use std::time::Instant;

use tokio::sync::mpsc;
use tokio::time::Duration;
use tracing::{debug, info};

use crate::classify::{ClassifiedToken, classify_input};
use crate::extract::ExtractorSet;
use crate::models::ServiceError;
use crate::stream::StreamEvent;

#[derive(Clone, Copy)]
pub struct IngestConfig {
    pub max_tokens: usize,
    pub token_timeout: Duration,
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self {
            max_tokens: max_tokens_from_env(),
            token_timeout: Duration::from_millis(token_timeout_ms_from_env()),
        }
    }
}

fn max_tokens_from_env() -> usize {
    env::var("INGEST_MAX_TOKENS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value >= 1)
        .unwrap_or(50)
}

fn token_timeout_ms_from_env() -> u64 {
    env::var("INGEST_TOKEN_TIMEOUT_MS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .filter(|value| *value >= 100)
        .unwrap_or(20_000)
}

#[derive(Clone)]
pub struct IngestPipeline {
    extractors: ExtractorSet,
    config: IngestConfig,
}

impl IngestPipeline {
    pub fn new(extractors: ExtractorSet, config: IngestConfig) -> Self {
        Self { extractors, config }
    }

    /// Splits and classifies the raw input during request validation, so a
    /// bad batch can fail as a plain JSON error before any stream bytes.
    /// Classification itself never fails; only the batch envelope can.
    pub fn classify_batch(&self, input: &str) -> Result<Vec<ClassifiedToken>, ServiceError> {
        if input.trim().is_empty() {
            return Err(ServiceError::invalid_input("ingest", "empty input"));
        }
        let tokens = classify_input(input);
        if tokens.is_empty() {
            return Err(ServiceError::invalid_input(
                "ingest",
                "no recognizable segments",
            ));
        }
        if tokens.len() > self.config.max_tokens {
            return Err(ServiceError::invalid_input(
                "ingest",
                format!(
                    "batch of {} tokens exceeds the {} token limit",
                    tokens.len(),
                    self.config.max_tokens
                ),
            ));
        }
        Ok(tokens)
    }

    /// Processes the batch strictly sequentially, one event per settled
    /// token, closing with a summary. A closed channel means the client is
    /// gone: the in-flight extraction finishes, nothing further is
    /// dispatched, and the summary is skipped.
    pub async fn run(&self, tokens: Vec<ClassifiedToken>, tx: mpsc::Sender<StreamEvent>) {
        let total = tokens.len();
        let started = Instant::now();
        let mut completed = 0usize;
        let mut failed = 0usize;

        let entered = StreamEvent::StageEntered {
            stage: "extract",
            tokens: total,
        };
        if tx.send(entered).await.is_err() {
            debug!(target = "teed.ingest", "client gone before first event");
            return;
        }

        for token in &tokens {
            if tx.is_closed() {
                debug!(
                    target = "teed.ingest",
                    index = token.index,
                    "client disconnected, stopping dispatch"
                );
                return;
            }

            let event = match self
                .extractors
                .dispatch(token, self.config.token_timeout)
                .await
            {
                Ok(item) => {
                    completed += 1;
                    StreamEvent::ItemCompleted {
                        index: token.index,
                        item,
                    }
                }
                Err(failure) => {
                    failed += 1;
                    debug!(
                        target = "teed.ingest",
                        index = token.index,
                        kind = token.kind.label(),
                        reason = failure.reason.code(),
                        "token extraction failed"
                    );
                    StreamEvent::ItemFailed {
                        index: token.index,
                        token: token.raw.clone(),
                        reason: failure.reason,
                        detail: failure.detail,
                    }
                }
            };

            if tx.send(event).await.is_err() {
                return;
            }
        }

        let elapsed_ms = started.elapsed().as_millis();
        crate::metrics::stage_elapsed("extract", elapsed_ms);
        info!(
            target = "teed.ingest",
            total,
            completed,
            failed,
            elapsed_ms = elapsed_ms as u64,
            "batch finished"
        );

        let _ = tx
            .send(StreamEvent::BatchSummary {
                total,
                completed,
                failed,
            })
            .await;
    }
}

/// Channel capacity for one ingestion stream. Small on purpose: the producer
/// is sequential and the consumer is an HTTP response body.
pub fn event_channel() -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
    mpsc::channel(16)
}
