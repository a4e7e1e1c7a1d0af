use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use crate::extract::FailureReason;
use crate::models::ExtractedItem;

pub const NDJSON_CONTENT_TYPE: &str = "application/x-ndjson";

/// Progress events for one ingestion batch, emitted in processing order.
/// Consumers read them line by line and may disconnect at any point.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    StageEntered {
        stage: &'static str,
        tokens: usize,
    },
    ItemCompleted {
        index: usize,
        item: ExtractedItem,
    },
    ItemFailed {
        index: usize,
        token: String,
        reason: FailureReason,
        detail: String,
    },
    BatchSummary {
        total: usize,
        completed: usize,
        failed: usize,
    },
}

/// One JSON object per line; the newline is the frame delimiter.
pub fn encode_line(event: &StreamEvent) -> Bytes {
    let mut line = serde_json::to_vec(event).unwrap_or_default();
    line.push(b'\n');
    Bytes::from(line)
}

/// Adapts the event channel into a chunked NDJSON response body. The body
/// ends when the sender side is dropped; dropping the response cancels the
/// receiver, which the producer observes as a closed channel.
pub fn ndjson_response(rx: mpsc::Receiver<StreamEvent>) -> Response {
    let stream =
        ReceiverStream::new(rx).map(|event| Ok::<Bytes, Infallible>(encode_line(&event)));
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, NDJSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_encode_as_single_tagged_lines() {
        let line = encode_line(&StreamEvent::StageEntered {
            stage: "extract",
            tokens: 2,
        });
        let text = std::str::from_utf8(&line).unwrap();
        assert!(text.ends_with('\n'));
        assert_eq!(text.matches('\n').count(), 1);

        let value: serde_json::Value = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(value["event"], "stage_entered");
        assert_eq!(value["tokens"], 2);
    }

    #[test]
    fn failure_events_carry_token_and_reason_code() {
        let line = encode_line(&StreamEvent::ItemFailed {
            index: 1,
            token: "https://slow.example.com/p/9".into(),
            reason: FailureReason::Timeout,
            detail: "no result within 20000ms".into(),
        });
        let value: serde_json::Value =
            serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(value["event"], "item_failed");
        assert_eq!(value["reason"], "timeout");
        assert_eq!(value["token"], "https://slow.example.com/p/9");
    }

    #[test]
    fn summary_counts_serialize_flat() {
        let line = encode_line(&StreamEvent::BatchSummary {
            total: 3,
            completed: 2,
            failed: 1,
        });
        let value: serde_json::Value =
            serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(value["total"], 3);
        assert_eq!(value["completed"], 2);
        assert_eq!(value["failed"], 1);
    }

    #[tokio::test]
    async fn response_advertises_ndjson_and_no_cache() {
        let (tx, rx) = mpsc::channel::<StreamEvent>(4);
        drop(tx);
        let response = ndjson_response(rx);
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            NDJSON_CONTENT_TYPE
        );
        assert_eq!(
            response.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-cache"
        );
    }

    #[test]
    fn completed_event_embeds_the_item() {
        let item = ExtractedItem::named("Air Max 90", "https://example.com/product/123");
        let line = encode_line(&StreamEvent::ItemCompleted { index: 0, item });
        let value: serde_json::Value =
            serde_json::from_slice(&line[..line.len() - 1]).unwrap();
        assert_eq!(value["event"], "item_completed");
        assert_eq!(value["item"]["name"], "Air Max 90");
    }
}
