//! Shared LLM-to-item plumbing for free-text tokens and photo analysis.

use serde_json::{Value, json};
use thiserror::Error;

use crate::extract::price;
use crate::llm::{LlmClient, LlmMessage};
use crate::models::ExtractedItem;

const SYSTEM_PROMPT: &str = r#"
You are an item extraction agent for a gear-collection app. Given a text snippet
or a set of photo URLs describing one item, respond with a single JSON object:
{"name", "brand", "price", "currency", "notes"}. `name` is required and short;
everything else may be null. Prices are numbers without symbols. Do not invent
a price that is not present in the input. Output JSON only.
"#;

#[derive(Debug, Error)]
pub enum InferError {
    #[error("llm request failed: {0}")]
    Llm(String),
    #[error("unable to parse item json")]
    Parse,
}

pub async fn item_from_text(llm: &LlmClient, text: &str) -> Result<ExtractedItem, InferError> {
    let payload = json!({
        "text": text,
        "instruction": "Extract the single item this text describes.",
    });
    let value = infer_value(llm, payload).await?;
    finish(value, text, &[])
}

pub async fn item_from_photos(
    llm: &LlmClient,
    photos: &[String],
    hint: Option<&str>,
) -> Result<ExtractedItem, InferError> {
    if photos.is_empty() {
        return Err(InferError::Parse);
    }
    let payload = json!({
        "photos": photos,
        "hint": hint,
        "instruction": "Identify the item shown in these photos.",
    });
    let value = infer_value(llm, payload).await?;
    finish(value, hint.unwrap_or("photo upload"), photos)
}

async fn infer_value(llm: &LlmClient, payload: Value) -> Result<Value, InferError> {
    let messages = vec![
        LlmMessage {
            role: "system".into(),
            content: SYSTEM_PROMPT.into(),
        },
        LlmMessage {
            role: "user".into(),
            content: payload.to_string(),
        },
    ];

    let response = llm
        .chat(&messages)
        .await
        .map_err(|err| InferError::Llm(err.to_string()))?;

    let cleaned = strip_markdown_fence(&response.text);
    serde_json::from_str(&cleaned).map_err(|_| InferError::Parse)
}

fn finish(
    mut value: Value,
    source_token: &str,
    photos: &[String],
) -> Result<ExtractedItem, InferError> {
    normalize_item_value(&mut value, source_token, photos);
    serde_json::from_value::<ExtractedItem>(value).map_err(|_| InferError::Parse)
}

pub(crate) fn strip_markdown_fence(input: &str) -> String {
    let trimmed = input.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let mut body = Vec::new();
    for line in trimmed.lines().skip(1) {
        if line.trim_start().starts_with("```") {
            break;
        }
        body.push(line);
    }
    body.join("\n")
}

/// Model output is almost right, never quite: prices arrive as strings,
/// names go missing, extra keys appear. Repair in place before typing it.
fn normalize_item_value(value: &mut Value, source_token: &str, photos: &[String]) {
    if !value.is_object() {
        *value = json!({});
    }
    let Some(obj) = value.as_object_mut() else {
        return;
    };

    if obj
        .get("name")
        .and_then(Value::as_str)
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        let fallback: String = source_token.trim().chars().take(60).collect();
        obj.insert("name".into(), Value::String(fallback));
    }

    match obj.get("price").cloned() {
        Some(Value::String(raw)) => {
            match price::coerce_amount(&raw).and_then(|amount| serde_json::Number::from_f64(amount))
            {
                Some(number) => obj.insert("price".into(), Value::Number(number)),
                None => obj.insert("price".into(), Value::Null),
            };
        }
        Some(Value::Number(number)) => {
            if number.as_f64().is_none_or(|amount| amount <= 0.0) {
                obj.insert("price".into(), Value::Null);
            }
        }
        _ => {}
    }

    if let Some(currency) = obj.get("currency").and_then(Value::as_str) {
        let trimmed = currency.trim().to_ascii_uppercase();
        let replacement = if trimmed.len() == 3 {
            Value::String(trimmed)
        } else {
            Value::Null
        };
        obj.insert("currency".into(), replacement);
    }

    if obj
        .get("photo_candidates")
        .and_then(Value::as_array)
        .is_none_or(|arr| arr.is_empty())
    {
        obj.insert(
            "photo_candidates".into(),
            Value::Array(
                photos
                    .iter()
                    .take(6)
                    .map(|url| Value::String(url.clone()))
                    .collect(),
            ),
        );
    }

    obj.insert(
        "source_token".into(),
        Value::String(source_token.to_string()),
    );
}
