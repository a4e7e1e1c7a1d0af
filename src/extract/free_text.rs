use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use crate::classify::ClassifiedToken;
use crate::extract::{Extract, ExtractFailure, infer, price};
use crate::llm::LlmClient;
use crate::models::ExtractedItem;

/// Free-text tokens go through the inference gateway; when it is down or
/// returns junk, a local name/brand/price parse keeps the batch moving.
pub struct FreeTextExtractor {
    llm: Arc<LlmClient>,
}

impl FreeTextExtractor {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Extract for FreeTextExtractor {
    async fn extract(&self, token: &ClassifiedToken) -> Result<ExtractedItem, ExtractFailure> {
        match infer::item_from_text(&self.llm, &token.raw).await {
            Ok(item) => Ok(item),
            Err(err) => {
                warn!(
                    target = "teed.extract",
                    index = token.index,
                    error = %err,
                    "free_text_inference_fallback"
                );
                Ok(heuristic_item(&token.raw))
            }
        }
    }
}

pub(crate) fn heuristic_item(raw: &str) -> ExtractedItem {
    let mention = price::find_price(raw);

    let mut name = raw.trim().to_string();
    if let Some(found) = &mention {
        name = name.replacen(&found.source, "", 1);
    }
    let name = name
        .trim()
        .trim_matches(|ch: char| matches!(ch, ',' | ';' | ':' | '-'))
        .trim();
    let name = if name.is_empty() {
        raw.trim().chars().take(60).collect::<String>()
    } else {
        name.to_string()
    };

    let mut item = ExtractedItem::named(name, raw);
    if let Some(found) = mention {
        item.price = Some(found.amount);
        item.currency = found.currency.map(str::to_string);
    }
    item.brand = guess_brand(&item.name);
    item
}

/// A leading capitalized word in a multi-word name is usually the brand.
fn guess_brand(name: &str) -> Option<String> {
    let mut words = name.split_whitespace();
    let first = words.next()?;
    words.next()?;
    let head = first.chars().next()?;
    (head.is_uppercase() && first.len() > 1 && first.chars().all(char::is_alphanumeric))
        .then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::TokenKind;
    use crate::llm::LlmConfig;

    #[test]
    fn heuristic_splits_name_and_price() {
        let item = heuristic_item("Nike Air Max, $120");
        assert_eq!(item.name, "Nike Air Max");
        assert_eq!(item.brand.as_deref(), Some("Nike"));
        assert_eq!(item.price, Some(120.0));
        assert_eq!(item.currency.as_deref(), Some("USD"));
        assert_eq!(item.source_token, "Nike Air Max, $120");
    }

    #[test]
    fn heuristic_without_price_keeps_full_name() {
        let item = heuristic_item("vintage Ping Anser putter");
        assert_eq!(item.name, "vintage Ping Anser putter");
        assert_eq!(item.price, None);
        assert_eq!(item.brand, None);
    }

    #[test]
    fn heuristic_price_only_text_still_names_the_item() {
        let item = heuristic_item("$120");
        assert_eq!(item.name, "$120");
        assert_eq!(item.price, Some(120.0));
    }

    #[test]
    fn single_word_names_get_no_brand_guess() {
        assert_eq!(guess_brand("Titleist"), None);
        assert_eq!(guess_brand("Titleist TSR3 driver"), Some("Titleist".into()));
        assert_eq!(guess_brand("iphone 15 case"), None);
    }

    #[tokio::test]
    async fn extract_falls_back_when_gateway_is_unreachable() {
        let config = LlmConfig {
            gateway_url: "http://127.0.0.1:9".into(),
            api_key: None,
            function_name: None,
            model: None,
        };
        let extractor = FreeTextExtractor::new(Arc::new(LlmClient::new(config)));
        let token = ClassifiedToken {
            index: 0,
            raw: "Nike Air Max, $120".to_string(),
            kind: TokenKind::FreeText,
        };

        let item = extractor.extract(&token).await.expect("fallback item");
        assert_eq!(item.name, "Nike Air Max");
        assert_eq!(item.price, Some(120.0));
    }
}
