use serde::Serialize;
use url::Url;

use crate::extract::oembed;

/// One recognized segment of a pasted batch, in input order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedToken {
    pub index: usize,
    pub raw: String,
    pub kind: TokenKind,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TokenKind {
    ProductUrl {
        url: String,
        host: String,
    },
    EmbedUrl {
        url: String,
        host: String,
        provider: &'static str,
    },
    FreeText,
}

impl TokenKind {
    pub fn label(&self) -> &'static str {
        match self {
            TokenKind::ProductUrl { .. } => "product_url",
            TokenKind::EmbedUrl { .. } => "embed_url",
            TokenKind::FreeText => "free_text",
        }
    }
}

/// Splits raw pasted text and classifies every segment. Never fails: anything
/// that does not look like a usable URL falls through to FreeText.
pub fn classify_input(input: &str) -> Vec<ClassifiedToken> {
    segment(input)
        .into_iter()
        .enumerate()
        .map(|(index, raw)| {
            let kind = classify_token(&raw);
            ClassifiedToken { index, raw, kind }
        })
        .collect()
}

/// Line-based splitting. A line whose whitespace-separated chunks are all
/// URL-shaped becomes one token per chunk; any other line is one token.
fn segment(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    for line in input.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let chunks: Vec<&str> = line.split_whitespace().collect();
        if chunks.len() > 1 && chunks.iter().all(|chunk| parse_url_shaped(chunk).is_some()) {
            tokens.extend(chunks.into_iter().map(|chunk| chunk.to_string()));
        } else {
            tokens.push(line.to_string());
        }
    }
    tokens
}

fn classify_token(raw: &str) -> TokenKind {
    let Some(url) = parse_url_shaped(raw) else {
        return TokenKind::FreeText;
    };
    let host = url.host_str().unwrap_or_default().to_ascii_lowercase();
    match oembed::provider_for_host(&host) {
        Some(provider) => TokenKind::EmbedUrl {
            url: url.to_string(),
            host,
            provider: provider.name,
        },
        None => TokenKind::ProductUrl {
            url: url.to_string(),
            host,
        },
    }
}

/// Lenient URL recognition: an explicit http(s) URL, or a bare domain-shaped
/// chunk that parses once `https://` is prefixed. Other schemes and anything
/// ambiguous stay unrecognized so the caller can demote them to FreeText.
fn parse_url_shaped(chunk: &str) -> Option<Url> {
    let trimmed = chunk.trim();
    if trimmed.is_empty() || trimmed.contains(char::is_whitespace) {
        return None;
    }

    if let Ok(url) = Url::parse(trimmed) {
        return match url.scheme() {
            "http" | "https" => Some(url),
            _ => None,
        };
    }

    if !trimmed.contains('.') {
        return None;
    }
    if !trimmed
        .chars()
        .next()
        .is_some_and(|ch| ch.is_ascii_alphanumeric())
    {
        return None;
    }

    let url = Url::parse(&format!("https://{trimmed}")).ok()?;
    let host = url.host_str()?;
    let last_label = host.rsplit('.').next()?;
    if last_label.len() < 2 || !last_label.chars().all(|ch| ch.is_ascii_alphabetic()) {
        return None;
    }
    Some(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_per_line_and_keeps_order() {
        let tokens = classify_input("https://shop.example.com/p/1\nOn Cloudmonster, $170\n");
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[0].index, 0);
        assert_eq!(tokens[1].index, 1);
        assert!(matches!(tokens[0].kind, TokenKind::ProductUrl { .. }));
        assert_eq!(tokens[1].kind, TokenKind::FreeText);
    }

    #[test]
    fn all_url_line_splits_per_chunk() {
        let tokens =
            classify_input("https://a.example.com/x https://b.example.com/y example.com/z");
        assert_eq!(tokens.len(), 3);
        assert!(
            tokens
                .iter()
                .all(|t| matches!(t.kind, TokenKind::ProductUrl { .. }))
        );
    }

    #[test]
    fn mixed_line_stays_one_free_text_token() {
        let tokens = classify_input("check out https://a.example.com/x later");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::FreeText);
    }

    #[test]
    fn blank_segments_are_dropped() {
        let tokens = classify_input("\n\n  \nexample.com\n\n");
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].raw, "example.com");
    }

    #[test]
    fn bare_domain_gets_https_inferred() {
        let tokens = classify_input("shop.example.com/collections/new");
        match &tokens[0].kind {
            TokenKind::ProductUrl { url, host } => {
                assert!(url.starts_with("https://"));
                assert_eq!(host, "shop.example.com");
            }
            other => panic!("expected ProductUrl, got {other:?}"),
        }
    }

    #[test]
    fn unsupported_scheme_demotes_to_free_text() {
        let tokens = classify_input("ftp://example.com/file.bin");
        assert_eq!(tokens[0].kind, TokenKind::FreeText);
    }

    #[test]
    fn provider_hosts_classify_as_embed() {
        let tokens = classify_input(
            "https://www.youtube.com/watch?v=abc123\nhttps://vimeo.com/99999\nhttps://youtu.be/xyz",
        );
        let providers: Vec<&str> = tokens
            .iter()
            .map(|t| match &t.kind {
                TokenKind::EmbedUrl { provider, .. } => *provider,
                other => panic!("expected EmbedUrl, got {other:?}"),
            })
            .collect();
        assert_eq!(providers, vec!["YouTube", "Vimeo", "YouTube"]);
    }

    #[test]
    fn prose_with_numbers_is_not_a_url() {
        for raw in ["Nike Air Max, $120", "$120", "v2.0", "size 10.5 mens"] {
            let tokens = classify_input(raw);
            assert_eq!(tokens.len(), 1, "{raw}");
            assert_eq!(tokens[0].kind, TokenKind::FreeText, "{raw}");
        }
    }

    #[test]
    fn classification_never_fails_on_garbage() {
        let tokens = classify_input("::::\nhttp://\n...\n🧢🧢🧢");
        assert_eq!(tokens.len(), 4);
        assert!(tokens.iter().all(|t| t.kind == TokenKind::FreeText));
    }

    #[test]
    fn worked_example_two_tokens() {
        let tokens = classify_input("https://example.com/product/123\nNike Air Max, $120");
        assert_eq!(tokens.len(), 2);
        assert!(matches!(tokens[0].kind, TokenKind::ProductUrl { .. }));
        assert_eq!(tokens[1].kind, TokenKind::FreeText);
        assert_eq!(tokens[1].raw, "Nike Air Max, $120");
    }
}
