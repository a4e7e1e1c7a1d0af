use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::classify::{ClassifiedToken, TokenKind};
use crate::extract::{Extract, ExtractFailure};
use crate::models::ExtractedItem;

/// Curated oEmbed endpoints. Hosts match exactly or as a subdomain, so
/// `www.youtube.com` and `m.youtube.com` both resolve to YouTube.
pub struct OembedProvider {
    pub name: &'static str,
    pub domains: &'static [&'static str],
    pub endpoint: &'static str,
}

static PROVIDERS: [OembedProvider; 5] = [
    OembedProvider {
        name: "YouTube",
        domains: &["youtube.com", "youtu.be"],
        endpoint: "https://www.youtube.com/oembed",
    },
    OembedProvider {
        name: "Vimeo",
        domains: &["vimeo.com"],
        endpoint: "https://vimeo.com/api/oembed.json",
    },
    OembedProvider {
        name: "X",
        domains: &["x.com", "twitter.com"],
        endpoint: "https://publish.twitter.com/oembed",
    },
    OembedProvider {
        name: "TikTok",
        domains: &["tiktok.com"],
        endpoint: "https://www.tiktok.com/oembed",
    },
    OembedProvider {
        name: "SoundCloud",
        domains: &["soundcloud.com"],
        endpoint: "https://soundcloud.com/oembed",
    },
];

pub fn provider_for_host(host: &str) -> Option<&'static OembedProvider> {
    let host = host.to_ascii_lowercase();
    PROVIDERS.iter().find(|provider| {
        provider
            .domains
            .iter()
            .any(|domain| host == *domain || host.ends_with(&format!(".{domain}")))
    })
}

#[derive(Debug, Clone, Deserialize)]
pub struct OembedResponse {
    pub title: Option<String>,
    pub author_name: Option<String>,
    pub provider_name: Option<String>,
    pub thumbnail_url: Option<String>,
}

pub async fn fetch_oembed(
    client: &Client,
    provider: &OembedProvider,
    target: &str,
) -> Result<OembedResponse, ExtractFailure> {
    let url = format!(
        "{}?url={}&format=json",
        provider.endpoint,
        urlencoding::encode(target)
    );
    let response = client.get(&url).send().await.map_err(ExtractFailure::from)?;
    if !response.status().is_success() {
        return Err(ExtractFailure::upstream_status(response.status()));
    }
    response
        .json::<OembedResponse>()
        .await
        .map_err(|err| ExtractFailure::empty_result(format!("unusable oembed payload: {err}")))
}

pub fn item_from_response(
    provider: &OembedProvider,
    token: &ClassifiedToken,
    payload: OembedResponse,
) -> Result<ExtractedItem, ExtractFailure> {
    let title = payload
        .title
        .as_deref()
        .map(str::trim)
        .filter(|title| !title.is_empty())
        .ok_or_else(|| ExtractFailure::empty_result("oembed payload had no title"))?;

    let mut item = ExtractedItem::named(title, &token.raw);
    item.notes = Some(match payload.author_name.as_deref().map(str::trim) {
        Some(author) if !author.is_empty() => format!("{} · {author}", provider.name),
        _ => provider.name.to_string(),
    });
    if let Some(thumb) = payload
        .thumbnail_url
        .filter(|thumb| thumb.starts_with("http"))
    {
        item.photo_candidates.push(thumb);
    }
    Ok(item)
}

pub struct OembedExtractor {
    client: Client,
}

impl OembedExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Extract for OembedExtractor {
    async fn extract(&self, token: &ClassifiedToken) -> Result<ExtractedItem, ExtractFailure> {
        let TokenKind::EmbedUrl { url, host, .. } = &token.kind else {
            return Err(ExtractFailure::empty_result("token is not an embed url"));
        };
        let provider = provider_for_host(host)
            .ok_or_else(|| ExtractFailure::empty_result(format!("no oembed provider for {host}")))?;
        let payload = fetch_oembed(&self.client, provider, url).await?;
        item_from_response(provider, token, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FailureReason;

    fn embed_token(url: &str, host: &str, provider: &'static str) -> ClassifiedToken {
        ClassifiedToken {
            index: 0,
            raw: url.to_string(),
            kind: TokenKind::EmbedUrl {
                url: url.to_string(),
                host: host.to_string(),
                provider,
            },
        }
    }

    #[test]
    fn provider_lookup_matches_subdomains() {
        assert_eq!(provider_for_host("www.youtube.com").map(|p| p.name), Some("YouTube"));
        assert_eq!(provider_for_host("youtu.be").map(|p| p.name), Some("YouTube"));
        assert_eq!(provider_for_host("m.tiktok.com").map(|p| p.name), Some("TikTok"));
        assert_eq!(provider_for_host("twitter.com").map(|p| p.name), Some("X"));
        assert!(provider_for_host("example.com").is_none());
        assert!(provider_for_host("notyoutube.com").is_none());
    }

    #[test]
    fn response_maps_into_item() {
        let payload: OembedResponse = serde_json::from_str(
            r#"{
                "title": "Spring bag dump",
                "author_name": "golfcore",
                "provider_name": "YouTube",
                "thumbnail_url": "https://i.ytimg.com/vi/abc/hqdefault.jpg"
            }"#,
        )
        .unwrap();
        let token = embed_token("https://youtu.be/abc", "youtu.be", "YouTube");
        let provider = provider_for_host("youtu.be").unwrap();

        let item = item_from_response(provider, &token, payload).unwrap();
        assert_eq!(item.name, "Spring bag dump");
        assert_eq!(item.notes.as_deref(), Some("YouTube · golfcore"));
        assert_eq!(item.photo_candidates.len(), 1);
        assert_eq!(item.source_token, "https://youtu.be/abc");
    }

    #[test]
    fn missing_title_is_an_empty_result() {
        let payload: OembedResponse =
            serde_json::from_str(r#"{"author_name": "someone"}"#).unwrap();
        let token = embed_token("https://vimeo.com/1", "vimeo.com", "Vimeo");
        let provider = provider_for_host("vimeo.com").unwrap();

        let err = item_from_response(provider, &token, payload).unwrap_err();
        assert_eq!(err.reason, FailureReason::EmptyResult);
    }
}
