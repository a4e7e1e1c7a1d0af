use async_trait::async_trait;
use once_cell::sync::Lazy;
use reqwest::Client;
use reqwest::header::ACCEPT;
use scraper::{Html, Selector};
use serde_json::Value;

use crate::classify::{ClassifiedToken, TokenKind};
use crate::extract::{Extract, ExtractFailure, price};
use crate::models::ExtractedItem;

/// Product URLs are scraped, not proxied through a third-party service:
/// fetch the page, then try JSON-LD, OpenGraph, and the document title in
/// that order.
pub struct ProductPageExtractor {
    client: Client,
}

impl ProductPageExtractor {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Extract for ProductPageExtractor {
    async fn extract(&self, token: &ClassifiedToken) -> Result<ExtractedItem, ExtractFailure> {
        let TokenKind::ProductUrl { url, .. } = &token.kind else {
            return Err(ExtractFailure::empty_result("token is not a product url"));
        };
        let html = fetch_page(&self.client, url).await?;
        parse_item(&html, token)
            .ok_or_else(|| ExtractFailure::empty_result("page had no usable product metadata"))
    }
}

async fn fetch_page(client: &Client, url: &str) -> Result<String, ExtractFailure> {
    let response = client
        .get(url)
        .header(
            ACCEPT,
            "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
        )
        .send()
        .await
        .map_err(ExtractFailure::from)?;
    if !response.status().is_success() {
        return Err(ExtractFailure::upstream_status(response.status()));
    }
    response
        .text()
        .await
        .map_err(|err| ExtractFailure::network(err.to_string()))
}

/// Synchronous on purpose: `scraper::Html` is not `Send`, so the document
/// never lives across an await.
pub(crate) fn parse_item(html: &str, token: &ClassifiedToken) -> Option<ExtractedItem> {
    let document = Html::parse_document(html);
    ld_product(&document)
        .map(|product| item_from_ld(product, token))
        .or_else(|| open_graph_item(&document, token))
        .or_else(|| title_item(&document, token))
}

// schema.org Product as it appears in ld+json blocks. Sites disagree on
// whether image/brand/offers are strings, objects, or arrays, so every
// field tolerates all the shapes seen in the wild.
mod ld {
    use serde::Deserialize;

    #[derive(Debug, Clone, Deserialize)]
    pub struct Product {
        pub name: String,
        #[serde(default)]
        pub image: Option<ImageField>,
        #[serde(default)]
        pub offers: Option<OfferField>,
        #[serde(default)]
        pub brand: Option<BrandField>,
        #[serde(default)]
        pub description: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum ImageField {
        Single(String),
        Multiple(Vec<String>),
        Object { url: String },
    }

    impl ImageField {
        pub fn into_vec(self) -> Vec<String> {
            match self {
                ImageField::Single(value) => vec![value],
                ImageField::Multiple(values) => values,
                ImageField::Object { url } => vec![url],
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum BrandField {
        Name(String),
        Object { name: Option<String> },
    }

    impl BrandField {
        pub fn into_name(self) -> Option<String> {
            match self {
                BrandField::Name(name) => Some(name),
                BrandField::Object { name } => name,
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum OfferField {
        Single(Offer),
        Multiple(Vec<Offer>),
    }

    impl OfferField {
        pub fn into_first(self) -> Option<Offer> {
            match self {
                OfferField::Single(offer) => Some(offer),
                OfferField::Multiple(offers) => offers.into_iter().next(),
            }
        }
    }

    #[derive(Debug, Clone, Deserialize)]
    pub struct Offer {
        #[serde(default)]
        pub price: Option<PriceField>,
        #[serde(default, rename = "priceCurrency")]
        pub price_currency: Option<String>,
    }

    #[derive(Debug, Clone, Deserialize)]
    #[serde(untagged)]
    pub enum PriceField {
        Number(f64),
        Text(String),
    }
}

static LD_JSON_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("selector"));
static TITLE_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("title").expect("selector"));

fn ld_product(document: &Html) -> Option<ld::Product> {
    for script in document.select(&LD_JSON_SELECTOR) {
        let raw = script.text().collect::<String>();
        let Ok(value) = serde_json::from_str::<Value>(&raw) else {
            continue;
        };
        if let Some(product) = product_node(&value) {
            return Some(product);
        }
    }
    None
}

fn product_node(value: &Value) -> Option<ld::Product> {
    match value {
        Value::Array(entries) => entries.iter().find_map(product_node),
        Value::Object(obj) => {
            if type_is_product(obj.get("@type")) {
                serde_json::from_value(value.clone()).ok()
            } else if let Some(graph) = obj.get("@graph") {
                product_node(graph)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn type_is_product(field: Option<&Value>) -> bool {
    match field {
        Some(Value::String(kind)) => kind == "Product",
        Some(Value::Array(kinds)) => kinds.iter().any(|k| k.as_str() == Some("Product")),
        _ => false,
    }
}

fn item_from_ld(product: ld::Product, token: &ClassifiedToken) -> ExtractedItem {
    let mut item = ExtractedItem::named(product.name.trim(), &token.raw);
    item.brand = product
        .brand
        .and_then(ld::BrandField::into_name)
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty());

    if let Some(offer) = product.offers.and_then(ld::OfferField::into_first) {
        item.price = offer.price.and_then(|field| match field {
            ld::PriceField::Number(value) => (value > 0.0).then_some(value),
            ld::PriceField::Text(raw) => price::coerce_amount(&raw),
        });
        item.currency = offer
            .price_currency
            .map(|code| code.trim().to_ascii_uppercase())
            .filter(|code| code.len() == 3);
    }

    if let Some(images) = product.image {
        item.photo_candidates = images
            .into_vec()
            .into_iter()
            .filter(|url| url.starts_with("http"))
            .take(6)
            .collect();
    }

    item.notes = product
        .description
        .as_deref()
        .and_then(|desc| desc.lines().next())
        .map(|line| line.trim().chars().take(160).collect::<String>())
        .filter(|line| !line.is_empty());

    item
}

fn open_graph_item(document: &Html, token: &ClassifiedToken) -> Option<ExtractedItem> {
    let title = meta_content(document, "og:title")?;
    let mut item = ExtractedItem::named(title, &token.raw);

    item.photo_candidates = meta_contents(document, "og:image")
        .into_iter()
        .filter(|url| url.starts_with("http"))
        .take(6)
        .collect();

    item.price = meta_content(document, "product:price:amount")
        .as_deref()
        .and_then(price::coerce_amount);
    item.currency = meta_content(document, "product:price:currency")
        .map(|code| code.to_ascii_uppercase())
        .filter(|code| code.len() == 3);
    item.notes = meta_content(document, "og:site_name");

    Some(item)
}

fn title_item(document: &Html, token: &ClassifiedToken) -> Option<ExtractedItem> {
    let raw = document
        .select(&TITLE_SELECTOR)
        .next()
        .map(|el| el.text().collect::<String>())?;
    let title = raw
        .split(" | ")
        .next()
        .unwrap_or(&raw)
        .trim()
        .chars()
        .take(120)
        .collect::<String>();
    if title.is_empty() {
        return None;
    }
    Some(ExtractedItem::named(title, &token.raw))
}

fn meta_content(document: &Html, property: &str) -> Option<String> {
    meta_contents(document, property).into_iter().next()
}

fn meta_contents(document: &Html, property: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse(&format!(
        r#"meta[property="{property}"], meta[name="{property}"]"#
    )) else {
        return Vec::new();
    };
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(|content| content.trim().to_string())
        .filter(|content| !content.is_empty())
        .collect()
}
