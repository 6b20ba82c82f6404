use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::analysis::{colors_of, garment_type};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShoppingLink {
    pub store: String,
    pub emoji: String,
    pub url: String,
    pub query: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueryEncoding {
    /// `application/x-www-form-urlencoded`, spaces become `+`.
    Form,
    /// Plain percent-encoding, spaces become `%20`.
    Percent,
}

#[derive(Debug, Clone, Copy)]
struct PartnerStore {
    name: &'static str,
    emoji: &'static str,
    base_url: &'static str,
    param: &'static str,
    encoding: QueryEncoding,
}

const PARTNER_STORES: [PartnerStore; 5] = [
    PartnerStore {
        name: "Amazon",
        emoji: "📦",
        base_url: "https://www.amazon.com/s",
        param: "k",
        encoding: QueryEncoding::Form,
    },
    PartnerStore {
        name: "H&M",
        emoji: "🛍️",
        base_url: "https://www2.hm.com/en_us/search-results.html",
        param: "q",
        encoding: QueryEncoding::Form,
    },
    PartnerStore {
        name: "ASOS",
        emoji: "✨",
        base_url: "https://www.asos.com/search/",
        param: "q",
        encoding: QueryEncoding::Percent,
    },
    PartnerStore {
        name: "Target",
        emoji: "🎯",
        base_url: "https://www.target.com/s",
        param: "searchTerm",
        encoding: QueryEncoding::Form,
    },
    PartnerStore {
        name: "Zara",
        emoji: "👗",
        base_url: "https://www.zara.com/search",
        param: "searchTerm",
        encoding: QueryEncoding::Percent,
    },
];

const IGNORED_STYLES: [&str; 2] = ["unknown", "none"];
const IGNORED_FABRICS: [&str; 3] = ["unknown", "none", "mixed"];

/// Builds "type style color fabric" from an analysis, skipping placeholders.
pub fn search_query(analysis: &Map<String, Value>) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(kind) = garment_type(analysis) {
        parts.push(kind.to_string());
    }
    if let Some(style) = meaningful_text(analysis, "style", &IGNORED_STYLES) {
        parts.push(style);
    }
    if let Some(color) = colors_of(analysis).into_iter().next() {
        parts.push(color);
    }
    if let Some(fabric) = meaningful_text(analysis, "fabric", &IGNORED_FABRICS) {
        parts.push(fabric);
    }
    parts.join(" ")
}

pub fn shopping_links(analysis: &Map<String, Value>) -> Vec<ShoppingLink> {
    let query = search_query(analysis);
    if query.is_empty() {
        return Vec::new();
    }
    PARTNER_STORES
        .iter()
        .map(|store| ShoppingLink {
            store: store.name.to_string(),
            emoji: store.emoji.to_string(),
            url: format!(
                "{}?{}={}",
                store.base_url,
                store.param,
                encode_query(&query, store.encoding)
            ),
            query: query.clone(),
        })
        .collect()
}

fn encode_query(query: &str, encoding: QueryEncoding) -> String {
    match encoding {
        QueryEncoding::Form => url::form_urlencoded::byte_serialize(query.as_bytes()).collect(),
        QueryEncoding::Percent => urlencoding::encode(query).into_owned(),
    }
}

fn meaningful_text(analysis: &Map<String, Value>, key: &str, ignored: &[&str]) -> Option<String> {
    analysis
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .filter(|value| !ignored.contains(&value.to_ascii_lowercase().as_str()))
        .map(str::to_string)
}
