//! Data exchanged between the extractor, the sandbox and the host.

use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Request headers the host must send when fetching the cover image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoverHeaders(BTreeMap<String, String>);

impl CoverHeaders {
    /// `{Referer, Origin}` of the page when a cover is present, otherwise empty.
    pub fn for_cover(cover: &str, page_href: &str, page_origin: &str) -> Self {
        if cover.is_empty() {
            return Self::default();
        }

        let mut headers = BTreeMap::new();
        headers.insert("Referer".to_owned(), page_href.to_owned());
        headers.insert("Origin".to_owned(), page_origin.to_owned());
        Self(headers)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Metadata handed to the host's play handler.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedMetadata {
    pub share_url: String,
    pub page_url: String,
    pub title: String,
    pub year: String,
    pub rating: String,
    pub category: String,
    pub intro: String,
    pub cover: String,
    pub cover_headers: CoverHeaders,
}

/// Metadata captured on the listing page before navigating to a detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AutoContext {
    pub title: String,
    pub year: String,
    pub rating: String,
    pub category: String,
    pub intro: String,
    pub cover: String,
    pub href: String,
    pub page_url: String,
}

const INTRO_KEYS: &[&str] = &["intro", "vod_content"];
const YEAR_KEYS: &[&str] = &["year", "vod_year", "releaseYear", "publishYear"];
const RATING_KEYS: &[&str] = &["rating", "vod_score", "score", "douban_score"];
const CATEGORY_KEYS: &[&str] = &["category", "type_name", "typeName", "genre", "genres", "class"];

impl AutoContext {
    /// Reads a stored context, accepting the alias keys CMS payloads use.
    /// Returns `None` unless the value is a JSON object.
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let first_text = |keys: &[&str]| {
            keys.iter()
                .map(|key| object.get(*key).map(json_text).unwrap_or_default())
                .find(|text| !text.is_empty())
                .unwrap_or_default()
        };
        let category = CATEGORY_KEYS
            .iter()
            .filter_map(|key| object.get(*key))
            .map(json_category)
            .find(|text| !text.is_empty())
            .unwrap_or_default();

        Some(Self {
            title: first_text(&["title"]),
            year: first_text(YEAR_KEYS),
            rating: first_text(RATING_KEYS),
            category,
            intro: first_text(INTRO_KEYS),
            cover: first_text(&["cover"]),
            href: first_text(&["href"]),
            page_url: first_text(&["pageUrl"]),
        })
    }
}

/// Payload of the error side channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub message: String,
    pub page_url: String,
    pub timestamp: u64,
}

/// Read-only serialization of the page handed to the remote analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageSnapshot {
    pub html: String,
    pub url: String,
    pub title: String,
    pub referrer: String,
    pub charset: String,
    pub ready_state: String,
    pub local_payload: ExtractedMetadata,
    pub auto_context: Option<AutoContext>,
    pub anchor: AnchorSnapshot,
    pub card: CardSnapshot,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnchorSnapshot {
    pub href: String,
    pub text: String,
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
    pub next_sibling_image: Option<ImageSnapshot>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSnapshot {
    pub data_src: String,
    pub src: String,
    pub current_src: String,
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardSnapshot {
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
}

/// Collapses whitespace runs into single spaces and trims the ends.
pub fn collapse_whitespace(input: &str) -> String {
    input
        .split_whitespace()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Text form of an untrusted JSON scalar; arrays join like JS `String([..])`.
pub fn json_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        Value::String(text) => collapse_whitespace(text),
        Value::Array(items) => collapse_whitespace(
            &items
                .iter()
                .map(json_text)
                .collect::<Vec<_>>()
                .join(","),
        ),
        Value::Object(_) => String::new(),
    }
}

/// Category text: arrays (of strings or `{name|title|value}` objects) are
/// deduplicated in order and joined with `" / "`.
pub fn json_category(value: &Value) -> String {
    let Value::Array(items) = value else {
        return json_text(value);
    };

    let mut values: Vec<String> = Vec::new();
    for item in items {
        let text = match item {
            Value::Object(object) => ["name", "title", "value"]
                .iter()
                .filter_map(|key| object.get(*key))
                .map(json_text)
                .find(|text| !text.is_empty())
                .unwrap_or_default(),
            other => json_text(other),
        };
        push_unique_text(&mut values, &text);
    }
    values.join(" / ")
}

/// Appends the cleaned value unless it is empty or already present.
pub fn push_unique_text(target: &mut Vec<String>, value: &str) {
    let cleaned = collapse_whitespace(value);
    if cleaned.is_empty() {
        return;
    }
    if !target.contains(&cleaned) {
        target.push(cleaned);
    }
}

#[cfg(test)]
mod tests {
    use super::AutoContext;
    use super::CoverHeaders;
    use super::ExtractedMetadata;
    use super::json_category;
    use super::json_text;
    use serde_json::json;

    #[test]
    fn cover_headers_follow_cover_presence() {
        let headers = CoverHeaders::for_cover("https://a.test/c.jpg", "https://a.test/p", "https://a.test");
        assert_eq!(headers.get("Referer"), Some("https://a.test/p"));
        assert_eq!(headers.get("Origin"), Some("https://a.test"));
        assert!(CoverHeaders::for_cover("", "https://a.test/p", "https://a.test").is_empty());
    }

    #[test]
    fn metadata_serializes_with_camel_case_keys() {
        let metadata = ExtractedMetadata {
            share_url: "https://pan.quark.cn/s/abc".to_owned(),
            ..ExtractedMetadata::default()
        };
        let value = serde_json::to_value(&metadata).unwrap_or_default();
        assert_eq!(value["shareUrl"], json!("https://pan.quark.cn/s/abc"));
        assert_eq!(value["coverHeaders"], json!({}));
        assert_eq!(value["intro"], json!(""));
    }

    #[test]
    fn auto_context_reads_alias_keys() {
        let context = AutoContext::from_value(&json!({
            "title": " Movie  Name ",
            "vod_year": 2021,
            "douban_score": "7.9",
            "genres": ["Drama", {"name": "Crime"}, "Drama"],
            "vod_content": "A story.",
        }));
        let context = context.unwrap_or_default();
        assert_eq!(context.title, "Movie Name");
        assert_eq!(context.year, "2021");
        assert_eq!(context.rating, "7.9");
        assert_eq!(context.category, "Drama / Crime");
        assert_eq!(context.intro, "A story.");
    }

    #[test]
    fn auto_context_rejects_non_objects() {
        assert_eq!(AutoContext::from_value(&json!("text")), None);
        assert_eq!(AutoContext::from_value(&json!(null)), None);
    }

    #[test]
    fn json_text_coerces_scalars() {
        assert_eq!(json_text(&json!(8.5)), "8.5");
        assert_eq!(json_text(&json!(null)), "");
        assert_eq!(json_text(&json!(["a", "b"])), "a,b");
        assert_eq!(json_category(&json!("  Sci-Fi ")), "Sci-Fi");
    }
}
