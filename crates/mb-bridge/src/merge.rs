//! Validation of analyzer output and its merge over the local payload.

use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::CoverHeaders;
use mb_core::ExtractedMetadata;
use mb_core::json_text;
use mb_dom::PageDocument;
use mb_extract::clean_text;
use mb_extract::normalize_category;
use mb_extract::normalize_rating;
use mb_extract::normalize_year;
use serde_json::Map;
use serde_json::Value;

const YEAR_KEYS: &[&str] = &["year", "vod_year", "releaseYear", "publishYear", "年份"];
const RATING_KEYS: &[&str] = &["rating", "vod_score", "score", "douban_score", "rate"];
const LOCALIZED_RATING_KEYS: &[&str] = &["评分"];
const CATEGORY_KEYS: &[&str] = &[
    "category",
    "type_name",
    "typeName",
    "genre",
    "genres",
    "class",
    "类别",
    "分类",
];
const INTRO_KEYS: &[&str] = &["intro", "vod_content", "description", "desc", "content", "简介"];

/// Fields recovered from an analyzer result. `None` means the analyzer
/// offered nothing usable for that field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteFields {
    pub share_url: Option<String>,
    pub title: Option<String>,
    pub year: Option<String>,
    pub rating: Option<String>,
    pub category: Option<String>,
    pub intro: Option<String>,
    pub cover: Option<String>,
}

/// Coerces an untrusted analyzer result into [`RemoteFields`].
pub fn sanitize_remote_result(value: &Value) -> BridgeResult<RemoteFields> {
    let Some(object) = value.as_object() else {
        return Err(BridgeError::new(
            "remote.result_invalid",
            "Remote analyzer result must be an object.",
        ));
    };

    let rating = pick(object, RATING_KEYS, |value| normalize_rating(&json_text(value)))
        .or_else(|| {
            pick(object, LOCALIZED_RATING_KEYS, |value| {
                normalize_rating(&json_text(value))
            })
        });

    Ok(RemoteFields {
        share_url: trimmed_string(object, "shareUrl"),
        title: trimmed_string(object, "title"),
        year: pick(object, YEAR_KEYS, |value| normalize_year(&json_text(value))),
        rating,
        category: pick(object, CATEGORY_KEYS, normalize_category),
        intro: pick(object, INTRO_KEYS, |value| clean_text(&json_text(value))),
        cover: trimmed_string(object, "cover"),
    })
}

fn trimmed_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .map(|text| text.trim().to_owned())
}

fn pick(
    object: &Map<String, Value>,
    keys: &[&str],
    normalize: impl Fn(&Value) -> String,
) -> Option<String> {
    keys.iter()
        .filter_map(|key| object.get(*key))
        .map(normalize)
        .find(|text| !text.is_empty())
}

/// Overlays non-empty remote fields on `local`. URLs are resolved against the
/// page and the cover headers follow the merged cover.
pub fn merge_payload(
    page: &PageDocument,
    local: &ExtractedMetadata,
    remote: Option<&RemoteFields>,
) -> ExtractedMetadata {
    let Some(remote) = remote else {
        return local.clone();
    };

    let mut merged = local.clone();
    let overwrite = |target: &mut String, candidate: Option<&String>| {
        if let Some(candidate) = candidate.filter(|value| !value.is_empty()) {
            target.clone_from(candidate);
        }
    };
    let absolute = |candidate: &Option<String>| {
        candidate
            .as_deref()
            .filter(|value| !value.is_empty())
            .map(|value| page.resolve_url(value))
    };

    overwrite(&mut merged.share_url, absolute(&remote.share_url).as_ref());
    overwrite(&mut merged.title, remote.title.as_ref());
    overwrite(&mut merged.year, remote.year.as_ref());
    overwrite(&mut merged.rating, remote.rating.as_ref());
    overwrite(&mut merged.category, remote.category.as_ref());
    overwrite(&mut merged.intro, remote.intro.as_ref());
    overwrite(&mut merged.cover, absolute(&remote.cover).as_ref());

    merged.cover_headers = CoverHeaders::for_cover(&merged.cover, page.href(), &page.origin());
    merged
}
