//! Text normalization rules shared by the extractor and the remote-result sanitizer.

use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

pub use mb_core::collapse_whitespace as clean_text;
pub use mb_core::push_unique_text;

static YEAR_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?:19|20)\d{2}").ok());
static NUMBER_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").ok());
static CATEGORY_LABEL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(类型|分类|genre|type)").ok());
static CATEGORY_SPLIT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"[/|,，、]+").ok());
static RATING_LABEL_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(豆瓣|评分|imdb|tmdb)").ok());

/// First `19xx`/`20xx` run in the cleaned text.
pub fn normalize_year(raw: &str) -> String {
    let text = clean_text(raw);
    if text.is_empty() {
        return String::new();
    }

    YEAR_PATTERN
        .as_ref()
        .and_then(|pattern| pattern.find(&text))
        .map(|found| found.as_str().to_owned())
        .unwrap_or_default()
}

/// First numeric token whose value lies within `0..=10`, as written.
pub fn normalize_rating(raw: &str) -> String {
    let text = clean_text(raw);
    if text.is_empty() {
        return String::new();
    }

    let Some(pattern) = NUMBER_PATTERN.as_ref() else {
        return String::new();
    };
    pattern
        .find_iter(&text)
        .map(|found| found.as_str())
        .find(|token| {
            token
                .parse::<f64>()
                .is_ok_and(|value| (0.0..=10.0).contains(&value))
        })
        .map(str::to_owned)
        .unwrap_or_default()
}

/// Category text from an untrusted value; see [`mb_core::json_category`].
pub fn normalize_category(raw: &Value) -> String {
    mb_core::json_category(raw)
}

/// Whether a label mentions a genre/type heading.
pub fn mentions_category_label(text: &str) -> bool {
    CATEGORY_LABEL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

/// Whether a label mentions a rating source.
pub fn mentions_rating_label(text: &str) -> bool {
    RATING_LABEL_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(text))
}

/// Splits `类型：剧情 / 犯罪` style labels into their cleaned items.
pub fn split_category_label(text: &str) -> Vec<String> {
    let parts: Vec<&str> = text.split(|ch: char| ch == ':' || ch == '：').collect();
    let detail = if parts.len() > 1 {
        parts[1..].join(" ")
    } else {
        text.to_owned()
    };

    let items: Vec<String> = match CATEGORY_SPLIT_PATTERN.as_ref() {
        Some(pattern) => pattern.split(&detail).map(clean_text).collect(),
        None => vec![clean_text(&detail)],
    };

    items
        .into_iter()
        .filter(|item| !item.is_empty() && !mentions_category_label(item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::clean_text;
    use super::normalize_category;
    use super::normalize_rating;
    use super::normalize_year;
    use super::split_category_label;
    use serde_json::json;

    #[test]
    fn year_takes_first_plausible_match() {
        assert_eq!(normalize_year("Released in 2019 (HD)"), "2019");
        assert_eq!(normalize_year("no year here"), "");
        assert_eq!(normalize_year("1080p / 2003 / 2005"), "2003");
        assert_eq!(normalize_year(""), "");
    }

    #[test]
    fn rating_takes_first_token_in_range() {
        assert_eq!(normalize_rating("8.5 / 10 豆瓣评分"), "8.5");
        assert_eq!(normalize_rating("2019 年 评分 7.2"), "7.2");
        assert_eq!(normalize_rating("10"), "10");
        assert_eq!(normalize_rating("暂无评分"), "");
    }

    #[test]
    fn clean_text_collapses_whitespace() {
        assert_eq!(clean_text("  a \n\t b  "), "a b");
    }

    #[test]
    fn category_joins_unique_items() {
        assert_eq!(
            normalize_category(&json!(["剧情", " 犯罪 ", "剧情", {"title": "悬疑"}])),
            "剧情 / 犯罪 / 悬疑"
        );
    }

    #[test]
    fn splits_category_labels() {
        assert_eq!(
            split_category_label("类型：剧情 / 犯罪，悬疑"),
            vec!["剧情".to_owned(), "犯罪".to_owned(), "悬疑".to_owned()]
        );
        assert_eq!(
            split_category_label("Genre: Drama | Crime"),
            vec!["Drama".to_owned(), "Crime".to_owned()]
        );
    }
}
