//! Byte-to-text decoding for saved pages.

use encoding_rs::Encoding;

const META_SNIFF_BYTES: usize = 8192;

/// Decoded page text plus the label of the encoding that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedPage {
    pub text: String,
    pub charset: String,
}

/// Decodes `body`, preferring a `<meta charset>` in the first 8 KiB, then the
/// `charset` parameter of `content_type`, then UTF-8 (lossy).
pub fn decode_page(body: &[u8], content_type: &str) -> DecodedPage {
    let encoding = detect_charset(body, content_type)
        .and_then(|label| Encoding::for_label(label.as_bytes()));
    match encoding {
        Some(encoding) => {
            let (decoded, used, _) = encoding.decode(body);
            DecodedPage {
                text: decoded.into_owned(),
                charset: used.name().to_owned(),
            }
        }
        None => DecodedPage {
            text: String::from_utf8_lossy(body).into_owned(),
            charset: "UTF-8".to_owned(),
        },
    }
}

fn detect_charset(body: &[u8], content_type: &str) -> Option<String> {
    let lower = content_type.to_ascii_lowercase();
    let is_html = lower.is_empty()
        || lower.contains("text/html")
        || lower.contains("application/xhtml+xml");

    if is_html {
        if let Some(label) = charset_from_html_prefix(body) {
            return Some(label);
        }
    }

    charset_from_content_type(content_type)
}

fn charset_from_content_type(content_type: &str) -> Option<String> {
    content_type
        .split(';')
        .skip(1)
        .filter_map(|part| part.split_once('='))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').trim_matches('\''))
        .find(|label| !label.is_empty())
        .map(str::to_owned)
}

fn charset_from_html_prefix(body: &[u8]) -> Option<String> {
    let prefix = String::from_utf8_lossy(&body[..body.len().min(META_SNIFF_BYTES)]);
    let lower = prefix.to_ascii_lowercase();
    let mut search_start = 0_usize;

    while let Some(relative) = lower[search_start..].find("charset=") {
        let label_start = search_start + relative + "charset=".len();
        if let Some(label) = charset_label(&prefix[label_start..]) {
            return Some(label);
        }
        search_start = label_start;
    }

    None
}

fn charset_label(input: &str) -> Option<String> {
    let trimmed = input.trim_start();
    let first = trimmed.chars().next()?;

    let label = if first == '"' || first == '\'' {
        let rest = &trimmed[first.len_utf8()..];
        &rest[..rest.find(first)?]
    } else {
        let end = trimmed
            .find(|ch: char| ch.is_whitespace() || matches!(ch, '"' | '\'' | ';' | '>' | '/'))
            .unwrap_or(trimmed.len());
        &trimmed[..end]
    };

    let label = label.trim();
    if label.is_empty() { None } else { Some(label.to_owned()) }
}

#[cfg(test)]
mod tests {
    use super::charset_from_content_type;
    use super::decode_page;

    #[test]
    fn meta_charset_wins_over_header() {
        let mut body = b"<html><head><meta charset=\"gbk\"></head><body>".to_vec();
        body.extend_from_slice(&[0xc4, 0xe3, 0xba, 0xc3]);
        body.extend_from_slice(b"</body></html>");

        let decoded = decode_page(&body, "text/html; charset=utf-8");
        assert_eq!(decoded.charset, "GBK");
        assert!(decoded.text.contains("你好"));
    }

    #[test]
    fn falls_back_to_header_then_utf8() {
        assert_eq!(
            charset_from_content_type("text/html; Charset='Shift_JIS'"),
            Some("Shift_JIS".to_owned())
        );
        assert_eq!(charset_from_content_type("text/html"), None);

        let decoded = decode_page("<p>héllo</p>".as_bytes(), "");
        assert_eq!(decoded.charset, "UTF-8");
        assert_eq!(decoded.text, "<p>héllo</p>");
    }
}
