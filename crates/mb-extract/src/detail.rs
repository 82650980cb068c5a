//! Detail-link click heuristics and the context captured before navigating.

use crate::extractor::LocalExtractor;
use crate::extractor::extract_adjacent_image_cover;
use mb_core::AutoContext;
use mb_dom::ElementRef;
use mb_dom::PageDocument;
use mb_dom::attr_or_empty;
use mb_dom::closest;
use regex::Regex;
use std::sync::LazyLock;

static DETAIL_PATH_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(voddetail|detail|movie|tv|film|video|vod|show)").ok());
static SHARE_LINK_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)pan\.quark\.cn/s/").ok());

/// Whether clicking `anchor` should arm auto-continuation on the next page.
pub fn should_mark_auto_for_click(
    extractor: &LocalExtractor,
    page: &PageDocument,
    anchor: ElementRef<'_>,
) -> bool {
    let href = attr_or_empty(anchor, "href");
    if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
        return false;
    }
    if SHARE_LINK_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(href))
    {
        return false;
    }

    let Ok(target) = page.location().join(href) else {
        return false;
    };
    if !page.same_origin(&target) {
        return false;
    }

    let path = target.path().to_lowercase();
    if path == page.location().path() && target.query() == page.location().query() {
        return false;
    }
    if DETAIL_PATH_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(&path))
    {
        return true;
    }

    closest(anchor, &extractor.selectors().listing_card).is_some()
}

/// Snapshot of the listing card around `anchor`, carried to the detail page.
pub fn capture_auto_context(
    extractor: &LocalExtractor,
    page: &PageDocument,
    anchor: ElementRef<'_>,
) -> AutoContext {
    let card = extractor.card_for(page, anchor);
    AutoContext {
        title: extractor.card_title(card, anchor),
        year: extractor.extract_year(page, card, None),
        rating: extractor.extract_rating(page, card, None),
        category: extractor.extract_category(page, card, None),
        intro: extractor.extract_intro(page, card, None),
        cover: extract_adjacent_image_cover(page, anchor),
        href: page.resolve_url(attr_or_empty(anchor, "href")),
        page_url: page.href().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::capture_auto_context;
    use super::should_mark_auto_for_click;
    use crate::extractor::LocalExtractor;
    use mb_dom::PageDocument;
    use mb_dom::compile_selector;

    const LISTING: &str = r##"<html><head><title>Latest</title></head><body>
        <a id="detail" href="/voddetail/7.html">Detail</a>
        <a id="js" href="javascript:void(0)">Menu</a>
        <a id="frag" href="#top">Top</a>
        <a id="share" href="/redirect?u=https://pan.quark.cn/s/abc">Share</a>
        <a id="foreign" href="https://other.test/detail/1">Elsewhere</a>
        <a id="self" href="/list?page=2">Self</a>
        <a id="about" href="/about">About</a>
        <div class="module-item">
            <div class="module-item-title">Dune</div>
            <a id="card" href="/p/123">Open</a><img data-src="/covers/dune.jpg">
            <span class="score">8.1</span>
        </div>
    </body></html>"##;

    fn fixture() -> (LocalExtractor, PageDocument) {
        let extractor = LocalExtractor::new().unwrap_or_else(|_| unreachable!());
        let page = PageDocument::parse("https://films.test/list?page=2", LISTING)
            .unwrap_or_else(|_| unreachable!());
        (extractor, page)
    }

    fn marks(id: &str) -> bool {
        let (extractor, page) = fixture();
        let selector = compile_selector(&format!("a#{id}")).unwrap_or_else(|_| unreachable!());
        let anchor = page.query(&selector);
        assert!(anchor.is_some(), "missing anchor {id}");
        should_mark_auto_for_click(&extractor, &page, anchor.unwrap_or_else(|| unreachable!()))
    }

    #[test]
    fn detail_paths_arm() {
        assert!(marks("detail"));
    }

    #[test]
    fn rejects_non_navigations() {
        assert!(!marks("js"));
        assert!(!marks("frag"));
        assert!(!marks("share"));
        assert!(!marks("foreign"));
        assert!(!marks("self"));
    }

    #[test]
    fn listing_cards_arm_and_plain_links_do_not() {
        assert!(marks("card"));
        assert!(!marks("about"));
    }

    #[test]
    fn captures_card_metadata() {
        let (extractor, page) = fixture();
        let selector = compile_selector("a#card").unwrap_or_else(|_| unreachable!());
        let anchor = page.query(&selector).unwrap_or_else(|| unreachable!());

        let context = capture_auto_context(&extractor, &page, anchor);
        assert_eq!(context.title, "Dune");
        assert_eq!(context.rating, "8.1");
        assert_eq!(context.cover, "https://films.test/covers/dune.jpg");
        assert_eq!(context.href, "https://films.test/p/123");
        assert_eq!(context.page_url, "https://films.test/list?page=2");
    }
}
