use crate::normalize::clean_text;
use crate::normalize::mentions_category_label;
use crate::normalize::mentions_rating_label;
use crate::normalize::normalize_rating;
use crate::normalize::normalize_year;
use crate::normalize::push_unique_text;
use crate::normalize::split_category_label;
use crate::selectors::SelectorSet;
use mb_core::AutoContext;
use mb_core::BridgeResult;
use mb_core::CoverHeaders;
use mb_core::ExtractedMetadata;
use mb_dom::ElementRef;
use mb_dom::PageDocument;
use mb_dom::attr;
use mb_dom::attr_or_empty;
use mb_dom::closest;
use mb_dom::has_class;
use mb_dom::is_tag;
use mb_dom::next_element_sibling;
use mb_dom::query_all_within;
use mb_dom::query_within;
use mb_dom::text_of;

const LAZY_SOURCE_ATTRS: &[&str] = &["data-src", "data-original", "data-lazy-src"];

/// Best-effort metadata extraction over a parsed page.
///
/// Nothing here fails on a miss: each field walks its selector candidates,
/// then the [`AutoContext`], and finally settles on the empty string.
#[derive(Debug, Clone)]
pub struct LocalExtractor {
    selectors: SelectorSet,
}

impl LocalExtractor {
    pub fn new() -> BridgeResult<Self> {
        Ok(Self {
            selectors: SelectorSet::compile()?,
        })
    }

    pub fn selectors(&self) -> &SelectorSet {
        &self.selectors
    }

    /// Nearest content card around `anchor`, or `<body>`.
    pub fn card_for<'a>(
        &self,
        page: &'a PageDocument,
        anchor: ElementRef<'a>,
    ) -> Option<ElementRef<'a>> {
        closest(anchor, &self.selectors.card).or_else(|| page.body())
    }

    /// Card around `anchor` without the `<body>` fallback.
    pub fn enclosing_card<'a>(&self, anchor: ElementRef<'a>) -> Option<ElementRef<'a>> {
        closest(anchor, &self.selectors.card)
    }

    /// Share links on the page, in document order.
    pub fn share_anchors<'a>(&self, page: &'a PageDocument) -> Vec<ElementRef<'a>> {
        page.query_all(&self.selectors.share_anchor)
    }

    pub fn extract_local_payload(
        &self,
        page: &PageDocument,
        anchor: ElementRef<'_>,
        auto_context: Option<&AutoContext>,
    ) -> ExtractedMetadata {
        let card = self.card_for(page, anchor);
        let share_url = page.resolve_url(attr_or_empty(anchor, "href"));

        let cover = [
            extract_adjacent_image_cover(page, anchor),
            self.extract_detail_cover(page),
            card.and_then(|card| query_within(card, &self.selectors.card_image))
                .map(|image| extract_cover_url(page, image))
                .unwrap_or_default(),
            auto_context
                .map(|context| context.cover.clone())
                .unwrap_or_default(),
        ]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or_default();

        let title = [
            self.card_title(card, anchor),
            page.title(),
            auto_context
                .map(|context| context.title.trim().to_owned())
                .unwrap_or_default(),
        ]
        .into_iter()
        .find(|candidate| !candidate.is_empty())
        .unwrap_or_default();

        let metadata = ExtractedMetadata {
            cover_headers: CoverHeaders::for_cover(&cover, page.href(), &page.origin()),
            share_url,
            page_url: page.href().to_owned(),
            title,
            year: self.extract_year(page, card, auto_context),
            rating: self.extract_rating(page, card, auto_context),
            category: self.extract_category(page, card, auto_context),
            intro: self.extract_intro(page, card, auto_context),
            cover,
        };
        tracing::debug!(
            share_url = %metadata.share_url,
            title = %metadata.title,
            year = %metadata.year,
            rating = %metadata.rating,
            has_cover = !metadata.cover.is_empty(),
            "extracted local payload"
        );
        metadata
    }

    /// Heading text inside the card, falling back to the anchor text.
    pub fn card_title(&self, card: Option<ElementRef<'_>>, anchor: ElementRef<'_>) -> String {
        let title_node = card
            .and_then(|card| query_within(card, &self.selectors.title))
            .unwrap_or(anchor);
        text_of(title_node)
    }

    pub fn extract_intro(
        &self,
        page: &PageDocument,
        card: Option<ElementRef<'_>>,
        auto_context: Option<&AutoContext>,
    ) -> String {
        let node = match card.and_then(|card| query_within(card, &self.selectors.intro)) {
            Some(node) => Some(node),
            None => page.query(&self.selectors.intro),
        };
        let value = node.map(|node| clean_text(&text_of(node))).unwrap_or_default();
        if !value.is_empty() {
            return value;
        }

        auto_context
            .map(|context| clean_text(&context.intro))
            .unwrap_or_default()
    }

    pub fn extract_year(
        &self,
        page: &PageDocument,
        card: Option<ElementRef<'_>>,
        auto_context: Option<&AutoContext>,
    ) -> String {
        let found = self
            .card_then_page(page, card, &self.selectors.year)
            .into_iter()
            .map(|node| normalize_year(&text_of(node)))
            .find(|year| !year.is_empty());
        if let Some(year) = found {
            return year;
        }

        let context_year = auto_context
            .map(|context| normalize_year(&context.year))
            .unwrap_or_default();
        if !context_year.is_empty() {
            return context_year;
        }

        normalize_year(&page.title())
    }

    pub fn extract_rating(
        &self,
        page: &PageDocument,
        card: Option<ElementRef<'_>>,
        auto_context: Option<&AutoContext>,
    ) -> String {
        let found = self
            .card_then_page(page, card, &self.selectors.score)
            .into_iter()
            .map(|node| normalize_rating(&text_of(node)))
            .find(|rating| !rating.is_empty());
        if let Some(rating) = found {
            return rating;
        }

        let label_nodes = match card {
            Some(card) => query_all_within(card, &self.selectors.rating_label),
            None => page.query_all(&self.selectors.rating_label),
        };
        let labelled = label_nodes
            .into_iter()
            .map(|node| clean_text(&text_of(node)))
            .filter(|text| !text.is_empty() && mentions_rating_label(text))
            .map(|text| normalize_rating(&text))
            .find(|rating| !rating.is_empty());
        if let Some(rating) = labelled {
            return rating;
        }

        auto_context
            .map(|context| normalize_rating(&context.rating))
            .unwrap_or_default()
    }

    pub fn extract_category(
        &self,
        page: &PageDocument,
        card: Option<ElementRef<'_>>,
        auto_context: Option<&AutoContext>,
    ) -> String {
        let mut values: Vec<String> = Vec::new();
        let scoped = |selector: &mb_dom::Selector| match card {
            Some(card) => query_all_within(card, selector),
            None => page.query_all(selector),
        };

        for tag in scoped(&self.selectors.category_tag) {
            push_unique_text(&mut values, &text_of(tag));
        }

        for label in scoped(&self.selectors.category_label) {
            let text = clean_text(&text_of(label));
            if text.is_empty() || !mentions_category_label(&text) {
                continue;
            }
            for item in split_category_label(&text) {
                push_unique_text(&mut values, &item);
            }
        }

        if values.is_empty() {
            if let Some(context) = auto_context {
                push_unique_text(&mut values, &context.category);
            }
        }

        values.join(" / ")
    }

    /// `data-src` of the lazy-loaded detail poster.
    pub fn extract_detail_cover(&self, page: &PageDocument) -> String {
        let Some(image) = page.query(&self.selectors.detail_lazy_image) else {
            return String::new();
        };
        let source = first_attr(image, LAZY_SOURCE_ATTRS);
        if source.is_empty() {
            return String::new();
        }
        page.resolve_url(first_srcset_candidate(source))
    }

    fn card_then_page<'a>(
        &self,
        page: &'a PageDocument,
        card: Option<ElementRef<'a>>,
        selector: &mb_dom::Selector,
    ) -> Vec<ElementRef<'a>> {
        let mut nodes = card
            .map(|card| query_all_within(card, selector))
            .unwrap_or_default();
        nodes.extend(page.query_all(selector));
        nodes
    }
}

/// Cover URL of an `<img>`, honoring lazy-load attributes.
pub fn extract_cover_url(page: &PageDocument, image: ElementRef<'_>) -> String {
    let source = if has_class(image, "lazyload") {
        first_attr(image, LAZY_SOURCE_ATTRS)
    } else {
        first_attr(image, &["data-src", "data-original", "data-lazy-src", "src"])
    };
    if source.is_empty() {
        return String::new();
    }
    page.resolve_url(first_srcset_candidate(source))
}

/// Cover from an `<img>` placed right after the anchor.
pub fn extract_adjacent_image_cover(page: &PageDocument, anchor: ElementRef<'_>) -> String {
    let Some(next) = next_element_sibling(anchor) else {
        return String::new();
    };
    if !is_tag(next, "img") {
        return String::new();
    }

    let data_src = attr_or_empty(next, "data-src");
    let source = if data_src.is_empty() {
        attr_or_empty(next, "src")
    } else {
        data_src
    };
    let source = source.trim();
    if source.is_empty() {
        return String::new();
    }
    page.resolve_url(source)
}

fn first_attr<'a>(element: ElementRef<'a>, names: &[&str]) -> &'a str {
    names
        .iter()
        .filter_map(|name| attr(element, name))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

fn first_srcset_candidate(source: &str) -> &str {
    source
        .split(',')
        .next()
        .unwrap_or_default()
        .split_whitespace()
        .next()
        .unwrap_or_default()
}
