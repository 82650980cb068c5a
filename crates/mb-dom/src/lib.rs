//! Parsed page document and the element queries the bridge runs against it.

use mb_core::BridgeError;
use mb_core::BridgeResult;
use mb_core::collapse_whitespace;
use scraper::Html;
use url::Url;

pub use scraper::ElementRef;
pub use scraper::Selector;

/// Document readiness as reported to the analyzer snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadyState {
    Loading,
    Interactive,
    #[default]
    Complete,
}

impl ReadyState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Interactive => "interactive",
            Self::Complete => "complete",
        }
    }
}

/// A hosted page: parsed HTML plus the browsing-context facts around it.
#[derive(Debug)]
pub struct PageDocument {
    html: Html,
    location: Url,
    referrer: String,
    charset: String,
    ready_state: ReadyState,
}

impl PageDocument {
    pub fn parse(location: &str, source: &str) -> BridgeResult<Self> {
        let location = Url::parse(location.trim()).map_err(|error| {
            BridgeError::new(
                "dom.location_invalid",
                format!("page location `{location}` is not an absolute URL: {error}"),
            )
        })?;

        Ok(Self {
            html: Html::parse_document(source),
            location,
            referrer: String::new(),
            charset: "UTF-8".to_owned(),
            ready_state: ReadyState::Complete,
        })
    }

    pub fn with_referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer = referrer.into();
        self
    }

    pub fn with_charset(mut self, charset: impl Into<String>) -> Self {
        self.charset = charset.into();
        self
    }

    pub fn with_ready_state(mut self, ready_state: ReadyState) -> Self {
        self.ready_state = ready_state;
        self
    }

    pub fn location(&self) -> &Url {
        &self.location
    }

    pub fn href(&self) -> &str {
        self.location.as_str()
    }

    /// Serialized origin, `null` for opaque origins.
    pub fn origin(&self) -> String {
        self.location.origin().ascii_serialization()
    }

    pub fn referrer(&self) -> &str {
        &self.referrer
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn ready_state(&self) -> ReadyState {
        self.ready_state
    }

    /// `document.title`: first `<title>`, whitespace collapsed.
    pub fn title(&self) -> String {
        let Ok(selector) = Selector::parse("title") else {
            return String::new();
        };
        self.html
            .select(&selector)
            .next()
            .map(|node| collapse_whitespace(&node.text().collect::<String>()))
            .unwrap_or_default()
    }

    pub fn document_element(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    pub fn body(&self) -> Option<ElementRef<'_>> {
        let selector = Selector::parse("body").ok()?;
        self.html.select(&selector).next()
    }

    /// `document.documentElement.outerHTML`.
    pub fn outer_html(&self) -> String {
        self.html.root_element().html()
    }

    pub fn query(&self, selector: &Selector) -> Option<ElementRef<'_>> {
        self.html.select(selector).next()
    }

    pub fn query_all(&self, selector: &Selector) -> Vec<ElementRef<'_>> {
        self.html.select(selector).collect()
    }

    /// Resolves `raw` against the page location; empty string when it cannot.
    pub fn resolve_url(&self, raw: &str) -> String {
        self.location
            .join(raw.trim())
            .map(|url| url.to_string())
            .unwrap_or_default()
    }

    pub fn same_origin(&self, other: &Url) -> bool {
        let ours = self.location.origin();
        ours.is_tuple() && ours == other.origin()
    }
}

/// Parses a selector list, mapping failures onto the workspace error.
pub fn compile_selector(css: &str) -> BridgeResult<Selector> {
    Selector::parse(css).map_err(|error| {
        BridgeError::new(
            "dom.selector_invalid",
            format!("failed to parse selector `{css}`: {error:?}"),
        )
    })
}

/// `Element.closest`: the element itself or its nearest matching ancestor.
pub fn closest<'a>(element: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    if selector.matches(&element) {
        return Some(element);
    }

    element
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|ancestor| selector.matches(ancestor))
}

/// `Element.querySelector`, descendants only.
pub fn query_within<'a>(element: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    element.select(selector).next()
}

pub fn query_all_within<'a>(element: ElementRef<'a>, selector: &Selector) -> Vec<ElementRef<'a>> {
    element.select(selector).collect()
}

pub fn next_element_sibling(element: ElementRef<'_>) -> Option<ElementRef<'_>> {
    element.next_siblings().find_map(ElementRef::wrap)
}

/// Trimmed `textContent`.
pub fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_owned()
}

pub fn attr<'a>(element: ElementRef<'a>, name: &str) -> Option<&'a str> {
    element.value().attr(name)
}

/// Attribute value, empty when absent.
pub fn attr_or_empty<'a>(element: ElementRef<'a>, name: &str) -> &'a str {
    element.value().attr(name).unwrap_or_default()
}

pub fn has_class(element: ElementRef<'_>, class_name: &str) -> bool {
    element.value().classes().any(|class| class == class_name)
}

pub fn is_tag(element: ElementRef<'_>, tag_name: &str) -> bool {
    element.value().name().eq_ignore_ascii_case(tag_name)
}

pub fn outer_html(element: ElementRef<'_>) -> String {
    element.html()
}
