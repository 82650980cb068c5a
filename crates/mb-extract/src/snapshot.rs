//! Serialized view of the page handed to the remote analyzer.

use crate::extractor::LocalExtractor;
use mb_core::AnchorSnapshot;
use mb_core::AutoContext;
use mb_core::CardSnapshot;
use mb_core::ExtractedMetadata;
use mb_core::ImageSnapshot;
use mb_core::PageSnapshot;
use mb_dom::ElementRef;
use mb_dom::PageDocument;
use mb_dom::attr_or_empty;
use mb_dom::is_tag;
use mb_dom::next_element_sibling;
use mb_dom::outer_html;
use mb_dom::text_of;

pub fn build_snapshot(
    extractor: &LocalExtractor,
    page: &PageDocument,
    anchor: ElementRef<'_>,
    local_payload: &ExtractedMetadata,
    auto_context: Option<&AutoContext>,
) -> PageSnapshot {
    let next_sibling_image = next_element_sibling(anchor)
        .filter(|next| is_tag(*next, "img"))
        .map(|image| ImageSnapshot {
            data_src: attr_or_empty(image, "data-src").to_owned(),
            src: attr_or_empty(image, "src").to_owned(),
            // No image loading happens here, so the current source is the
            // resolved `src` attribute.
            current_src: page.resolve_url(attr_or_empty(image, "src")),
            outer_html: outer_html(image),
        });
    let card = extractor
        .enclosing_card(anchor)
        .map(outer_html)
        .unwrap_or_default();

    PageSnapshot {
        html: page.outer_html(),
        url: page.href().to_owned(),
        title: page.title(),
        referrer: page.referrer().to_owned(),
        charset: page.charset().to_owned(),
        ready_state: page.ready_state().as_str().to_owned(),
        local_payload: local_payload.clone(),
        auto_context: auto_context.cloned(),
        anchor: AnchorSnapshot {
            href: page.resolve_url(attr_or_empty(anchor, "href")),
            text: text_of(anchor),
            outer_html: outer_html(anchor),
            next_sibling_image,
        },
        card: CardSnapshot { outer_html: card },
    }
}

#[cfg(test)]
mod tests {
    use super::build_snapshot;
    use crate::extractor::LocalExtractor;
    use mb_dom::PageDocument;
    use mb_dom::ReadyState;

    #[test]
    fn snapshot_describes_anchor_card_and_document() {
        let extractor = LocalExtractor::new().unwrap_or_else(|_| unreachable!());
        let page = PageDocument::parse(
            "https://films.test/detail/5",
            r#"<html><head><title>Alien</title></head><body><article>
                <a href="https://pan.quark.cn/s/alien">Watch</a><img src="/alien.jpg">
            </article></body></html>"#,
        )
        .unwrap_or_else(|_| unreachable!())
        .with_referrer("https://films.test/list")
        .with_ready_state(ReadyState::Interactive);
        let anchors = extractor.share_anchors(&page);
        let local = extractor.extract_local_payload(&page, anchors[0], None);

        let snapshot = build_snapshot(&extractor, &page, anchors[0], &local, None);
        assert_eq!(snapshot.url, "https://films.test/detail/5");
        assert_eq!(snapshot.title, "Alien");
        assert_eq!(snapshot.referrer, "https://films.test/list");
        assert_eq!(snapshot.ready_state, "interactive");
        assert_eq!(snapshot.charset, "UTF-8");
        assert!(snapshot.html.starts_with("<html>"));
        assert_eq!(snapshot.anchor.href, "https://pan.quark.cn/s/alien");
        assert_eq!(snapshot.anchor.text, "Watch");
        assert!(snapshot.card.outer_html.starts_with("<article>"));
        assert_eq!(snapshot.local_payload, local);
        assert!(snapshot.auto_context.is_none());

        let image = snapshot.anchor.next_sibling_image.clone().unwrap_or_default();
        assert_eq!(image.src, "/alien.jpg");
        assert_eq!(image.current_src, "https://films.test/alien.jpg");

        let value = serde_json::to_value(&snapshot).unwrap_or_default();
        assert!(value["anchor"]["outerHTML"].is_string());
        assert!(value["anchor"]["nextSiblingImage"]["dataSrc"].is_string());
        assert_eq!(value["readyState"], "interactive");
    }

    #[test]
    fn card_is_empty_outside_cards() {
        let extractor = LocalExtractor::new().unwrap_or_else(|_| unreachable!());
        let page = PageDocument::parse(
            "https://films.test/",
            r#"<html><body><a href="https://pan.quark.cn/s/x">x</a></body></html>"#,
        )
        .unwrap_or_else(|_| unreachable!());
        let anchors = extractor.share_anchors(&page);
        let local = extractor.extract_local_payload(&page, anchors[0], None);

        let snapshot = build_snapshot(&extractor, &page, anchors[0], &local, None);
        assert_eq!(snapshot.card.outer_html, "");
        assert!(snapshot.anchor.next_sibling_image.is_none());
    }
}
