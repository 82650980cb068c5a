//! Selector lists tuned for the common video CMS themes (MacCMS `module-*`,
//! `myui-*`, `stui-*`) plus generic blog markup.

use mb_core::BridgeResult;
use mb_dom::Selector;
use mb_dom::compile_selector;

pub const CARD: &str = "article, .post, .item, .entry, li, .module-item, .module-info, .myui-content__detail, .stui-content__detail";
pub const TITLE: &str = "h1, h2, h3, .title, .module-item-title, .entry-title, .page-title, .video-info-header h1, .myui-content__detail .title";
pub const CARD_IMAGE: &str = "img[data-src], img[data-original], img[src], .module-item-pic img, .myui-content__thumb img, .stui-content__thumb img";
pub const DETAIL_LAZY_IMAGE: &str = ".module-item-pic img.lazyload, .myui-content__thumb img.lazyload, .stui-content__thumb img.lazyload, img.lazyload";
pub const INTRO: &str = ".video-info-content, .module-info-introduction-content, .module-info-desc, .desc, .module-item-note, .entry-content, .myui-content__detail .data, .stui-content__detail p, .detail-content p, .vod_content, p";
pub const YEAR: &str = ".video-info-items, .module-info-item-content, .module-info-tag, .myui-content__detail .data, .stui-content__detail p, [class*=\"year\"], [data-year]";
pub const SCORE: &str = ".module-info-item-score, .score, .rating, .module-info-tag-link, [class*=\"score\"], [class*=\"rating\"]";
pub const RATING_LABEL: &str = "span, div, p, a, em, strong";
pub const CATEGORY_TAG: &str = ".module-info-tag a, .module-info-tag-link, .video-info-items a, .myui-content__detail .data a, .stui-content__detail p a, .tag a, [rel~=\"category\"], [class*=\"genre\"] a, [class*=\"type\"] a";
pub const CATEGORY_LABEL: &str = ".video-info-items, .module-info-item-content, .myui-content__detail .data, .stui-content__detail p";
pub const LISTING_CARD: &str = ".module-item, .myui-vodlist__box, .stui-vodlist__box, .video-item, .post";
pub const SHARE_ANCHOR: &str = "a[href^=\"https://pan.quark.cn/s/\"], a[href^=\"http://pan.quark.cn/s/\"]";
pub const LINK: &str = "a[href]";

/// Every selector the bridge runs, compiled once.
#[derive(Debug, Clone)]
pub struct SelectorSet {
    pub card: Selector,
    pub title: Selector,
    pub card_image: Selector,
    pub detail_lazy_image: Selector,
    pub intro: Selector,
    pub year: Selector,
    pub score: Selector,
    pub rating_label: Selector,
    pub category_tag: Selector,
    pub category_label: Selector,
    pub listing_card: Selector,
    pub share_anchor: Selector,
    pub link: Selector,
    pub inline_script: Selector,
}

impl SelectorSet {
    pub fn compile() -> BridgeResult<Self> {
        Ok(Self {
            card: compile_selector(CARD)?,
            title: compile_selector(TITLE)?,
            card_image: compile_selector(CARD_IMAGE)?,
            detail_lazy_image: compile_selector(DETAIL_LAZY_IMAGE)?,
            intro: compile_selector(INTRO)?,
            year: compile_selector(YEAR)?,
            score: compile_selector(SCORE)?,
            rating_label: compile_selector(RATING_LABEL)?,
            category_tag: compile_selector(CATEGORY_TAG)?,
            category_label: compile_selector(CATEGORY_LABEL)?,
            listing_card: compile_selector(LISTING_CARD)?,
            share_anchor: compile_selector(SHARE_ANCHOR)?,
            link: compile_selector(LINK)?,
            inline_script: compile_selector("script:not([src])")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::SelectorSet;

    #[test]
    fn all_selectors_compile() {
        assert!(SelectorSet::compile().is_ok());
    }
}
