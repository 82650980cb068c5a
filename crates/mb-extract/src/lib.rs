//! Heuristic metadata extraction for hosted video-listing pages.

mod detail;
mod extractor;
mod normalize;
mod selectors;
mod snapshot;

pub use detail::capture_auto_context;
pub use detail::should_mark_auto_for_click;
pub use extractor::LocalExtractor;
pub use extractor::extract_adjacent_image_cover;
pub use extractor::extract_cover_url;
pub use normalize::clean_text;
pub use normalize::mentions_category_label;
pub use normalize::mentions_rating_label;
pub use normalize::normalize_category;
pub use normalize::normalize_rating;
pub use normalize::normalize_year;
pub use normalize::split_category_label;
pub use selectors::SelectorSet;
pub use snapshot::build_snapshot;
