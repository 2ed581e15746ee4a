//! Glyph metrics, page IR, streaming pagination and the section page cache
//! for `epub-pager`.

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

mod glyph_metrics;
mod page_cache;
mod page_codec;
mod render_engine;
mod render_ir;
mod render_layout;
#[cfg(test)]
mod test_support;

pub use glyph_metrics::{
    FontFamily, Glyph, GlyphInterval, GlyphTable, GlyphTableError, LineMetrics,
    MissingGlyphPolicy, TextBounds, FALLBACK_CODEPOINT,
};
pub use page_cache::{
    BlockStorage, CacheError, CacheOptions, FsStorage, PageError, Section, SectionCache,
    MAX_SECTION_PAGES,
};
pub use page_codec::{PageCodecError, DEFAULT_MAX_PAGE_RECORD_BYTES, PAGE_RECORD_VERSION};
pub use render_engine::{
    cache_root_for, pagination_profile, Pager, PagerDiagnostic, PagerOptions, RenderOutcome,
    BUILD_FAILED_MESSAGE, EMPTY_SECTION_MESSAGE, OUT_OF_BOUNDS_MESSAGE,
};
pub use render_ir::{
    Display, DrawCommand, ImageCommand, Page, PageLayout, PaginationProfileId, RuleCommand,
    TextCommand, TextStyle,
};
pub use render_layout::{parse_and_build_pages, PageGeometry, PaginateError, Paginator};
