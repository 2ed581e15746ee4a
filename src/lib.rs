//! Document-side building blocks for `epub-pager`.
//!
//! This crate knows how to get section markup out of a document container and
//! how to stream it as layout-relevant events. Layout, pages and the on-disk
//! page cache live in `epub-pager-render`.
//!
//! ```rust
//! use epub_pager::{DocumentContainer, MarkupEvent, MarkupReader, MemoryContainer};
//!
//! let mut container = MemoryContainer::new("demo").with_section("<p>Hello</p>");
//! let bytes = container.section_bytes(0).unwrap();
//! let events: Vec<MarkupEvent> = MarkupReader::new(&bytes)
//!     .collect::<Result<_, _>>()
//!     .unwrap();
//! assert_eq!(events.len(), 3);
//! ```

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

pub mod container;
pub mod markup;

pub use container::{sanitize_cache_hint, ContainerError, DocumentContainer, MemoryContainer};
pub use markup::{
    is_breaking_space, BlockKind, ImageRef, InlineStyle, MarkupError, MarkupEvent, MarkupLimits,
    MarkupReader, TextRun, TEXT_FLUSH_BYTES,
};
