use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::glyph_metrics::{FontFamily, Glyph, GlyphInterval, GlyphTable, LineMetrics};
use crate::render_layout::PageGeometry;

static TEMP_NONCE: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn temp_cache_root(label: &str) -> PathBuf {
    let nonce = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "epub-pager-render-{label}-{}-{nonce}",
        std::process::id()
    ))
}

/// Printable ASCII, 5x10 glyphs with a 6px advance and a 20px line.
pub(crate) fn ascii_fonts() -> FontFamily {
    let glyphs = (' '..='~')
        .map(|ch| {
            let ink = if ch == ' ' { 0 } else { 1 };
            Glyph {
                width: 5 * ink,
                height: 10 * ink,
                top: 10 * ink as i16,
                left: 0,
                advance_x: 6,
            }
        })
        .collect();
    let table = GlyphTable::new(
        vec![GlyphInterval {
            first: ' ' as u32,
            last: '~' as u32,
            offset: 0,
        }],
        glyphs,
        LineMetrics {
            line_height: 20,
            ascender: 15,
            descender: 5,
        },
    );
    FontFamily::new(Arc::new(table))
}

/// 200x70 box with no margins: two one-line paragraphs per page.
pub(crate) fn small_geometry() -> PageGeometry {
    PageGeometry {
        display_width: 200,
        display_height: 70,
        margin_left: 0,
        margin_right: 0,
        margin_top: 0,
        margin_bottom: 0,
        line_gap_px: 0,
        paragraph_gap_px: 10,
        heading_gap_px: 10,
        list_indent_px: 12,
        image_height_px: 30,
        max_image_height_pct: 50,
    }
}
