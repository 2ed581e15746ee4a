use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use epub_pager_embedded_graphics::MonoFontSet;
use epub_pager_render::{FontFamily, PageGeometry};

static TEMP_NONCE: AtomicUsize = AtomicUsize::new(0);

pub fn temp_cache_root(label: &str) -> PathBuf {
    let nonce = TEMP_NONCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("epub-pager-{label}-{}-{nonce}", std::process::id()))
}

/// XHTML chapter with a heading, `paragraphs` body paragraphs and a few
/// inline styles, rules and images sprinkled in.
pub fn synthetic_chapter(title: &str, paragraphs: usize) -> String {
    let mut out = String::with_capacity(paragraphs * 160 + 256);
    out.push_str(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\"><head><title>x</title>\
         <style>p { margin: 0 }</style></head><body>",
    );
    out.push_str(&format!("<h1>{title}</h1>"));
    for i in 0..paragraphs {
        out.push_str(&format!(
            "<p>Paragraph {i}: the <b>quick</b> brown fox jumps over the <i>lazy</i> dog \
             &amp; keeps running past the river bank.</p>"
        ));
        if i % 17 == 16 {
            out.push_str("<hr/>");
        }
        if i % 29 == 28 {
            out.push_str(&format!(
                "<div><img src=\"images/fig{i}.png\" alt=\"Figure {i}\" width=\"300\" height=\"200\"/></div>"
            ));
        }
    }
    out.push_str("</body></html>");
    out
}

pub fn mono_fonts() -> Arc<FontFamily> {
    Arc::new(MonoFontSet::default().font_family())
}

pub fn reader_geometry() -> PageGeometry {
    PageGeometry::for_display(480, 800)
}

/// Chapter whose body is a single paragraph of `words` words.
pub fn single_paragraph_chapter(words: usize) -> String {
    let mut out = String::with_capacity(words * 8 + 64);
    out.push_str("<html><body><p>");
    for i in 0..words {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(["lorem", "ipsum", "dolor", "sit", "amet"][i % 5]);
    }
    out.push_str("</p></body></html>");
    out
}
