use core::convert::Infallible;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use embedded_graphics::{
    draw_target::DrawTarget,
    geometry::{OriginDimensions, Point, Size},
    pixelcolor::BinaryColor,
    Pixel,
};
use epub_pager::MemoryContainer;
use epub_pager_embedded_graphics::{EgDisplay, MonoFontSet};
use epub_pager_render::{FsStorage, Pager, PagerOptions, RenderOutcome};

const DISPLAY_WIDTH: u32 = 240;
const DISPLAY_HEIGHT: u32 = 320;

static NONCE: AtomicUsize = AtomicUsize::new(0);

fn temp_cache_root(label: &str) -> PathBuf {
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "epub-pager-eg-{label}-{}-{nonce}",
        std::process::id()
    ))
}

struct PixelCaptureDisplay {
    size: Size,
    on_pixels: Vec<Point>,
}

impl PixelCaptureDisplay {
    fn new() -> Self {
        Self {
            size: Size::new(DISPLAY_WIDTH, DISPLAY_HEIGHT),
            on_pixels: Vec::new(),
        }
    }
}

impl OriginDimensions for PixelCaptureDisplay {
    fn size(&self) -> Size {
        self.size
    }
}

impl DrawTarget for PixelCaptureDisplay {
    type Color = BinaryColor;
    type Error = Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if color == BinaryColor::On {
                self.on_pixels.push(point);
            }
        }
        Ok(())
    }

    fn clear(&mut self, _color: Self::Color) -> Result<(), Self::Error> {
        self.on_pixels.clear();
        Ok(())
    }
}

fn chapter(paragraphs: usize) -> String {
    let mut out = String::from("<html><body><h1>Chapter</h1>");
    for i in 0..paragraphs {
        out.push_str(&format!(
            "<p>Paragraph {i} has <em>several</em> words that wrap across the narrow panel.</p>"
        ));
    }
    out.push_str("</body></html>");
    out
}

fn pager(label: &str, sections: &[String]) -> (Pager<MemoryContainer, FsStorage>, PathBuf) {
    let base = temp_cache_root(label);
    let container = sections
        .iter()
        .fold(MemoryContainer::new("eg-book"), |c, s| c.with_section(s.as_str()));
    let fonts = Arc::new(MonoFontSet::default().font_family());
    let options = PagerOptions::for_display(DISPLAY_WIDTH as i32, DISPLAY_HEIGHT as i32);
    (Pager::new(container, FsStorage, &base, fonts, options), base)
}

#[test]
fn every_page_draws_ink_inside_the_panel() {
    let (mut pager, base) = pager("ink", &[chapter(30)]);
    let mut section = pager.open_section(0);
    let mut display = EgDisplay::new(PixelCaptureDisplay::new());

    let mut rendered = 0;
    loop {
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::Page(rendered));
        let pixels = &display.target().on_pixels;
        assert!(!pixels.is_empty(), "page {rendered} drew nothing");
        assert!(pixels.iter().all(|p| p.x >= 0
            && p.y >= 0
            && (p.x as u32) < DISPLAY_WIDTH
            && (p.y as u32) < DISPLAY_HEIGHT));
        rendered += 1;
        if !section.next_page() {
            break;
        }
    }
    assert!(rendered > 1);
    assert_eq!(rendered, section.page_count());
    let _ = std::fs::remove_dir_all(base);
}

#[test]
fn cached_pages_render_identically_after_reopen() {
    let (mut pager, base) = pager("reopen", &[chapter(12)]);
    let mut display = EgDisplay::new(PixelCaptureDisplay::new());

    let mut first = pager.open_section(0);
    first.current_page = 1;
    pager.render_current_page(&mut first, &mut display).unwrap();
    let before = display.target().on_pixels.clone();

    let mut reopened = pager.open_section(0);
    reopened.current_page = 1;
    pager.render_current_page(&mut reopened, &mut display).unwrap();
    assert_eq!(display.target().on_pixels, before);
    let _ = std::fs::remove_dir_all(base);
}

#[test]
fn empty_chapter_message_is_drawn_near_the_middle() {
    let (mut pager, base) = pager("empty", &["<html><body/></html>".to_string()]);
    let mut section = pager.open_section(0);
    let mut display = EgDisplay::new(PixelCaptureDisplay::new());
    let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
    assert_eq!(outcome, RenderOutcome::EmptySection);
    let pixels = &display.target().on_pixels;
    let min_x = pixels.iter().map(|p| p.x).min().unwrap();
    let max_x = pixels.iter().map(|p| p.x).max().unwrap();
    let center = (min_x + max_x) / 2;
    assert!((center - DISPLAY_WIDTH as i32 / 2).abs() <= 8);
    // Default baseline 300 fits a 320px panel.
    assert!(pixels.iter().all(|p| p.y <= 303 && p.y >= 280));
    let _ = std::fs::remove_dir_all(base);
}
