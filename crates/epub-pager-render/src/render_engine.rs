//! Reader-facing orchestration: build or load a section, then draw its
//! current page or a centered status message.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use epub_pager::{sanitize_cache_hint, DocumentContainer};

use crate::glyph_metrics::FontFamily;
use crate::page_cache::{BlockStorage, CacheOptions, PageError, Section, SectionCache};
use crate::page_codec::PAGE_RECORD_VERSION;
use crate::render_ir::{DrawCommand, Display, Page, PaginationProfileId, TextCommand, TextStyle};
use crate::render_layout::PageGeometry;

/// Message drawn for a section with no pages.
pub const EMPTY_SECTION_MESSAGE: &str = "Empty chapter";
/// Message drawn when the current page index is outside the section.
pub const OUT_OF_BOUNDS_MESSAGE: &str = "Out of bounds";
/// Message drawn when a section cannot be built.
pub const BUILD_FAILED_MESSAGE: &str = "Failed to build section";

/// Runtime diagnostics from cache lookups and builds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PagerDiagnostic {
    CacheHit {
        section_index: usize,
        page_count: usize,
    },
    CacheMiss {
        section_index: usize,
    },
    BuildTimeMs(u32),
    BuildFailed {
        section_index: usize,
    },
    /// A cached page was unreadable and the section was rebuilt.
    CacheRepaired {
        section_index: usize,
        page_index: usize,
    },
}

type DiagnosticCallback = Arc<Mutex<Box<dyn FnMut(PagerDiagnostic) + Send + 'static>>>;
type DiagnosticSink = Option<DiagnosticCallback>;

/// Pager options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PagerOptions {
    pub geometry: PageGeometry,
    pub cache: CacheOptions,
    /// Baseline y of status messages, clamped to the display height.
    pub message_baseline_y: i32,
}

impl PagerOptions {
    /// Build options for a target display size.
    pub fn for_display(width: i32, height: i32) -> Self {
        Self {
            geometry: PageGeometry::for_display(width, height),
            ..Self::default()
        }
    }
}

impl Default for PagerOptions {
    fn default() -> Self {
        Self {
            geometry: PageGeometry::default(),
            cache: CacheOptions::default(),
            message_baseline_y: 300,
        }
    }
}

/// What [`Pager::render_current_page`] drew.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// The page at this index.
    Page(usize),
    EmptySection,
    OutOfBounds,
    BuildFailed,
}

impl RenderOutcome {
    fn message(self) -> Option<&'static str> {
        match self {
            Self::Page(_) => None,
            Self::EmptySection => Some(EMPTY_SECTION_MESSAGE),
            Self::OutOfBounds => Some(OUT_OF_BOUNDS_MESSAGE),
            Self::BuildFailed => Some(BUILD_FAILED_MESSAGE),
        }
    }
}

/// Profile id for a font family and geometry.
///
/// Any change that could move a line break changes the id.
pub fn pagination_profile(fonts: &FontFamily, geometry: &PageGeometry) -> PaginationProfileId {
    let mut payload = geometry.profile_bytes();
    payload.extend_from_slice(&fonts.fingerprint().to_le_bytes());
    payload.push(PAGE_RECORD_VERSION);
    PaginationProfileId::from_bytes(&payload)
}

/// Cache root for one document under one profile: `<base>/<hint>-<profile>`.
pub fn cache_root_for(base: &Path, hint: &str, profile: PaginationProfileId) -> PathBuf {
    let dir_name = format!("{}-{}", sanitize_cache_hint(hint), profile.short_hex()); // allow: file I/O path, not hot
    base.join(dir_name)
}

/// Document pager over a container and a section cache.
pub struct Pager<C, S> {
    container: C,
    cache: SectionCache<S>,
    fonts: Arc<FontFamily>,
    options: PagerOptions,
    profile: PaginationProfileId,
    diagnostic_sink: DiagnosticSink,
}

impl<C, S> fmt::Debug for Pager<C, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pager")
            .field("profile", &self.profile.short_hex())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<C: DocumentContainer, S: BlockStorage> Pager<C, S> {
    /// Create a pager whose cache lives under `cache_base`.
    pub fn new(
        container: C,
        storage: S,
        cache_base: impl AsRef<Path>,
        fonts: Arc<FontFamily>,
        options: PagerOptions,
    ) -> Self {
        let profile = pagination_profile(&fonts, &options.geometry);
        let root = cache_root_for(cache_base.as_ref(), container.cache_path_hint(), profile);
        log::debug!("pager cache root {}", root.display());
        Self {
            container,
            cache: SectionCache::new(storage, root).with_options(options.cache),
            fonts,
            options,
            profile,
            diagnostic_sink: None,
        }
    }

    /// Register a callback for cache and build diagnostics.
    pub fn with_diagnostic_sink<F>(mut self, sink: F) -> Self
    where
        F: FnMut(PagerDiagnostic) + Send + 'static,
    {
        self.diagnostic_sink = Some(Arc::new(Mutex::new(Box::new(sink))));
        self
    }

    pub fn section_count(&self) -> usize {
        self.container.section_count()
    }

    pub fn profile(&self) -> PaginationProfileId {
        self.profile
    }

    pub fn options(&self) -> &PagerOptions {
        &self.options
    }

    pub fn cache(&self) -> &SectionCache<S> {
        &self.cache
    }

    /// Handle for `spine_index`, positioned at page 0.
    pub fn open_section(&self, spine_index: usize) -> Section {
        self.cache.section(spine_index)
    }

    /// Load the section's cache, building it first when needed.
    pub fn build_or_load_section(&mut self, section: &mut Section) -> bool {
        let section_index = section.spine_index();
        if self.cache.has_valid_cache(section) {
            self.emit_diagnostic(PagerDiagnostic::CacheHit {
                section_index,
                page_count: section.page_count(),
            });
            return true;
        }
        self.emit_diagnostic(PagerDiagnostic::CacheMiss { section_index });
        let started = Instant::now();
        let built = self.cache.build_cache(
            section,
            &mut self.container,
            &self.fonts,
            self.options.geometry,
        );
        match built {
            Ok(_) => {
                let elapsed = started.elapsed().as_millis().min(u32::MAX as u128) as u32;
                self.emit_diagnostic(PagerDiagnostic::BuildTimeMs(elapsed));
                true
            }
            Err(err) => {
                log::warn!("section {} build failed: {}", section_index, err);
                self.emit_diagnostic(PagerDiagnostic::BuildFailed { section_index });
                false
            }
        }
    }

    /// Draw the section's current page, or a status message when there is
    /// none to draw.
    ///
    /// Builds the cache on first use. A page the header promises but storage
    /// cannot produce triggers one clear-and-rebuild before giving up.
    pub fn render_current_page<D>(
        &mut self,
        section: &mut Section,
        display: &mut D,
    ) -> Result<RenderOutcome, D::Error>
    where
        D: Display + ?Sized,
    {
        let outcome = match self.fetch_current_page(section) {
            Ok(page) => {
                display.clear()?;
                page.render(display)?;
                display.flush()?;
                return Ok(RenderOutcome::Page(page.page_index));
            }
            Err(outcome) => outcome,
        };
        if let Some(message) = outcome.message() {
            self.draw_message(display, message)?;
        }
        Ok(outcome)
    }

    fn fetch_current_page(&mut self, section: &mut Section) -> Result<Page, RenderOutcome> {
        if !section.is_cached() && !self.build_or_load_section(section) {
            return Err(RenderOutcome::BuildFailed);
        }
        match self.cache.get_page(section, section.current_page) {
            Ok(page) => Ok(page),
            Err(PageError::Inconsistent { index, reason }) => {
                log::warn!(
                    "section {} page {} unreadable ({}); rebuilding",
                    section.spine_index(),
                    index,
                    reason
                );
                self.emit_diagnostic(PagerDiagnostic::CacheRepaired {
                    section_index: section.spine_index(),
                    page_index: index,
                });
                if let Err(err) = self.cache.clear_cache(section) {
                    log::warn!("section {} clear failed: {}", section.spine_index(), err);
                }
                if !self.build_or_load_section(section) {
                    return Err(RenderOutcome::BuildFailed);
                }
                self.cache
                    .get_page(section, section.current_page)
                    .map_err(|err| status_for(&err, section))
            }
            Err(err) => Err(status_for(&err, section)),
        }
    }

    fn draw_message<D>(&self, display: &mut D, message: &str) -> Result<(), D::Error>
    where
        D: Display + ?Sized,
    {
        let (text_w, _) = self.fonts.table(TextStyle::Bold).text_dimensions(message);
        let page_w = display.page_width() as i32;
        let page_h = display.page_height() as i32;
        let x = ((page_w - text_w) / 2).max(0);
        let baseline_y = self.options.message_baseline_y.clamp(0, (page_h - 1).max(0));
        display.clear()?;
        display.draw(&DrawCommand::Text(TextCommand {
            x,
            baseline_y,
            text: message.to_string(),
            style: TextStyle::Bold,
        }))?;
        display.flush()
    }

    /// Drop the section's cache. Returns false when storage refused.
    pub fn clear_cache(&self, section: &mut Section) -> bool {
        match self.cache.clear_cache(section) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("section {} clear failed: {}", section.spine_index(), err);
                false
            }
        }
    }

    pub fn into_container(self) -> C {
        self.container
    }

    fn emit_diagnostic(&self, diagnostic: PagerDiagnostic) {
        if let Some(sink) = &self.diagnostic_sink {
            if let Ok(mut sink) = sink.lock() {
                sink(diagnostic);
            }
        }
    }
}

fn status_for(err: &PageError, section: &Section) -> RenderOutcome {
    match err {
        PageError::OutOfBounds { .. } if section.page_count() == 0 => RenderOutcome::EmptySection,
        PageError::OutOfBounds { .. } => RenderOutcome::OutOfBounds,
        PageError::NotCached | PageError::Inconsistent { .. } => RenderOutcome::BuildFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page_cache::FsStorage;
    use crate::test_support::{ascii_fonts, small_geometry, temp_cache_root};
    use epub_pager::MemoryContainer;
    use std::fs;

    #[derive(Default)]
    struct RecordingDisplay {
        frames: usize,
        commands: Vec<DrawCommand>,
    }

    impl Display for RecordingDisplay {
        type Error = core::convert::Infallible;

        fn page_width(&self) -> u32 {
            200
        }

        fn page_height(&self) -> u32 {
            70
        }

        fn clear(&mut self) -> Result<(), Self::Error> {
            self.commands.clear();
            Ok(())
        }

        fn draw(&mut self, command: &DrawCommand) -> Result<(), Self::Error> {
            self.commands.push(command.clone());
            Ok(())
        }

        fn flush(&mut self) -> Result<(), Self::Error> {
            self.frames += 1;
            Ok(())
        }
    }

    impl RecordingDisplay {
        fn only_text(&self) -> Option<&TextCommand> {
            match self.commands.as_slice() {
                [DrawCommand::Text(text)] => Some(text),
                _ => None,
            }
        }
    }

    fn options() -> PagerOptions {
        PagerOptions {
            geometry: small_geometry(),
            ..PagerOptions::default()
        }
    }

    fn pager(label: &str, sections: &[&str]) -> (Pager<MemoryContainer, FsStorage>, PathBuf) {
        let base = temp_cache_root(label);
        let container = sections
            .iter()
            .fold(MemoryContainer::new("Test Book"), |c, s| c.with_section(*s));
        let pager = Pager::new(
            container,
            FsStorage,
            &base,
            Arc::new(ascii_fonts()),
            options(),
        );
        (pager, base)
    }

    #[test]
    fn renders_current_page_after_building() {
        let (mut pager, base) = pager("render", &["<p>One</p><p>Two</p><p>Three</p>"]);
        let mut section = pager.open_section(0);
        let mut display = RecordingDisplay::default();
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::Page(0));
        assert_eq!(display.commands.len(), 2);
        assert_eq!(display.frames, 1);

        assert!(section.next_page());
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::Page(1));
        assert_eq!(display.commands.len(), 1);
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn empty_section_draws_centered_message() {
        let (mut pager, base) = pager("empty", &["<body/>"]);
        let mut section = pager.open_section(0);
        let mut display = RecordingDisplay::default();
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::EmptySection);
        let text = display.only_text().unwrap();
        assert_eq!(text.text, EMPTY_SECTION_MESSAGE);
        assert_eq!(text.style, TextStyle::Bold);
        // 13 glyphs: 12 advances of 6px plus a 5px final glyph.
        assert_eq!(text.x, (200 - 77) / 2);
        assert_eq!(text.baseline_y, 69);
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn out_of_range_current_page_draws_message() {
        let (mut pager, base) = pager("oob", &["<p>One</p>"]);
        let mut section = pager.open_section(0);
        let mut display = RecordingDisplay::default();
        for index in [-1, 1] {
            section.current_page = index;
            let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
            assert_eq!(outcome, RenderOutcome::OutOfBounds);
            assert_eq!(display.only_text().unwrap().text, OUT_OF_BOUNDS_MESSAGE);
        }
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn build_failure_draws_message_and_reports() {
        let (pager, base) = pager("failed", &["<p>unterminated"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pager =
            pager.with_diagnostic_sink(move |d| sink.lock().unwrap().push(d));
        let mut section = pager.open_section(0);
        let mut display = RecordingDisplay::default();
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::BuildFailed);
        assert_eq!(display.only_text().unwrap().text, BUILD_FAILED_MESSAGE);
        assert_eq!(
            seen.lock().unwrap().as_slice(),
            &[
                PagerDiagnostic::CacheMiss { section_index: 0 },
                PagerDiagnostic::BuildFailed { section_index: 0 },
            ]
        );
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn second_open_is_a_cache_hit() {
        let (pager, base) = pager("hit", &["<p>One</p>"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pager =
            pager.with_diagnostic_sink(move |d| sink.lock().unwrap().push(d));
        let mut first = pager.open_section(0);
        assert!(pager.build_or_load_section(&mut first));
        let mut second = pager.open_section(0);
        assert!(pager.build_or_load_section(&mut second));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], PagerDiagnostic::CacheMiss { section_index: 0 });
        assert!(matches!(seen[1], PagerDiagnostic::BuildTimeMs(_)));
        assert_eq!(
            seen[2],
            PagerDiagnostic::CacheHit {
                section_index: 0,
                page_count: 1
            }
        );
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn unreadable_page_is_repaired_once() {
        let (pager, base) = pager("repair", &["<p>One</p><p>Two</p><p>Three</p>"]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut pager =
            pager.with_diagnostic_sink(move |d| sink.lock().unwrap().push(d));
        let mut section = pager.open_section(0);
        assert!(pager.build_or_load_section(&mut section));
        fs::remove_file(section.cache_path().join("page_1.bin")).unwrap();

        section.current_page = 1;
        let mut display = RecordingDisplay::default();
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::Page(1));
        assert!(section.cache_path().join("page_1.bin").exists());
        assert!(seen.lock().unwrap().contains(&PagerDiagnostic::CacheRepaired {
            section_index: 0,
            page_index: 1
        }));
        let _ = fs::remove_dir_all(base);
    }

    #[test]
    fn cache_root_depends_on_document_and_profile() {
        let fonts = ascii_fonts();
        let a = pagination_profile(&fonts, &small_geometry());
        let mut taller = small_geometry();
        taller.display_height += 1;
        let b = pagination_profile(&fonts, &taller);
        assert_ne!(a, b);
        let base = Path::new("/cache");
        let root = cache_root_for(base, "My Book", a);
        assert_eq!(root, base.join(format!("My_Book-{}", a.short_hex())));
        assert_ne!(root, cache_root_for(base, "My Book", b));
    }

    #[test]
    fn clear_cache_forces_rebuild() {
        let (mut pager, base) = pager("clear", &["<p>One</p>"]);
        let mut section = pager.open_section(0);
        assert!(pager.build_or_load_section(&mut section));
        assert!(pager.clear_cache(&mut section));
        assert!(!section.cache_path().exists());
        let mut display = RecordingDisplay::default();
        let outcome = pager.render_current_page(&mut section, &mut display).unwrap();
        assert_eq!(outcome, RenderOutcome::Page(0));
        assert!(section.cache_path().join("section.bin").exists());
        let _ = fs::remove_dir_all(base);
    }
}
