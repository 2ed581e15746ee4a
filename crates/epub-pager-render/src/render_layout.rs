//! Streaming pagination.
//!
//! [`Paginator`] pulls markup events and emits completed pages one at a time.
//! It holds the page under construction, the current line and at most one
//! completed page waiting for the consumer, so peak memory does not grow with
//! section length.

use core::fmt;

use epub_pager::{
    is_breaking_space, BlockKind, ImageRef, MarkupError, MarkupEvent, MarkupLimits, MarkupReader,
};

use crate::glyph_metrics::{FontFamily, GlyphTable, LineMetrics};
use crate::render_ir::{
    DrawCommand, ImageCommand, Page, PageLayout, RuleCommand, TextCommand, TextStyle,
};

/// Display box, margins and spacing used to lay out pages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageGeometry {
    /// Physical display width.
    pub display_width: i32,
    /// Physical display height.
    pub display_height: i32,
    pub margin_left: i32,
    pub margin_right: i32,
    pub margin_top: i32,
    pub margin_bottom: i32,
    /// Extra gap between lines.
    pub line_gap_px: i32,
    /// Gap after paragraph/list item end.
    pub paragraph_gap_px: i32,
    /// Gap around heading blocks.
    pub heading_gap_px: i32,
    /// Left indent per list nesting level.
    pub list_indent_px: i32,
    /// Height reserved for images without intrinsic size.
    pub image_height_px: i32,
    /// Cap on image height as a percentage of the content height.
    pub max_image_height_pct: u8,
}

impl PageGeometry {
    /// Convenience for a display size with default margins and spacing.
    pub fn for_display(width: i32, height: i32) -> Self {
        Self {
            display_width: width,
            display_height: height,
            ..Self::default()
        }
    }

    pub fn content_width(&self) -> i32 {
        (self.display_width - self.margin_left - self.margin_right).max(1)
    }

    pub fn content_top(&self) -> i32 {
        self.margin_top
    }

    pub fn content_bottom(&self) -> i32 {
        (self.display_height - self.margin_bottom).max(self.margin_top + 1)
    }

    pub fn content_height(&self) -> i32 {
        self.content_bottom() - self.content_top()
    }

    pub fn page_layout(&self) -> PageLayout {
        PageLayout {
            display_width: self.display_width.max(0) as u32,
            display_height: self.display_height.max(0) as u32,
            content_top: self.content_top(),
            content_bottom: self.content_bottom(),
        }
    }

    /// Stable byte encoding of every field, for profile hashing.
    pub fn profile_bytes(&self) -> Vec<u8> {
        let fields = [
            self.display_width,
            self.display_height,
            self.margin_left,
            self.margin_right,
            self.margin_top,
            self.margin_bottom,
            self.line_gap_px,
            self.paragraph_gap_px,
            self.heading_gap_px,
            self.list_indent_px,
            self.image_height_px,
            i32::from(self.max_image_height_pct),
        ];
        let mut out = Vec::with_capacity(fields.len() * 4);
        for field in fields {
            out.extend_from_slice(&field.to_le_bytes());
        }
        out
    }
}

impl Default for PageGeometry {
    fn default() -> Self {
        Self {
            display_width: 480,
            display_height: 800,
            margin_left: 20,
            margin_right: 20,
            margin_top: 24,
            margin_bottom: 32,
            line_gap_px: 2,
            paragraph_gap_px: 8,
            heading_gap_px: 10,
            list_indent_px: 12,
            image_height_px: 160,
            max_image_height_pct: 60,
        }
    }
}

/// Markup failure raised mid-pagination.
///
/// Pages already yielded stay valid; whether to keep them is the caller's call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PaginateError {
    pub section_index: usize,
    /// Pages yielded before the failure.
    pub pages_emitted: usize,
    pub markup: MarkupError,
}

impl fmt::Display for PaginateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "section {} failed after {} pages: {}",
            self.section_index, self.pages_emitted, self.markup
        )
    }
}

impl std::error::Error for PaginateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.markup)
    }
}

#[derive(Clone, Debug)]
struct CurrentLine {
    words: Vec<TextCommand>,
    left_px: i32,
    width_px: i32,
    line_height_px: i32,
    ascender_px: i32,
}

impl CurrentLine {
    fn new(left_px: i32) -> Self {
        Self {
            words: Vec::with_capacity(8),
            left_px,
            width_px: 0,
            line_height_px: 0,
            ascender_px: 0,
        }
    }
}

#[derive(Clone, Debug)]
struct PendingRun {
    text: String,
    style: TextStyle,
    pos: usize,
}

#[derive(Clone, Debug)]
enum Deferred {
    Rule,
    Image(ImageRef),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Streaming,
    Finishing,
    Done,
}

/// Pull-based paginator over one section's markup.
///
/// Yields pages with contiguous indices starting at 0. Empty pages are never
/// yielded, so markup with no printable content yields nothing. After an
/// error the iterator is fused.
pub struct Paginator<'a> {
    markup: MarkupReader<'a>,
    fonts: &'a FontFamily,
    geometry: PageGeometry,
    section_index: usize,
    page: Page,
    pages_emitted: usize,
    cursor_y: i32,
    pending_gap: i32,
    line: Option<CurrentLine>,
    list_depth: i32,
    glue_next_word: bool,
    run: Option<PendingRun>,
    deferred: Option<Deferred>,
    ready: Option<Page>,
    phase: Phase,
}

impl<'a> Paginator<'a> {
    pub fn new(
        markup: &'a [u8],
        fonts: &'a FontFamily,
        geometry: PageGeometry,
        section_index: usize,
    ) -> Self {
        Self::with_limits(markup, fonts, geometry, section_index, MarkupLimits::default())
    }

    pub fn with_limits(
        markup: &'a [u8],
        fonts: &'a FontFamily,
        geometry: PageGeometry,
        section_index: usize,
        limits: MarkupLimits,
    ) -> Self {
        Self {
            markup: MarkupReader::with_limits(markup, limits),
            fonts,
            geometry,
            section_index,
            page: Page::new(section_index, 0, geometry.page_layout()),
            pages_emitted: 0,
            cursor_y: geometry.content_top(),
            pending_gap: 0,
            line: None,
            list_depth: 0,
            glue_next_word: false,
            run: None,
            deferred: None,
            ready: None,
            phase: Phase::Streaming,
        }
    }

    /// Pages yielded so far.
    pub fn pages_emitted(&self) -> usize {
        self.pages_emitted
    }

    /// Byte offset the markup reader has consumed up to.
    pub fn markup_offset(&self) -> usize {
        self.markup.offset()
    }

    fn handle_event(&mut self, event: MarkupEvent) {
        if !matches!(event, MarkupEvent::Text(_)) {
            self.glue_next_word = false;
        }
        match event {
            MarkupEvent::Text(run) => {
                self.run = Some(PendingRun {
                    text: run.text,
                    style: TextStyle::from_flags(run.style.bold, run.style.italic),
                    pos: 0,
                });
            }
            MarkupEvent::BlockStart(kind) => {
                self.flush_line();
                match kind {
                    BlockKind::Heading(_) => self.add_gap(self.geometry.heading_gap_px),
                    BlockKind::ListItem => self.list_depth += 1,
                    BlockKind::Paragraph => {}
                }
            }
            MarkupEvent::BlockEnd(kind) => {
                self.flush_line();
                match kind {
                    BlockKind::Heading(_) => self.add_gap(self.geometry.heading_gap_px),
                    BlockKind::ListItem => {
                        self.list_depth = (self.list_depth - 1).max(0);
                        self.add_gap(self.geometry.paragraph_gap_px);
                    }
                    BlockKind::Paragraph => self.add_gap(self.geometry.paragraph_gap_px),
                }
            }
            MarkupEvent::LineBreak => self.flush_line(),
            MarkupEvent::Rule => {
                self.flush_line();
                self.deferred = Some(Deferred::Rule);
            }
            MarkupEvent::Image(image) => {
                self.flush_line();
                self.deferred = Some(Deferred::Image(image));
            }
        }
    }

    /// Lay out the next word of the pending text run. Returns false when no
    /// run is pending.
    fn place_next_word(&mut self) -> bool {
        let Some(mut run) = self.run.take() else {
            return false;
        };
        let rest = &run.text[run.pos..];
        let leading_ws = rest.len() - rest.trim_start_matches(is_breaking_space).len();
        let start = run.pos + leading_ws;
        if start >= run.text.len() {
            if leading_ws > 0 {
                self.glue_next_word = false;
            }
            return true;
        }
        let end = run.text[start..]
            .find(is_breaking_space)
            .map_or(run.text.len(), |i| start + i);
        let attach = self.glue_next_word && start == 0;
        self.place_word(&run.text[start..end], run.style, attach);
        self.glue_next_word = end == run.text.len();
        run.pos = end;
        if run.pos < run.text.len() {
            self.run = Some(run);
        }
        true
    }

    /// Place one word, wrapping before it when the line is full. A word wider
    /// than the line is broken at the last code point that fits and continued
    /// on following lines.
    fn place_word(&mut self, word: &str, style: TextStyle, attach: bool) {
        let fonts = self.fonts;
        let table = fonts.table(style);
        if !table.has_printable_content(word) {
            return;
        }
        let metrics = table.metrics();
        let inset = self.left_inset();
        let max_width = (self.geometry.content_width() - inset).max(1);
        let space_w = if attach { 0 } else { table.advance_width(" ") };

        let mut rest = word;
        loop {
            let (rest_w, _) = table.text_dimensions(rest);
            if let Some(line) = self.line.as_mut() {
                let x = line.width_px + space_w;
                if x + rest_w <= max_width {
                    push_word(line, x, rest, style, rest_w, metrics);
                    return;
                }
                self.flush_line();
            }
            let mut line = CurrentLine::new(self.geometry.margin_left + inset);
            if rest_w <= max_width {
                push_word(&mut line, 0, rest, style, rest_w, metrics);
                self.line = Some(line);
                return;
            }
            let split = fitting_prefix_len(table, rest, max_width);
            let (head, tail) = rest.split_at(split);
            let (head_w, _) = table.text_dimensions(head);
            push_word(&mut line, 0, head, style, head_w, metrics);
            self.line = Some(line);
            if tail.is_empty() {
                return;
            }
            self.flush_line();
            rest = tail;
        }
    }

    fn left_inset(&self) -> i32 {
        (self.list_depth * self.geometry.list_indent_px)
            .clamp(0, self.geometry.content_width() / 2)
    }

    fn flush_line(&mut self) {
        let Some(line) = self.line.take() else {
            return;
        };
        if line.words.is_empty() {
            return;
        }
        let top = self.reserve(line.line_height_px.max(1));
        let baseline_y = top + line.ascender_px;
        for mut word in line.words {
            word.baseline_y = baseline_y;
            self.page.push(DrawCommand::Text(word));
        }
        self.add_gap(self.geometry.line_gap_px);
    }

    fn place_deferred(&mut self, deferred: Deferred) {
        match deferred {
            Deferred::Rule => {
                let half_gap = (self.geometry.paragraph_gap_px / 2).max(0);
                let height = 1 + 2 * half_gap;
                let top = self.reserve(height);
                self.page.push(DrawCommand::Rule(RuleCommand {
                    x: self.geometry.margin_left,
                    y: top + half_gap,
                    length: self.geometry.content_width() as u32,
                    thickness: 1,
                    horizontal: true,
                }));
            }
            Deferred::Image(image) => {
                let (width, height) = self.fit_image(&image);
                let top = self.reserve(height);
                let x = self.geometry.margin_left + (self.geometry.content_width() - width) / 2;
                self.page.push(DrawCommand::Image(ImageCommand {
                    src: image.src,
                    alt: image.alt,
                    x,
                    y: top,
                    width: width as u32,
                    height: height as u32,
                }));
                self.add_gap(self.geometry.paragraph_gap_px);
            }
        }
    }

    fn fit_image(&self, image: &ImageRef) -> (i32, i32) {
        let max_w = i64::from(self.geometry.content_width());
        let max_h = (i64::from(self.geometry.content_height())
            * i64::from(self.geometry.max_image_height_pct.min(100))
            / 100)
            .max(1);
        let fallback_h = i64::from(self.geometry.image_height_px.max(1)).min(max_h);
        let (mut w, mut h) = match (image.width_px, image.height_px) {
            (Some(w), Some(h)) if w > 0 && h > 0 => (i64::from(w), i64::from(h)),
            (Some(w), _) if w > 0 => (i64::from(w), fallback_h),
            _ => (max_w, fallback_h),
        };
        if w > max_w {
            h = h * max_w / w;
            w = max_w;
        }
        if h > max_h {
            w = w * max_h / h;
            h = max_h;
        }
        (w.max(1) as i32, h.max(1) as i32)
    }

    fn add_gap(&mut self, gap_px: i32) {
        self.pending_gap = self.pending_gap.max(gap_px);
    }

    /// Claim `height` px of vertical space and return its top y.
    ///
    /// Pending gaps collapse to their maximum and are dropped at the top of a
    /// page. Content that does not fit moves to a fresh page; content taller
    /// than an empty page is placed anyway.
    fn reserve(&mut self, height: i32) -> i32 {
        let gap = core::mem::take(&mut self.pending_gap).max(0);
        if !self.page.is_empty() {
            if self.cursor_y + gap + height > self.geometry.content_bottom() {
                self.close_page();
            } else {
                self.cursor_y += gap;
            }
        }
        let top = self.cursor_y;
        self.cursor_y += height;
        top
    }

    fn close_page(&mut self) {
        if self.page.is_empty() {
            return;
        }
        debug_assert!(self.ready.is_none());
        let next = Page::new(
            self.section_index,
            self.pages_emitted + 1,
            self.geometry.page_layout(),
        );
        let page = core::mem::replace(&mut self.page, next);
        self.ready = Some(page);
        self.pages_emitted += 1;
        self.cursor_y = self.geometry.content_top();
        self.pending_gap = 0;
    }

    fn fail(&mut self, markup: MarkupError) -> PaginateError {
        self.phase = Phase::Done;
        self.run = None;
        self.line = None;
        self.deferred = None;
        log::warn!(
            "section {} markup error at byte {}: {}",
            self.section_index,
            markup.offset,
            markup
        );
        PaginateError {
            section_index: self.section_index,
            pages_emitted: self.pages_emitted,
            markup,
        }
    }
}

/// Byte length of the longest prefix of `text` that measures within
/// `max_width`. Always at least one code point.
fn fitting_prefix_len(table: &GlyphTable, text: &str, max_width: i32) -> usize {
    let mut fitting = text.chars().next().map_or(text.len(), char::len_utf8);
    for (start, ch) in text.char_indices().skip(1) {
        let end = start + ch.len_utf8();
        if table.text_dimensions(&text[..end]).0 > max_width {
            break;
        }
        fitting = end;
    }
    fitting
}

fn push_word(
    line: &mut CurrentLine,
    x: i32,
    word: &str,
    style: TextStyle,
    word_w: i32,
    metrics: LineMetrics,
) {
    line.words.push(TextCommand {
        x: line.left_px + x,
        baseline_y: 0,
        text: word.to_string(),
        style,
    });
    line.width_px = x + word_w;
    line.line_height_px = line.line_height_px.max(i32::from(metrics.line_height));
    line.ascender_px = line.ascender_px.max(i32::from(metrics.ascender));
}

impl Iterator for Paginator<'_> {
    type Item = Result<Page, PaginateError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(page) = self.ready.take() {
                return Some(Ok(page));
            }
            if self.place_next_word() {
                continue;
            }
            if let Some(deferred) = self.deferred.take() {
                self.place_deferred(deferred);
                continue;
            }
            match self.phase {
                Phase::Streaming => match self.markup.next_event() {
                    Ok(Some(event)) => self.handle_event(event),
                    Ok(None) => {
                        self.flush_line();
                        self.phase = Phase::Finishing;
                    }
                    Err(err) => return Some(Err(self.fail(err))),
                },
                Phase::Finishing => {
                    self.close_page();
                    self.phase = Phase::Done;
                }
                Phase::Done => return None,
            }
        }
    }
}

impl core::iter::FusedIterator for Paginator<'_> {}

/// Paginate `markup`, handing each completed page to `on_page` in order.
///
/// Returns the number of pages delivered. On error, pages already delivered
/// are not retracted.
pub fn parse_and_build_pages<F>(
    markup: &[u8],
    fonts: &FontFamily,
    geometry: PageGeometry,
    section_index: usize,
    mut on_page: F,
) -> Result<usize, PaginateError>
where
    F: FnMut(Page),
{
    let mut paginator = Paginator::new(markup, fonts, geometry, section_index);
    for page in paginator.by_ref() {
        on_page(page?);
    }
    Ok(paginator.pages_emitted())
}
