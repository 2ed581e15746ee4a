//! Streaming markup reader for section XHTML.
//!
//! Converts raw section bytes into a flat sequence of block and inline events
//! without materializing a document tree. Retained state is the open-element
//! stack, bounded by [`MarkupLimits::max_nesting`], and at most
//! [`TEXT_FLUSH_BYTES`] of buffered text: longer text nodes are handed out in
//! pieces split after whitespace.

extern crate alloc;

use alloc::borrow::Cow;
use alloc::collections::VecDeque;
use alloc::string::{String, ToString};
use core::fmt;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use smallvec::SmallVec;

/// Buffered text is emitted as a [`MarkupEvent::Text`] once it reaches this
/// many bytes, cut after its last breaking space.
pub const TEXT_FLUSH_BYTES: usize = 1024;

/// Hard limits for markup streaming.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MarkupLimits {
    /// Maximum tracked element depth. Deeper elements are flattened into
    /// their nearest tracked ancestor's formatting.
    pub max_nesting: usize,
}

impl Default for MarkupLimits {
    fn default() -> Self {
        Self { max_nesting: 64 }
    }
}

/// Block-level container kinds that affect vertical layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// Paragraph-like block (`p`, `div`, `blockquote`, `pre`, ...).
    Paragraph,
    /// Heading with level `1..=6`.
    Heading(u8),
    /// List item.
    ListItem,
}

/// Inline formatting state for a text run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct InlineStyle {
    pub bold: bool,
    pub italic: bool,
}

/// Normalized text with the formatting active where it appeared.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub style: InlineStyle,
}

/// Image reference found in section markup.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageRef {
    /// Resource href as written in the markup.
    pub src: String,
    /// Alternate text.
    pub alt: String,
    /// Intrinsic width from the `width` attribute, when present.
    pub width_px: Option<u32>,
    /// Intrinsic height from the `height` attribute, when present.
    pub height_px: Option<u32>,
}

/// One streamed markup event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MarkupEvent {
    BlockStart(BlockKind),
    BlockEnd(BlockKind),
    Text(TextRun),
    LineBreak,
    /// Horizontal rule (`hr`).
    Rule,
    Image(ImageRef),
}

/// Malformed or undecodable markup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MarkupError {
    /// Stable machine-readable code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: Box<str>,
    /// Byte offset into the section where the tokenizer stopped.
    pub offset: usize,
}

impl MarkupError {
    fn new(code: &'static str, message: impl Into<String>, offset: usize) -> Self {
        Self {
            code,
            message: message.into().into_boxed_str(),
            offset,
        }
    }
}

impl fmt::Display for MarkupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} [offset={}]", self.code, self.message, self.offset)
    }
}

impl std::error::Error for MarkupError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ElementKind {
    Block(BlockKind),
    Bold,
    Italic,
    Skip,
    Other,
}

type TagName = SmallVec<[u8; 16]>;

#[derive(Clone, Debug)]
struct ElementFrame {
    name: TagName,
    kind: ElementKind,
}

/// Pull-based markup event reader over a section's bytes.
pub struct MarkupReader<'a> {
    reader: Reader<&'a [u8]>,
    text: String,
    /// Decoded text node not yet moved into `text`.
    pending: Cow<'a, str>,
    pending_pos: usize,
    stack: SmallVec<[ElementFrame; 16]>,
    overflow_depth: usize,
    skip_depth: usize,
    out: VecDeque<MarkupEvent>,
    after_text: bool,
    limits: MarkupLimits,
    finished: bool,
}

impl fmt::Debug for MarkupReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MarkupReader")
            .field("depth", &self.stack.len())
            .field("overflow_depth", &self.overflow_depth)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<'a> MarkupReader<'a> {
    /// Create a reader with default limits.
    pub fn new(markup: &'a [u8]) -> Self {
        Self::with_limits(markup, MarkupLimits::default())
    }

    /// Create a reader with explicit limits.
    pub fn with_limits(markup: &'a [u8], limits: MarkupLimits) -> Self {
        let mut reader = Reader::from_reader(markup);
        reader.config_mut().trim_text(false);
        // End-name matching is done against our own stack so void HTML
        // elements (`<br>`) can be tolerated.
        reader.config_mut().check_end_names = false;
        Self {
            reader,
            text: String::with_capacity(128),
            pending: Cow::Borrowed(""),
            pending_pos: 0,
            stack: SmallVec::new(),
            overflow_depth: 0,
            skip_depth: 0,
            out: VecDeque::with_capacity(3),
            after_text: false,
            limits,
            finished: false,
        }
    }

    /// Byte offset of the tokenizer.
    pub fn offset(&self) -> usize {
        usize::try_from(self.reader.buffer_position()).unwrap_or(usize::MAX)
    }

    /// Pull the next event. `Ok(None)` marks a well-formed end of input.
    pub fn next_event(&mut self) -> Result<Option<MarkupEvent>, MarkupError> {
        loop {
            if let Some(event) = self.out.pop_front() {
                return Ok(Some(event));
            }
            if self.finished {
                return Ok(None);
            }
            if self.pending_pos < self.pending.len() {
                self.feed_pending();
                continue;
            }
            if let Err(err) = self.step() {
                self.finished = true;
                self.out.clear();
                return Err(err);
            }
        }
    }

    fn step(&mut self) -> Result<(), MarkupError> {
        let offset = self.offset();
        let event = self.reader.read_event().map_err(|err| {
            MarkupError::new("MARKUP_SYNTAX", format!("XML error: {:?}", err), offset)
        })?;
        match event {
            Event::Text(e) => {
                if self.skip_depth == 0 {
                    let text = e.decode().map_err(|err| {
                        MarkupError::new(
                            "MARKUP_DECODE",
                            format!("text decode error: {:?}", err),
                            offset,
                        )
                    })?;
                    self.set_pending(text);
                }
            }
            Event::CData(e) => {
                if self.skip_depth == 0 {
                    let text = e.decode().map_err(|err| {
                        MarkupError::new(
                            "MARKUP_DECODE",
                            format!("cdata decode error: {:?}", err),
                            offset,
                        )
                    })?;
                    self.set_pending(text);
                }
            }
            Event::GeneralRef(e) => {
                if self.skip_depth == 0 {
                    let name = e.decode().map_err(|err| {
                        MarkupError::new(
                            "MARKUP_DECODE",
                            format!("entity decode error: {:?}", err),
                            offset,
                        )
                    })?;
                    match resolve_entity(&name) {
                        Some(resolved) => self.text.push_str(&resolved),
                        None => log::warn!("Dropping unknown entity &{}; at {}", name, offset),
                    }
                }
            }
            Event::Start(e) => {
                self.flush_text();
                let name = tag_name(e.local_name().as_ref());
                if is_void_element(&name) {
                    self.emit_void(&name, &e);
                } else {
                    self.open_element(name);
                }
            }
            Event::Empty(e) => {
                self.flush_text();
                let name = tag_name(e.local_name().as_ref());
                if is_void_element(&name) {
                    self.emit_void(&name, &e);
                } else if let ElementKind::Block(kind) = classify(&name) {
                    if self.skip_depth == 0 {
                        self.emit(MarkupEvent::BlockStart(kind));
                        self.emit(MarkupEvent::BlockEnd(kind));
                    }
                }
            }
            Event::End(e) => {
                self.flush_text();
                let name = tag_name(e.local_name().as_ref());
                if !is_void_element(&name) {
                    self.close_element(&name, offset)?;
                }
            }
            Event::Eof => {
                self.flush_text();
                self.finished = true;
                if let Some(open) = self.stack.last() {
                    return Err(MarkupError::new(
                        "MARKUP_UNCLOSED_ELEMENT",
                        format!(
                            "input ended with <{}> still open",
                            String::from_utf8_lossy(&open.name)
                        ),
                        offset,
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn open_element(&mut self, name: TagName) {
        if self.stack.len() >= self.limits.max_nesting {
            self.overflow_depth += 1;
            log::warn!(
                "Element nesting depth {} exceeds max_nesting ({}); flattening",
                self.stack.len() + self.overflow_depth,
                self.limits.max_nesting
            );
            return;
        }
        let kind = classify(&name);
        match kind {
            ElementKind::Skip => self.skip_depth += 1,
            ElementKind::Block(block) if self.skip_depth == 0 => {
                self.emit(MarkupEvent::BlockStart(block));
            }
            _ => {}
        }
        self.stack.push(ElementFrame { name, kind });
    }

    fn close_element(&mut self, name: &[u8], offset: usize) -> Result<(), MarkupError> {
        if self.overflow_depth > 0 {
            self.overflow_depth -= 1;
            return Ok(());
        }
        let Some(frame) = self.stack.pop() else {
            return Err(MarkupError::new(
                "MARKUP_UNEXPECTED_END",
                format!("closing </{}> with no open element", String::from_utf8_lossy(name)),
                offset,
            ));
        };
        if frame.name.as_slice() != name {
            return Err(MarkupError::new(
                "MARKUP_MISMATCHED_END",
                format!(
                    "expected </{}>, found </{}>",
                    String::from_utf8_lossy(&frame.name),
                    String::from_utf8_lossy(name)
                ),
                offset,
            ));
        }
        match frame.kind {
            ElementKind::Skip => self.skip_depth = self.skip_depth.saturating_sub(1),
            ElementKind::Block(block) if self.skip_depth == 0 => {
                self.emit(MarkupEvent::BlockEnd(block));
            }
            _ => {}
        }
        Ok(())
    }

    fn emit_void(&mut self, name: &[u8], e: &BytesStart<'_>) {
        if self.skip_depth > 0 {
            return;
        }
        match name {
            b"br" => self.emit(MarkupEvent::LineBreak),
            b"hr" => self.emit(MarkupEvent::Rule),
            b"img" | b"image" => {
                let image = image_ref_from_start(&self.reader, e);
                self.emit(MarkupEvent::Image(image));
            }
            _ => {}
        }
    }

    fn set_pending(&mut self, text: Cow<'a, str>) {
        self.pending = text;
        self.pending_pos = 0;
    }

    /// Move pending text into the buffer until it fills or the node ends.
    /// A full buffer is handed out up to its last breaking space, so at most
    /// one text run is queued per call.
    fn feed_pending(&mut self) {
        while self.pending_pos < self.pending.len() {
            let rest = &self.pending[self.pending_pos..];
            let room = TEXT_FLUSH_BYTES.saturating_sub(self.text.len()).max(1);
            let mut take = rest.len().min(room);
            while !rest.is_char_boundary(take) {
                take += 1;
            }
            self.text.push_str(&rest[..take]);
            self.pending_pos += take;
            if self.text.len() >= TEXT_FLUSH_BYTES {
                self.flush_text_prefix();
                if !self.out.is_empty() {
                    break;
                }
            }
        }
        if self.pending_pos >= self.pending.len() {
            self.set_pending(Cow::Borrowed(""));
        }
    }

    /// Emit buffered text through its last breaking space and keep the
    /// trailing partial word. A buffer with no break is emitted whole; the
    /// next run then continues the word without a separator.
    fn flush_text_prefix(&mut self) {
        let cut = self
            .text
            .rfind(is_breaking_space)
            .map_or(self.text.len(), |i| {
                i + self.text[i..].chars().next().map_or(1, char::len_utf8)
            });
        let tail = self.text.split_off(cut);
        self.flush_text();
        self.text = tail;
    }

    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let preserve = self
            .stack
            .iter()
            .any(|frame| matches!(frame.name.as_slice(), b"pre" | b"code" | b"samp"));
        let mut normalized = normalize_plain_text_whitespace(&self.text, preserve);
        self.text.clear();
        if !preserve && !self.after_text && normalized.starts_with(' ') {
            normalized.remove(0);
        }
        if normalized.is_empty() {
            return;
        }
        // Whitespace between inline runs separates words; elsewhere it is noise.
        if normalized.trim().is_empty() && !self.after_text {
            return;
        }
        let style = self.inline_style();
        self.out.push_back(MarkupEvent::Text(TextRun {
            text: normalized,
            style,
        }));
        self.after_text = true;
    }

    /// Queue a structural event, dropping the trailing separator of a text
    /// run it ends.
    fn emit(&mut self, event: MarkupEvent) {
        if let Some(MarkupEvent::Text(run)) = self.out.back_mut() {
            if run.text.ends_with(' ') && run.text.len() > 1 {
                run.text.pop();
            } else if run.text == " " {
                self.out.pop_back();
            }
        }
        self.out.push_back(event);
        self.after_text = false;
    }

    fn inline_style(&self) -> InlineStyle {
        let mut style = InlineStyle::default();
        for frame in &self.stack {
            match frame.kind {
                ElementKind::Bold | ElementKind::Block(BlockKind::Heading(_)) => style.bold = true,
                ElementKind::Italic => style.italic = true,
                _ => {}
            }
        }
        style
    }
}

impl Iterator for MarkupReader<'_> {
    type Item = Result<MarkupEvent, MarkupError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_event().transpose()
    }
}

fn tag_name(raw: &[u8]) -> TagName {
    raw.iter().map(u8::to_ascii_lowercase).collect()
}

fn classify(name: &[u8]) -> ElementKind {
    match name {
        b"p" | b"div" | b"blockquote" | b"pre" | b"figure" | b"figcaption" | b"table"
        | b"tr" | b"dt" | b"dd" | b"aside" => ElementKind::Block(BlockKind::Paragraph),
        b"li" => ElementKind::Block(BlockKind::ListItem),
        [b'h', level @ b'1'..=b'6'] => ElementKind::Block(BlockKind::Heading(level - b'0')),
        b"b" | b"strong" => ElementKind::Bold,
        b"i" | b"em" | b"cite" | b"dfn" | b"var" => ElementKind::Italic,
        b"head" | b"script" | b"style" | b"title" | b"noscript" => ElementKind::Skip,
        _ => ElementKind::Other,
    }
}

fn is_void_element(name: &[u8]) -> bool {
    matches!(
        name,
        b"br" | b"hr" | b"img" | b"image" | b"meta" | b"link" | b"input" | b"col" | b"area"
            | b"base" | b"wbr" | b"source"
    )
}

fn image_ref_from_start(reader: &Reader<&[u8]>, e: &BytesStart<'_>) -> ImageRef {
    let mut image = ImageRef::default();
    for attr in e.attributes().flatten() {
        let key = tag_name(attr.key.local_name().as_ref());
        let value = match reader.decoder().decode(&attr.value) {
            Ok(v) => match quick_xml::escape::unescape(&v) {
                Ok(unescaped) => unescaped.into_owned(),
                Err(_) => v.into_owned(),
            },
            Err(_) => continue,
        };
        match key.as_slice() {
            b"src" | b"href" if image.src.is_empty() => image.src = value,
            b"alt" => image.alt = value,
            b"width" => image.width_px = parse_length_px(&value),
            b"height" => image.height_px = parse_length_px(&value),
            _ => {}
        }
    }
    image
}

fn parse_length_px(value: &str) -> Option<u32> {
    let trimmed = value.trim();
    let digits = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .map_or(trimmed, |end| &trimmed[..end]);
    digits.parse::<u32>().ok().filter(|px| *px > 0)
}

fn resolve_entity(name: &str) -> Option<String> {
    let mut raw = String::with_capacity(name.len() + 2);
    raw.push('&');
    raw.push_str(name);
    raw.push(';');
    if let Ok(resolved) = quick_xml::escape::unescape(&raw) {
        return Some(resolved.into_owned());
    }
    let ch = match name {
        "nbsp" => '\u{00A0}',
        "shy" => '\u{00AD}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "hellip" => '\u{2026}',
        "copy" => '\u{00A9}',
        "eacute" => '\u{00E9}',
        "egrave" => '\u{00E8}',
        "aacute" => '\u{00E1}',
        "uuml" => '\u{00FC}',
        "ouml" => '\u{00F6}',
        "auml" => '\u{00E4}',
        _ => return None,
    };
    Some(ch.to_string())
}

/// Whitespace that separates words. No-break space is kept as a glyph.
pub fn is_breaking_space(ch: char) -> bool {
    ch.is_whitespace() && ch != '\u{00A0}'
}

fn normalize_plain_text_whitespace(text: &str, preserve: bool) -> String {
    if preserve {
        return text.to_string();
    }
    let mut result = String::with_capacity(text.len());
    let mut prev_space = false;
    for ch in text.chars() {
        if is_breaking_space(ch) {
            if !prev_space {
                result.push(' ');
                prev_space = true;
            }
        } else {
            result.push(ch);
            prev_space = false;
        }
    }
    result
}
