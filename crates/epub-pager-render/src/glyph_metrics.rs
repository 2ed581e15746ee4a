//! Glyph metrics table and text bounds queries.
//!
//! Fonts are generated offline into a sorted list of code point intervals,
//! each pointing at a contiguous run of glyph records. Lookups walk the
//! intervals in order and stop at the first one that starts past the query.

use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::render_ir::TextStyle;

/// Code point substituted for glyphs the table does not cover.
pub const FALLBACK_CODEPOINT: u32 = '?' as u32;

/// Geometry for one code point, in pixels.
///
/// `top` is the distance from the baseline up to the glyph's top edge and
/// `left` the horizontal bearing from the pen position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Glyph {
    pub width: u16,
    pub height: u16,
    pub top: i16,
    pub left: i16,
    pub advance_x: u16,
}

/// Contiguous code point run `first..=last` mapped to glyph records starting at `offset`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlyphInterval {
    pub first: u32,
    pub last: u32,
    pub offset: u32,
}

/// Font-wide vertical metrics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LineMetrics {
    /// Baseline-to-baseline distance.
    pub line_height: u16,
    /// Distance from the baseline to the top of the line box.
    pub ascender: i16,
    /// Distance from the baseline down to the bottom of the line box (positive).
    pub descender: i16,
}

/// What to do when neither a code point nor the `?` fallback has a glyph.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MissingGlyphPolicy {
    /// Contribute nothing to bounds and do not advance.
    Skip,
    /// Measure a box sized from the table's line metrics.
    #[default]
    PlaceholderBox,
}

/// Axis-aligned text bounds. Y grows upward from the baseline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextBounds {
    pub min_x: i32,
    pub min_y: i32,
    pub max_x: i32,
    pub max_y: i32,
}

impl TextBounds {
    fn point(x: i32, y: i32) -> Self {
        Self {
            min_x: x,
            min_y: y,
            max_x: x,
            max_y: y,
        }
    }

    pub fn width(&self) -> i32 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> i32 {
        self.max_y - self.min_y
    }
}

/// Validation failures for a glyph table. Only reported by
/// [`GlyphTable::validate`]; lookups never panic on a malformed table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GlyphTableError {
    /// Interval with `first > last`.
    InvertedInterval { index: usize },
    /// Interval starts at or before the end of the previous one.
    UnsortedOrOverlapping { index: usize },
    /// Interval points past the end of the glyph records.
    OffsetOutOfRange { index: usize, glyph_count: usize },
    /// JSON font description could not be parsed.
    Json(String),
}

impl fmt::Display for GlyphTableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvertedInterval { index } => write!(f, "interval {} has first > last", index),
            Self::UnsortedOrOverlapping { index } => {
                write!(f, "interval {} is unsorted or overlaps its predecessor", index)
            }
            Self::OffsetOutOfRange { index, glyph_count } => write!(
                f,
                "interval {} points past glyph records (count={})",
                index, glyph_count
            ),
            Self::Json(message) => write!(f, "invalid glyph table json: {}", message),
        }
    }
}

impl std::error::Error for GlyphTableError {}

/// Sparse code point to glyph table for one font face.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlyphTable {
    intervals: Cow<'static, [GlyphInterval]>,
    glyphs: Cow<'static, [Glyph]>,
    metrics: LineMetrics,
    #[serde(default)]
    missing_glyph: MissingGlyphPolicy,
}

impl GlyphTable {
    /// Wrap generated static arrays without copying them.
    pub const fn from_static(
        intervals: &'static [GlyphInterval],
        glyphs: &'static [Glyph],
        metrics: LineMetrics,
    ) -> Self {
        Self {
            intervals: Cow::Borrowed(intervals),
            glyphs: Cow::Borrowed(glyphs),
            metrics,
            missing_glyph: MissingGlyphPolicy::PlaceholderBox,
        }
    }

    /// Build a table from owned records.
    pub fn new(intervals: Vec<GlyphInterval>, glyphs: Vec<Glyph>, metrics: LineMetrics) -> Self {
        Self {
            intervals: Cow::Owned(intervals),
            glyphs: Cow::Owned(glyphs),
            metrics,
            missing_glyph: MissingGlyphPolicy::default(),
        }
    }

    /// Load a table from its JSON description.
    pub fn from_json_slice(bytes: &[u8]) -> Result<Self, GlyphTableError> {
        serde_json::from_slice(bytes).map_err(|err| GlyphTableError::Json(err.to_string()))
    }

    /// Set the policy for code points with no glyph and no `?` fallback.
    pub fn with_missing_glyph_policy(mut self, policy: MissingGlyphPolicy) -> Self {
        self.missing_glyph = policy;
        self
    }

    pub fn missing_glyph_policy(&self) -> MissingGlyphPolicy {
        self.missing_glyph
    }

    pub fn metrics(&self) -> LineMetrics {
        self.metrics
    }

    pub fn intervals(&self) -> &[GlyphInterval] {
        &self.intervals
    }

    /// Check sort order, overlap and offsets. Intended for font tooling and tests.
    pub fn validate(&self) -> Result<(), GlyphTableError> {
        let glyph_count = self.glyphs.len();
        let mut prev_last: Option<u32> = None;
        for (index, interval) in self.intervals.iter().enumerate() {
            if interval.first > interval.last {
                return Err(GlyphTableError::InvertedInterval { index });
            }
            if prev_last.is_some_and(|last| interval.first <= last) {
                return Err(GlyphTableError::UnsortedOrOverlapping { index });
            }
            let span = (interval.last - interval.first) as usize;
            if interval.offset as usize + span >= glyph_count {
                return Err(GlyphTableError::OffsetOutOfRange { index, glyph_count });
            }
            prev_last = Some(interval.last);
        }
        Ok(())
    }

    /// Glyph for `codepoint`, or `None` when no interval covers it.
    ///
    /// With overlapping intervals the first match in table order wins.
    pub fn lookup(&self, codepoint: u32) -> Option<&Glyph> {
        for interval in self.intervals.iter() {
            if codepoint >= interval.first && codepoint <= interval.last {
                let index = interval.offset as usize + (codepoint - interval.first) as usize;
                return self.glyphs.get(index);
            }
            if codepoint < interval.first {
                return None;
            }
        }
        None
    }

    /// Glyph used to measure `codepoint`: its own, then `?`, then the
    /// missing-glyph policy.
    pub fn resolve(&self, codepoint: u32) -> Option<Glyph> {
        if let Some(glyph) = self.lookup(codepoint) {
            return Some(*glyph);
        }
        if let Some(glyph) = self.lookup(FALLBACK_CODEPOINT) {
            return Some(*glyph);
        }
        match self.missing_glyph {
            MissingGlyphPolicy::Skip => None,
            MissingGlyphPolicy::PlaceholderBox => Some(self.placeholder_glyph()),
        }
    }

    fn placeholder_glyph(&self) -> Glyph {
        let height = self.metrics.ascender.max(1) as u16;
        let width = (self.metrics.line_height / 2).max(1);
        Glyph {
            width,
            height,
            top: height as i16,
            left: 0,
            advance_x: width.saturating_add(1),
        }
    }

    /// Bounds of `text` drawn with its pen starting at `(origin_x, origin_y)`.
    ///
    /// An empty string yields a degenerate box at the origin.
    pub fn text_bounds(&self, text: &str, origin_x: i32, origin_y: i32) -> TextBounds {
        let mut bounds = TextBounds::point(origin_x, origin_y);
        let mut cursor_x = origin_x;
        for ch in text.chars() {
            let Some(glyph) = self.resolve(ch as u32) else {
                continue;
            };
            let left = cursor_x + i32::from(glyph.left);
            let top = origin_y + i32::from(glyph.top);
            bounds.min_x = bounds.min_x.min(left);
            bounds.max_x = bounds.max_x.max(left + i32::from(glyph.width));
            bounds.min_y = bounds.min_y.min(top - i32::from(glyph.height));
            bounds.max_y = bounds.max_y.max(top);
            cursor_x += i32::from(glyph.advance_x);
        }
        bounds
    }

    /// `(width, height)` of `text` anchored at the origin.
    pub fn text_dimensions(&self, text: &str) -> (i32, i32) {
        let bounds = self.text_bounds(text, 0, 0);
        (bounds.width(), bounds.height())
    }

    /// True when `text` measures to a non-empty box.
    pub fn has_printable_content(&self, text: &str) -> bool {
        let (width, height) = self.text_dimensions(text);
        width > 0 || height > 0
    }

    /// Sum of pen advances for `text`.
    pub fn advance_width(&self, text: &str) -> i32 {
        text.chars()
            .filter_map(|ch| self.resolve(ch as u32))
            .map(|glyph| i32::from(glyph.advance_x))
            .sum()
    }

    /// Stable 64-bit fingerprint of every metric that affects layout.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = Fnv64::new();
        for interval in self.intervals.iter() {
            hash.write_u32(interval.first);
            hash.write_u32(interval.last);
            hash.write_u32(interval.offset);
        }
        for glyph in self.glyphs.iter() {
            hash.write_u32(u32::from(glyph.width));
            hash.write_u32(u32::from(glyph.height));
            hash.write_u32(glyph.top as u16 as u32);
            hash.write_u32(glyph.left as u16 as u32);
            hash.write_u32(u32::from(glyph.advance_x));
        }
        hash.write_u32(u32::from(self.metrics.line_height));
        hash.write_u32(self.metrics.ascender as u16 as u32);
        hash.write_u32(self.metrics.descender as u16 as u32);
        hash.write_u32(match self.missing_glyph {
            MissingGlyphPolicy::Skip => 0,
            MissingGlyphPolicy::PlaceholderBox => 1,
        });
        hash.finish()
    }
}

struct Fnv64(u64);

impl Fnv64 {
    fn new() -> Self {
        Self(0xcbf29ce484222325)
    }

    fn write_u32(&mut self, value: u32) {
        for b in value.to_le_bytes() {
            self.0 ^= u64::from(b);
            self.0 = self.0.wrapping_mul(0x100000001b3);
        }
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

/// Glyph tables for each text style, shared read-only by layout and rendering.
///
/// Missing styles fall back to the closest available face, ending at regular.
#[derive(Clone, Debug)]
pub struct FontFamily {
    regular: Arc<GlyphTable>,
    bold: Option<Arc<GlyphTable>>,
    italic: Option<Arc<GlyphTable>>,
    bold_italic: Option<Arc<GlyphTable>>,
}

impl FontFamily {
    pub fn new(regular: Arc<GlyphTable>) -> Self {
        Self {
            regular,
            bold: None,
            italic: None,
            bold_italic: None,
        }
    }

    pub fn with_bold(mut self, table: Arc<GlyphTable>) -> Self {
        self.bold = Some(table);
        self
    }

    pub fn with_italic(mut self, table: Arc<GlyphTable>) -> Self {
        self.italic = Some(table);
        self
    }

    pub fn with_bold_italic(mut self, table: Arc<GlyphTable>) -> Self {
        self.bold_italic = Some(table);
        self
    }

    /// Table used for `style`.
    pub fn table(&self, style: TextStyle) -> &GlyphTable {
        let chosen = match style {
            TextStyle::Regular => None,
            TextStyle::Bold => self.bold.as_ref(),
            TextStyle::Italic => self.italic.as_ref(),
            TextStyle::BoldItalic => self
                .bold_italic
                .as_ref()
                .or(self.bold.as_ref())
                .or(self.italic.as_ref()),
        };
        chosen.unwrap_or(&self.regular)
    }

    /// Fingerprint across all faces, in style order.
    pub fn fingerprint(&self) -> u64 {
        let mut hash = Fnv64::new();
        for style in TextStyle::ALL {
            let value = self.table(style).fingerprint();
            hash.write_u32(value as u32);
            hash.write_u32((value >> 32) as u32);
        }
        hash.finish()
    }
}
