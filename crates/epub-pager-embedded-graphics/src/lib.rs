//! embedded-graphics display for `epub-pager-render` pages.
//!
//! [`EgDisplay`] replays page commands into any monochrome `DrawTarget`.
//! [`MonoFontSet::font_family`] derives glyph tables from the same mono fonts
//! used for drawing, so layout measurements match the pixels on the panel.

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

use embedded_graphics::{
    mono_font::{
        ascii::{FONT_6X9, FONT_8X13, FONT_8X13_BOLD, FONT_8X13_ITALIC},
        MonoFont, MonoTextStyle,
    },
    pixelcolor::BinaryColor,
    prelude::*,
    primitives::{Line, PrimitiveStyle, Rectangle},
    text::{Baseline, Text},
};
use epub_pager_render::{
    Display, DrawCommand, FontFamily, Glyph, GlyphInterval, GlyphTable, ImageCommand,
    LineMetrics, TextCommand, TextStyle,
};
use std::borrow::Cow;
use std::sync::Arc;

const FIRST_GLYPH: char = ' ';
const LAST_GLYPH: char = '~';
/// Extra leading added under each mono font's cell.
const LINE_LEADING_PX: u16 = 2;

/// Mono fonts used for each text style.
#[derive(Clone, Copy)]
pub struct MonoFontSet {
    pub regular: &'static MonoFont<'static>,
    pub bold: &'static MonoFont<'static>,
    pub italic: &'static MonoFont<'static>,
    pub bold_italic: &'static MonoFont<'static>,
}

impl Default for MonoFontSet {
    fn default() -> Self {
        Self {
            regular: &FONT_8X13,
            bold: &FONT_8X13_BOLD,
            italic: &FONT_8X13_ITALIC,
            bold_italic: &FONT_8X13_BOLD,
        }
    }
}

impl core::fmt::Debug for MonoFontSet {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MonoFontSet")
            .field("regular", &self.regular.character_size)
            .field("bold", &self.bold.character_size)
            .field("italic", &self.italic.character_size)
            .field("bold_italic", &self.bold_italic.character_size)
            .finish()
    }
}

impl MonoFontSet {
    pub fn font_for(&self, style: TextStyle) -> &'static MonoFont<'static> {
        match style {
            TextStyle::Regular => self.regular,
            TextStyle::Bold => self.bold,
            TextStyle::Italic => self.italic,
            TextStyle::BoldItalic => self.bold_italic,
        }
    }

    /// Glyph tables matching these fonts, one per style.
    pub fn font_family(&self) -> FontFamily {
        FontFamily::new(Arc::new(mono_glyph_table(self.regular)))
            .with_bold(Arc::new(mono_glyph_table(self.bold)))
            .with_italic(Arc::new(mono_glyph_table(self.italic)))
            .with_bold_italic(Arc::new(mono_glyph_table(self.bold_italic)))
    }
}

/// Glyph table for a fixed-cell ASCII font.
///
/// Every printable glyph fills the cell above and below the baseline; the
/// space glyph advances without ink.
pub fn mono_glyph_table(font: &MonoFont<'_>) -> GlyphTable {
    let cell = font.character_size;
    let advance = (cell.width + font.character_spacing).min(u16::MAX as u32) as u16;
    let ascent = font.baseline.min(cell.height) as i16;
    let cell_w = cell.width.min(u16::MAX as u32) as u16;
    let cell_h = cell.height.min(u16::MAX as u32) as u16;
    let glyphs = (FIRST_GLYPH..=LAST_GLYPH)
        .map(|ch| {
            if ch == ' ' {
                Glyph {
                    advance_x: advance,
                    ..Glyph::default()
                }
            } else {
                Glyph {
                    width: cell_w,
                    height: cell_h,
                    top: ascent,
                    left: 0,
                    advance_x: advance,
                }
            }
        })
        .collect();
    GlyphTable::new(
        vec![GlyphInterval {
            first: FIRST_GLYPH as u32,
            last: LAST_GLYPH as u32,
            offset: 0,
        }],
        glyphs,
        LineMetrics {
            line_height: cell_h.saturating_add(LINE_LEADING_PX),
            ascender: ascent,
            descender: cell_h as i16 - ascent,
        },
    )
}

/// [`Display`] over an embedded-graphics monochrome draw target.
pub struct EgDisplay<D> {
    target: D,
    fonts: MonoFontSet,
}

impl<D> EgDisplay<D>
where
    D: DrawTarget<Color = BinaryColor>,
{
    pub fn new(target: D) -> Self {
        Self::with_fonts(target, MonoFontSet::default())
    }

    pub fn with_fonts(target: D, fonts: MonoFontSet) -> Self {
        Self { target, fonts }
    }

    pub fn fonts(&self) -> &MonoFontSet {
        &self.fonts
    }

    pub fn target(&self) -> &D {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut D {
        &mut self.target
    }

    pub fn into_inner(self) -> D {
        self.target
    }

    fn draw_text(&mut self, text: &TextCommand) -> Result<(), D::Error> {
        let style = MonoTextStyle::new(self.fonts.font_for(text.style), BinaryColor::On);
        let normalized = normalize_text_for_mono(&text.text);
        if !normalized.is_ascii() {
            log::trace!("mono font substitutes '?' in {:?}", normalized);
        }
        Text::with_baseline(
            normalized.as_ref(),
            Point::new(text.x, text.baseline_y),
            style,
            Baseline::Alphabetic,
        )
        .draw(&mut self.target)?;
        Ok(())
    }

    fn draw_image(&mut self, image: &ImageCommand) -> Result<(), D::Error> {
        Rectangle::new(
            Point::new(image.x, image.y),
            Size::new(image.width.max(1), image.height.max(1)),
        )
        .into_styled(PrimitiveStyle::with_stroke(BinaryColor::On, 1))
        .draw(&mut self.target)?;

        let label = if image.alt.trim().is_empty() {
            image.src.rsplit('/').next().unwrap_or_default()
        } else {
            image.alt.trim()
        };
        if label.is_empty() || image.width < 10 || image.height < 10 {
            return Ok(());
        }
        let style = MonoTextStyle::new(&FONT_6X9, BinaryColor::On);
        let char_width = style.font.character_size.width.max(1) as usize;
        let max_chars = (image.width.saturating_sub(4) as usize / char_width).max(1);
        let text = truncate_with_ellipsis(&normalize_text_for_mono(label), max_chars);
        Text::with_baseline(
            &text,
            Point::new(image.x + 2, image.y + 2),
            style,
            Baseline::Top,
        )
        .draw(&mut self.target)?;
        Ok(())
    }
}

impl<D> Display for EgDisplay<D>
where
    D: DrawTarget<Color = BinaryColor>,
{
    type Error = D::Error;

    fn page_width(&self) -> u32 {
        self.target.bounding_box().size.width
    }

    fn page_height(&self) -> u32 {
        self.target.bounding_box().size.height
    }

    fn clear(&mut self) -> Result<(), Self::Error> {
        self.target.clear(BinaryColor::Off)
    }

    fn draw(&mut self, command: &DrawCommand) -> Result<(), Self::Error> {
        match command {
            DrawCommand::Text(text) => self.draw_text(text),
            DrawCommand::Rule(rule) => {
                let style = PrimitiveStyle::with_stroke(BinaryColor::On, rule.thickness.max(1));
                let end = if rule.horizontal {
                    Point::new(rule.x + rule.length as i32, rule.y)
                } else {
                    Point::new(rule.x, rule.y + rule.length as i32)
                };
                Line::new(Point::new(rule.x, rule.y), end)
                    .into_styled(style)
                    .draw(&mut self.target)?;
                Ok(())
            }
            DrawCommand::Image(image) => self.draw_image(image),
        }
    }
}

/// Map common typography to ASCII one-for-one so drawn width matches the
/// measured width.
fn normalize_text_for_mono(text: &str) -> Cow<'_, str> {
    if !text.chars().any(|ch| {
        matches!(
            ch,
            '\u{00A0}' // nbsp
                | '\u{2013}' // en dash
                | '\u{2014}' // em dash
                | '\u{2018}' // left single quote
                | '\u{2019}' // right single quote
                | '\u{201C}' // left double quote
                | '\u{201D}' // right double quote
        )
    }) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '\u{00A0}' => out.push(' '),
            '\u{2013}' | '\u{2014}' => out.push('-'),
            '\u{2018}' | '\u{2019}' => out.push('\''),
            '\u{201C}' | '\u{201D}' => out.push('"'),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

fn truncate_with_ellipsis(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    if max_chars <= 3 {
        return text.chars().take(max_chars).collect();
    }
    let mut out: String = text.chars().take(max_chars - 3).collect();
    out.push_str("...");
    out
}
