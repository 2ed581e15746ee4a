//! Page intermediate representation and the display seam it replays into.

use std::fmt;

/// Face used for a text command.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextStyle {
    #[default]
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl TextStyle {
    /// Every style in stable order.
    pub const ALL: [TextStyle; 4] = [
        TextStyle::Regular,
        TextStyle::Bold,
        TextStyle::Italic,
        TextStyle::BoldItalic,
    ];

    pub fn from_flags(bold: bool, italic: bool) -> Self {
        match (bold, italic) {
            (false, false) => Self::Regular,
            (true, false) => Self::Bold,
            (false, true) => Self::Italic,
            (true, true) => Self::BoldItalic,
        }
    }

    pub fn is_bold(self) -> bool {
        matches!(self, Self::Bold | Self::BoldItalic)
    }

    pub fn is_italic(self) -> bool {
        matches!(self, Self::Italic | Self::BoldItalic)
    }
}

/// Text draw command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TextCommand {
    /// Left x.
    pub x: i32,
    /// Baseline y.
    pub baseline_y: i32,
    /// Content.
    pub text: String,
    pub style: TextStyle,
}

/// Rule draw command.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleCommand {
    /// Start x.
    pub x: i32,
    /// Start y.
    pub y: i32,
    pub length: u32,
    pub thickness: u32,
    /// Horizontal if true; vertical if false.
    pub horizontal: bool,
}

/// Image placeholder box. Pixels are not decoded; backends draw a frame and alt text.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageCommand {
    /// Resource href as written in the markup.
    pub src: String,
    pub alt: String,
    /// Left x.
    pub x: i32,
    /// Top y.
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Layout output commands, in paint order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawCommand {
    Text(TextCommand),
    Rule(RuleCommand),
    Image(ImageCommand),
}

/// Display box a page was laid out for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PageLayout {
    pub display_width: u32,
    pub display_height: u32,
    /// First usable y after the top margin.
    pub content_top: i32,
    /// Last usable y before the bottom margin.
    pub content_bottom: i32,
}

/// One laid-out page of a section.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Page {
    /// Spine index of the owning section.
    pub section_index: usize,
    /// 0-based page index within the section.
    pub page_index: usize,
    pub layout: PageLayout,
    pub commands: Vec<DrawCommand>,
}

impl Page {
    const INITIAL_COMMAND_CAPACITY: usize = 16;

    /// Create an empty page.
    pub fn new(section_index: usize, page_index: usize, layout: PageLayout) -> Self {
        Self {
            section_index,
            page_index,
            layout,
            commands: Vec::with_capacity(0),
        }
    }

    pub fn push(&mut self, command: DrawCommand) {
        if self.commands.capacity() == 0 {
            self.commands.reserve(Self::INITIAL_COMMAND_CAPACITY);
        }
        self.commands.push(command);
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Text of every text command, in paint order.
    pub fn text_items(&self) -> impl Iterator<Item = &str> + '_ {
        self.commands.iter().filter_map(|cmd| match cmd {
            DrawCommand::Text(text) => Some(text.text.as_str()),
            _ => None,
        })
    }

    /// Replay the page's commands onto `display`.
    ///
    /// Does not clear or refresh; the caller owns the display cycle.
    pub fn render<D: Display + ?Sized>(&self, display: &mut D) -> Result<(), D::Error> {
        for cmd in &self.commands {
            display.draw(cmd)?;
        }
        Ok(())
    }
}

/// Drawing surface a page is replayed into.
pub trait Display {
    type Error;

    fn page_width(&self) -> u32;

    fn page_height(&self) -> u32;

    /// Reset the frame to background.
    fn clear(&mut self) -> Result<(), Self::Error>;

    fn draw(&mut self, command: &DrawCommand) -> Result<(), Self::Error>;

    /// Push the frame to the panel. Backends without a refresh cycle can keep the default.
    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Stable pagination profile id.
///
/// Two runs with equal profiles produce byte-identical page records, so the
/// id keys the on-disk cache root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PaginationProfileId(pub [u8; 32]);

impl PaginationProfileId {
    /// Build a deterministic profile id from arbitrary payload bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        fn fnv64(seed: u64, payload: &[u8]) -> u64 {
            let mut hash = seed;
            for b in payload {
                hash ^= *b as u64;
                hash = hash.wrapping_mul(0x100000001b3);
            }
            hash
        }
        let mut out = [0u8; 32];
        let seeds = [
            0xcbf29ce484222325,
            0x9e3779b97f4a7c15,
            0xd6e8feb86659fd93,
            0xa0761d6478bd642f,
        ];
        for (chunk, seed) in out.chunks_exact_mut(8).zip(seeds) {
            chunk.copy_from_slice(&fnv64(seed, bytes).to_le_bytes());
        }
        Self(out)
    }

    /// Short hex prefix used in directory names.
    pub fn short_hex(&self) -> String {
        const HEX: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(16); // allow: file I/O path, not hot
        for byte in &self.0[..8] {
            out.push(HEX[(byte >> 4) as usize] as char);
            out.push(HEX[(byte & 0x0f) as usize] as char);
        }
        out
    }
}

impl fmt::Display for PaginationProfileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
