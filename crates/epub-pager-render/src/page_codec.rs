//! Binary page records.
//!
//! A record is self-delimiting:
//!
//! ```text
//! [version: u8][payload_len: u32 LE][payload: postcard][crc32(payload): u32 LE]
//! ```
//!
//! Bytes after the trailing checksum are not read.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};

use crate::render_ir::{
    DrawCommand, ImageCommand, Page, PageLayout, RuleCommand, TextCommand, TextStyle,
};

/// Current page record layout version.
pub const PAGE_RECORD_VERSION: u8 = 1;
/// Default cap on a single record's payload.
pub const DEFAULT_MAX_PAGE_RECORD_BYTES: usize = 256 * 1024;

const HEADER_LEN: usize = 5;

/// Page record encode/decode failures.
#[derive(Debug)]
pub enum PageCodecError {
    /// Sink or source failed, including truncated input.
    Io(io::Error),
    UnsupportedVersion(u8),
    /// Declared or encoded payload exceeds the configured cap.
    TooLarge { len: usize, limit: usize },
    ChecksumMismatch { stored: u32, computed: u32 },
    Encode(postcard::Error),
    Decode(postcard::Error),
}

impl fmt::Display for PageCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "page record io: {}", err),
            Self::UnsupportedVersion(v) => write!(f, "unsupported page record version {}", v),
            Self::TooLarge { len, limit } => {
                write!(f, "page record payload {} bytes exceeds limit {}", len, limit)
            }
            Self::ChecksumMismatch { stored, computed } => write!(
                f,
                "page record checksum mismatch (stored={:08x} computed={:08x})",
                stored, computed
            ),
            Self::Encode(err) => write!(f, "page record encode: {}", err),
            Self::Decode(err) => write!(f, "page record decode: {}", err),
        }
    }
}

impl std::error::Error for PageCodecError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Encode(err) | Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for PageCodecError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl Page {
    /// Write this page as one record to `sink`. Returns bytes written.
    pub fn serialize<W: Write + ?Sized>(
        &self,
        sink: &mut W,
        max_payload_bytes: usize,
    ) -> Result<usize, PageCodecError> {
        let payload =
            postcard::to_allocvec(&PersistedPage::from(self)).map_err(PageCodecError::Encode)?;
        if payload.len() > max_payload_bytes || u32::try_from(payload.len()).is_err() {
            return Err(PageCodecError::TooLarge {
                len: payload.len(),
                limit: max_payload_bytes,
            });
        }
        let mut header = [0u8; HEADER_LEN];
        header[0] = PAGE_RECORD_VERSION;
        header[1..].copy_from_slice(&(payload.len() as u32).to_le_bytes());
        sink.write_all(&header)?;
        sink.write_all(&payload)?;
        sink.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
        Ok(HEADER_LEN + payload.len() + 4)
    }

    /// Read one record from `source`.
    ///
    /// The declared length is checked against `max_payload_bytes` before any
    /// payload allocation.
    pub fn deserialize<R: Read + ?Sized>(
        source: &mut R,
        max_payload_bytes: usize,
    ) -> Result<Self, PageCodecError> {
        let mut header = [0u8; HEADER_LEN];
        source.read_exact(&mut header)?;
        if header[0] != PAGE_RECORD_VERSION {
            return Err(PageCodecError::UnsupportedVersion(header[0]));
        }
        let len = u32::from_le_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if len > max_payload_bytes {
            return Err(PageCodecError::TooLarge {
                len,
                limit: max_payload_bytes,
            });
        }
        let mut payload = vec![0u8; len];
        source.read_exact(&mut payload)?;
        let mut trailer = [0u8; 4];
        source.read_exact(&mut trailer)?;
        let stored = u32::from_le_bytes(trailer);
        let computed = crc32fast::hash(&payload);
        if stored != computed {
            return Err(PageCodecError::ChecksumMismatch { stored, computed });
        }
        let persisted: PersistedPage =
            postcard::from_bytes(&payload).map_err(PageCodecError::Decode)?;
        Ok(persisted.into())
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedPage {
    section_index: u32,
    page_index: u32,
    layout: PersistedPageLayout,
    commands: Vec<PersistedDrawCommand>,
}

impl From<&Page> for PersistedPage {
    fn from(value: &Page) -> Self {
        Self {
            section_index: value.section_index as u32,
            page_index: value.page_index as u32,
            layout: value.layout.into(),
            commands: value
                .commands
                .iter()
                .map(PersistedDrawCommand::from)
                .collect(),
        }
    }
}

impl From<PersistedPage> for Page {
    fn from(value: PersistedPage) -> Self {
        Self {
            section_index: value.section_index as usize,
            page_index: value.page_index as usize,
            layout: value.layout.into(),
            commands: value.commands.into_iter().map(DrawCommand::from).collect(),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
struct PersistedPageLayout {
    display_width: u32,
    display_height: u32,
    content_top: i32,
    content_bottom: i32,
}

impl From<PageLayout> for PersistedPageLayout {
    fn from(value: PageLayout) -> Self {
        Self {
            display_width: value.display_width,
            display_height: value.display_height,
            content_top: value.content_top,
            content_bottom: value.content_bottom,
        }
    }
}

impl From<PersistedPageLayout> for PageLayout {
    fn from(value: PersistedPageLayout) -> Self {
        Self {
            display_width: value.display_width,
            display_height: value.display_height,
            content_top: value.content_top,
            content_bottom: value.content_bottom,
        }
    }
}

#[derive(Serialize, Deserialize)]
enum PersistedDrawCommand {
    Text {
        x: i32,
        baseline_y: i32,
        text: String,
        style: PersistedTextStyle,
    },
    Rule {
        x: i32,
        y: i32,
        length: u32,
        thickness: u32,
        horizontal: bool,
    },
    Image {
        src: String,
        alt: String,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    },
}

impl From<&DrawCommand> for PersistedDrawCommand {
    fn from(value: &DrawCommand) -> Self {
        match value {
            DrawCommand::Text(cmd) => Self::Text {
                x: cmd.x,
                baseline_y: cmd.baseline_y,
                text: cmd.text.clone(),
                style: cmd.style.into(),
            },
            DrawCommand::Rule(cmd) => Self::Rule {
                x: cmd.x,
                y: cmd.y,
                length: cmd.length,
                thickness: cmd.thickness,
                horizontal: cmd.horizontal,
            },
            DrawCommand::Image(cmd) => Self::Image {
                src: cmd.src.clone(),
                alt: cmd.alt.clone(),
                x: cmd.x,
                y: cmd.y,
                width: cmd.width,
                height: cmd.height,
            },
        }
    }
}

impl From<PersistedDrawCommand> for DrawCommand {
    fn from(value: PersistedDrawCommand) -> Self {
        match value {
            PersistedDrawCommand::Text {
                x,
                baseline_y,
                text,
                style,
            } => Self::Text(TextCommand {
                x,
                baseline_y,
                text,
                style: style.into(),
            }),
            PersistedDrawCommand::Rule {
                x,
                y,
                length,
                thickness,
                horizontal,
            } => Self::Rule(RuleCommand {
                x,
                y,
                length,
                thickness,
                horizontal,
            }),
            PersistedDrawCommand::Image {
                src,
                alt,
                x,
                y,
                width,
                height,
            } => Self::Image(ImageCommand {
                src,
                alt,
                x,
                y,
                width,
                height,
            }),
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize)]
enum PersistedTextStyle {
    Regular,
    Bold,
    Italic,
    BoldItalic,
}

impl From<TextStyle> for PersistedTextStyle {
    fn from(value: TextStyle) -> Self {
        match value {
            TextStyle::Regular => Self::Regular,
            TextStyle::Bold => Self::Bold,
            TextStyle::Italic => Self::Italic,
            TextStyle::BoldItalic => Self::BoldItalic,
        }
    }
}

impl From<PersistedTextStyle> for TextStyle {
    fn from(value: PersistedTextStyle) -> Self {
        match value {
            PersistedTextStyle::Regular => Self::Regular,
            PersistedTextStyle::Bold => Self::Bold,
            PersistedTextStyle::Italic => Self::Italic,
            PersistedTextStyle::BoldItalic => Self::BoldItalic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_page() -> Page {
        let mut page = Page::new(
            3,
            7,
            PageLayout {
                display_width: 480,
                display_height: 800,
                content_top: 16,
                content_bottom: 776,
            },
        );
        page.push(DrawCommand::Text(TextCommand {
            x: 16,
            baseline_y: 30,
            text: "Caf\u{e9} au lait".to_string(),
            style: TextStyle::BoldItalic,
        }));
        page.push(DrawCommand::Rule(RuleCommand {
            x: 16,
            y: 50,
            length: 448,
            thickness: 1,
            horizontal: true,
        }));
        page.push(DrawCommand::Image(ImageCommand {
            src: "images/fig1.png".to_string(),
            alt: "Figure 1".to_string(),
            x: 16,
            y: 60,
            width: 200,
            height: 120,
        }));
        page
    }

    fn encode(page: &Page) -> Vec<u8> {
        let mut out = Vec::new();
        page.serialize(&mut out, DEFAULT_MAX_PAGE_RECORD_BYTES)
            .unwrap();
        out
    }

    #[test]
    fn record_round_trips_every_command_kind() {
        let page = sample_page();
        let bytes = encode(&page);
        assert_eq!(bytes[0], PAGE_RECORD_VERSION);
        let decoded = Page::deserialize(&mut Cursor::new(&bytes), DEFAULT_MAX_PAGE_RECORD_BYTES)
            .unwrap();
        assert_eq!(decoded, page);
    }

    #[test]
    fn records_are_self_delimiting() {
        let first = sample_page();
        let mut second = sample_page();
        second.page_index = 8;
        second.commands.truncate(1);
        let mut bytes = encode(&first);
        bytes.extend(encode(&second));
        let mut cursor = Cursor::new(&bytes);
        let a = Page::deserialize(&mut cursor, DEFAULT_MAX_PAGE_RECORD_BYTES).unwrap();
        let b = Page::deserialize(&mut cursor, DEFAULT_MAX_PAGE_RECORD_BYTES).unwrap();
        assert_eq!((a, b), (first, second));
    }

    #[test]
    fn truncated_record_is_an_io_error() {
        let bytes = encode(&sample_page());
        for cut in [0, 3, HEADER_LEN + 2, bytes.len() - 1] {
            let err = Page::deserialize(&mut Cursor::new(&bytes[..cut]), usize::MAX).unwrap_err();
            assert!(
                matches!(err, PageCodecError::Io(ref e) if e.kind() == io::ErrorKind::UnexpectedEof),
                "cut={cut} err={err}"
            );
        }
    }

    #[test]
    fn flipped_payload_byte_fails_checksum() {
        let mut bytes = encode(&sample_page());
        bytes[HEADER_LEN + 3] ^= 0x40;
        let err = Page::deserialize(&mut Cursor::new(&bytes), usize::MAX).unwrap_err();
        assert!(matches!(err, PageCodecError::ChecksumMismatch { .. }));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode(&sample_page());
        bytes[0] = 9;
        let err = Page::deserialize(&mut Cursor::new(&bytes), usize::MAX).unwrap_err();
        assert!(matches!(err, PageCodecError::UnsupportedVersion(9)));
    }

    #[test]
    fn size_cap_applies_to_both_directions() {
        let page = sample_page();
        let bytes = encode(&page);
        let payload_len = bytes.len() - HEADER_LEN - 4;

        let err = page.serialize(&mut Vec::new(), payload_len - 1).unwrap_err();
        assert!(matches!(err, PageCodecError::TooLarge { .. }));

        let err = Page::deserialize(&mut Cursor::new(&bytes), payload_len - 1).unwrap_err();
        assert!(matches!(err, PageCodecError::TooLarge { len, .. } if len == payload_len));
    }

    #[test]
    fn empty_page_round_trips() {
        let page = Page::new(0, 0, PageLayout::default());
        let bytes = encode(&page);
        let decoded = Page::deserialize(&mut Cursor::new(&bytes), usize::MAX).unwrap();
        assert_eq!(decoded, page);
    }
}
