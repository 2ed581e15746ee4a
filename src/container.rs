//! Document container collaborator.
//!
//! The container owns the archive format (ZIP/OPF for EPUB). Pagination only
//! needs the spine-ordered sections and their raw markup bytes, so that is all
//! this interface exposes.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

/// Source of spine-ordered section markup.
pub trait DocumentContainer {
    /// Number of sections in reading order.
    fn section_count(&self) -> usize;

    /// Raw markup bytes for the section at `index`.
    ///
    /// The returned buffer length is the section size.
    fn section_bytes(&mut self, index: usize) -> Result<Vec<u8>, ContainerError>;

    /// Stable, filesystem-safe name used to derive this document's cache root.
    fn cache_path_hint(&self) -> &str;
}

/// Errors surfaced while fetching section bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ContainerError {
    /// Requested section does not exist.
    SectionOutOfRange { index: usize, count: usize },
    /// Section exists but its bytes could not be produced.
    Unreadable { index: usize, message: Box<str> },
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SectionOutOfRange { index, count } => {
                write!(f, "section {} out of range (count={})", index, count)
            }
            Self::Unreadable { index, message } => {
                write!(f, "section {} unreadable: {}", index, message)
            }
        }
    }
}

impl std::error::Error for ContainerError {}

/// In-memory container, used for tests and for hosts that already hold
/// extracted section markup.
#[derive(Clone, Debug, Default)]
pub struct MemoryContainer {
    sections: Vec<Vec<u8>>,
    cache_hint: String,
}

impl MemoryContainer {
    /// Create an empty container with the given cache path hint.
    pub fn new(cache_hint: impl Into<String>) -> Self {
        Self {
            sections: Vec::with_capacity(4),
            cache_hint: sanitize_cache_hint(&cache_hint.into()),
        }
    }

    /// Append one section in reading order.
    pub fn push_section(&mut self, markup: impl Into<Vec<u8>>) {
        self.sections.push(markup.into());
    }

    /// Builder form of [`push_section`](Self::push_section).
    pub fn with_section(mut self, markup: impl Into<Vec<u8>>) -> Self {
        self.push_section(markup);
        self
    }
}

impl DocumentContainer for MemoryContainer {
    fn section_count(&self) -> usize {
        self.sections.len()
    }

    fn section_bytes(&mut self, index: usize) -> Result<Vec<u8>, ContainerError> {
        self.sections
            .get(index)
            .cloned()
            .ok_or(ContainerError::SectionOutOfRange {
                index,
                count: self.sections.len(),
            })
    }

    fn cache_path_hint(&self) -> &str {
        &self.cache_hint
    }
}

/// Reduce an arbitrary document name to a single safe path component.
pub fn sanitize_cache_hint(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(64));
    for ch in raw.chars() {
        if out.len() >= 64 {
            break;
        }
        if ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.') {
            out.push(ch);
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    let trimmed = out.trim_matches(|c| c == '.' || c == '_');
    if trimmed.is_empty() {
        return String::from("document");
    }
    String::from(trimmed)
}
