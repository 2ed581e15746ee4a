//! Per-section page cache on block storage.
//!
//! Layout of one section directory:
//!
//! ```text
//! <root>/<spine_index>/
//!     page_0.bin .. page_<n-1>.bin   one page record each
//!     section.bin                    u16 LE page count, written last
//! ```
//!
//! `section.bin` is the commit marker: it is written to a temporary file and
//! renamed into place only after every page file is durable, so its presence
//! means the directory holds a complete build.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use epub_pager::{ContainerError, DocumentContainer};

use crate::glyph_metrics::FontFamily;
use crate::page_codec::{PageCodecError, DEFAULT_MAX_PAGE_RECORD_BYTES};
use crate::render_ir::Page;
use crate::render_layout::{PageGeometry, PaginateError, Paginator};

/// Largest page count the 2-byte header can record.
pub const MAX_SECTION_PAGES: usize = u16::MAX as usize;

const SECTION_HEADER_FILE: &str = "section.bin";
const SECTION_HEADER_TMP_FILE: &str = "section.bin.tmp";

/// Minimal filesystem surface the cache needs.
pub trait BlockStorage {
    type Reader: Read;
    type Writer: Write;

    fn exists(&self, path: &Path) -> bool;

    fn open_read(&self, path: &Path) -> io::Result<Self::Reader>;

    /// Create or truncate `path` for writing.
    fn create(&self, path: &Path) -> io::Result<Self::Writer>;

    /// Flush `writer` and make its contents durable.
    fn commit(&self, writer: Self::Writer) -> io::Result<()>;

    fn create_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Remove a file. Missing files are not an error.
    fn remove_file(&self, path: &Path) -> io::Result<()>;

    /// Remove a directory tree. Missing directories are not an error.
    fn remove_dir_all(&self, path: &Path) -> io::Result<()>;

    /// Atomically replace `to` with `from`.
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    /// Persist directory entries after a rename, where the platform supports it.
    fn sync_dir(&self, _path: &Path) {}
}

/// [`BlockStorage`] over `std::fs`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FsStorage;

impl BlockStorage for FsStorage {
    type Reader = BufReader<File>;
    type Writer = BufWriter<File>;

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn open_read(&self, path: &Path) -> io::Result<Self::Reader> {
        File::open(path).map(BufReader::new)
    }

    fn create(&self, path: &Path) -> io::Result<Self::Writer> {
        File::create(path).map(BufWriter::new)
    }

    fn commit(&self, mut writer: Self::Writer) -> io::Result<()> {
        writer.flush()?;
        let file = writer.into_inner().map_err(|err| err.into_error())?;
        file.sync_all()
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        match fs::remove_file(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn remove_dir_all(&self, path: &Path) -> io::Result<()> {
        match fs::remove_dir_all(path) {
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }

    fn sync_dir(&self, path: &Path) {
        if let Ok(dir) = File::open(path) {
            let _ = dir.sync_all();
        }
    }
}

/// Cache tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheOptions {
    /// Cap on one page record's payload, applied on write and read.
    pub max_page_record_bytes: usize,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            max_page_record_bytes: DEFAULT_MAX_PAGE_RECORD_BYTES,
        }
    }
}

/// Failures while building a section cache.
#[derive(Debug)]
pub enum CacheError {
    Io(io::Error),
    Container(ContainerError),
    Paginate(PaginateError),
    Codec(PageCodecError),
    /// Section produced more pages than the header can record.
    PageCountOverflow { limit: usize },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "cache io: {}", err),
            Self::Container(err) => write!(f, "cache source: {}", err),
            Self::Paginate(err) => write!(f, "cache pagination: {}", err),
            Self::Codec(err) => write!(f, "cache page record: {}", err),
            Self::PageCountOverflow { limit } => {
                write!(f, "section exceeds {} pages", limit)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Container(err) => Some(err),
            Self::Paginate(err) => Some(err),
            Self::Codec(err) => Some(err),
            Self::PageCountOverflow { .. } => None,
        }
    }
}

impl From<io::Error> for CacheError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<ContainerError> for CacheError {
    fn from(err: ContainerError) -> Self {
        Self::Container(err)
    }
}

impl From<PaginateError> for CacheError {
    fn from(err: PaginateError) -> Self {
        Self::Paginate(err)
    }
}

impl From<PageCodecError> for CacheError {
    fn from(err: PageCodecError) -> Self {
        Self::Codec(err)
    }
}

/// Failures while fetching one cached page.
#[derive(Debug, PartialEq, Eq)]
pub enum PageError {
    /// `index` is negative or not below `page_count`. Always returned for an
    /// empty section.
    OutOfBounds { index: isize, page_count: usize },
    /// The section has no valid cache yet.
    NotCached,
    /// The header promises a page that is missing or unreadable.
    Inconsistent { index: usize, reason: Box<str> },
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfBounds { index, page_count } => {
                write!(f, "page {} out of bounds (page_count={})", index, page_count)
            }
            Self::NotCached => f.write_str("section is not cached"),
            Self::Inconsistent { index, reason } => {
                write!(f, "cached page {} inconsistent: {}", index, reason)
            }
        }
    }
}

impl std::error::Error for PageError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SectionState {
    Unchecked,
    Cached,
    BuildFailed,
}

/// One spine entry's cache handle and reading position.
#[derive(Clone, Debug)]
pub struct Section {
    spine_index: usize,
    cache_path: PathBuf,
    page_count: usize,
    state: SectionState,
    /// Page the reader is on. Navigation keeps it in range; callers may set
    /// it freely, and rendering reports out-of-range values.
    pub current_page: isize,
}

impl Section {
    pub fn spine_index(&self) -> usize {
        self.spine_index
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    /// Pages in the cached build. Zero until a cache is loaded or built.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// True once a complete cache has been confirmed or written.
    pub fn is_cached(&self) -> bool {
        self.state == SectionState::Cached
    }

    /// True when the last build attempt failed.
    pub fn build_failed(&self) -> bool {
        self.state == SectionState::BuildFailed
    }

    /// Advance one page. Returns false at the last page.
    pub fn next_page(&mut self) -> bool {
        if self.current_page + 1 < self.page_count as isize {
            self.current_page += 1;
            true
        } else {
            false
        }
    }

    /// Step back one page. Returns false at the first page.
    pub fn prev_page(&mut self) -> bool {
        if self.current_page > 0 {
            self.current_page -= 1;
            true
        } else {
            false
        }
    }

    /// Move to the last page, or 0 for an empty section.
    pub fn jump_to_last_page(&mut self) {
        self.current_page = self.page_count.saturating_sub(1) as isize;
    }

    fn header_path(&self) -> PathBuf {
        self.cache_path.join(SECTION_HEADER_FILE)
    }

    fn header_tmp_path(&self) -> PathBuf {
        self.cache_path.join(SECTION_HEADER_TMP_FILE)
    }

    fn page_path(&self, index: usize) -> PathBuf {
        self.cache_path.join(format!("page_{}.bin", index)) // allow: file I/O path, not hot
    }

    fn reset(&mut self, state: SectionState) {
        self.page_count = 0;
        self.state = state;
    }
}

/// Page cache for every section of one document under one cache root.
#[derive(Clone, Debug)]
pub struct SectionCache<S> {
    storage: S,
    root: PathBuf,
    options: CacheOptions,
}

impl<S: BlockStorage> SectionCache<S> {
    pub fn new(storage: S, root: impl Into<PathBuf>) -> Self {
        Self {
            storage,
            root: root.into(),
            options: CacheOptions::default(),
        }
    }

    pub fn with_options(mut self, options: CacheOptions) -> Self {
        self.options = options;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Handle for `spine_index`, positioned at page 0. Touches no storage.
    pub fn section(&self, spine_index: usize) -> Section {
        Section {
            spine_index,
            cache_path: self.root.join(spine_index.to_string()),
            page_count: 0,
            state: SectionState::Unchecked,
            current_page: 0,
        }
    }

    /// Check for a committed build and load its page count.
    ///
    /// Reads only the 2-byte header; page files are validated lazily by
    /// [`get_page`](Self::get_page).
    pub fn has_valid_cache(&self, section: &mut Section) -> bool {
        let header = section.header_path();
        if !self.storage.exists(&section.cache_path) || !self.storage.exists(&header) {
            return false;
        }
        match self.read_header(&header) {
            Ok(count) => {
                section.page_count = count;
                section.state = SectionState::Cached;
                true
            }
            Err(err) => {
                log::debug!(
                    "section {} header unreadable: {}",
                    section.spine_index,
                    err
                );
                false
            }
        }
    }

    fn read_header(&self, path: &Path) -> io::Result<usize> {
        let mut reader = self.storage.open_read(path)?;
        let mut bytes = [0u8; 2];
        reader.read_exact(&mut bytes)?;
        Ok(u16::from_le_bytes(bytes) as usize)
    }

    /// Paginate the section and persist every page, then commit the header.
    ///
    /// A section that already has a valid cache is left untouched. On any
    /// failure the section directory is removed, so no header is left behind.
    pub fn build_cache<C>(
        &self,
        section: &mut Section,
        container: &mut C,
        fonts: &FontFamily,
        geometry: PageGeometry,
    ) -> Result<usize, CacheError>
    where
        C: DocumentContainer + ?Sized,
    {
        if self.has_valid_cache(section) {
            return Ok(section.page_count);
        }
        let started = Instant::now();
        log::info!("Building cache for section {}", section.spine_index);

        let markup = match container.section_bytes(section.spine_index) {
            Ok(markup) => markup,
            Err(err) => {
                log::warn!("section {} unavailable: {}", section.spine_index, err);
                section.reset(SectionState::BuildFailed);
                return Err(err.into());
            }
        };

        match self.write_section(section, &markup, fonts, geometry) {
            Ok(count) => {
                section.page_count = count;
                section.state = SectionState::Cached;
                log::info!(
                    "Cached section {}: {} pages in {} ms",
                    section.spine_index,
                    count,
                    started.elapsed().as_millis()
                );
                Ok(count)
            }
            Err(err) => {
                log::warn!(
                    "Failed to build cache for section {}: {}",
                    section.spine_index,
                    err
                );
                if let Err(cleanup) = self.storage.remove_dir_all(&section.cache_path) {
                    log::warn!(
                        "section {} cleanup failed: {}",
                        section.spine_index,
                        cleanup
                    );
                }
                section.reset(SectionState::BuildFailed);
                Err(err)
            }
        }
    }

    fn write_section(
        &self,
        section: &Section,
        markup: &[u8],
        fonts: &FontFamily,
        geometry: PageGeometry,
    ) -> Result<usize, CacheError> {
        // Leftovers from an interrupted build must not mix with fresh pages.
        self.storage.remove_dir_all(&section.cache_path)?;
        self.storage.create_dir_all(&section.cache_path)?;

        let mut written = 0usize;
        for page in Paginator::new(markup, fonts, geometry, section.spine_index) {
            let page = page?;
            if written >= MAX_SECTION_PAGES {
                return Err(CacheError::PageCountOverflow {
                    limit: MAX_SECTION_PAGES,
                });
            }
            self.write_page(section, written, &page)?;
            written += 1;
        }
        self.write_header(section, written)?;
        Ok(written)
    }

    fn write_page(&self, section: &Section, index: usize, page: &Page) -> Result<(), CacheError> {
        let mut writer = self.storage.create(&section.page_path(index))?;
        page.serialize(&mut writer, self.options.max_page_record_bytes)?;
        self.storage.commit(writer)?;
        Ok(())
    }

    fn write_header(&self, section: &Section, count: usize) -> Result<(), CacheError> {
        let count = u16::try_from(count).map_err(|_| CacheError::PageCountOverflow {
            limit: MAX_SECTION_PAGES,
        })?;
        let tmp = section.header_tmp_path();
        let mut writer = self.storage.create(&tmp)?;
        let written = match writer.write_all(&count.to_le_bytes()) {
            Ok(()) => self.storage.commit(writer),
            Err(err) => Err(err),
        };
        if let Err(err) = written {
            let _ = self.storage.remove_file(&tmp);
            return Err(err.into());
        }
        if let Err(err) = self.storage.rename(&tmp, &section.header_path()) {
            let _ = self.storage.remove_file(&tmp);
            return Err(err.into());
        }
        self.storage.sync_dir(&section.cache_path);
        Ok(())
    }

    /// Load page `index` of a cached section.
    pub fn get_page(&self, section: &Section, index: isize) -> Result<Page, PageError> {
        if section.state != SectionState::Cached {
            return Err(PageError::NotCached);
        }
        if index < 0 || index as usize >= section.page_count {
            return Err(PageError::OutOfBounds {
                index,
                page_count: section.page_count,
            });
        }
        let index = index as usize;
        let inconsistent = |reason: String| PageError::Inconsistent {
            index,
            reason: reason.into_boxed_str(),
        };
        let mut reader = self
            .storage
            .open_read(&section.page_path(index))
            .map_err(|err| inconsistent(format!("open failed: {}", err)))?;
        let page = Page::deserialize(&mut reader, self.options.max_page_record_bytes)
            .map_err(|err| inconsistent(err.to_string()))?;
        if page.page_index != index || page.section_index != section.spine_index {
            return Err(inconsistent(format!(
                "record belongs to section {} page {}",
                page.section_index, page.page_index
            )));
        }
        Ok(page)
    }

    /// Remove the section's cache directory and forget its page count.
    pub fn clear_cache(&self, section: &mut Section) -> io::Result<()> {
        section.reset(SectionState::Unchecked);
        self.storage.remove_dir_all(&section.cache_path)?;
        log::info!("Cleared cache for section {}", section.spine_index);
        Ok(())
    }
}
