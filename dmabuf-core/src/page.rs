//! Page extractor (component B).
//!
//! Flattens a scatter/gather list into the flat page sequence the share
//! engine actually grants, plus the byte offset within the first page and
//! the valid byte count in the last page.

use alloc::vec::Vec;

use dmabuf_abi::limits::PAGE_SIZE;

/// One segment of a scatter/gather list: a physical page plus the byte
/// range within it that belongs to the buffer.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    pub page: u64,
    pub offset: usize,
    pub length: usize,
}

/// The flattened page layout for one buffer, as sent in an `EXPORT`
/// frame and reconstructed on the importer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLayout {
    pub pages: Vec<u64>,
    pub first_offset: u16,
    pub last_length: u16,
}

impl PageLayout {
    pub fn nents(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn byte_len(&self) -> usize {
        let full_pages = self.pages.len().saturating_sub(1);
        full_pages * PAGE_SIZE + self.last_length as usize
    }
}

/// Page-count metadata as carried in an `EXPORT` frame. The importer
/// never learns the exporter's raw page numbers (those stay host
/// internal, never cross the wire) — only how many data pages to expect
/// and where the buffer's bytes start/end within them. Once
/// [`crate::share::map_pages`] maps the real foreign pages, the importer
/// gets its own locally-meaningful [`crate::share::MapHandle`] per page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportLayout {
    pub nents: u32,
    pub first_offset: u16,
    pub last_length: u16,
}

impl ImportLayout {
    pub fn byte_len(&self) -> usize {
        let full_pages = (self.nents as usize).saturating_sub(1);
        full_pages * PAGE_SIZE + self.last_length as usize
    }
}

/// Flatten `segments` into a [`PageLayout`].
///
/// Segment lengths are rounded up to a whole number of pages (a segment
/// may span a page boundary; each page it touches becomes one entry).
/// Returns `None` for an empty segment list — there is no buffer to
/// describe.
pub fn flatten(segments: &[Segment]) -> Option<PageLayout> {
    let first = segments.first()?;
    let last = segments.last()?;

    let mut pages = Vec::new();
    for seg in segments {
        let end = seg.offset + seg.length;
        let num_pages = end.div_ceil(PAGE_SIZE).max(1);
        for i in 0..num_pages {
            pages.push(seg.page + i as u64);
        }
    }

    let first_offset = first.offset as u16;
    let last_length = {
        let rem = last.length % PAGE_SIZE;
        if rem == 0 { PAGE_SIZE as u16 } else { rem as u16 }
    };

    Some(PageLayout {
        pages,
        first_offset,
        last_length,
    })
}
