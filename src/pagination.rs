//! Offset cursors for resource listings.
//!
//! The cursor is the plain number of results already served. Inserts or
//! deletes between two page requests shift that offset, so a page can repeat
//! or skip items. Listings are best effort, not a completeness guarantee.

pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

impl PageRequest {
    /// Out-of-range or unparsable limits fall back to the default page size,
    /// unparsable cursors to the first page.
    pub fn parse(cursor: Option<&str>, limit: Option<&str>) -> Self {
        let limit = limit
            .and_then(|l| l.trim().parse::<usize>().ok())
            .filter(|l| (1..=MAX_PAGE_SIZE).contains(l))
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let offset = cursor
            .and_then(|c| c.trim().parse::<usize>().ok())
            .unwrap_or(0);
        Self { offset, limit }
    }

    /// One more than the page so the fetch itself tells whether more exist.
    pub fn fetch_limit(&self) -> usize {
        self.limit + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub next_cursor: Option<String>,
}

/// Cut a raw fetch of up to `fetch_limit()` items down to one page.
///
/// `keep` is the post-fetch filter. More results are announced only when the
/// raw fetch overflowed the page and the filter still left a full page;
/// announcing more after a short filtered page would hand out an empty next
/// page.
pub fn paginate<T>(request: &PageRequest, fetched: Vec<T>, keep: impl Fn(&T) -> bool) -> Page<T> {
    let raw_len = fetched.len();
    let items: Vec<T> = fetched
        .into_iter()
        .filter(|item| keep(item))
        .take(request.limit)
        .collect();

    let has_more = raw_len > request.limit && items.len() == request.limit;
    let next_cursor = has_more.then(|| (request.offset + request.limit).to_string());

    Page {
        items,
        has_more,
        next_cursor,
    }
}
