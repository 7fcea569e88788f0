use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::{debug, warn};

pub const DEFAULT_ITEMS_PER_PAGE: u32 = 50;

/// 1-based page number of a remote listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageKey(u32);

impl PageKey {
    pub const FIRST: PageKey = PageKey(1);

    pub fn new(page: u32) -> Option<Self> {
        if page == 0 {
            None
        } else {
            Some(PageKey(page))
        }
    }

    pub fn get(self) -> u32 {
        self.0
    }

    pub fn is_first(self) -> bool {
        self == Self::FIRST
    }

    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(PageKey)
    }

    pub fn previous(self) -> Option<Self> {
        Self::new(self.0 - 1)
    }
}

impl Default for PageKey {
    fn default() -> Self {
        Self::FIRST
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingConfig {
    pub items_per_page: u32,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
        }
    }
}

impl PagingConfig {
    pub fn new(items_per_page: u32) -> Self {
        Self {
            items_per_page: items_per_page.max(1),
        }
    }

    /// `ceil(total / items_per_page)`. Zero items means zero pages.
    pub fn page_count(&self, total_item_count: u64) -> u64 {
        total_item_count.div_ceil(u64::from(self.items_per_page.max(1)))
    }
}

/// One fetched page together with its continuation keys.
///
/// Windows never store their own key; it is recoverable from the neighbour
/// keys through [`PageWindow::own_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageWindow<T> {
    items: Vec<T>,
    previous_key: Option<PageKey>,
    next_key: Option<PageKey>,
}

impl<T> PageWindow<T> {
    pub fn for_page(items: Vec<T>, page: PageKey, page_count: u64) -> Self {
        let previous_key = if page.is_first() {
            None
        } else {
            page.previous()
        };
        let next_key = if u64::from(page.get()) < page_count {
            page.next()
        } else {
            None
        };
        Self {
            items,
            previous_key,
            next_key,
        }
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    pub fn into_items(self) -> Vec<T> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn previous_key(&self) -> Option<PageKey> {
        self.previous_key
    }

    pub fn next_key(&self) -> Option<PageKey> {
        self.next_key
    }

    /// Key this window was fetched with, derived from its neighbours.
    /// Prefers `previous_key + 1`; `None` for a page that is both first and last.
    pub fn own_key(&self) -> Option<PageKey> {
        self.previous_key
            .and_then(PageKey::next)
            .or_else(|| self.next_key.and_then(PageKey::previous))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedPage<T> {
    pub key: PageKey,
    pub window: PageWindow<T>,
}

/// Pages loaded during one paging session, in display order.
#[derive(Debug, Clone)]
pub struct LoadedState<T> {
    pages: VecDeque<LoadedPage<T>>,
    leading_placeholders: usize,
}

impl<T> Default for LoadedState<T> {
    fn default() -> Self {
        Self {
            pages: VecDeque::new(),
            leading_placeholders: 0,
        }
    }
}

impl<T> LoadedState<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_leading_placeholders(mut self, count: usize) -> Self {
        self.leading_placeholders = count;
        self
    }

    pub fn leading_placeholders(&self) -> usize {
        self.leading_placeholders
    }

    pub fn pages(&self) -> impl Iterator<Item = &LoadedPage<T>> {
        self.pages.iter()
    }

    pub fn first(&self) -> Option<&LoadedPage<T>> {
        self.pages.front()
    }

    pub fn last(&self) -> Option<&LoadedPage<T>> {
        self.pages.back()
    }

    pub fn page(&self, key: PageKey) -> Option<&PageWindow<T>> {
        self.pages
            .iter()
            .find(|loaded| loaded.key == key)
            .map(|loaded| &loaded.window)
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    pub fn item_count(&self) -> usize {
        self.pages.iter().map(|loaded| loaded.window.len()).sum()
    }

    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.pages.iter().flat_map(|loaded| loaded.window.items())
    }

    pub fn append(&mut self, key: PageKey, window: PageWindow<T>) {
        if let Some(existing) = self.slot(key) {
            existing.window = window;
        } else {
            self.pages.push_back(LoadedPage { key, window });
        }
    }

    pub fn prepend(&mut self, key: PageKey, window: PageWindow<T>) {
        if let Some(existing) = self.slot(key) {
            existing.window = window;
        } else {
            self.pages.push_front(LoadedPage { key, window });
            self.leading_placeholders = self
                .leading_placeholders
                .saturating_sub(self.pages[0].window.len());
        }
    }

    pub fn clear(&mut self) {
        self.pages.clear();
        self.leading_placeholders = 0;
    }

    fn slot(&mut self, key: PageKey) -> Option<&mut LoadedPage<T>> {
        self.pages.iter_mut().find(|loaded| loaded.key == key)
    }

    /// Page whose item range contains `anchor`, or the nearest non-empty page
    /// when the anchor falls before or after everything loaded.
    pub fn closest_page_to_position(&self, anchor: usize) -> Option<&PageWindow<T>> {
        if self.pages.iter().all(|loaded| loaded.window.is_empty()) {
            return None;
        }

        let first_non_empty = || {
            self.pages
                .iter()
                .find(|loaded| !loaded.window.is_empty())
                .map(|loaded| &loaded.window)
        };
        let last_non_empty = || {
            self.pages
                .iter()
                .rev()
                .find(|loaded| !loaded.window.is_empty())
                .map(|loaded| &loaded.window)
        };

        if anchor < self.leading_placeholders {
            return first_non_empty();
        }

        let mut index = anchor - self.leading_placeholders;
        let last_index = self.pages.len() - 1;
        for (page_index, loaded) in self.pages.iter().enumerate() {
            let size = loaded.window.len();
            if index < size {
                return Some(&loaded.window);
            }
            if page_index == last_index {
                break;
            }
            index -= size;
        }
        last_non_empty()
    }
}

/// Key to resume from after the UI jumped to `anchor`.
pub fn refresh_key<T>(loaded: &LoadedState<T>, anchor: Option<usize>) -> Option<PageKey> {
    let anchor = anchor?;
    loaded.closest_page_to_position(anchor)?.own_key()
}

/// Result of a single remote fetch, before keys are derived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingPage<T> {
    pub items: Vec<T>,
    pub total_item_count: u64,
    pub side_channel_count: Option<u64>,
}

impl<T> ListingPage<T> {
    pub fn new(items: Vec<T>, total_item_count: u64) -> Self {
        Self {
            items,
            total_item_count,
            side_channel_count: None,
        }
    }

    pub fn with_side_channel_count(mut self, count: u64) -> Self {
        self.side_channel_count = Some(count);
        self
    }
}

pub trait ListingFetcher<T>: Send + Sync {
    fn fetch(&self, page: PageKey) -> impl Future<Output = anyhow::Result<ListingPage<T>>> + Send;
}

impl<T, F, Fut> ListingFetcher<T> for F
where
    F: Fn(PageKey) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<ListingPage<T>>> + Send,
{
    fn fetch(&self, page: PageKey) -> impl Future<Output = anyhow::Result<ListingPage<T>>> + Send {
        self(page)
    }
}

/// Receives the out-of-band count some listings report alongside a page.
pub trait CountSink: Send + Sync {
    fn update(&self, count: u64);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

impl CountSink for NoopSink {
    fn update(&self, _count: u64) {}
}

impl<S: CountSink + ?Sized> CountSink for Arc<S> {
    fn update(&self, count: u64) {
        (**self).update(count)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("failed to load page {page}")]
pub struct FetchError {
    pub page: PageKey,
    #[source]
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl FetchError {
    fn new(page: PageKey, err: anyhow::Error) -> Self {
        Self {
            page,
            source: err.into(),
        }
    }
}

pub struct PageSequencer<T, F, S = NoopSink> {
    name: String,
    fetcher: F,
    sink: S,
    config: PagingConfig,
    _item: PhantomData<fn() -> T>,
}

impl<T, F> PageSequencer<T, F, NoopSink>
where
    F: ListingFetcher<T>,
{
    pub fn new(name: impl Into<String>, fetcher: F, config: PagingConfig) -> Self {
        Self::with_sink(name, fetcher, config, NoopSink)
    }
}

impl<T, F, S> PageSequencer<T, F, S>
where
    F: ListingFetcher<T>,
    S: CountSink,
{
    pub fn with_sink(name: impl Into<String>, fetcher: F, config: PagingConfig, sink: S) -> Self {
        Self {
            name: name.into(),
            fetcher,
            sink,
            config,
            _item: PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> PagingConfig {
        self.config
    }

    pub async fn load(&self, key: Option<PageKey>) -> Result<PageWindow<T>, FetchError> {
        let page = key.unwrap_or(PageKey::FIRST);
        debug!(listing = %self.name, %page, "loading page");

        let fetched = match self.fetcher.fetch(page).await {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!(listing = %self.name, %page, error = ?err, "page fetch failed");
                return Err(FetchError::new(page, err));
            }
        };

        if let Some(count) = fetched.side_channel_count {
            self.sink.update(count);
        }

        let page_count = self.config.page_count(fetched.total_item_count);
        debug!(
            listing = %self.name,
            %page,
            page_count,
            items = fetched.items.len(),
            "page loaded"
        );
        Ok(PageWindow::for_page(fetched.items, page, page_count))
    }

    pub fn refresh_key(&self, loaded: &LoadedState<T>, anchor: Option<usize>) -> Option<PageKey> {
        refresh_key(loaded, anchor)
    }
}
