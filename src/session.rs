use tracing::debug;

use crate::paging::{
    CountSink, FetchError, ListingFetcher, LoadedState, NoopSink, PageKey, PageSequencer,
};

/// Drives one [`PageSequencer`] and owns the pages it produced.
///
/// State only changes once a load has resolved, so dropping an in-flight
/// future (the UI scrolled away) leaves everything as it was.
pub struct PagingSession<T, F, S = NoopSink> {
    sequencer: PageSequencer<T, F, S>,
    loaded: LoadedState<T>,
}

impl<T, F, S> PagingSession<T, F, S>
where
    F: ListingFetcher<T>,
    S: CountSink,
{
    pub fn new(sequencer: PageSequencer<T, F, S>) -> Self {
        Self {
            sequencer,
            loaded: LoadedState::new(),
        }
    }

    pub fn state(&self) -> &LoadedState<T> {
        &self.loaded
    }

    pub fn sequencer(&self) -> &PageSequencer<T, F, S> {
        &self.sequencer
    }

    pub fn invalidate(&mut self) {
        debug!(listing = self.sequencer.name(), "invalidating session");
        self.loaded.clear();
    }

    /// Loads `key` (first page when absent) as the only page of the session.
    pub async fn start(&mut self, key: Option<PageKey>) -> Result<PageKey, FetchError> {
        let key = key.unwrap_or(PageKey::FIRST);
        let window = self.sequencer.load(Some(key)).await?;
        self.loaded.clear();
        self.loaded.append(key, window);
        Ok(key)
    }

    /// Reloads around `anchor` and replaces everything loaded so far.
    pub async fn refresh(&mut self, anchor: Option<usize>) -> Result<PageKey, FetchError> {
        let key = self.sequencer.refresh_key(&self.loaded, anchor);
        self.start(key).await
    }

    /// Loads the page after the last one. `Ok(None)` at the end of the listing.
    pub async fn load_next(&mut self) -> Result<Option<PageKey>, FetchError> {
        let key = match self.loaded.last() {
            Some(last) => match last.window.next_key() {
                Some(key) => key,
                None => return Ok(None),
            },
            None => PageKey::FIRST,
        };
        let window = self.sequencer.load(Some(key)).await?;
        self.loaded.append(key, window);
        Ok(Some(key))
    }

    /// Loads the page before the first one. `Ok(None)` at the start.
    pub async fn load_previous(&mut self) -> Result<Option<PageKey>, FetchError> {
        let Some(key) = self
            .loaded
            .first()
            .and_then(|first| first.window.previous_key())
        else {
            return Ok(None);
        };
        let window = self.sequencer.load(Some(key)).await?;
        self.loaded.prepend(key, window);
        Ok(Some(key))
    }
}
