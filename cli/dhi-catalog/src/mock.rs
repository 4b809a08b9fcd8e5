//! In-memory catalog source for tests.
//!
//! Only available in tests or with the `tests` feature enabled.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::error::FetchError;
use crate::fetcher::CatalogSource;
use crate::types::{CatalogItem, CatalogSnapshot};

/// A [`CatalogSource`] answering from queued results.
///
/// Queued results are returned in order; once the queue is drained every
/// fetch yields a fresh snapshot of the fallback items, or
/// [`FetchError::MissingData`] if there are none.
#[derive(Debug, Default)]
pub struct MockSource {
    queued: Mutex<VecDeque<Result<CatalogSnapshot, FetchError>>>,
    fallback: Option<Vec<CatalogItem>>,
    delay: Duration,
    fetches: AtomicUsize,
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// A source that returns the same items on every fetch.
    pub fn always(items: Vec<CatalogItem>) -> Self {
        Self {
            fallback: Some(items),
            ..Self::default()
        }
    }

    /// Delay every fetch, to keep it in flight while other tasks run.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push_snapshot(&self, snapshot: CatalogSnapshot) {
        self.queue().push_back(Ok(snapshot));
    }

    pub fn push_error(&self, err: FetchError) {
        self.queue().push_back(Err(err));
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<CatalogSnapshot, FetchError>>> {
        self.queued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl CatalogSource for MockSource {
    async fn fetch_all(&self) -> Result<CatalogSnapshot, FetchError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let next = self.queue().pop_front();
        match next {
            Some(result) => result,
            None => self
                .fallback
                .as_ref()
                .map(|items| CatalogSnapshot::new(items.clone()))
                .ok_or(FetchError::MissingData),
        }
    }
}
