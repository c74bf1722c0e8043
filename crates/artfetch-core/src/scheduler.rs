//! Bounded-concurrency traversal of the page range
//!
//! Ids are walked in chunks of `batch_size`; inside a chunk at most
//! `concurrency` fetches are in flight and a new one is admitted only when
//! one completes. Chunks are separated by one rate-limiter pause.
//!
//! Every admitted fetch runs as its own task, so a slow consumer delays
//! admission but never stalls requests already on the wire.

use std::sync::Arc;

use futures_util::future;
use futures_util::stream::{self, Stream, StreamExt};
use tokio::task::JoinError;

use crate::config::PageRange;
use crate::fetcher::{PageFetcher, PageSource};
use crate::outcome::Fetched;
use crate::shutdown::ShutdownFlag;

pub struct Scheduler<S> {
    fetcher: Arc<PageFetcher<S>>,
    concurrency: usize,
    batch_size: usize,
    shutdown: ShutdownFlag,
}

impl<S: PageSource + 'static> Scheduler<S> {
    pub fn new(
        fetcher: Arc<PageFetcher<S>>,
        concurrency: usize,
        batch_size: usize,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            fetcher,
            concurrency: concurrency.max(1),
            batch_size: batch_size.max(1),
            shutdown,
        }
    }

    /// Lazily fetch every id in `range` exactly once.
    ///
    /// Outcomes arrive in completion order. After a shutdown request no new
    /// id is admitted; fetches already in flight still yield their outcome.
    /// An `Err` means a fetch task panicked.
    pub fn run(&self, range: PageRange) -> impl Stream<Item = Result<Fetched, JoinError>> {
        let limiter = *self.fetcher.limiter();
        let fetcher = self.fetcher.clone();
        let concurrency = self.concurrency;
        let pause_flag = self.shutdown.clone();
        let admit_flag = self.shutdown.clone();
        let chunks = range.chunks(self.batch_size).enumerate();

        stream::iter(chunks)
            .then(move |(index, ids)| {
                let shutdown = pause_flag.clone();
                async move {
                    if index > 0 && !shutdown.is_requested() {
                        limiter.await_slot().await;
                    }
                    log::debug!("chunk {}: pages {}..={}", index + 1, ids.start(), ids.end());
                    ids
                }
            })
            .flat_map(move |ids| {
                let shutdown = admit_flag.clone();
                let fetcher = fetcher.clone();
                stream::iter(ids)
                    .take_while(move |_| future::ready(!shutdown.is_requested()))
                    .map(move |id| {
                        let fetcher = fetcher.clone();
                        tokio::spawn(async move { fetcher.fetch(id).await })
                    })
                    .buffer_unordered(concurrency)
            })
    }
}
