//! Result buffer between the fetch and export domains
//!
//! Every terminal fetch is turned into a record, a failure marker, or
//! nothing (when failures are skipped), then appended under a lock. When the
//! count reaches `capacity` the whole buffer is swapped out as one [`Batch`]
//! in the same critical section, so concurrent offers can neither duplicate
//! nor lose an item.

use std::sync::Mutex;

use crate::config::PageId;
use crate::outcome::{FailureClass, FetchOutcome, Fetched};
use crate::record::{Extractor, Record, RecordStatus};

/// Records handed to export as a unit. Owned by the export side once emitted.
#[derive(Debug)]
pub struct Batch {
    seq: u64,
    records: Vec<Record>,
}

impl Batch {
    pub fn new(seq: u64, records: Vec<Record>) -> Self {
        Self { seq, records }
    }

    /// Emission order, starting at 0
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }
}

/// What happened to one offered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Succeeded,
    /// Failed and dropped (skip policy)
    Skipped(FailureClass),
    /// Failed and kept as a marker record
    Failed(FailureClass),
}

#[derive(Debug)]
pub struct Offer {
    pub disposition: Disposition,
    /// Set when this offer filled the buffer
    pub batch: Option<Batch>,
}

struct BufferState {
    items: Vec<Record>,
    next_seq: u64,
}

impl BufferState {
    fn take(&mut self, capacity: usize) -> Batch {
        let records = std::mem::replace(&mut self.items, Vec::with_capacity(capacity));
        let seq = self.next_seq;
        self.next_seq += 1;
        Batch { seq, records }
    }
}

pub struct ResultBuffer<E> {
    extractor: E,
    capacity: usize,
    skip: bool,
    state: Mutex<BufferState>,
}

impl<E: Extractor> ResultBuffer<E> {
    pub fn new(extractor: E, capacity: usize, skip: bool) -> Self {
        let capacity = capacity.max(1);
        Self {
            extractor,
            capacity,
            skip,
            state: Mutex::new(BufferState {
                items: Vec::with_capacity(capacity),
                next_seq: 0,
            }),
        }
    }

    /// Classify `fetched` and buffer the resulting record, if any.
    ///
    /// Extraction runs before the lock is taken.
    pub fn offer(&self, fetched: Fetched) -> Offer {
        let (record, disposition) = self.classify(fetched);
        let batch = record.and_then(|record| self.push(record));
        Offer { disposition, batch }
    }

    /// Flush whatever is left, regardless of size.
    pub fn drain(&self) -> Option<Batch> {
        let mut state = self.state.lock().expect("result buffer poisoned");
        if state.items.is_empty() {
            return None;
        }
        Some(state.take(self.capacity))
    }

    /// Records buffered but not yet emitted
    pub fn pending(&self) -> usize {
        self.state.lock().expect("result buffer poisoned").items.len()
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    fn push(&self, record: Record) -> Option<Batch> {
        let mut state = self.state.lock().expect("result buffer poisoned");
        state.items.push(record);
        if state.items.len() >= self.capacity {
            let batch = state.take(self.capacity);
            log::debug!("buffer full: batch {} ({} records)", batch.seq, batch.len());
            return Some(batch);
        }
        None
    }

    fn classify(&self, fetched: Fetched) -> (Option<Record>, Disposition) {
        let page_id = fetched.page_id;
        let (class, status) = match &fetched.outcome {
            FetchOutcome::Success { body, .. } => {
                match self.extractor.extract(page_id, body) {
                    Ok(article) => {
                        return (Some(Record::article(page_id, article)), Disposition::Succeeded)
                    }
                    Err(failure) => {
                        log::warn!("page {page_id}: {failure}");
                        return self.failure(
                            page_id,
                            FailureClass::Extraction,
                            failure.status(),
                            failure.to_string(),
                        );
                    }
                }
            }
            FetchOutcome::ClientError { status: 404 } => {
                (FailureClass::Client, RecordStatus::NotFound)
            }
            FetchOutcome::ClientError { .. } => (FailureClass::Client, RecordStatus::FetchError),
            FetchOutcome::ServerError { .. } => (FailureClass::Server, RecordStatus::FetchError),
            FetchOutcome::TransportError { .. } => {
                (FailureClass::Transport, RecordStatus::FetchError)
            }
            FetchOutcome::Timeout => (FailureClass::Timeout, RecordStatus::FetchError),
        };
        let message = fetched.outcome.to_string();
        self.failure(page_id, class, status, message)
    }

    fn failure(
        &self,
        page_id: PageId,
        class: FailureClass,
        status: RecordStatus,
        message: String,
    ) -> (Option<Record>, Disposition) {
        if self.skip {
            (None, Disposition::Skipped(class))
        } else {
            (
                Some(Record::marker(page_id, status, message)),
                Disposition::Failed(class),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Article, ExtractionFailure};

    /// Uses the body as the title; an empty body has no article.
    struct BodyAsTitle;

    impl Extractor for BodyAsTitle {
        fn extract(&self, _page_id: PageId, body: &str) -> Result<Article, ExtractionFailure> {
            if body.is_empty() {
                return Err(ExtractionFailure::MissingContent);
            }
            Ok(Article {
                title: body.to_string(),
                ..Default::default()
            })
        }
    }

    fn success(page_id: PageId) -> Fetched {
        Fetched {
            page_id,
            outcome: FetchOutcome::Success {
                status: 200,
                body: format!("page {page_id}"),
            },
            attempts: 1,
        }
    }

    fn not_found(page_id: PageId) -> Fetched {
        Fetched {
            page_id,
            outcome: FetchOutcome::ClientError { status: 404 },
            attempts: 1,
        }
    }

    #[test]
    fn emits_batch_at_capacity() {
        let buffer = ResultBuffer::new(BodyAsTitle, 2, true);
        assert!(buffer.offer(success(1)).batch.is_none());
        let batch = buffer.offer(success(2)).batch.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.seq(), 0);
        assert_eq!(buffer.pending(), 0);
        assert!(buffer.drain().is_none());
    }

    #[test]
    fn skip_drops_failures() {
        let buffer = ResultBuffer::new(BodyAsTitle, 10, true);
        let offer = buffer.offer(not_found(5));
        assert_eq!(offer.disposition, Disposition::Skipped(FailureClass::Client));
        assert_eq!(buffer.pending(), 0);
    }

    #[test]
    fn keep_failed_writes_marker() {
        let buffer = ResultBuffer::new(BodyAsTitle, 10, false);
        let offer = buffer.offer(not_found(5));
        assert_eq!(offer.disposition, Disposition::Failed(FailureClass::Client));
        let batch = buffer.drain().unwrap();
        let records = batch.into_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].page_id(), 5);
        assert_eq!(records[0].status(), RecordStatus::NotFound);
        assert_eq!(records[0].error(), Some("HTTP 404"));
    }

    #[test]
    fn extraction_failure_follows_skip_policy() {
        let fetched = Fetched {
            page_id: 8,
            outcome: FetchOutcome::Success {
                status: 200,
                body: String::new(),
            },
            attempts: 1,
        };
        let skipping = ResultBuffer::new(BodyAsTitle, 10, true);
        assert_eq!(
            skipping.offer(fetched.clone()).disposition,
            Disposition::Skipped(FailureClass::Extraction)
        );

        let keeping = ResultBuffer::new(BodyAsTitle, 10, false);
        assert_eq!(
            keeping.offer(fetched).disposition,
            Disposition::Failed(FailureClass::Extraction)
        );
        let records = keeping.drain().unwrap().into_records();
        assert_eq!(records[0].status(), RecordStatus::NotFound);
    }

    #[test]
    fn server_error_marker_is_fetch_error() {
        let buffer = ResultBuffer::new(BodyAsTitle, 10, false);
        buffer.offer(Fetched {
            page_id: 1,
            outcome: FetchOutcome::ServerError { status: 503 },
            attempts: 4,
        });
        let records = buffer.drain().unwrap().into_records();
        assert_eq!(records[0].status(), RecordStatus::FetchError);
    }

    #[test]
    fn concurrent_offers_lose_nothing() {
        let buffer = ResultBuffer::new(BodyAsTitle, 7, true);
        let batches = std::sync::Mutex::new(Vec::new());

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let buffer = &buffer;
                let batches = &batches;
                s.spawn(move || {
                    for i in 0..125u64 {
                        if let Some(batch) = buffer.offer(success(t * 1000 + i)).batch {
                            batches.lock().unwrap().push(batch);
                        }
                    }
                });
            }
        });

        let mut batches = batches.into_inner().unwrap();
        batches.extend(buffer.drain());

        assert!(batches.iter().all(|b| b.len() <= 7 && !b.is_empty()));
        let mut seqs: Vec<u64> = batches.iter().map(Batch::seq).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (0..batches.len() as u64).collect::<Vec<_>>());

        let mut ids: Vec<PageId> = batches
            .into_iter()
            .flat_map(Batch::into_records)
            .map(|r| r.page_id())
            .collect();
        ids.sort_unstable();
        let mut expected: Vec<PageId> = (0..8u64)
            .flat_map(|t| (0..125).map(move |i| t * 1000 + i))
            .collect();
        expected.sort_unstable();
        assert_eq!(ids, expected);
    }
}
