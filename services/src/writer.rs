use std::ops::Range;

use lb_writer_core::Listen;
use tracing::{
    debug,
    error,
    warn,
};

use crate::{
    retry::BatchRetryPolicy,
    store::{
        ListenRow,
        ListenStore,
        StoreError,
    },
};


/// Writes batches of listens to a [`ListenStore`].
///
/// Each batch goes out as one bulk insert. If that keeps failing with an
/// operational error the batch is split in half and each half is written the
/// same way, until the offending listens are isolated and dropped. Healthy
/// ranges still go out in a single statement.
pub struct BatchWriter<S> {
    store: S,
    retry: BatchRetryPolicy,
}

impl<S: ListenStore> BatchWriter<S> {
    pub fn new(store: S, retry: BatchRetryPolicy) -> Self { Self { store, retry } }

    pub fn store(&self) -> &S { &self.store }

    /// Sanitizes and writes `listens`, returning how many were handled.
    ///
    /// Duplicates of stored listens count as handled. Never fails: dropped
    /// listens are logged and simply not counted, and a structural store error
    /// drops the whole batch.
    pub async fn write(&mut self, listens: Vec<Listen>) -> usize {
        if listens.is_empty() {
            return 0;
        }

        let rows: Vec<ListenRow> = listens.into_iter().map(Listen::sanitized).map(|l| ListenRow::from(&l)).collect();
        match self.insert_bisecting(&rows).await {
            Ok(sent) => sent,
            Err(e) => {
                error!(error = %e, batch_size = rows.len(), "Cannot write batch to timescale; dropping it");
                0
            },
        }
    }

    async fn insert_bisecting(&mut self, rows: &[ListenRow]) -> Result<usize, StoreError> {
        let mut sent = 0;
        // Stack of ranges still to write; the left half is pushed last so it is written first
        let mut pending: Vec<Range<usize>> = vec![0..rows.len()];
        while let Some(range) = pending.pop() {
            let chunk = &rows[range.clone()];
            match self.insert_with_retry(chunk).await {
                Ok(inserted) => {
                    debug!(submitted = chunk.len(), inserted, "Wrote listens");
                    sent += chunk.len();
                },
                Err(e @ StoreError::Structural(_)) => return Err(e),
                Err(_) if chunk.len() == 1 => sent += self.insert_isolated(&chunk[0]).await?,
                Err(e) => {
                    let mid = range.start + chunk.len() / 2;
                    warn!(error = %e, start = range.start, end = range.end, "Bulk insert kept failing; splitting batch");
                    pending.push(mid..range.end);
                    pending.push(range.start..mid);
                },
            }
        }
        Ok(sent)
    }

    async fn insert_with_retry(&mut self, rows: &[ListenRow]) -> Result<u64, StoreError> {
        let mut attempt = 1;
        loop {
            match self.store.insert(rows).await {
                Ok(inserted) => return Ok(inserted),
                Err(e) if e.is_operational() && self.retry.should_retry(attempt) => {
                    debug!(error = %e, attempt, "Insert failed; retrying");
                    attempt += 1;
                    self.retry.backoff().await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Last chance for a single listen that exhausted its retries
    async fn insert_isolated(&mut self, row: &ListenRow) -> Result<usize, StoreError> {
        match self.store.insert(std::slice::from_ref(row)).await {
            Ok(_) => Ok(1),
            Err(e @ StoreError::Structural(_)) => Err(e),
            Err(e) => {
                let listen = serde_json::to_string_pretty(row).unwrap_or_else(|_| format!("{row:?}"));
                error!(error = %e, key = %row.key(), %listen, "Unable to insert bad listen to listenstore");
                Ok(0)
            },
        }
    }
}
