use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use camino::Utf8Path;
use serde::Serialize;

use crate::archive::{self, MemberDescriptor};
use crate::error::TarKvError;
use crate::kv::KeyValueStore;
use crate::progress::{ProgressEvent, ProgressSink};

pub const PROGRESS_EVERY: usize = 1000;

#[derive(Debug, Clone, Serialize)]
pub struct ItemFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: Vec<ItemFailure>,
}

/// Streams every member of a tar archive into the store under its recorded
/// path, using a fixed pool of worker threads.
///
/// The engine owns the store handle; it is released when the run finishes,
/// on every exit path. Per-member failures are recorded in the report and
/// never abort the run; only a store that cannot be opened or an archive
/// that cannot be enumerated is fatal.
///
/// Completion order across workers is unspecified. If an archive carries
/// two members with the same path, the last `put` to complete wins, so the
/// surviving value is not deterministic.
pub struct IngestEngine<S> {
    store: S,
    workers: usize,
}

impl<S: KeyValueStore> IngestEngine<S> {
    pub fn new(store: S, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    pub fn run(
        self,
        archive_path: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<IngestReport, TarKvError> {
        let members = archive::list_members(archive_path)?;
        let total = members.len();
        if total == 0 {
            return Ok(IngestReport {
                total: 0,
                succeeded: 0,
                failed: Vec::new(),
            });
        }

        sink.event(ProgressEvent {
            message: format!("indexing {total} members from {archive_path}"),
        });

        let store = &self.store;
        let done = AtomicUsize::new(0);
        let chunk_size = total.div_ceil(self.workers);

        let mut succeeded = 0;
        let mut failed = Vec::new();
        thread::scope(|scope| {
            let handles: Vec<_> = members
                .chunks(chunk_size)
                .map(|chunk| {
                    let done = &done;
                    scope.spawn(move || ingest_chunk(archive_path, chunk, store, done, total, sink))
                })
                .collect();
            for handle in handles {
                let (chunk_succeeded, mut chunk_failed) =
                    handle.join().expect("ingest worker panicked");
                succeeded += chunk_succeeded;
                failed.append(&mut chunk_failed);
            }
        });

        Ok(IngestReport {
            total,
            succeeded,
            failed,
        })
    }
}

fn ingest_chunk<S: KeyValueStore>(
    archive_path: &Utf8Path,
    members: &[MemberDescriptor],
    store: &S,
    done: &AtomicUsize,
    total: usize,
    sink: &dyn ProgressSink,
) -> (usize, Vec<ItemFailure>) {
    let mut succeeded = 0;
    let mut failed = Vec::new();

    archive::read_members(archive_path, members, |member, content| {
        match content.and_then(|bytes| store.put(&member.path, &bytes)) {
            Ok(()) => succeeded += 1,
            Err(err) => {
                let error = err.to_string();
                tracing::warn!("failed to ingest {}: {error}", member.display_path());
                failed.push(ItemFailure {
                    key: member.display_path().into_owned(),
                    error,
                });
            }
        }
        let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % PROGRESS_EVERY == 0 || processed == total {
            sink.event(ProgressEvent {
                message: format!("ingested {processed}/{total} members"),
            });
        }
    });

    (succeeded, failed)
}
