use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use camino::Utf8Path;
use serde::Serialize;

use crate::error::TarKvError;
use crate::fs_util;
use crate::ingest::{ItemFailure, PROGRESS_EVERY};
use crate::kv::KeyValueStore;
use crate::progress::{ProgressEvent, ProgressSink};

#[derive(Debug, Clone, Serialize)]
pub struct ExtractReport {
    pub requested: usize,
    pub extracted: usize,
    pub missing: Vec<String>,
    pub failed: Vec<ItemFailure>,
}

/// Materializes a list of keys from a read-only store into files under an
/// output directory, using a fixed pool of worker threads.
///
/// A key absent from the store is a normal `missing` outcome, not an error.
/// Per-key write failures are recorded and never abort the run; the store
/// is never mutated. The engine owns the store handle and releases it when
/// the run finishes, on every exit path.
pub struct ExtractEngine<S> {
    store: S,
    workers: usize,
}

impl<S: KeyValueStore> ExtractEngine<S> {
    pub fn new(store: S, workers: usize) -> Self {
        Self {
            store,
            workers: workers.max(1),
        }
    }

    pub fn run(
        self,
        keys: &[String],
        output_dir: &Utf8Path,
        sink: &dyn ProgressSink,
    ) -> Result<ExtractReport, TarKvError> {
        // Created once, before any worker starts, so workers only ever add
        // subdirectories beneath an existing root.
        fs::create_dir_all(output_dir.as_std_path())
            .map_err(|err| TarKvError::Filesystem(format!("create {output_dir}: {err}")))?;

        let requested = keys.len();
        if requested == 0 {
            return Ok(ExtractReport {
                requested: 0,
                extracted: 0,
                missing: Vec::new(),
                failed: Vec::new(),
            });
        }

        sink.event(ProgressEvent {
            message: format!("extracting {requested} keys into {output_dir}"),
        });

        let store = &self.store;
        let done = AtomicUsize::new(0);
        let chunk_size = requested.div_ceil(self.workers);

        let mut extracted = 0;
        let mut missing = Vec::new();
        let mut failed = Vec::new();
        thread::scope(|scope| {
            let handles: Vec<_> = keys
                .chunks(chunk_size)
                .map(|chunk| {
                    let done = &done;
                    scope.spawn(move || {
                        extract_chunk(chunk, output_dir, store, done, requested, sink)
                    })
                })
                .collect();
            for handle in handles {
                let (chunk_extracted, mut chunk_missing, mut chunk_failed) =
                    handle.join().expect("extract worker panicked");
                extracted += chunk_extracted;
                missing.append(&mut chunk_missing);
                failed.append(&mut chunk_failed);
            }
        });

        Ok(ExtractReport {
            requested,
            extracted,
            missing,
            failed,
        })
    }
}

fn extract_chunk<S: KeyValueStore>(
    keys: &[String],
    output_dir: &Utf8Path,
    store: &S,
    done: &AtomicUsize,
    total: usize,
    sink: &dyn ProgressSink,
) -> (usize, Vec<String>, Vec<ItemFailure>) {
    let mut extracted = 0;
    let mut missing = Vec::new();
    let mut failed = Vec::new();

    for key in keys {
        match extract_one(key, output_dir, store) {
            Ok(true) => extracted += 1,
            Ok(false) => missing.push(key.clone()),
            Err(err) => {
                let error = err.to_string();
                tracing::warn!("failed to extract {key}: {error}");
                failed.push(ItemFailure {
                    key: key.clone(),
                    error,
                });
            }
        }
        let processed = done.fetch_add(1, Ordering::Relaxed) + 1;
        if processed % PROGRESS_EVERY == 0 || processed == total {
            sink.event(ProgressEvent {
                message: format!("extracted {processed}/{total} keys"),
            });
        }
    }

    (extracted, missing, failed)
}

fn extract_one<S: KeyValueStore>(
    key: &str,
    output_dir: &Utf8Path,
    store: &S,
) -> Result<bool, TarKvError> {
    let Some(value) = store.get(key.as_bytes())? else {
        return Ok(false);
    };
    let target = fs_util::safe_join(output_dir, key)?;
    fs_util::write_bytes_atomic(&target, &value)?;
    Ok(true)
}
