//! Streams one source file into the staging area.

use std::io::{BufRead, BufReader};
use std::sync::Arc;

use flate2::read::MultiGzDecoder;
use kart_storage::{IngestStore, StagingRow};
use tokio::sync::mpsc;
use tracing::{info, instrument};

use super::source::SourceLocation;
use super::{source_id_for, CancellationToken};
use crate::code::parse_line;
use crate::error::{DomainError, DomainResult};
use crate::partition::Partitioner;

/// Progress is logged every this many staged rows.
const PROGRESS_INTERVAL: u64 = 1_000_000;

/// Batches buffered between the reader thread and the writer.
const CHANNEL_DEPTH: usize = 2;

/// Result of loading one source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub source_id: String,
    pub rows_written: u64,
}

/// Loads source files into the staging area in batches.
pub struct StagingLoader<S> {
    store: Arc<S>,
    partitioner: Partitioner,
    batch_size: usize,
}

impl<S> Clone for StagingLoader<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            partitioner: self.partitioner,
            batch_size: self.batch_size,
        }
    }
}

impl<S: IngestStore> StagingLoader<S> {
    pub fn new(store: Arc<S>, partitioner: Partitioner, batch_size: usize) -> Self {
        Self {
            store,
            partitioner,
            batch_size: batch_size.max(1),
        }
    }

    /// Decompresses `file_name` and bulk-copies its well-formed codes.
    ///
    /// Decompression runs on a blocking thread; full batches are handed to
    /// this task over a bounded channel. Every batch received is written in
    /// full. Between batches the reader checks `cancel` and stops with
    /// [`DomainError::Cancelled`].
    #[instrument(skip(self, source, cancel))]
    pub async fn load(
        &self,
        source: &SourceLocation,
        file_name: &str,
        cancel: &CancellationToken,
    ) -> DomainResult<LoadReport> {
        let source_id = source_id_for(file_name).to_string();
        info!(source = %source.describe(file_name), "Loading source file");

        let (tx, mut rx) = mpsc::channel::<Vec<StagingRow>>(CHANNEL_DEPTH);
        let reader = {
            let source = source.clone();
            let file_name = file_name.to_string();
            let source_id = source_id.clone();
            let partitioner = self.partitioner;
            let batch_size = self.batch_size;
            let cancel = cancel.clone();
            tokio::task::spawn_blocking(move || {
                read_batches(
                    &source,
                    &file_name,
                    &source_id,
                    partitioner,
                    batch_size,
                    &cancel,
                    tx,
                )
            })
        };

        let mut rows_written: u64 = 0;
        while let Some(batch) = rx.recv().await {
            let written = self.store.copy_staging_rows(&batch).await?;
            metrics::counter!("kart_ingest_rows_total", "source" => source_id.clone())
                .increment(written);
            let before = rows_written;
            rows_written += written;
            if before / PROGRESS_INTERVAL != rows_written / PROGRESS_INTERVAL {
                info!(source_id = %source_id, rows = rows_written, "Staging progress");
            }
        }

        reader.await.map_err(|e| DomainError::TaskFailed {
            message: format!("reader for {file_name} failed: {e}"),
        })??;

        info!(source_id = %source_id, rows = rows_written, "Finished loading source file");
        Ok(LoadReport {
            source_id,
            rows_written,
        })
    }
}

/// Reads, filters and partitions lines, sending full batches to `tx`.
///
/// Returns early without error if the receiver is gone; the writer's own
/// error is reported instead.
fn read_batches(
    source: &SourceLocation,
    file_name: &str,
    source_id: &str,
    partitioner: Partitioner,
    batch_size: usize,
    cancel: &CancellationToken,
    tx: mpsc::Sender<Vec<StagingRow>>,
) -> DomainResult<()> {
    let raw = source.open(file_name)?;
    let mut reader = BufReader::new(MultiGzDecoder::new(raw));
    let mut line = Vec::with_capacity(32);
    let mut batch = Vec::with_capacity(batch_size);

    let decompress_error = |e: std::io::Error| DomainError::Decompress {
        source_name: source.describe(file_name),
        message: e.to_string(),
    };

    loop {
        line.clear();
        let read = reader.read_until(b'\n', &mut line).map_err(decompress_error)?;
        if read == 0 {
            break;
        }
        let Some(code) = parse_line(&line) else {
            continue;
        };
        batch.push(StagingRow::new(
            code,
            source_id,
            partitioner.partition_of(code),
        ));

        if batch.len() >= batch_size {
            if cancel.is_cancelled() {
                return Err(DomainError::Cancelled);
            }
            let full = std::mem::replace(&mut batch, Vec::with_capacity(batch_size));
            if tx.blocking_send(full).is_err() {
                return Ok(());
            }
        }
    }

    if !batch.is_empty() {
        if cancel.is_cancelled() {
            return Err(DomainError::Cancelled);
        }
        // Receiver gone means the writer failed and reports it.
        let _ = tx.blocking_send(batch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use kart_storage::MemoryCouponStore;
    use std::io::Write;
    use std::path::Path;

    fn write_gz(dir: &Path, name: &str, contents: &[u8]) {
        let file = std::fs::File::create(dir.join(name)).unwrap();
        let mut encoder = GzEncoder::new(file, Compression::fast());
        encoder.write_all(contents).unwrap();
        encoder.finish().unwrap();
    }

    async fn staged_store() -> Arc<MemoryCouponStore> {
        let store = MemoryCouponStore::new_shared();
        store.create_staging().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_load_filters_malformed_lines() {
        let dir = tempfile::tempdir().unwrap();
        write_gz(
            dir.path(),
            "couponbase1.gz",
            b"SAVE1000\nSHORT\n  DISCOUNT50  \r\nWAYTOOLONGCODE\n\nABCDEFGHI",
        );
        let store = staged_store().await;
        let loader = StagingLoader::new(store.clone(), Partitioner::default(), 2);

        let report = loader
            .load(
                &SourceLocation::local(dir.path()),
                "couponbase1.gz",
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(report.source_id, "couponbase1");
        assert_eq!(report.rows_written, 3);
        assert_eq!(store.staged_row_count(), 3);
    }

    #[tokio::test]
    async fn test_load_accepts_multi_member_gzip() {
        let dir = tempfile::tempdir().unwrap();
        let mut bytes = Vec::new();
        for part in [&b"SAVE1000\n"[..], &b"DISCOUNT50\n"[..]] {
            let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
            encoder.write_all(part).unwrap();
            bytes.extend(encoder.finish().unwrap());
        }
        std::fs::write(dir.path().join("multi.gz"), bytes).unwrap();

        let store = staged_store().await;
        let loader = StagingLoader::new(store.clone(), Partitioner::default(), 100);
        let report = loader
            .load(
                &SourceLocation::local(dir.path()),
                "multi.gz",
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(report.rows_written, 2);
    }

    #[tokio::test]
    async fn test_load_rejects_corrupt_gzip() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.gz"), b"definitely not gzip").unwrap();
        let store = staged_store().await;
        let loader = StagingLoader::new(store, Partitioner::default(), 100);

        let result = loader
            .load(
                &SourceLocation::local(dir.path()),
                "bad.gz",
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DomainError::Decompress { .. })));
    }

    #[tokio::test]
    async fn test_load_stops_when_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let contents: String = (0..100).map(|i| format!("CODE{i:04}\n")).collect();
        write_gz(dir.path(), "couponbase2.gz", contents.as_bytes());
        let store = staged_store().await;
        let loader = StagingLoader::new(store.clone(), Partitioner::default(), 10);

        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = loader
            .load(&SourceLocation::local(dir.path()), "couponbase2.gz", &cancel)
            .await;
        assert!(matches!(result, Err(DomainError::Cancelled)));
        assert_eq!(store.staged_row_count(), 0);
    }

    #[tokio::test]
    async fn test_load_surfaces_store_failure() {
        let dir = tempfile::tempdir().unwrap();
        write_gz(dir.path(), "couponbase3.gz", b"SAVE1000\n");
        // No staging area created.
        let store = MemoryCouponStore::new_shared();
        let loader = StagingLoader::new(store, Partitioner::default(), 100);

        let result = loader
            .load(
                &SourceLocation::local(dir.path()),
                "couponbase3.gz",
                &CancellationToken::new(),
            )
            .await;
        assert!(matches!(result, Err(DomainError::Storage(_))));
    }
}
