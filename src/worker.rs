//! Batch dispatcher.
//!
//! Upload requests enqueue `(tenant, record ids)` batches on a channel; a
//! fixed pool of worker threads drains it. Records within one batch are
//! processed sequentially; a record failure is soft and never aborts its
//! siblings. The queue is in-memory only: no delivery guarantees across
//! restarts.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{Receiver, Sender};

use crate::remote::RemoteTranscriber;
use crate::store::{AudioStore, TenantKey};

/// One enqueued unit of background work.
#[derive(Debug, Clone)]
pub struct Batch {
    pub tenant: TenantKey,
    pub record_ids: Vec<i64>,
}

pub struct Dispatcher {
    sender: Sender<Batch>,
    workers: Vec<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawn `concurrency` worker threads draining the batch queue.
    pub fn spawn(
        store: Arc<AudioStore>,
        remote: Arc<RemoteTranscriber>,
        work_dir: PathBuf,
        concurrency: usize,
    ) -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded::<Batch>();
        let mut workers = Vec::with_capacity(concurrency);
        for worker_id in 0..concurrency.max(1) {
            let receiver: Receiver<Batch> = receiver.clone();
            let store = store.clone();
            let remote = remote.clone();
            let work_dir = work_dir.clone();
            workers.push(std::thread::spawn(move || {
                tracing::debug!("Worker {} started", worker_id);
                while let Ok(batch) = receiver.recv() {
                    process_batch(&store, &remote, &work_dir, &batch);
                }
                tracing::debug!("Worker {} stopped", worker_id);
            }));
        }
        Self { sender, workers }
    }

    pub fn sender(&self) -> Sender<Batch> {
        self.sender.clone()
    }

    /// Close the queue and wait for workers to drain it.
    pub fn shutdown(self) {
        drop(self.sender);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

/// Process every record id in a batch sequentially.
pub fn process_batch(
    store: &AudioStore,
    remote: &RemoteTranscriber,
    work_dir: &std::path::Path,
    batch: &Batch,
) {
    tracing::info!(
        "Processing batch of {} record(s) for tenant {}",
        batch.record_ids.len(),
        batch.tenant
    );
    for &record_id in &batch.record_ids {
        if let Err(e) = process_record(store, remote, work_dir, &batch.tenant, record_id) {
            tracing::error!("[{}] Processing error: {:#}", record_id, e);
        }
    }
}

/// Drive one record through the remote service and write the analysis back.
/// A submission or polling failure leaves the record's analysis fields null.
fn process_record(
    store: &AudioStore,
    remote: &RemoteTranscriber,
    work_dir: &std::path::Path,
    tenant: &TenantKey,
    record_id: i64,
) -> anyhow::Result<()> {
    let Some((name, content)) = store.get_audio(tenant, record_id)? else {
        tracing::warn!("[{}] Record not found in tenant store", record_id);
        return Ok(());
    };

    std::fs::create_dir_all(work_dir)?;
    let temp_path = work_dir.join(format!("temp_{}_{}", record_id, sanitize(&name)));
    std::fs::write(&temp_path, &content)?;

    let outcome = (|| {
        let job_id = remote.submit(&temp_path)?;
        remote.poll(&job_id)
    })();

    // The temp file must go even when the write-back fails.
    let write_back = match outcome {
        Some(result) => {
            let written = store.update_analysis(tenant, record_id, &result);
            if written.is_ok() {
                tracing::info!("[{}] Analysis stored", record_id);
            }
            written.map_err(anyhow::Error::from)
        }
        None => {
            tracing::warn!("[{}] No result from transcription service", record_id);
            Ok(())
        }
    };

    if let Err(e) = std::fs::remove_file(&temp_path) {
        tracing::warn!("[{}] Failed to remove temp file: {}", record_id, e);
    }
    write_back
}

/// Flatten path separators out of stored names before using them in a
/// temp filename.
fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}
