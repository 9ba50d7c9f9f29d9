//! Background file transfers using reqwest and tokio tasks

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    transfer::{
        FileTransferEngine, TransferId, TransferRecord, TransferRequest, TransferStatus,
        TransferUpdate,
    },
};
use futures_util::StreamExt;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const UPDATE_CHANNEL_CAPACITY: usize = 512;
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(250);
const DEFAULT_PARALLEL_TRANSFERS: usize = 2;

struct JobEntry {
    record: TransferRecord,
    cancel: CancellationToken,
}

/// Desktop download engine.
///
/// Each job streams into `<destination>.part` and is renamed on success.
/// At most `parallelism` jobs transfer at once; the rest wait as `Enqueued`.
#[derive(Clone)]
pub struct ReqwestTransferEngine {
    client: Client,
    jobs: Arc<Mutex<HashMap<TransferId, JobEntry>>>,
    updates: broadcast::Sender<TransferUpdate>,
    slots: Arc<Semaphore>,
}

enum Outcome {
    Complete,
    Canceled,
    Failed(String),
}

impl ReqwestTransferEngine {
    pub fn try_new() -> Result<Self> {
        Self::with_parallelism(DEFAULT_PARALLEL_TRANSFERS)
    }

    pub fn with_parallelism(parallelism: usize) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| BridgeError::NotAvailable(format!("HTTP client: {}", e)))?;
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);

        Ok(Self {
            client,
            jobs: Arc::new(Mutex::new(HashMap::new())),
            updates,
            slots: Arc::new(Semaphore::new(parallelism.max(1))),
        })
    }

    fn part_path(destination: &Path) -> PathBuf {
        let mut name = destination
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".part");
        destination.with_file_name(name)
    }

    /// Update the stored record and publish the change.
    fn publish(
        &self,
        id: &TransferId,
        status: TransferStatus,
        bytes_done: u64,
        bytes_total: Option<u64>,
        error: Option<String>,
    ) {
        let update = {
            let mut jobs = self.jobs.lock();
            let Some(entry) = jobs.get_mut(id) else {
                return;
            };
            entry.record.status = status;
            entry.record.bytes_done = bytes_done;
            if bytes_total.is_some() {
                entry.record.bytes_total = bytes_total;
            }
            TransferUpdate {
                id: id.clone(),
                group: entry.record.group.clone(),
                status,
                bytes_done,
                bytes_total: entry.record.bytes_total,
                error,
            }
        };
        self.updates.send(update).ok();
    }

    async fn run_job(&self, id: TransferId, request: TransferRequest, cancel: CancellationToken) {
        let permit = tokio::select! {
            _ = cancel.cancelled() => None,
            permit = self.slots.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            self.publish(&id, TransferStatus::Canceled, 0, None, None);
            return;
        };

        self.publish(&id, TransferStatus::Running, 0, request.expected_bytes, None);

        let part = Self::part_path(&request.destination);
        let outcome = self.transfer(&id, &request, &part, &cancel).await;

        let bytes_done = self
            .jobs
            .lock()
            .get(&id)
            .map(|e| e.record.bytes_done)
            .unwrap_or(0);

        match outcome {
            Outcome::Complete => {
                info!(transfer_id = %id, group = %request.group, bytes = bytes_done, "Transfer complete");
                self.publish(&id, TransferStatus::Complete, bytes_done, Some(bytes_done), None);
            }
            Outcome::Canceled => {
                tokio::fs::remove_file(&part).await.ok();
                debug!(transfer_id = %id, "Transfer canceled");
                self.publish(&id, TransferStatus::Canceled, bytes_done, None, None);
            }
            Outcome::Failed(message) => {
                tokio::fs::remove_file(&part).await.ok();
                warn!(transfer_id = %id, group = %request.group, error = %message, "Transfer failed");
                self.publish(&id, TransferStatus::Failed, bytes_done, None, Some(message));
            }
        }
    }

    async fn transfer(
        &self,
        id: &TransferId,
        request: &TransferRequest,
        part: &Path,
        cancel: &CancellationToken,
    ) -> Outcome {
        let mut builder = self.client.get(&request.url);
        for (key, value) in &request.headers {
            builder = builder.header(key, value);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Outcome::Canceled,
            response = builder.send() => match response {
                Ok(response) => response,
                Err(e) => return Outcome::Failed(e.to_string()),
            },
        };
        if !response.status().is_success() {
            return Outcome::Failed(format!("HTTP {}", response.status().as_u16()));
        }

        let total = response.content_length().or(request.expected_bytes);
        if let Some(parent) = part.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Outcome::Failed(e.to_string());
            }
        }
        let mut file = match tokio::fs::File::create(part).await {
            Ok(file) => file,
            Err(e) => return Outcome::Failed(e.to_string()),
        };

        let mut stream = response.bytes_stream();
        let mut done: u64 = 0;
        let mut last_emit = Instant::now();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Outcome::Canceled,
                chunk = stream.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => {
                    if let Err(e) = file.write_all(&bytes).await {
                        return Outcome::Failed(e.to_string());
                    }
                    done += bytes.len() as u64;
                    if last_emit.elapsed() >= PROGRESS_EMIT_INTERVAL {
                        self.publish(id, TransferStatus::Running, done, total, None);
                        last_emit = Instant::now();
                    }
                }
                Some(Err(e)) => return Outcome::Failed(e.to_string()),
                None => break,
            }
        }

        if let Err(e) = file.flush().await {
            return Outcome::Failed(e.to_string());
        }
        drop(file);
        if let Err(e) = tokio::fs::rename(part, &request.destination).await {
            return Outcome::Failed(e.to_string());
        }

        if let Some(entry) = self.jobs.lock().get_mut(id) {
            entry.record.bytes_done = done;
        }
        Outcome::Complete
    }
}

#[async_trait]
impl FileTransferEngine for ReqwestTransferEngine {
    async fn enqueue(&self, request: TransferRequest) -> Result<TransferId> {
        let id = TransferId(Uuid::new_v4().to_string());
        let cancel = CancellationToken::new();

        let record = TransferRecord {
            id: id.clone(),
            group: request.group.clone(),
            status: TransferStatus::Enqueued,
            bytes_done: 0,
            bytes_total: request.expected_bytes,
            destination: request.destination.clone(),
        };
        self.jobs.lock().insert(
            id.clone(),
            JobEntry {
                record,
                cancel: cancel.clone(),
            },
        );
        self.publish(&id, TransferStatus::Enqueued, 0, request.expected_bytes, None);

        let engine = self.clone();
        let job_id = id.clone();
        tokio::spawn(async move {
            engine.run_job(job_id, request, cancel).await;
        });

        Ok(id)
    }

    async fn cancel(&self, id: &TransferId) -> Result<()> {
        match self.jobs.lock().get(id) {
            Some(entry) => {
                entry.cancel.cancel();
                Ok(())
            }
            None => Err(BridgeError::OperationFailed(format!(
                "Unknown transfer {}",
                id
            ))),
        }
    }

    async fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        let mut records: Vec<_> = self
            .jobs
            .lock()
            .values()
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.updates.subscribe()
    }
}
