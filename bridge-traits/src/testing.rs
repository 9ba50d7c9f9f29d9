//! In-memory bridge doubles for tests.
//!
//! Enabled with the `test-support` feature. Each double records what the
//! core asked of it and lets the test drive the host side (transfer
//! progress, engine state, connectivity).

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{broadcast, watch};

use crate::error::{BridgeError, Result};
use crate::network::{NetworkInfo, NetworkMonitor, NetworkStatus, NetworkType};
use crate::playback::{AudioEngine, EngineState, EngineTrack, MediaItemInfo, ProcessingState};
use crate::storage::{FileSystemAccess, SecureStore, SettingsStore};
use crate::transfer::{
    FileTransferEngine, TransferId, TransferRecord, TransferRequest, TransferStatus,
    TransferUpdate,
};

// ============================================================================
// Settings
// ============================================================================

/// Key/value store backed by a map. Values are kept as strings.
#[derive(Default)]
pub struct MemorySettingsStore {
    values: Mutex<HashMap<String, String>>,
}

impl MemorySettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.lock().contains_key(key)
    }
}

#[async_trait]
impl SettingsStore for MemorySettingsStore {
    async fn set_string(&self, key: &str, value: &str) -> Result<()> {
        self.values.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get_string(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.lock().get(key).cloned())
    }

    async fn set_bool(&self, key: &str, value: bool) -> Result<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_bool(&self, key: &str) -> Result<Option<bool>> {
        Ok(self.values.lock().get(key).and_then(|v| v.parse().ok()))
    }

    async fn set_f64(&self, key: &str, value: f64) -> Result<()> {
        self.set_string(key, &value.to_string()).await
    }

    async fn get_f64(&self, key: &str) -> Result<Option<f64>> {
        Ok(self.values.lock().get(key).and_then(|v| v.parse().ok()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.values.lock().remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .values
            .lock()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Secret store backed by a map.
#[derive(Default)]
pub struct MemorySecureStore {
    secrets: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemorySecureStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.secrets.lock().is_empty()
    }
}

#[async_trait]
impl SecureStore for MemorySecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        self.secrets.lock().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.secrets.lock().get(key).cloned())
    }

    async fn delete_secret(&self, key: &str) -> Result<()> {
        self.secrets.lock().remove(key);
        Ok(())
    }
}

// ============================================================================
// File system
// ============================================================================

/// File system that only tracks which paths exist.
#[derive(Default)]
pub struct MemoryFileSystem {
    state: Mutex<FsState>,
}

#[derive(Default)]
struct FsState {
    paths: HashSet<PathBuf>,
    deleted: Vec<PathBuf>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend a file exists (e.g. written by a transfer).
    pub fn touch(&self, path: impl Into<PathBuf>) {
        self.state.lock().paths.insert(path.into());
    }

    pub fn exists_now(&self, path: &Path) -> bool {
        self.state.lock().paths.contains(path)
    }

    /// Every path passed to a delete call, in order.
    pub fn deleted(&self) -> Vec<PathBuf> {
        self.state.lock().deleted.clone()
    }
}

#[async_trait]
impl FileSystemAccess for MemoryFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        Ok(self.exists_now(path))
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        self.touch(path);
        Ok(())
    }

    async fn delete_dir_all(&self, path: &Path) -> Result<()> {
        let mut state = self.state.lock();
        state.paths.retain(|p| !p.starts_with(path));
        state.deleted.push(path.to_path_buf());
        Ok(())
    }
}

// ============================================================================
// Network
// ============================================================================

/// Connectivity the test sets explicitly.
pub struct StaticNetworkMonitor {
    info: Mutex<NetworkInfo>,
}

impl StaticNetworkMonitor {
    pub fn wifi() -> Self {
        Self {
            info: Mutex::new(NetworkInfo {
                status: NetworkStatus::Connected,
                network_type: Some(NetworkType::WiFi),
                is_metered: false,
            }),
        }
    }

    pub fn cellular() -> Self {
        Self {
            info: Mutex::new(NetworkInfo {
                status: NetworkStatus::Connected,
                network_type: Some(NetworkType::Cellular),
                is_metered: true,
            }),
        }
    }

    pub fn set(&self, info: NetworkInfo) {
        *self.info.lock() = info;
    }
}

#[async_trait]
impl NetworkMonitor for StaticNetworkMonitor {
    async fn get_network_info(&self) -> Result<NetworkInfo> {
        Ok(self.info.lock().clone())
    }
}

// ============================================================================
// Transfers
// ============================================================================

#[derive(Clone)]
struct FakeJob {
    request: TransferRequest,
    status: TransferStatus,
    bytes_done: u64,
}

/// Transfer engine that never touches the network. Tests move jobs along
/// with [`progress`](Self::progress), [`complete`](Self::complete) and
/// [`fail`](Self::fail).
pub struct FakeTransferEngine {
    jobs: Mutex<Vec<(TransferId, FakeJob)>>,
    cancelled: Mutex<Vec<TransferId>>,
    fail_enqueue_after: Mutex<Option<usize>>,
    updates: broadcast::Sender<TransferUpdate>,
}

impl Default for FakeTransferEngine {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            jobs: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
            fail_enqueue_after: Mutex::new(None),
            updates,
        }
    }
}

impl FakeTransferEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every enqueue after the first `accepted` ones.
    pub fn fail_enqueue_after(&self, accepted: Option<usize>) {
        *self.fail_enqueue_after.lock() = accepted;
    }

    /// Seed a job as if it survived a restart.
    pub fn seed(&self, group: &str, status: TransferStatus, destination: impl Into<PathBuf>) -> TransferId {
        let mut jobs = self.jobs.lock();
        let id = TransferId(format!("job_{}", jobs.len() + 1));
        jobs.push((
            id.clone(),
            FakeJob {
                request: TransferRequest {
                    url: String::new(),
                    headers: HashMap::new(),
                    destination: destination.into(),
                    group: group.to_string(),
                    expected_bytes: None,
                    display_name: None,
                },
                status,
                bytes_done: 0,
            },
        ));
        id
    }

    pub fn requests(&self) -> Vec<(TransferId, TransferRequest)> {
        self.jobs
            .lock()
            .iter()
            .map(|(id, job)| (id.clone(), job.request.clone()))
            .collect()
    }

    pub fn ids_for_group(&self, group: &str) -> Vec<TransferId> {
        self.jobs
            .lock()
            .iter()
            .filter(|(_, job)| job.request.group == group)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn status(&self, id: &TransferId) -> Option<TransferStatus> {
        self.jobs
            .lock()
            .iter()
            .find(|(job_id, _)| job_id == id)
            .map(|(_, job)| job.status)
    }

    pub fn cancelled(&self) -> Vec<TransferId> {
        self.cancelled.lock().clone()
    }

    pub fn progress(&self, id: &TransferId, bytes_done: u64, bytes_total: u64) {
        self.transition(id, TransferStatus::Running, Some(bytes_done), Some(bytes_total), None);
    }

    pub fn complete(&self, id: &TransferId) {
        self.transition(id, TransferStatus::Complete, None, None, None);
    }

    pub fn fail(&self, id: &TransferId, message: &str) {
        self.transition(id, TransferStatus::Failed, None, None, Some(message.to_string()));
    }

    fn transition(
        &self,
        id: &TransferId,
        status: TransferStatus,
        bytes_done: Option<u64>,
        bytes_total: Option<u64>,
        error: Option<String>,
    ) {
        let update = {
            let mut jobs = self.jobs.lock();
            let Some((_, job)) = jobs.iter_mut().find(|(job_id, _)| job_id == id) else {
                return;
            };
            job.status = status;
            let total = bytes_total.or(job.request.expected_bytes);
            if let Some(done) = bytes_done {
                job.bytes_done = done;
            } else if status == TransferStatus::Complete {
                job.bytes_done = total.unwrap_or(job.bytes_done);
            }
            TransferUpdate {
                id: id.clone(),
                group: job.request.group.clone(),
                status,
                bytes_done: job.bytes_done,
                bytes_total: total,
                error,
            }
        };
        self.updates.send(update).ok();
    }
}

#[async_trait]
impl FileTransferEngine for FakeTransferEngine {
    async fn enqueue(&self, request: TransferRequest) -> Result<TransferId> {
        let mut jobs = self.jobs.lock();
        if let Some(limit) = *self.fail_enqueue_after.lock() {
            if jobs.len() >= limit {
                return Err(BridgeError::OperationFailed("transfer queue full".to_string()));
            }
        }
        let id = TransferId(format!("job_{}", jobs.len() + 1));
        jobs.push((
            id.clone(),
            FakeJob {
                request,
                status: TransferStatus::Enqueued,
                bytes_done: 0,
            },
        ));
        Ok(id)
    }

    async fn cancel(&self, id: &TransferId) -> Result<()> {
        self.cancelled.lock().push(id.clone());
        self.transition(id, TransferStatus::Canceled, None, None, None);
        Ok(())
    }

    async fn list_transfers(&self) -> Result<Vec<TransferRecord>> {
        Ok(self
            .jobs
            .lock()
            .iter()
            .map(|(id, job)| TransferRecord {
                id: id.clone(),
                group: job.request.group.clone(),
                status: job.status,
                bytes_done: job.bytes_done,
                bytes_total: job.request.expected_bytes,
                destination: job.request.destination.clone(),
            })
            .collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<TransferUpdate> {
        self.updates.subscribe()
    }
}

// ============================================================================
// Audio engine
// ============================================================================

/// Calls received by [`FakeAudioEngine`].
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCall {
    Load { book_id: String, tracks: usize, index: usize, offset: Duration },
    Play,
    Pause,
    Stop,
    Seek { index: usize, offset: Duration },
}

/// Engine that becomes `Ready` as soon as a playlist is loaded.
pub struct FakeAudioEngine {
    state: watch::Sender<EngineState>,
    calls: Mutex<Vec<EngineCall>>,
    tracks: Mutex<Vec<EngineTrack>>,
    media: Mutex<Option<MediaItemInfo>>,
}

impl Default for FakeAudioEngine {
    fn default() -> Self {
        let (state, _) = watch::channel(EngineState::default());
        Self {
            state,
            calls: Mutex::new(Vec::new()),
            tracks: Mutex::new(Vec::new()),
            media: Mutex::new(None),
        }
    }
}

impl FakeAudioEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().clone()
    }

    pub fn tracks(&self) -> Vec<EngineTrack> {
        self.tracks.lock().clone()
    }

    pub fn media(&self) -> Option<MediaItemInfo> {
        self.media.lock().clone()
    }

    /// Move the position inside the current track.
    pub fn set_position(&self, position: Duration) {
        self.state.send_modify(|s| s.position = position);
    }

    /// Report the end of the last track.
    pub fn finish(&self) {
        let last = self.tracks.lock().len().saturating_sub(1);
        self.state.send_modify(|s| {
            s.track_index = last;
            s.processing = ProcessingState::Completed;
            s.playing = false;
        });
    }

    fn record(&self, call: EngineCall) {
        self.calls.lock().push(call);
    }

    fn track_duration(&self, index: usize) -> Option<Duration> {
        self.tracks.lock().get(index).map(|t| t.duration)
    }
}

#[async_trait]
impl AudioEngine for FakeAudioEngine {
    async fn load(
        &self,
        media: MediaItemInfo,
        tracks: Vec<EngineTrack>,
        index: usize,
        offset: Duration,
    ) -> Result<()> {
        self.record(EngineCall::Load {
            book_id: media.book_id.clone(),
            tracks: tracks.len(),
            index,
            offset,
        });
        let duration = tracks.get(index).map(|t| t.duration);
        *self.tracks.lock() = tracks;
        *self.media.lock() = Some(media);
        self.state.send_replace(EngineState {
            processing: ProcessingState::Ready,
            playing: false,
            track_index: index,
            position: offset,
            duration,
        });
        Ok(())
    }

    async fn play(&self) -> Result<()> {
        self.record(EngineCall::Play);
        self.state.send_modify(|s| s.playing = true);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.record(EngineCall::Pause);
        self.state.send_modify(|s| s.playing = false);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(EngineCall::Stop);
        self.tracks.lock().clear();
        self.state.send_replace(EngineState::default());
        Ok(())
    }

    async fn seek(&self, index: usize, offset: Duration) -> Result<()> {
        self.record(EngineCall::Seek { index, offset });
        let duration = self.track_duration(index);
        self.state.send_modify(|s| {
            s.track_index = index;
            s.position = offset;
            s.duration = duration;
            if s.processing == ProcessingState::Completed {
                s.processing = ProcessingState::Ready;
            }
        });
        Ok(())
    }

    fn subscribe(&self) -> watch::Receiver<EngineState> {
        self.state.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::AudioSource;

    #[tokio::test]
    async fn test_fake_engine_reports_ready_after_load() {
        let engine = FakeAudioEngine::new();
        let track = EngineTrack {
            source: AudioSource::LocalFile {
                path: PathBuf::from("/tmp/a.mp3"),
            },
            duration: Duration::from_secs(10),
            title: None,
        };
        engine
            .load(MediaItemInfo::default(), vec![track], 0, Duration::from_secs(3))
            .await
            .unwrap();

        let state = engine.state();
        assert_eq!(state.processing, ProcessingState::Ready);
        assert_eq!(state.position, Duration::from_secs(3));
        assert_eq!(state.duration, Some(Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_fake_transfer_engine_publishes_updates() {
        let engine = FakeTransferEngine::new();
        let mut rx = engine.subscribe();
        let id = engine
            .enqueue(TransferRequest {
                url: "https://abs.test/f".to_string(),
                headers: HashMap::new(),
                destination: PathBuf::from("/tmp/f"),
                group: "li_1".to_string(),
                expected_bytes: Some(10),
                display_name: None,
            })
            .await
            .unwrap();

        engine.complete(&id);
        let update = rx.recv().await.unwrap();
        assert_eq!(update.status, TransferStatus::Complete);
        assert_eq!(update.bytes_done, 10);
        assert_eq!(update.group, "li_1");
    }
}
