//! HLS preparation manager (C5)
//!
//! A bounded worker pool, keyed by `stream_id = track_id[/voice-id]`, that
//! downloads a source blob, probes it, segments it with ffmpeg, and (for
//! TTS variants) maps word timings against the final segment boundaries.

pub mod playlist;
pub mod task;
pub mod worker;

pub use task::{PrepareTaskInfo, TaskStatus, TaskStatusEntry};

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::{Mutex as AsyncMutex, Notify, RwLock, Semaphore};
use tracing::info;

use crate::error::Result;
use crate::lock::StatusLock;
use crate::metadata::MetadataExtractor;
use crate::object_store::ObjectStore;

/// One queued-but-not-yet-dispatched preparation task. Ordered so a
/// `BinaryHeap` pops the highest-priority (lowest `priority` value, spec
/// §4.5: "1=high/small, 2=medium, 3=large") entry first, breaking ties FIFO
/// by enqueue sequence.
struct PendingTask {
    priority: u8,
    seq: u64,
    task_info: PrepareTaskInfo,
    source_key: String,
}

impl PartialEq for PendingTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for PendingTask {}
impl PartialOrd for PendingTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for PendingTask {
    fn cmp(&self, other: &Self) -> Ordering {
        other.priority.cmp(&self.priority).then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Bounded worker pool that transcodes source audio into segmented HLS,
/// coalescing duplicate enqueues for the same `stream_id`. Tasks wait in a
/// priority-ordered queue for a permit; a single dispatcher loop, spawned
/// lazily on first use, hands permits to the highest-priority waiting task
/// rather than the oldest one (spec §4.5: priority biases worker selection).
pub struct PreparationManager {
    semaphore: Arc<Semaphore>,
    queue: Arc<AsyncMutex<BinaryHeap<PendingTask>>>,
    queue_notify: Arc<Notify>,
    next_seq: AtomicU64,
    dispatcher_started: AtomicBool,
    tasks: Arc<RwLock<HashMap<String, TaskStatusEntry>>>,
    segments_root: std::path::PathBuf,
    ffmpeg_path: String,
    hls_segment_seconds: u32,
    db: SqlitePool,
    object_store: Arc<dyn ObjectStore>,
    status_lock: Arc<StatusLock>,
    extractor: Arc<MetadataExtractor>,
}

impl PreparationManager {
    pub fn new(
        worker_count: usize,
        segments_root: impl Into<std::path::PathBuf>,
        ffmpeg_path: impl Into<String>,
        hls_segment_seconds: u32,
        db: SqlitePool,
        object_store: Arc<dyn ObjectStore>,
        status_lock: Arc<StatusLock>,
        extractor: Arc<MetadataExtractor>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(worker_count.max(1))),
            queue: Arc::new(AsyncMutex::new(BinaryHeap::new())),
            queue_notify: Arc::new(Notify::new()),
            next_seq: AtomicU64::new(0),
            dispatcher_started: AtomicBool::new(false),
            tasks: Arc::new(RwLock::new(HashMap::new())),
            segments_root: segments_root.into(),
            ffmpeg_path: ffmpeg_path.into(),
            hls_segment_seconds,
            db,
            object_store,
            status_lock,
            extractor,
        }
    }

    pub async fn status_of(&self, stream_id: &str) -> Option<TaskStatusEntry> {
        self.tasks.read().await.get(stream_id).cloned()
    }

    /// The `segments/{track_id}/` tree this manager writes into.
    pub fn segments_dir(&self, track_id: &str) -> std::path::PathBuf {
        self.segments_root.join(track_id)
    }

    /// Remove a task's in-memory status entry (used by cancellation paths).
    pub async fn clear_task(&self, stream_id: &str) {
        self.tasks.write().await.remove(stream_id);
    }

    /// Queue a preparation task. Duplicate enqueues for a `stream_id`
    /// already in a non-terminal state are coalesced (spec §4.5).
    pub async fn queue_preparation(
        self: &Arc<Self>,
        task_info: PrepareTaskInfo,
        source_key: String,
        priority: u8,
    ) -> Result<()> {
        let stream_id = task_info.stream_id();

        {
            let mut tasks = self.tasks.write().await;
            if let Some(existing) = tasks.get(&stream_id) {
                if !existing.status.is_terminal() {
                    info!(stream_id, "preparation already in flight, coalescing");
                    return Ok(());
                }
            }
            tasks.insert(
                stream_id.clone(),
                TaskStatusEntry::queued(task_info.clone(), priority),
            );
        }

        let seq = self.next_seq.fetch_add(1, AtomicOrdering::Relaxed);
        {
            let mut queue = self.queue.lock().await;
            queue.push(PendingTask { priority, seq, task_info, source_key });
        }
        self.queue_notify.notify_one();
        self.ensure_dispatcher();

        Ok(())
    }

    /// Spawn the dispatcher loop on first use. It owns every semaphore
    /// permit acquisition, so it alone decides which queued task a freed
    /// permit goes to.
    fn ensure_dispatcher(self: &Arc<Self>) {
        if self.dispatcher_started.swap(true, AtomicOrdering::SeqCst) {
            return;
        }
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let permit = manager.semaphore.clone().acquire_owned().await.expect("semaphore never closed");
                let task = manager.next_pending_task().await;
                let worker_manager = Arc::clone(&manager);
                tokio::spawn(async move {
                    let _permit = permit;
                    worker::run(&worker_manager, task.task_info, task.source_key).await;
                });
            }
        });
    }

    /// Wait for and pop the highest-priority queued task, without missing a
    /// wakeup if `notify_one` fires between the empty check and the await.
    async fn next_pending_task(self: &Arc<Self>) -> PendingTask {
        loop {
            let notified = self.queue_notify.notified();
            tokio::pin!(notified);
            if let Some(task) = self.queue.lock().await.pop() {
                return task;
            }
            notified.await;
        }
    }
}
