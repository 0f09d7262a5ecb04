//! Per-task state tracked by the preparation manager.

use serde::Serialize;

/// Tagged task-info record (REDESIGN FLAG — was a dynamic dict, spec §9).
#[derive(Debug, Clone)]
pub struct PrepareTaskInfo {
    pub track_id: String,
    pub filename: String,
    pub voice: Option<String>,
    pub lock_already_held: bool,
    pub is_regeneration: bool,
}

impl PrepareTaskInfo {
    pub fn stream_id(&self) -> String {
        match &self.voice {
            Some(v) => format!("{}/{}", self.track_id, v),
            None => self.track_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    CreatingSegments,
    Complete,
    Error,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Error)
    }
}

/// Snapshot of one stream_id's preparation progress, polled by
/// `get_segment_progress` (C9).
#[derive(Debug, Clone, Serialize)]
pub struct TaskStatusEntry {
    #[serde(skip)]
    pub task_info: PrepareTaskInfo,
    pub status: TaskStatus,
    pub priority: u8,
    pub current_duration: f64,
    pub total_duration: f64,
    pub segment_durations: Vec<f64>,
    pub words_mapped: u64,
    pub error_message: Option<String>,
}

impl TaskStatusEntry {
    pub fn queued(task_info: PrepareTaskInfo, priority: u8) -> Self {
        Self {
            task_info,
            status: TaskStatus::Queued,
            priority,
            current_duration: 0.0,
            total_duration: 0.0,
            segment_durations: Vec::new(),
            words_mapped: 0,
            error_message: None,
        }
    }

    pub fn progress_percent(&self) -> f64 {
        if self.total_duration <= 0.0 {
            return 0.0;
        }
        (self.current_duration / self.total_duration * 100.0).min(99.0)
    }
}
