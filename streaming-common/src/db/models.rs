//! Database row models shared between the streaming core and its tests.
//!
//! Dynamic dictionary payloads from the source system (tier_restrictions,
//! task_info) are expressed here as tagged records with explicit fields
//! rather than free-form JSON blobs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[cfg(feature = "sqlx")]
use sqlx::FromRow;

/// Upload-session lifecycle state (spec §3, UploadSession.status).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadSessionStatus {
    Initialized,
    ChunksComplete,
    Cancelled,
}

impl UploadSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::ChunksComplete => "chunks_complete",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "initialized" => Some(Self::Initialized),
            "chunks_complete" => Some(Self::ChunksComplete),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Track.upload_status — owned exclusively by the chunked-upload coordinator (C3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Uploading,
    Processing,
    Complete,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploading => "uploading",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "uploading" => Some(Self::Uploading),
            "processing" => Some(Self::Processing),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Track.status — the processing state machine owned by the status lock (C4)
/// and the HLS preparation manager (C5). Kept as a column distinct from
/// `upload_status`; see DESIGN.md "status vs upload_status".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackProcessingStatus {
    Generating,
    Segmenting,
    Complete,
    Failed,
}

impl TrackProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Segmenting => "segmenting",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(Self::Generating),
            "segmenting" => Some(Self::Segmenting),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// True for states that make a track eligible for a fresh lock attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentationStatus {
    Incomplete,
    Complete,
}

impl SegmentationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Incomplete => "incomplete",
            Self::Complete => "complete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "incomplete" => Some(Self::Incomplete),
            "complete" => Some(Self::Complete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityStatus {
    Visible,
    HiddenFromUsers,
    HiddenFromAll,
}

impl VisibilityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Visible => "visible",
            Self::HiddenFromUsers => "hidden_from_users",
            Self::HiddenFromAll => "hidden_from_all",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "visible" => Some(Self::Visible),
            "hidden_from_users" => Some(Self::HiddenFromUsers),
            "hidden_from_all" => Some(Self::HiddenFromAll),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoiceGenerationState {
    Generating,
    Complete,
    Failed,
}

impl VoiceGenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generating => "generating",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "generating" => Some(Self::Generating),
            "complete" => Some(Self::Complete),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariantType {
    Audio,
    Tts,
}

impl VariantType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Tts => "tts",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "audio" => Some(Self::Audio),
            "tts" => Some(Self::Tts),
            _ => None,
        }
    }
}

/// Track entity (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Track {
    pub id: String,
    pub owner_id: i64,
    pub album_id: String,
    pub source_blob_path: String,
    pub variant_type: String,
    pub duration_seconds: f64,
    pub codec: Option<String>,
    pub bitrate: Option<i64>,
    pub sample_rate: Option<i64>,
    pub channels: Option<i64>,
    pub content_version: i64,
    pub upload_status: String,
    pub processing_voice: Option<String>,
    pub processing_locked_at: Option<DateTime<Utc>>,
    pub processing_type: Option<String>,
    pub status: String,
    pub hls_ready: bool,
    pub segmentation_status: String,
    pub default_voice: Option<String>,
    pub visibility_status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Track {
    pub fn upload_status(&self) -> UploadStatus {
        UploadStatus::parse(&self.upload_status).unwrap_or(UploadStatus::Failed)
    }

    pub fn processing_status(&self) -> TrackProcessingStatus {
        TrackProcessingStatus::parse(&self.status).unwrap_or(TrackProcessingStatus::Failed)
    }

    pub fn segmentation_status(&self) -> SegmentationStatus {
        SegmentationStatus::parse(&self.segmentation_status).unwrap_or(SegmentationStatus::Incomplete)
    }

    pub fn variant_type(&self) -> VariantType {
        VariantType::parse(&self.variant_type).unwrap_or(VariantType::Audio)
    }
}

/// Tagged tier-restriction record (REDESIGN FLAG — was a dynamic dict).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierRestrictions {
    pub is_restricted: bool,
    pub minimum_tier_amount_cents: i64,
    pub minimum_tier_name: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct Album {
    pub id: String,
    pub owner_id: i64,
    pub is_restricted: bool,
    pub minimum_tier_amount_cents: i64,
    pub minimum_tier_name: String,
    pub tier_updated_at: Option<DateTime<Utc>>,
}

impl Album {
    pub fn tier_restrictions(&self) -> Option<TierRestrictions> {
        if !self.is_restricted && self.minimum_tier_amount_cents == 0 {
            return None;
        }
        Some(TierRestrictions {
            is_restricted: self.is_restricted,
            minimum_tier_amount_cents: self.minimum_tier_amount_cents,
            minimum_tier_name: self.minimum_tier_name.clone(),
            updated_at: self.tier_updated_at.unwrap_or_else(Utc::now),
        })
    }
}

/// VoiceGenerationStatus entity, unique on (track_id, voice_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct VoiceGenerationStatus {
    pub track_id: String,
    pub voice_id: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl VoiceGenerationStatus {
    pub fn state(&self) -> VoiceGenerationState {
        VoiceGenerationState::parse(&self.status).unwrap_or(VoiceGenerationState::Failed)
    }
}

/// UploadSession entity (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct UploadSession {
    pub upload_id: String,
    pub chunks_dir: String,
    pub total_chunks: i64,
    pub received_chunks: String, // serialized bitmap, comma-separated indices
    pub filename: String,
    pub title: Option<String>,
    pub creator_id: i64,
    pub album_id: String,
    pub intended_visibility: String,
    pub track_id: Option<String>,
    pub status: String,
    pub last_updated: DateTime<Utc>,
}

impl UploadSession {
    pub fn status(&self) -> UploadSessionStatus {
        UploadSessionStatus::parse(&self.status).unwrap_or(UploadSessionStatus::Cancelled)
    }

    /// Parse the comma-separated received-chunk bitmap into a set of indices.
    pub fn received_indices(&self) -> std::collections::HashSet<i64> {
        self.received_chunks
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect()
    }
}

/// Ordered partition of TTS source text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct TtsTextSegment {
    pub track_id: String,
    pub segment_index: i64,
    pub text: String,
}

/// Per-voice rendered audio for one text segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct TtsVoiceSegment {
    pub track_id: String,
    pub voice_id: String,
    pub segment_index: i64,
    pub actual_duration: f64,
    pub ready: bool,
}

/// Per-word timing for one voice of one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(FromRow))]
pub struct TtsWordTiming {
    pub track_id: String,
    pub voice_id: String,
    pub segment_index: i64,
    pub segment_offset: f64,
    pub word_index: i64,
    pub word: String,
    pub start: f64,
    pub end: f64,
    pub mapped_segment_index: Option<i64>,
    pub mapped_segment_offset: Option<f64>,
}
