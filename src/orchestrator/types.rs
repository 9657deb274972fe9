//! Core data model for the classification pipeline.

use crate::privacy::AnalysisMode;
use serde::{Deserialize, Serialize};

/// Sentinel folder telling the client to leave the message in place.
pub const INBOX_FALLBACK: &str = "INBOX_FALLBACK";

/// Subject length cap in bytes (4 KiB).
pub const MAX_SUBJECT_BYTES: usize = 4 * 1024;

/// Attachment descriptor as supplied by the client. Content is never
/// inspected; only the MIME type survives into the prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    pub filename: String,
    pub mime_type: String,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub sha256: String,
}

/// One classification request. Created on frame receive, consumed by a
/// single orchestrator invocation, destroyed on response emission.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ClassificationRequest {
    pub request_id: String,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    #[serde(default)]
    pub body: String,
    /// Candidate folders: the allow-list the model must choose from.
    pub folders: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<AttachmentMeta>,
    /// Per-request override of the configured analysis mode.
    #[serde(default)]
    pub mode: Option<AnalysisMode>,
    /// Client-supplied origin label, e.g. "new_mail" or "archive".
    #[serde(default)]
    pub origin: Option<String>,
}

/// Machine-readable reason for the decision's shape: the sole channel by
/// which the backend explains itself to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RationaleTag {
    ModelDecided,
    ThresholdRejected,
    FolderRejected,
    ProviderFailed,
    CircuitOpen,
    RateLimited,
    CacheHit,
}

impl RationaleTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            RationaleTag::ModelDecided => "model_decided",
            RationaleTag::ThresholdRejected => "threshold_rejected",
            RationaleTag::FolderRejected => "folder_rejected",
            RationaleTag::ProviderFailed => "provider_failed",
            RationaleTag::CircuitOpen => "circuit_open",
            RationaleTag::RateLimited => "rate_limited",
            RationaleTag::CacheHit => "cache_hit",
        }
    }
}

/// The pipeline's output. Always well-formed: every failure mode maps to
/// a fallback decision with the matching rationale tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassificationDecision {
    /// Member of the request's folder list, or [`INBOX_FALLBACK`].
    pub target_folder: String,
    pub confidence: f64,
    pub rationale_tag: RationaleTag,
    /// Hex HMAC-SHA256 over the canonical decision subset, when signing
    /// is enabled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub latency_ms: u64,
    pub provider_name: String,
    pub model_name: String,
}

impl ClassificationDecision {
    pub fn is_fallback(&self) -> bool {
        self.target_folder == INBOX_FALLBACK
    }
}
