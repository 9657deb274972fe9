//! Wire protocol: the JSON frame shapes exchanged with the mail client.
//!
//! Every frame carries a top-level `type`. Requests with a `request_id`
//! yield exactly one response frame echoing that id.

use crate::orchestrator::types::{ClassificationDecision, ClassificationRequest};
use serde::{Deserialize, Serialize};

/// Frame types this host understands.
pub const KNOWN_TYPES: &[&str] = &[
    "classify",
    "health_check",
    "batch_start",
    "batch_status",
    "feedback",
    "stats",
    "get_config",
    "set_config",
    "ping",
];

/// A batch item: a classification request minus the per-frame id. The
/// coordinator assigns internal ids when the job is enqueued.
#[derive(Debug, Clone, Deserialize)]
pub struct BatchItem {
    #[serde(default)]
    pub request_id: Option<String>,
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    #[serde(default)]
    pub body: String,
    pub folders: Vec<String>,
    #[serde(default)]
    pub attachments: Vec<crate::orchestrator::types::AttachmentMeta>,
    #[serde(default)]
    pub mode: Option<crate::privacy::AnalysisMode>,
}

/// User feedback on a past decision.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedbackFrame {
    #[serde(default)]
    pub request_id: Option<String>,
    pub message_id: String,
    pub actual_folder: String,
    #[serde(default)]
    pub previous_folder: Option<String>,
}

/// Parsed inbound frame.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    Classify(ClassificationRequest),
    HealthCheck {
        request_id: String,
    },
    BatchStart {
        request_id: String,
        items: Vec<BatchItem>,
    },
    BatchStatus {
        request_id: String,
        batch_id: String,
    },
    Feedback(FeedbackFrame),
    Stats {
        request_id: String,
    },
    GetConfig {
        request_id: String,
    },
    SetConfig {
        request_id: String,
        config: serde_json::Value,
    },
    Ping {
        request_id: String,
    },
}

/// Why an inbound frame could not be turned into a [`Request`].
#[derive(Debug)]
pub enum ParseError {
    /// `type` missing, not a string, or not in [`KNOWN_TYPES`].
    UnknownType(Option<String>),
    /// Known type but missing/mistyped fields.
    Invalid {
        request_id: Option<String>,
        message: String,
    },
}

/// Route a raw JSON frame to a typed request.
pub fn parse_request(value: serde_json::Value) -> Result<Request, ParseError> {
    let type_name = value
        .get("type")
        .and_then(|t| t.as_str())
        .map(str::to_string);

    match &type_name {
        Some(t) if KNOWN_TYPES.contains(&t.as_str()) => {}
        _ => return Err(ParseError::UnknownType(type_name)),
    }

    let request_id = value
        .get("request_id")
        .and_then(|r| r.as_str())
        .map(str::to_string);

    serde_json::from_value(value).map_err(|e| ParseError::Invalid {
        request_id,
        message: e.to_string(),
    })
}

/// Classification response payload.
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationResponse {
    pub request_id: String,
    pub message_id: String,
    pub target_folder: String,
    pub confidence: f64,
    pub rationale_tag: crate::orchestrator::types::RationaleTag,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    pub provider_name: String,
    pub model_name: String,
    pub latency_ms: u64,
    /// Classification header for the client to attach to the message.
    pub header: String,
}

impl ClassificationResponse {
    pub fn from_decision(
        request_id: String,
        message_id: String,
        decision: ClassificationDecision,
        header: String,
    ) -> Self {
        Self {
            request_id,
            message_id,
            target_folder: decision.target_folder,
            confidence: decision.confidence,
            rationale_tag: decision.rationale_tag,
            signature: decision.signature,
            provider_name: decision.provider_name,
            model_name: decision.model_name,
            latency_ms: decision.latency_ms,
            header,
        }
    }
}

/// Aggregate health over the provider and resilience components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthLevel {
    Ok,
    Degraded,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub request_id: String,
    pub status: HealthLevel,
    pub provider_name: String,
    pub provider_healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchStatusResponse {
    pub request_id: String,
    pub batch_id: String,
    pub queued: usize,
    pub in_flight: usize,
    pub completed: usize,
    pub failed: usize,
    pub results: Vec<ClassificationResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    pub request_id: String,
    pub cache: serde_json::Value,
    pub circuit: serde_json::Value,
    pub rate: serde_json::Value,
    pub calibration: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Outbound frame.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    Classification(ClassificationResponse),
    Health(HealthResponse),
    BatchAck {
        request_id: String,
        batch_id: String,
        queued: usize,
    },
    BatchStatus(BatchStatusResponse),
    Ack {
        request_id: String,
    },
    Config {
        request_id: String,
        config: serde_json::Value,
    },
    Stats(StatsResponse),
    Pong {
        request_id: String,
    },
    Error(ErrorResponse),
}

impl Response {
    pub fn error(request_id: Option<String>, code: &str, message: Option<String>) -> Self {
        Response::Error(ErrorResponse {
            request_id,
            code: code.to_string(),
            message,
        })
    }

    /// Whether this response may be dropped under writer backpressure.
    /// Only advisory stats frames qualify.
    pub fn is_advisory(&self) -> bool {
        matches!(self, Response::Stats(_))
    }
}
