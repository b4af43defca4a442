use std::fmt;

use serde::{Deserialize, Serialize};

pub type TurnId = u64;
pub type EntryId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageErrorKind {
    InvalidRequest,
    HttpStatus(u16),
    Timeout,
    Network,
    Protocol,
    Cancelled,
}

impl fmt::Display for StageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageErrorKind::InvalidRequest => write!(f, "invalid request"),
            StageErrorKind::HttpStatus(code) => write!(f, "http status {code}"),
            StageErrorKind::Timeout => write!(f, "timeout"),
            StageErrorKind::Network => write!(f, "network error"),
            StageErrorKind::Protocol => write!(f, "protocol error"),
            StageErrorKind::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Failure of one remote call, as reported towards the state machine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct StageError {
    pub kind: StageErrorKind,
    pub message: String,
}

impl StageError {
    pub(crate) fn new(kind: StageErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

// --- Wire DTOs ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatasetRecord {
    pub id: u64,
    pub source_id: String,
    pub filename: String,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub filesize: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SchemaSample {
    pub source_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub session_id: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RagChunk {
    pub source_id: String,
    pub chunk_id: u64,
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RagReply {
    pub answer: String,
    pub retrieved_chunks: Vec<RagChunk>,
    pub executed_at: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReportReply {
    pub report_id: String,
    pub session_id: u64,
    pub summary_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RagQueryRequest {
    pub query: String,
    pub top_k: u32,
    pub source_filter: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreprocessOperation {
    pub op: String,
    pub params: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PreprocessApplyRequest {
    pub dataset_id: u64,
    pub operations: Vec<PreprocessOperation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportCreateRequest {
    pub session_id: u64,
}

/// One visible "thinking" step of a streamed turn.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(default)]
pub struct ThoughtStep {
    pub phase: String,
    pub message: String,
    pub status: String,
}

// --- Engine command payloads ---

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPayload {
    pub file_name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// One remote pipeline stage call, as commanded by the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageRequest {
    FetchSample {
        source_id: String,
    },
    ChatAnalysis {
        source_id: String,
        question: String,
    },
    RagQuery {
        query: String,
        top_k: u32,
        source_filter: Vec<String>,
    },
    PreprocessApply {
        dataset_id: u64,
        column: String,
        strategy: String,
        fill_value: String,
    },
    CreateReport {
        session_id: u64,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub question: String,
    pub session_id: u64,
    pub source_id: String,
}

/// Successful output of one pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum StageOutput {
    Schema(SchemaSample),
    Analysis(ChatReply),
    /// `None` when retrieval matched nothing (backend answers 204).
    Retrieval(Option<RagReply>),
    RemediationApplied,
    Report(ReportReply),
}

/// Events emitted back to the shell.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    UploadProgress {
        percent: u8,
    },
    UploadFinished {
        result: Result<DatasetRecord, StageError>,
        duration_ms: u64,
    },
    StageFinished {
        entry_id: EntryId,
        result: Result<StageOutput, StageError>,
        duration_ms: u64,
    },
    TurnSession {
        turn_id: TurnId,
        session_id: u64,
    },
    TurnThought {
        turn_id: TurnId,
        step: ThoughtStep,
    },
    TurnDisplay {
        turn_id: TurnId,
        text: String,
    },
    TurnFinalized {
        turn_id: TurnId,
        answer: String,
        thoughts: Vec<ThoughtStep>,
        duration_ms: u64,
    },
    TurnFailed {
        turn_id: TurnId,
        message: String,
        duration_ms: u64,
    },
}
