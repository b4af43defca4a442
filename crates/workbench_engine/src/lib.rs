//! Workbench engine: backend HTTP client, chat-stream reconciliation and
//! the command/event bridge the shell drives.
mod client;
mod engine;
mod reconcile;
mod sse;
mod stream;
mod types;

pub use client::{BackendClient, BackendSettings, ByteStream, HttpBackendClient, UploadProgress};
pub use engine::EngineHandle;
pub use reconcile::{TurnReconciler, TurnSignal};
pub use sse::{FrameDecoder, RawFrame, StreamEvent};
pub use types::{
    ChatReply, ChatRequest, DatasetRecord, EngineEvent, EntryId, PreprocessApplyRequest,
    PreprocessOperation, RagChunk, RagQueryRequest, RagReply, ReportCreateRequest, ReportReply,
    SchemaSample, StageError, StageErrorKind, StageOutput, StageRequest, ThoughtStep, TurnId,
    TurnRequest, UploadPayload,
};
