use crate::ledger::EntryId;
use crate::state::UploadSource;

/// Commands the state machine asks the IO layer to execute.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Begin a new upload. The engine mints a fresh run cancellation token,
    /// so a cancel issued while uploading aborts the transfer too.
    StartUpload { source: UploadSource },
    /// Execute one remote pipeline stage under the current run token.
    RunStage {
        entry_id: EntryId,
        request: StageRequest,
    },
    /// Replace the run's cancellation token before resumed stage calls.
    ResumeRun,
    /// Begin a streamed follow-up chat turn under the current run token.
    StartTurn { turn_id: u64, request: TurnRequest },
    /// Cancel the in-flight run and stop any pacing loop.
    CancelRun,
}

/// Parameters of one remote pipeline stage call.
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

/// Parameters of a streamed follow-up chat turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRequest {
    pub question: String,
    pub session_id: u64,
    pub source_id: String,
}
