use crate::ledger::EntryId;
use crate::state::{
    AnalysisSummary, ReportSummary, RetrievalSummary, SchemaSummary, ThoughtStep, UploadReceipt,
};

/// Failure reported by a remote call, as surfaced to the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub message: String,
}

impl StageFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Successful payload of one finished pipeline stage call.
#[derive(Debug, Clone, PartialEq)]
pub enum StageSuccess {
    Schema(SchemaSummary),
    Analysis(AnalysisSummary),
    /// `None` when retrieval matched nothing (backend answers 204).
    Retrieval(Option<RetrievalSummary>),
    RemediationApplied,
    Report(ReportSummary),
}

/// Result of one finished pipeline stage call.
pub type StageOutcome = Result<StageSuccess, StageFailure>;

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// User picked a file for a new analysis run.
    UploadRequested { file_name: String, content: Vec<u8> },
    /// User clicked "Try sample dataset".
    SampleRequested,
    /// Upload transfer progress from the engine.
    UploadProgress { percent: u8 },
    /// Upload finished (either way).
    UploadFinished {
        result: Result<UploadReceipt, StageFailure>,
    },
    /// A pipeline stage call resolved.
    StageFinished {
        entry_id: EntryId,
        duration: String,
        outcome: StageOutcome,
    },
    /// User approved the proposed remediation.
    ApproveClicked,
    /// User rejected the proposed remediation.
    RejectClicked,
    /// User supplied an override fill value and resumed.
    EditSubmitted { text: String },
    /// User asked to rerun a failed pipeline.
    RetryClicked,
    /// User sent a follow-up question.
    FollowUpSubmitted { text: String },
    /// Streamed turn learned its server-side session id.
    TurnSession { turn_id: u64, session_id: u64 },
    /// Streamed turn produced a visible thinking step.
    TurnThought { turn_id: u64, step: ThoughtStep },
    /// Paced display string for the streamed turn advanced.
    TurnDisplay { turn_id: u64, text: String },
    /// The streamed turn finalized; commits the assistant message.
    TurnFinalized {
        turn_id: u64,
        answer: String,
        thoughts: Vec<ThoughtStep>,
        duration: String,
    },
    /// The streamed turn failed.
    TurnFailed {
        turn_id: u64,
        message: String,
        duration: String,
    },
    /// User clicked Cancel.
    CancelClicked,
    /// User clicked Reset.
    ResetClicked,
    /// One-second clock tick from the shell.
    Tick,
    /// Fallback for placeholder wiring.
    NoOp,
}
