//! Workbench core: pure pipeline state machine, audit ledger, proposal
//! extraction and view-model helpers.
mod effect;
mod extract;
mod ledger;
mod msg;
mod state;
mod update;
mod view_model;

pub use effect::{Effect, StageRequest, TurnRequest};
pub use extract::{extract_proposal, HitlProposal, KeywordExtractor, ProposalExtractor};
pub use ledger::{
    AuditLedger, CallStatus, EntryId, Milestone, MilestoneStatus, RawLogEntry, ToolCallEntry,
};
pub use msg::{Msg, StageFailure, StageOutcome, StageSuccess};
pub use state::{
    ActiveTurn, AnalysisSummary, ChatEntry, ChatRole, EvidenceChunk, PendingCall, ReportSummary,
    RetrievalSummary, RunError, RunState, SchemaSummary, Stage, StageCall, ThoughtStep,
    UploadReceipt, UploadSource, WorkbenchState,
};
pub use update::{
    update, update_with, ANALYSIS_QUESTION, RAG_QUERY_TEXT, RAG_TOP_K, SAMPLE_CSV,
    SAMPLE_FILE_NAME,
};
pub use view_model::{
    format_elapsed, ChipValue, DecisionChipView, EvidenceView, ReportSection, RunStatusView,
    StageRowView, StageStatus, WorkbenchViewModel, EXPECTED_TOOL_CALLS,
};
