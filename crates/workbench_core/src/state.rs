use std::collections::BTreeSet;

use crate::extract::HitlProposal;
use crate::ledger::{AuditLedger, EntryId, Milestone};

/// Lifecycle of one analysis run. Exactly one state is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunState {
    #[default]
    Empty,
    Uploading,
    Running,
    NeedsUser,
    Error,
    Success,
}

impl RunState {
    /// Terminal states stay put until a retry or a new run starts.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunState::Error | RunState::Success)
    }
}

/// The six ordered phases of an analysis run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Intake,
    Preprocess,
    Rag,
    Visualization,
    Merge,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Intake,
        Stage::Preprocess,
        Stage::Rag,
        Stage::Visualization,
        Stage::Merge,
        Stage::Report,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Stage::Intake => "Intake",
            Stage::Preprocess => "Preprocess",
            Stage::Rag => "RAG",
            Stage::Visualization => "Visualization",
            Stage::Merge => "Merge",
            Stage::Report => "Report",
        }
    }
}

/// The remote operations the orchestrator actually issues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageCall {
    FetchSample,
    ChatAnalysis,
    RagQuery,
    PreprocessApply,
    CreateReport,
    ChatFollowUp,
}

impl StageCall {
    pub fn tool_name(&self) -> &'static str {
        match self {
            StageCall::FetchSample => "fetch_sample",
            StageCall::ChatAnalysis => "chat_analysis",
            StageCall::RagQuery => "rag_query",
            StageCall::PreprocessApply => "preprocess_apply",
            StageCall::CreateReport => "create_report",
            StageCall::ChatFollowUp => "chat_followup",
        }
    }

    /// Pipeline stage this call belongs to; follow-up chat is not part of
    /// the pipeline.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StageCall::FetchSample => Some(Stage::Intake),
            StageCall::ChatAnalysis | StageCall::PreprocessApply => Some(Stage::Preprocess),
            StageCall::RagQuery => Some(Stage::Rag),
            StageCall::CreateReport => Some(Stage::Report),
            StageCall::ChatFollowUp => None,
        }
    }
}

/// File content handed to the upload stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSource {
    pub file_name: String,
    pub content: Vec<u8>,
    pub content_type: String,
}

/// Identifiers returned by a successful upload; retained for retry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub dataset_id: u64,
    pub source_id: String,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaSummary {
    pub columns: Vec<String>,
    pub sample_rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisSummary {
    pub answer: String,
    pub session_id: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceChunk {
    pub score: f64,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct RetrievalSummary {
    pub chunks: Vec<EvidenceChunk>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub report_id: String,
    pub summary_text: String,
}

/// One visible "thinking" step of a streamed turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThoughtStep {
    pub phase: String,
    pub message: String,
    pub status: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatEntry {
    pub role: ChatRole,
    pub content: String,
    pub thoughts: Vec<ThoughtStep>,
}

/// Streamed follow-up turn currently in flight.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTurn {
    pub turn_id: u64,
    pub entry_id: EntryId,
    pub question: String,
    pub display: String,
    pub thoughts: Vec<ThoughtStep>,
}

/// The single pipeline call awaiting its completion message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingCall {
    pub entry_id: EntryId,
    pub call: StageCall,
}

/// Why the run entered `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    pub tool: String,
    pub stage: Option<Stage>,
    pub message: String,
}

/// Owned state of one analysis run plus its conversation. Mutated only by
/// [`crate::update`]; the presentation layer reads projections via
/// `WorkbenchState::view`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WorkbenchState {
    run: RunState,
    active_stage: Option<Stage>,
    upload_progress: u8,
    elapsed_seconds: u64,
    file_name: String,
    receipt: Option<UploadReceipt>,
    session_id: Option<u64>,
    schema: Option<SchemaSummary>,
    analysis: Option<AnalysisSummary>,
    retrieval: Option<RetrievalSummary>,
    report: Option<ReportSummary>,
    completed_stages: BTreeSet<Stage>,
    pending_call: Option<PendingCall>,
    proposal: Option<HitlProposal>,
    error: Option<RunError>,
    ledger: AuditLedger,
    history: Vec<Milestone>,
    conversation: Vec<ChatEntry>,
    active_turn: Option<ActiveTurn>,
    next_turn_id: u64,
    dirty: bool,
}

impl WorkbenchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self) -> RunState {
        self.run
    }

    pub fn active_stage(&self) -> Option<Stage> {
        self.active_stage
    }

    pub fn upload_progress(&self) -> u8 {
        self.upload_progress
    }

    pub fn elapsed_seconds(&self) -> u64 {
        self.elapsed_seconds
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn receipt(&self) -> Option<&UploadReceipt> {
        self.receipt.as_ref()
    }

    pub fn session_id(&self) -> Option<u64> {
        self.session_id
    }

    pub fn schema(&self) -> Option<&SchemaSummary> {
        self.schema.as_ref()
    }

    pub fn analysis(&self) -> Option<&AnalysisSummary> {
        self.analysis.as_ref()
    }

    pub fn retrieval(&self) -> Option<&RetrievalSummary> {
        self.retrieval.as_ref()
    }

    pub fn report(&self) -> Option<&ReportSummary> {
        self.report.as_ref()
    }

    pub fn completed_stages(&self) -> &BTreeSet<Stage> {
        &self.completed_stages
    }

    pub fn pending_call(&self) -> Option<PendingCall> {
        self.pending_call
    }

    pub fn proposal(&self) -> Option<&HitlProposal> {
        self.proposal.as_ref()
    }

    pub fn error(&self) -> Option<&RunError> {
        self.error.as_ref()
    }

    pub fn ledger(&self) -> &AuditLedger {
        &self.ledger
    }

    pub fn history(&self) -> &[Milestone] {
        &self.history
    }

    pub fn conversation(&self) -> &[ChatEntry] {
        &self.conversation
    }

    pub fn active_turn(&self) -> Option<&ActiveTurn> {
        self.active_turn.as_ref()
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns whether a re-render is due and clears the flag.
    pub fn consume_dirty(&mut self) -> bool {
        let was = self.dirty;
        self.dirty = false;
        was
    }

    // --- Mutators, used only by the update function. ---

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn set_run(&mut self, run: RunState) {
        self.run = run;
        self.mark_dirty();
    }

    pub(crate) fn set_active_stage(&mut self, stage: Option<Stage>) {
        self.active_stage = stage;
    }

    pub(crate) fn set_upload_progress(&mut self, percent: u8) {
        self.upload_progress = percent.min(100);
        self.mark_dirty();
    }

    pub(crate) fn tick(&mut self) {
        if matches!(self.run, RunState::Running | RunState::NeedsUser) {
            self.elapsed_seconds += 1;
            self.mark_dirty();
        }
    }

    pub(crate) fn set_receipt(&mut self, receipt: UploadReceipt) {
        self.receipt = Some(receipt);
    }

    pub(crate) fn set_session_id(&mut self, session_id: u64) {
        self.session_id = Some(session_id);
    }

    pub(crate) fn set_schema(&mut self, schema: SchemaSummary) {
        self.schema = Some(schema);
    }

    pub(crate) fn set_analysis(&mut self, analysis: AnalysisSummary) {
        self.analysis = Some(analysis);
    }

    pub(crate) fn set_retrieval(&mut self, retrieval: RetrievalSummary) {
        self.retrieval = Some(retrieval);
    }

    pub(crate) fn set_report(&mut self, report: ReportSummary) {
        self.report = Some(report);
    }

    pub(crate) fn mark_stage_completed(&mut self, stage: Stage) {
        self.completed_stages.insert(stage);
        self.mark_dirty();
    }

    pub(crate) fn set_pending_call(&mut self, pending: PendingCall) {
        self.pending_call = Some(pending);
    }

    pub(crate) fn take_pending_call(&mut self) -> Option<PendingCall> {
        self.pending_call.take()
    }

    pub(crate) fn set_proposal(&mut self, proposal: HitlProposal) {
        self.proposal = Some(proposal);
        self.mark_dirty();
    }

    pub(crate) fn take_proposal(&mut self) -> Option<HitlProposal> {
        self.mark_dirty();
        self.proposal.take()
    }

    pub(crate) fn set_error(&mut self, error: RunError) {
        self.error = Some(error);
        self.mark_dirty();
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = None;
        self.mark_dirty();
    }

    pub(crate) fn ledger_mut(&mut self) -> &mut AuditLedger {
        self.mark_dirty();
        &mut self.ledger
    }

    pub(crate) fn push_history(&mut self, item: Milestone) {
        self.history.push(item);
        self.mark_dirty();
    }

    pub(crate) fn push_chat(&mut self, entry: ChatEntry) {
        self.conversation.push(entry);
        self.mark_dirty();
    }

    pub(crate) fn set_active_turn(&mut self, turn: ActiveTurn) {
        self.active_turn = Some(turn);
        self.mark_dirty();
    }

    pub(crate) fn active_turn_mut(&mut self, turn_id: u64) -> Option<&mut ActiveTurn> {
        if self.active_turn.as_ref().is_some_and(|t| t.turn_id == turn_id) {
            self.dirty = true;
            self.active_turn.as_mut()
        } else {
            None
        }
    }

    pub(crate) fn clear_active_turn(&mut self) -> Option<ActiveTurn> {
        if self.active_turn.is_some() {
            self.mark_dirty();
        }
        self.active_turn.take()
    }

    pub(crate) fn take_active_turn(&mut self, turn_id: u64) -> Option<ActiveTurn> {
        if self.active_turn.as_ref().is_some_and(|t| t.turn_id == turn_id) {
            self.mark_dirty();
            self.active_turn.take()
        } else {
            None
        }
    }

    pub(crate) fn alloc_turn_id(&mut self) -> u64 {
        self.next_turn_id += 1;
        self.next_turn_id
    }

    /// Clear every run-scoped field for a fresh upload. The conversation and
    /// upload receipt are also dropped: a new source invalidates both.
    pub(crate) fn reset_for_new_run(&mut self, file_name: String) {
        let next_turn_id = self.next_turn_id;
        *self = Self {
            file_name,
            next_turn_id,
            ..Self::default()
        };
        self.mark_dirty();
    }

    /// Elapsed run time rendered as `mm:ss`, used for ledger timestamps.
    pub(crate) fn elapsed_label(&self) -> String {
        crate::view_model::format_elapsed(self.elapsed_seconds)
    }

    pub(crate) fn reset_clock(&mut self) {
        self.elapsed_seconds = 0;
        self.upload_progress = 0;
        self.mark_dirty();
    }
}

/// Char-boundary-safe prefix of `text`, at most `max_chars` characters.
pub(crate) fn clip(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
