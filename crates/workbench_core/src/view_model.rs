//! Pure, idempotent projections of [`WorkbenchState`] for the presentation
//! layer. Recomputed on demand; nothing here mutates state.

use crate::extract::HitlProposal;
use crate::ledger::{Milestone, RawLogEntry, ToolCallEntry};
use crate::state::{ChatEntry, RunState, Stage, WorkbenchState};

/// Fixed denominator for the run progress percentage: sample, analysis,
/// rag, report, plus the optional remediation call.
pub const EXPECTED_TOOL_CALLS: usize = 5;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkbenchViewModel {
    pub run: RunState,
    pub file_name: String,
    pub upload_progress: u8,
    pub elapsed_seconds: u64,
    pub run_status: Option<RunStatusView>,
    pub stages: Vec<StageRowView>,
    pub decision_chips: Vec<DecisionChipView>,
    pub evidence: EvidenceView,
    pub report_sections: Vec<ReportSection>,
    pub tool_calls: Vec<ToolCallEntry>,
    pub milestones: Vec<Milestone>,
    pub history: Vec<Milestone>,
    pub raw_logs: Vec<RawLogEntry>,
    pub proposal: Option<HitlProposal>,
    pub conversation: Vec<ChatEntry>,
    /// Paced display text of the in-flight streamed turn, if any.
    pub streaming_text: Option<String>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusView {
    pub phase: String,
    pub progress: u8,
    pub last_tool: String,
    pub elapsed: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageStatus {
    Queued,
    Running,
    Success,
    Failed,
    NeedsUser,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageRowView {
    pub stage: Stage,
    pub label: &'static str,
    pub status: StageStatus,
    pub sublabel: Option<String>,
    pub tool_count: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChipValue {
    On,
    Running,
    Done,
    Blocked,
    Failed,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecisionChipView {
    pub label: &'static str,
    pub value: ChipValue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceView {
    pub data: String,
    pub scope: String,
    pub compute: String,
    pub rag: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReportSection {
    Paragraph(String),
    Heading(String),
    NumberedList(Vec<String>),
    Checklist(Vec<String>),
}

/// Elapsed seconds rendered as `mm:ss`.
pub fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}", secs / 60, secs % 60)
}

impl WorkbenchState {
    pub fn view(&self) -> WorkbenchViewModel {
        WorkbenchViewModel {
            run: self.run(),
            file_name: self.file_name().to_string(),
            upload_progress: self.upload_progress(),
            elapsed_seconds: self.elapsed_seconds(),
            run_status: derive_run_status(self),
            stages: derive_stages(self),
            decision_chips: derive_chips(self),
            evidence: derive_evidence(self),
            report_sections: derive_report_sections(self),
            tool_calls: self.ledger().tool_calls().to_vec(),
            milestones: self.ledger().milestones().to_vec(),
            history: self.history().to_vec(),
            raw_logs: self.ledger().raw_logs().to_vec(),
            proposal: self.proposal().cloned(),
            conversation: self.conversation().to_vec(),
            streaming_text: self.active_turn().map(|t| t.display.clone()),
            dirty: self.is_dirty(),
        }
    }
}

fn phase_label(stage: Stage) -> &'static str {
    match stage {
        Stage::Intake => "Collecting data",
        Stage::Preprocess => "Preprocessing",
        Stage::Rag => "RAG analysis",
        Stage::Visualization => "Visualization",
        Stage::Merge => "Merging results",
        Stage::Report => "Building report",
    }
}

fn derive_run_status(state: &WorkbenchState) -> Option<RunStatusView> {
    if !matches!(
        state.run(),
        RunState::Running | RunState::NeedsUser | RunState::Error
    ) {
        return None;
    }
    let completed = state.ledger().completed_calls();
    let progress = ((completed * 100 / EXPECTED_TOOL_CALLS) as u8).min(100);
    let last_tool = state.ledger().last_call_name().unwrap_or("").to_string();
    let elapsed = format_elapsed(state.elapsed_seconds());
    let phase = match state.run() {
        RunState::NeedsUser => "Awaiting approval".to_string(),
        RunState::Error => {
            let tool = state.error().map(|e| e.tool.as_str()).unwrap_or("unknown");
            format!("Failed - {tool}")
        }
        _ => phase_label(state.active_stage().unwrap_or(Stage::Intake)).to_string(),
    };
    Some(RunStatusView {
        phase,
        progress,
        last_tool,
        elapsed,
    })
}

fn stage_of_tool(name: &str) -> Option<Stage> {
    match name {
        "fetch_sample" => Some(Stage::Intake),
        "chat_analysis" | "preprocess_apply" => Some(Stage::Preprocess),
        "rag_query" => Some(Stage::Rag),
        "create_report" => Some(Stage::Report),
        _ => None,
    }
}

fn derive_stages(state: &WorkbenchState) -> Vec<StageRowView> {
    if matches!(state.run(), RunState::Empty | RunState::Uploading) {
        return Vec::new();
    }
    let failed_stage = state.error().and_then(|e| e.stage);

    Stage::ALL
        .iter()
        .map(|&stage| {
            let (status, sublabel) = if failed_stage == Some(stage) {
                let message = state
                    .error()
                    .map(|e| crate::state::clip(&e.message, 40))
                    .unwrap_or_default();
                (StageStatus::Failed, Some(format!("Failed - {message}")))
            } else if state.run() == RunState::NeedsUser && stage == Stage::Preprocess {
                let column = state
                    .proposal()
                    .map(|p| p.column.clone())
                    .unwrap_or_default();
                (
                    StageStatus::NeedsUser,
                    Some(format!("Awaiting approval - {column}")),
                )
            } else if state.completed_stages().contains(&stage) || state.run() == RunState::Success
            {
                (StageStatus::Success, None)
            } else if state.run() == RunState::Running && state.active_stage() == Some(stage) {
                (StageStatus::Running, Some("Processing...".to_string()))
            } else {
                (StageStatus::Queued, None)
            };

            let tool_count = if matches!(status, StageStatus::Success | StageStatus::Running) {
                Some(
                    state
                        .ledger()
                        .tool_calls()
                        .iter()
                        .filter(|tc| stage_of_tool(&tc.name) == Some(stage))
                        .count(),
                )
            } else {
                None
            };

            StageRowView {
                stage,
                label: stage.label(),
                status,
                sublabel,
                tool_count,
            }
        })
        .collect()
}

const CHIP_STAGES: [(&str, Stage); 4] = [
    ("Preprocess", Stage::Preprocess),
    ("RAG", Stage::Rag),
    ("Viz", Stage::Visualization),
    ("Report", Stage::Report),
];

fn derive_chips(state: &WorkbenchState) -> Vec<DecisionChipView> {
    if matches!(state.run(), RunState::Empty | RunState::Uploading) {
        return Vec::new();
    }
    let failed_stage = state.error().and_then(|e| e.stage);

    let mut chips: Vec<DecisionChipView> = CHIP_STAGES
        .iter()
        .map(|&(label, stage)| {
            let value = if state.run() == RunState::NeedsUser && stage == Stage::Preprocess {
                ChipValue::Blocked
            } else if failed_stage == Some(stage) {
                ChipValue::Failed
            } else if state.run() == RunState::Success || state.completed_stages().contains(&stage)
            {
                ChipValue::Done
            } else if state.run() == RunState::Running && state.active_stage() == Some(stage) {
                ChipValue::Running
            } else {
                ChipValue::On
            };
            DecisionChipView { label, value }
        })
        .collect();
    chips.push(DecisionChipView {
        label: "Mode",
        value: ChipValue::Full,
    });
    chips
}

fn derive_evidence(state: &WorkbenchState) -> EvidenceView {
    let data = if state.file_name().is_empty() {
        "-".to_string()
    } else {
        state.file_name().to_string()
    };
    let scope = state
        .schema()
        .map(|s| format!("{}x{}", s.sample_rows, s.columns.len()))
        .unwrap_or_else(|| "-".to_string());
    let compute = format!("v3 · {}", format_elapsed(state.elapsed_seconds()));
    let rag = state
        .retrieval()
        .map(|r| format!("{} chunks", r.chunks.len()))
        .unwrap_or_else(|| "OFF".to_string());
    EvidenceView {
        data,
        scope,
        compute,
        rag,
    }
}

fn derive_report_sections(state: &WorkbenchState) -> Vec<ReportSection> {
    match state.run() {
        RunState::Success => {
            let Some(report) = state.report() else {
                return Vec::new();
            };
            let mut sections = vec![ReportSection::Paragraph(report.summary_text.clone())];
            if let Some(retrieval) = state.retrieval() {
                sections.push(ReportSection::Heading("Retrieved Evidence".to_string()));
                sections.push(ReportSection::NumberedList(
                    retrieval
                        .chunks
                        .iter()
                        .map(|c| {
                            format!("[score {:.2}] {}", c.score, crate::state::clip(&c.snippet, 120))
                        })
                        .collect(),
                ));
            }
            sections
        }
        RunState::Running => {
            let mut items = Vec::new();
            if let Some(schema) = state.schema() {
                items.push(format!(
                    "Loaded dataset schema - {} sample rows x {} columns detected",
                    schema.sample_rows,
                    schema.columns.len()
                ));
            }
            match state.analysis() {
                Some(analysis) => items.push(crate::state::clip(&analysis.answer, 120)),
                None => items.push("Scanning for patterns...".to_string()),
            }
            items.push("Planning pipeline steps...".to_string());
            vec![
                ReportSection::Paragraph(format!(
                    "Analyzing {}. Identifying preprocessing steps and patterns.",
                    state.file_name()
                )),
                ReportSection::Heading("Steps in Progress".to_string()),
                ReportSection::NumberedList(items),
            ]
        }
        RunState::NeedsUser => {
            let Some(p) = state.proposal() else {
                return Vec::new();
            };
            vec![
                ReportSection::Paragraph(
                    "Missing values found that need your attention before proceeding.".to_string(),
                ),
                ReportSection::Heading("Finding".to_string()),
                ReportSection::NumberedList(vec![
                    format!(
                        "{} rows in '{}' column have null values ({:.2}%)",
                        p.missing_count, p.column, p.missing_percent
                    ),
                    format!(
                        "Recommended strategy: {} imputation -> '{}'",
                        p.strategy, p.fill_value
                    ),
                    "Downstream steps are blocked until this is resolved".to_string(),
                ]),
                ReportSection::Heading("Proposed Changes".to_string()),
                ReportSection::Checklist(vec![
                    format!(
                        "Impute '{}' nulls with {} value ('{}')",
                        p.column, p.strategy, p.fill_value
                    ),
                    format!("Flag imputed rows with a new boolean column '{}_imputed'", p.column),
                ]),
            ]
        }
        RunState::Error => {
            let message = state
                .error()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "An error occurred during analysis.".to_string());
            vec![ReportSection::Paragraph(message)]
        }
        RunState::Empty | RunState::Uploading => Vec::new(),
    }
}
