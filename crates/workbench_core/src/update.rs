use serde_json::json;

use crate::effect::{Effect, StageRequest, TurnRequest};
use crate::extract::{KeywordExtractor, ProposalExtractor};
use crate::ledger::{Milestone, MilestoneStatus};
use crate::msg::{Msg, StageFailure, StageOutcome, StageSuccess};
use crate::state::{
    clip, ActiveTurn, ChatEntry, ChatRole, PendingCall, RunError, RunState, Stage, StageCall,
    UploadSource, WorkbenchState,
};

/// Question sent to the analysis stage for every run.
pub const ANALYSIS_QUESTION: &str = "Analyze this dataset. Identify any missing values, \
     data quality issues, and recommend preprocessing steps.";

/// Retrieval query issued by the RAG stage.
pub const RAG_QUERY_TEXT: &str = "Analyze patterns and anomalies in the dataset";
pub const RAG_TOP_K: u32 = 5;

/// Inline dataset behind the "Try sample dataset" flow.
pub const SAMPLE_CSV: &str = "id,name,region,price,date\n\
     1,Product A,North,100,2024-01-01\n\
     2,Product B,South,200,2024-01-02\n";
pub const SAMPLE_FILE_NAME: &str = "sample_data.csv";

/// Pure update function: applies a message to state and returns any effects,
/// using the default [`KeywordExtractor`] for the HITL gate.
pub fn update(state: WorkbenchState, msg: Msg) -> (WorkbenchState, Vec<Effect>) {
    update_with(state, msg, &KeywordExtractor)
}

/// Like [`update`], with a caller-supplied proposal extractor.
pub fn update_with(
    mut state: WorkbenchState,
    msg: Msg,
    extractor: &dyn ProposalExtractor,
) -> (WorkbenchState, Vec<Effect>) {
    let effects = match msg {
        Msg::UploadRequested { file_name, content } => {
            start_upload(&mut state, file_name, content)
        }
        Msg::SampleRequested => start_upload(
            &mut state,
            SAMPLE_FILE_NAME.to_string(),
            SAMPLE_CSV.as_bytes().to_vec(),
        ),
        Msg::UploadProgress { percent } => {
            if state.run() == RunState::Uploading {
                state.set_upload_progress(percent);
            }
            Vec::new()
        }
        Msg::UploadFinished { result } => handle_upload_finished(&mut state, result),
        Msg::StageFinished {
            entry_id,
            duration,
            outcome,
        } => handle_stage_finished(&mut state, entry_id, duration, outcome, extractor),
        Msg::ApproveClicked => handle_decision(&mut state, Decision::Approve),
        Msg::RejectClicked => handle_decision(&mut state, Decision::Reject),
        Msg::EditSubmitted { text } => handle_decision(&mut state, Decision::Edit(text)),
        Msg::RetryClicked => handle_retry(&mut state),
        Msg::FollowUpSubmitted { text } => handle_follow_up(&mut state, text),
        Msg::TurnSession {
            turn_id,
            session_id,
        } => {
            if state.active_turn().is_some_and(|t| t.turn_id == turn_id) {
                // Last write wins; the server may reassign ids mid-turn.
                state.set_session_id(session_id);
            }
            Vec::new()
        }
        Msg::TurnThought { turn_id, step } => {
            if let Some(turn) = state.active_turn_mut(turn_id) {
                let duplicate = turn
                    .thoughts
                    .iter()
                    .any(|t| t.phase == step.phase && t.message == step.message);
                if !duplicate {
                    turn.thoughts.push(step);
                }
            }
            Vec::new()
        }
        Msg::TurnDisplay { turn_id, text } => {
            if let Some(turn) = state.active_turn_mut(turn_id) {
                turn.display = text;
            }
            Vec::new()
        }
        Msg::TurnFinalized {
            turn_id,
            answer,
            thoughts,
            duration,
        } => handle_turn_finalized(&mut state, turn_id, answer, thoughts, duration),
        Msg::TurnFailed {
            turn_id,
            message,
            duration,
        } => handle_turn_failed(&mut state, turn_id, message, duration),
        Msg::CancelClicked => handle_cancel(&mut state),
        Msg::ResetClicked => {
            state = WorkbenchState::new();
            state.mark_dirty();
            vec![Effect::CancelRun]
        }
        Msg::Tick => {
            state.tick();
            Vec::new()
        }
        Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn start_upload(state: &mut WorkbenchState, file_name: String, content: Vec<u8>) -> Vec<Effect> {
    let mut effects = Vec::new();
    // Only one run may be active; abort anything in flight before the reset
    // wipes its bookkeeping.
    if !matches!(state.run(), RunState::Empty) || state.active_turn().is_some() {
        effects.push(Effect::CancelRun);
    }
    state.reset_for_new_run(file_name.clone());
    state.set_run(RunState::Uploading);
    effects.push(Effect::StartUpload {
        source: UploadSource {
            file_name,
            content,
            content_type: "text/csv".to_string(),
        },
    });
    effects
}

fn handle_upload_finished(
    state: &mut WorkbenchState,
    result: Result<crate::state::UploadReceipt, StageFailure>,
) -> Vec<Effect> {
    if state.run() != RunState::Uploading {
        return Vec::new();
    }
    match result {
        Ok(receipt) => {
            state.set_upload_progress(100);
            let timestamp = state.elapsed_label();
            state.ledger_mut().note(Milestone::new(
                MilestoneStatus::Completed,
                "Upload complete",
                Some(format!("{} · {}", receipt.file_name, receipt.source_id)),
                timestamp,
            ));
            state.set_receipt(receipt.clone());
            state.set_run(RunState::Running);
            vec![issue_stage(
                state,
                StageCall::FetchSample,
                StageRequest::FetchSample {
                    source_id: receipt.source_id,
                },
            )]
        }
        Err(failure) => {
            transition_to_error(state, "upload", None, failure.message);
            Vec::new()
        }
    }
}

fn handle_stage_finished(
    state: &mut WorkbenchState,
    entry_id: u64,
    duration: String,
    outcome: StageOutcome,
    extractor: &dyn ProposalExtractor,
) -> Vec<Effect> {
    if state.run() != RunState::Running {
        return Vec::new();
    }
    let Some(pending) = state.pending_call() else {
        return Vec::new();
    };
    if pending.entry_id != entry_id {
        // Stale completion from a superseded run; the engine's token check
        // should already have discarded it.
        return Vec::new();
    }
    state.take_pending_call();
    let call = pending.call;

    let success = match outcome {
        Ok(success) => success,
        Err(failure) => {
            stage_failed(state, entry_id, call, duration, failure);
            return Vec::new();
        }
    };

    match success {
        StageSuccess::Schema(schema) => {
            let summary = format!(
                "{} columns, {} sample rows",
                schema.columns.len(),
                schema.sample_rows
            );
            let timestamp = state.elapsed_label();
            let ledger = state.ledger_mut();
            ledger.complete(entry_id, summary.clone(), Some(duration));
            ledger.log(
                "tool_result: fetch_sample",
                &json!({"columns": schema.columns.len(), "rows": schema.sample_rows}),
                false,
            );
            ledger.note(Milestone::new(
                MilestoneStatus::Completed,
                "Schema inspected",
                Some(summary),
                timestamp,
            ));
            state.set_schema(schema);
            state.mark_stage_completed(Stage::Intake);
            match analysis_request(state) {
                Some(request) => vec![issue_stage(state, StageCall::ChatAnalysis, request)],
                None => missing_context(state),
            }
        }
        StageSuccess::Analysis(analysis) => {
            let mut summary = clip(&analysis.answer, 100);
            if analysis.answer.chars().count() > 100 {
                summary.push_str("...");
            }
            let timestamp = state.elapsed_label();
            let ledger = state.ledger_mut();
            ledger.complete(entry_id, summary.clone(), Some(duration));
            ledger.log(
                "tool_result: chat_analysis",
                &json!({
                    "session_id": analysis.session_id,
                    "answer_length": analysis.answer.len(),
                }),
                false,
            );
            ledger.note(Milestone::new(
                MilestoneStatus::Completed,
                "Analysis complete",
                Some(summary),
                timestamp,
            ));
            state.set_session_id(analysis.session_id);
            state.mark_stage_completed(Stage::Preprocess);

            let decision = extractor.analyze(&analysis.answer);
            state.set_analysis(analysis);
            match decision {
                Some(proposal) => {
                    let timestamp = state.elapsed_label();
                    state.ledger_mut().note(
                        Milestone::new(
                            MilestoneStatus::NeedsUser,
                            "Approval required",
                            Some(format!(
                                "{} · {} rows · {}",
                                proposal.column, proposal.missing_count, proposal.strategy
                            )),
                            timestamp,
                        )
                        .selected(),
                    );
                    state.set_proposal(proposal);
                    state.set_run(RunState::NeedsUser);
                    Vec::new()
                }
                None => match rag_request(state) {
                    Some(request) => vec![issue_stage(state, StageCall::RagQuery, request)],
                    None => missing_context(state),
                },
            }
        }
        StageSuccess::Retrieval(retrieval) => {
            let timestamp = state.elapsed_label();
            match retrieval {
                Some(retrieval) => {
                    let summary = format!("{} chunks retrieved", retrieval.chunks.len());
                    let ledger = state.ledger_mut();
                    ledger.complete(entry_id, summary.clone(), Some(duration));
                    ledger.log(
                        "tool_result: rag_query",
                        &json!({"chunks": retrieval.chunks.len()}),
                        false,
                    );
                    ledger.note(Milestone::new(
                        MilestoneStatus::Completed,
                        "RAG retrieved",
                        Some(summary),
                        timestamp,
                    ));
                    state.set_retrieval(retrieval);
                }
                None => {
                    let ledger = state.ledger_mut();
                    ledger.complete(entry_id, "No matching documents", Some(duration));
                    ledger.log("tool_result: rag_query", &json!({"chunks": 0}), false);
                    ledger.note(Milestone::new(
                        MilestoneStatus::Completed,
                        "RAG search",
                        Some("No matching documents".to_string()),
                        timestamp,
                    ));
                }
            }
            state.mark_stage_completed(Stage::Rag);
            match state.session_id() {
                Some(session_id) => vec![issue_stage(
                    state,
                    StageCall::CreateReport,
                    StageRequest::CreateReport { session_id },
                )],
                None => missing_context(state),
            }
        }
        StageSuccess::RemediationApplied => {
            let ledger = state.ledger_mut();
            ledger.complete(entry_id, "Preprocessing applied", Some(duration));
            ledger.log("tool_result: preprocess_apply", &json!({"success": true}), false);
            state.mark_stage_completed(Stage::Preprocess);
            match rag_request(state) {
                Some(request) => vec![issue_stage(state, StageCall::RagQuery, request)],
                None => missing_context(state),
            }
        }
        StageSuccess::Report(report) => {
            let timestamp = state.elapsed_label();
            let ledger = state.ledger_mut();
            ledger.complete(entry_id, clip(&report.summary_text, 80), Some(duration));
            ledger.log(
                "tool_result: create_report",
                &json!({"report_id": report.report_id}),
                false,
            );
            ledger.note(Milestone::new(
                MilestoneStatus::Completed,
                "Report generated",
                Some(report.report_id.clone()),
                timestamp,
            ));
            state.set_report(report);
            // The report stage subsumes merge and visualization server-side.
            state.mark_stage_completed(Stage::Report);
            state.mark_stage_completed(Stage::Merge);
            state.mark_stage_completed(Stage::Visualization);
            state.set_run(RunState::Success);
            Vec::new()
        }
    }
}

enum Decision {
    Approve,
    Reject,
    Edit(String),
}

fn handle_decision(state: &mut WorkbenchState, decision: Decision) -> Vec<Effect> {
    if state.run() != RunState::NeedsUser {
        return Vec::new();
    }
    // Cleared as soon as the decision is made, so a concurrent cancellation
    // cannot resurrect the proposal.
    let Some(proposal) = state.take_proposal() else {
        return Vec::new();
    };

    let timestamp = state.elapsed_label();
    let item = match &decision {
        Decision::Approve => Milestone::new(
            MilestoneStatus::Completed,
            "Approved",
            Some("User confirmed strategy".to_string()),
            timestamp,
        ),
        Decision::Reject => Milestone::new(
            MilestoneStatus::Failed,
            "Rejected Changes",
            Some("User cancelled action".to_string()),
            timestamp,
        ),
        Decision::Edit(text) => Milestone::new(
            MilestoneStatus::Completed,
            "User Edit",
            Some(clip(text, 80)),
            timestamp,
        ),
    };
    state.push_history(item);
    state.set_run(RunState::Running);

    match decision {
        Decision::Reject => match rag_request(state) {
            Some(request) => vec![
                Effect::ResumeRun,
                issue_stage(state, StageCall::RagQuery, request),
            ],
            None => missing_context(state),
        },
        Decision::Approve | Decision::Edit(_) => {
            let Some(receipt) = state.receipt().cloned() else {
                return missing_context(state);
            };
            let fill_value = match decision {
                Decision::Edit(text) => text,
                _ => proposal.fill_value.clone(),
            };
            vec![
                Effect::ResumeRun,
                issue_stage(
                    state,
                    StageCall::PreprocessApply,
                    StageRequest::PreprocessApply {
                        dataset_id: receipt.dataset_id,
                        column: proposal.column,
                        strategy: proposal.strategy,
                        fill_value,
                    },
                ),
            ]
        }
    }
}

fn handle_retry(state: &mut WorkbenchState) -> Vec<Effect> {
    if state.run() != RunState::Error {
        return Vec::new();
    }
    let Some(receipt) = state.receipt().cloned() else {
        return Vec::new();
    };
    state.clear_error();
    state.set_run(RunState::Running);
    vec![
        Effect::ResumeRun,
        issue_stage(
            state,
            StageCall::FetchSample,
            StageRequest::FetchSample {
                source_id: receipt.source_id,
            },
        ),
    ]
}

fn handle_follow_up(state: &mut WorkbenchState, text: String) -> Vec<Effect> {
    let (Some(receipt), Some(session_id)) = (state.receipt().cloned(), state.session_id()) else {
        return Vec::new();
    };
    if state.active_turn().is_some() {
        // One streamed turn at a time.
        return Vec::new();
    }
    state.push_chat(ChatEntry {
        role: ChatRole::User,
        content: text.clone(),
        thoughts: Vec::new(),
    });
    let args = json!({"question": text, "session_id": session_id});
    let started_at = state.elapsed_label();
    let ledger = state.ledger_mut();
    let entry_id = ledger.begin(StageCall::ChatFollowUp.tool_name(), &args, started_at);
    ledger.log("tool_call: chat_followup", &args, false);
    let turn_id = state.alloc_turn_id();
    state.set_active_turn(ActiveTurn {
        turn_id,
        entry_id,
        question: text.clone(),
        display: String::new(),
        thoughts: Vec::new(),
    });
    vec![Effect::StartTurn {
        turn_id,
        request: TurnRequest {
            question: text,
            session_id,
            source_id: receipt.source_id,
        },
    }]
}

fn handle_turn_finalized(
    state: &mut WorkbenchState,
    turn_id: u64,
    answer: String,
    thoughts: Vec<crate::state::ThoughtStep>,
    duration: String,
) -> Vec<Effect> {
    let Some(turn) = state.take_active_turn(turn_id) else {
        return Vec::new();
    };
    let timestamp = state.elapsed_label();
    let ledger = state.ledger_mut();
    ledger.complete(turn.entry_id, clip(&answer, 80), Some(duration));
    ledger.log(
        "tool_result: chat_followup",
        &json!({"answer_length": answer.len()}),
        false,
    );
    ledger.note(Milestone::new(
        MilestoneStatus::Completed,
        "Follow-up",
        Some(clip(&turn.question, 40)),
        timestamp,
    ));
    // The final thought list from the stream overrides the incremental one.
    let thoughts = if thoughts.is_empty() {
        turn.thoughts
    } else {
        thoughts
    };
    state.push_chat(ChatEntry {
        role: ChatRole::Assistant,
        content: answer,
        thoughts,
    });
    Vec::new()
}

fn handle_turn_failed(
    state: &mut WorkbenchState,
    turn_id: u64,
    message: String,
    duration: String,
) -> Vec<Effect> {
    let Some(turn) = state.take_active_turn(turn_id) else {
        return Vec::new();
    };
    let ledger = state.ledger_mut();
    ledger.fail(turn.entry_id, message.clone(), Some(duration));
    ledger.log("tool_error: chat_followup", &json!({"error": message}), true);
    Vec::new()
}

fn handle_cancel(state: &mut WorkbenchState) -> Vec<Effect> {
    let non_terminal = matches!(
        state.run(),
        RunState::Uploading | RunState::Running | RunState::NeedsUser
    );
    let turn_active = state.active_turn().is_some();
    if !non_terminal && !turn_active {
        return Vec::new();
    }

    state.clear_active_turn();
    // In-flight entries will never hear back (the engine discards their
    // results once the token fires); terminalize them here so nothing is
    // left Running.
    state.ledger_mut().fail_running("cancelled");

    if non_terminal {
        state.take_proposal();
        state.take_pending_call();
        state.set_active_stage(None);
        state.set_run(RunState::Empty);
        state.reset_clock();
    }
    vec![Effect::CancelRun]
}

/// Book-keep one remote stage call: ledger entry, raw log, pending-call
/// marker, and the effect that actually runs it.
fn issue_stage(state: &mut WorkbenchState, call: StageCall, request: StageRequest) -> Effect {
    let name = call.tool_name();
    let args = request_args(&request);
    let started_at = state.elapsed_label();
    let ledger = state.ledger_mut();
    let entry_id = ledger.begin(name, &args, started_at);
    ledger.log(&format!("tool_call: {name}"), &args, false);
    state.set_pending_call(PendingCall { entry_id, call });
    state.set_active_stage(call.stage());
    Effect::RunStage { entry_id, request }
}

fn request_args(request: &StageRequest) -> serde_json::Value {
    match request {
        StageRequest::FetchSample { source_id } => json!({"source_id": source_id}),
        StageRequest::ChatAnalysis { source_id, .. } => {
            json!({"source_id": source_id, "question": "Analyze dataset"})
        }
        StageRequest::RagQuery {
            top_k,
            source_filter,
            ..
        } => json!({"top_k": top_k, "source_filter": source_filter}),
        StageRequest::PreprocessApply {
            dataset_id,
            column,
            strategy,
            ..
        } => json!({"dataset_id": dataset_id, "column": column, "strategy": strategy}),
        StageRequest::CreateReport { session_id } => json!({"session_id": session_id}),
    }
}

fn analysis_request(state: &WorkbenchState) -> Option<StageRequest> {
    state.receipt().map(|receipt| StageRequest::ChatAnalysis {
        source_id: receipt.source_id.clone(),
        question: ANALYSIS_QUESTION.to_string(),
    })
}

fn rag_request(state: &WorkbenchState) -> Option<StageRequest> {
    state.receipt().map(|receipt| StageRequest::RagQuery {
        query: RAG_QUERY_TEXT.to_string(),
        top_k: RAG_TOP_K,
        source_filter: vec![receipt.source_id.clone()],
    })
}

/// Run context went missing mid-pipeline (cleared state racing a message);
/// surface it like any other stage failure.
fn missing_context(state: &mut WorkbenchState) -> Vec<Effect> {
    transition_to_error(state, "resume", None, "Missing run context".to_string());
    Vec::new()
}

fn stage_failed(
    state: &mut WorkbenchState,
    entry_id: u64,
    call: StageCall,
    duration: String,
    failure: StageFailure,
) {
    let name = call.tool_name();
    let ledger = state.ledger_mut();
    ledger.fail(entry_id, failure.message.clone(), Some(duration));
    ledger.log(
        &format!("tool_error: {name}"),
        &json!({"error": failure.message}),
        true,
    );
    transition_to_error(state, name, call.stage(), failure.message);
}

fn transition_to_error(
    state: &mut WorkbenchState,
    tool: &str,
    stage: Option<Stage>,
    message: String,
) {
    let timestamp = state.elapsed_label();
    state.ledger_mut().note(
        Milestone::new(
            MilestoneStatus::Failed,
            format!("{tool} failed"),
            Some(clip(&message, 80)),
            timestamp,
        )
        .selected(),
    );
    state.set_error(RunError {
        tool: tool.to_string(),
        stage,
        message,
    });
    state.set_run(RunState::Error);
}
