use std::sync::Once;

use workbench_core::{
    update, AnalysisSummary, CallStatus, Effect, EvidenceChunk, Msg, ReportSummary,
    RetrievalSummary, RunState, SchemaSummary, Stage, StageFailure, StageRequest, StageSuccess,
    UploadReceipt, WorkbenchState,
};

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(workbench_logging::initialize_for_tests);
}

const ANSWER_WITH_MISSING: &str =
    r#"The "Region" column has 142 missing values (3.25%). Recommend mode imputation."#;
const CLEAN_ANSWER: &str = "The dataset looks consistent and complete. Proceed with the analysis.";

fn receipt() -> UploadReceipt {
    UploadReceipt {
        dataset_id: 11,
        source_id: "src-11".to_string(),
        file_name: "sales.csv".to_string(),
    }
}

fn schema() -> SchemaSummary {
    SchemaSummary {
        columns: vec!["id".into(), "Region".into(), "price".into()],
        sample_rows: 5,
    }
}

fn start_run(state: WorkbenchState) -> (WorkbenchState, Vec<Effect>) {
    let (state, _) = update(
        state,
        Msg::UploadRequested {
            file_name: "sales.csv".to_string(),
            content: b"id,Region,price\n".to_vec(),
        },
    );
    update(state, Msg::UploadFinished { result: Ok(receipt()) })
}

fn pending_entry(effects: &[Effect]) -> u64 {
    effects
        .iter()
        .find_map(|effect| match effect {
            Effect::RunStage { entry_id, .. } => Some(*entry_id),
            _ => None,
        })
        .expect("a RunStage effect")
}

fn finish(
    state: WorkbenchState,
    entry_id: u64,
    success: StageSuccess,
) -> (WorkbenchState, Vec<Effect>) {
    update(
        state,
        Msg::StageFinished {
            entry_id,
            duration: "0.3s".to_string(),
            outcome: Ok(success),
        },
    )
}

/// Drive upload + intake + analysis with the given analysis answer.
fn run_until_analysis(answer: &str) -> (WorkbenchState, Vec<Effect>) {
    let (state, effects) = start_run(WorkbenchState::new());
    let intake = pending_entry(&effects);
    let (state, effects) = finish(state, intake, StageSuccess::Schema(schema()));
    let analysis = pending_entry(&effects);
    finish(
        state,
        analysis,
        StageSuccess::Analysis(AnalysisSummary {
            answer: answer.to_string(),
            session_id: 77,
        }),
    )
}

fn retrieval() -> RetrievalSummary {
    RetrievalSummary {
        chunks: vec![
            EvidenceChunk {
                score: 0.91,
                snippet: "price spikes in northern region".to_string(),
            },
            EvidenceChunk {
                score: 0.42,
                snippet: "weekly seasonality".to_string(),
            },
        ],
    }
}

fn report() -> ReportSummary {
    ReportSummary {
        report_id: "rep-9".to_string(),
        summary_text: "Sales are stable with two anomalies.".to_string(),
    }
}

#[test]
fn upload_success_starts_the_intake_stage() {
    init_logging();
    let (state, effects) = start_run(WorkbenchState::new());

    assert_eq!(state.run(), RunState::Running);
    assert_eq!(state.upload_progress(), 100);
    assert_eq!(effects.len(), 1);
    let Effect::RunStage { request, .. } = &effects[0] else {
        panic!("expected intake stage, got {effects:?}");
    };
    assert_eq!(
        request,
        &StageRequest::FetchSample {
            source_id: "src-11".to_string()
        }
    );
    assert_eq!(state.ledger().tool_calls().len(), 1);
    assert_eq!(state.ledger().tool_calls()[0].name, "fetch_sample");
    assert_eq!(state.ledger().milestones()[0].title, "Upload complete");
}

#[test]
fn upload_failure_moves_to_error() {
    init_logging();
    let (state, _) = update(
        WorkbenchState::new(),
        Msg::UploadRequested {
            file_name: "sales.csv".to_string(),
            content: Vec::new(),
        },
    );
    let (state, effects) = update(
        state,
        Msg::UploadFinished {
            result: Err(StageFailure::new("disk full")),
        },
    );

    assert_eq!(state.run(), RunState::Error);
    assert!(effects.is_empty());
    let error = state.error().expect("error recorded");
    assert_eq!(error.tool, "upload");
    assert_eq!(error.message, "disk full");
}

#[test]
fn clean_analysis_runs_rag_and_report_to_success() {
    init_logging();
    let (state, effects) = run_until_analysis(CLEAN_ANSWER);
    assert_eq!(state.run(), RunState::Running);
    assert!(state.proposal().is_none());

    let rag = pending_entry(&effects);
    let (state, effects) = finish(state, rag, StageSuccess::Retrieval(Some(retrieval())));
    assert!(state.completed_stages().contains(&Stage::Rag));

    let report_entry = pending_entry(&effects);
    let (state, effects) = finish(state, report_entry, StageSuccess::Report(report()));

    assert_eq!(state.run(), RunState::Success);
    assert!(effects.is_empty());
    for stage in Stage::ALL {
        assert!(state.completed_stages().contains(&stage), "{stage:?}");
    }
    let names: Vec<_> = state
        .ledger()
        .tool_calls()
        .iter()
        .map(|tc| tc.name.as_str())
        .collect();
    assert_eq!(
        names,
        vec!["fetch_sample", "chat_analysis", "rag_query", "create_report"]
    );
    assert!(state
        .ledger()
        .tool_calls()
        .iter()
        .all(|tc| tc.status == CallStatus::Completed));
}

#[test]
fn missing_values_suspend_for_approval() {
    init_logging();
    let (state, effects) = run_until_analysis(ANSWER_WITH_MISSING);

    assert_eq!(state.run(), RunState::NeedsUser);
    assert!(effects.is_empty(), "pipeline must suspend, got {effects:?}");
    let proposal = state.proposal().expect("proposal present");
    assert_eq!(proposal.column, "Region");
    assert_eq!(proposal.missing_count, 142);
    assert_eq!(
        state.ledger().milestones().last().unwrap().title,
        "Approval required"
    );
}

#[test]
fn proposal_exists_iff_needs_user() {
    init_logging();
    // Before the gate: Running without a proposal.
    let (state, effects) = start_run(WorkbenchState::new());
    assert!(state.proposal().is_none());

    let intake = pending_entry(&effects);
    let (state, effects) = finish(state, intake, StageSuccess::Schema(schema()));
    let analysis = pending_entry(&effects);
    let (state, _) = finish(
        state,
        analysis,
        StageSuccess::Analysis(AnalysisSummary {
            answer: ANSWER_WITH_MISSING.to_string(),
            session_id: 77,
        }),
    );
    assert_eq!(state.run(), RunState::NeedsUser);
    assert!(state.proposal().is_some());

    // Every way out of NeedsUser clears the proposal with the transition.
    let (approved, _) = update(state.clone(), Msg::ApproveClicked);
    assert_ne!(approved.run(), RunState::NeedsUser);
    assert!(approved.proposal().is_none());

    let (rejected, _) = update(state.clone(), Msg::RejectClicked);
    assert_ne!(rejected.run(), RunState::NeedsUser);
    assert!(rejected.proposal().is_none());

    let (edited, _) = update(
        state.clone(),
        Msg::EditSubmitted {
            text: "0".to_string(),
        },
    );
    assert_ne!(edited.run(), RunState::NeedsUser);
    assert!(edited.proposal().is_none());

    let (cancelled, _) = update(state, Msg::CancelClicked);
    assert_eq!(cancelled.run(), RunState::Empty);
    assert!(cancelled.proposal().is_none());
}

#[test]
fn approve_applies_remediation_then_rag_and_report() {
    init_logging();
    let (state, _) = run_until_analysis(ANSWER_WITH_MISSING);
    let (state, effects) = update(state, Msg::ApproveClicked);

    assert_eq!(state.run(), RunState::Running);
    assert!(matches!(effects[0], Effect::ResumeRun));
    let Effect::RunStage { entry_id, request } = &effects[1] else {
        panic!("expected remediation stage");
    };
    assert_eq!(
        request,
        &StageRequest::PreprocessApply {
            dataset_id: 11,
            column: "Region".to_string(),
            strategy: "mode".to_string(),
            fill_value: "auto".to_string(),
        }
    );
    assert_eq!(state.history()[0].title, "Approved");

    let (state, effects) = finish(state, *entry_id, StageSuccess::RemediationApplied);
    assert!(state.completed_stages().contains(&Stage::Preprocess));
    let rag = pending_entry(&effects);
    let (state, effects) = finish(state, rag, StageSuccess::Retrieval(Some(retrieval())));
    let report_entry = pending_entry(&effects);
    let (state, _) = finish(state, report_entry, StageSuccess::Report(report()));
    assert_eq!(state.run(), RunState::Success);
}

#[test]
fn edit_overrides_the_fill_value() {
    init_logging();
    let (state, _) = run_until_analysis(ANSWER_WITH_MISSING);
    let (state, effects) = update(
        state,
        Msg::EditSubmitted {
            text: "Unknown region".to_string(),
        },
    );

    let Effect::RunStage { request, .. } = &effects[1] else {
        panic!("expected remediation stage");
    };
    let StageRequest::PreprocessApply { fill_value, .. } = request else {
        panic!("expected preprocess request");
    };
    assert_eq!(fill_value, "Unknown region");
    assert_eq!(state.history()[0].title, "User Edit");
}

#[test]
fn reject_skips_remediation_and_still_succeeds() {
    init_logging();
    let (state, _) = run_until_analysis(ANSWER_WITH_MISSING);
    let (state, effects) = update(state, Msg::RejectClicked);

    assert!(matches!(effects[0], Effect::ResumeRun));
    let Effect::RunStage { entry_id, request } = &effects[1] else {
        panic!("expected rag stage");
    };
    assert!(matches!(request, StageRequest::RagQuery { .. }));

    let (state, effects) = finish(state, *entry_id, StageSuccess::Retrieval(None));
    // The 204 path still completes the stage.
    assert!(state.completed_stages().contains(&Stage::Rag));
    let report_entry = pending_entry(&effects);
    let (state, _) = finish(state, report_entry, StageSuccess::Report(report()));

    assert_eq!(state.run(), RunState::Success);
    assert!(state
        .ledger()
        .tool_calls()
        .iter()
        .all(|tc| tc.name != "preprocess_apply"));
}

#[test]
fn stage_failure_stops_the_pipeline_until_retry() {
    init_logging();
    let (state, effects) = start_run(WorkbenchState::new());
    let intake = pending_entry(&effects);
    let (state, effects) = update(
        state,
        Msg::StageFinished {
            entry_id: intake,
            duration: "0.2s".to_string(),
            outcome: Err(StageFailure::new("backend unavailable")),
        },
    );

    assert_eq!(state.run(), RunState::Error);
    assert!(effects.is_empty(), "no further stages, got {effects:?}");
    let failed: Vec<_> = state
        .ledger()
        .tool_calls()
        .iter()
        .filter(|tc| tc.status == CallStatus::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].result.as_deref(), Some("backend unavailable"));
    let error = state.error().expect("error details");
    assert_eq!(error.tool, "fetch_sample");
    assert_eq!(error.stage, Some(Stage::Intake));

    // Retry restarts the full sequence from intake with the same source.
    let (state, effects) = update(state, Msg::RetryClicked);
    assert_eq!(state.run(), RunState::Running);
    assert!(state.error().is_none());
    assert!(matches!(effects[0], Effect::ResumeRun));
    let Effect::RunStage { request, .. } = &effects[1] else {
        panic!("expected intake stage");
    };
    assert_eq!(
        request,
        &StageRequest::FetchSample {
            source_id: "src-11".to_string()
        }
    );
}

#[test]
fn completed_stages_grow_monotonically() {
    init_logging();
    let (state, effects) = start_run(WorkbenchState::new());
    let mut seen = state.completed_stages().clone();

    let intake = pending_entry(&effects);
    let (state, effects) = finish(state, intake, StageSuccess::Schema(schema()));
    assert!(state.completed_stages().is_superset(&seen));
    seen = state.completed_stages().clone();

    let analysis = pending_entry(&effects);
    let (state, effects) = finish(
        state,
        analysis,
        StageSuccess::Analysis(AnalysisSummary {
            answer: CLEAN_ANSWER.to_string(),
            session_id: 5,
        }),
    );
    assert!(state.completed_stages().is_superset(&seen));
    seen = state.completed_stages().clone();

    let rag = pending_entry(&effects);
    let (state, effects) = finish(state, rag, StageSuccess::Retrieval(None));
    assert!(state.completed_stages().is_superset(&seen));
    seen = state.completed_stages().clone();

    let report_entry = pending_entry(&effects);
    let (state, _) = finish(state, report_entry, StageSuccess::Report(report()));
    assert!(state.completed_stages().is_superset(&seen));
}

#[test]
fn cancel_discards_the_run_without_fake_completions() {
    init_logging();
    let (state, effects) = start_run(WorkbenchState::new());
    let intake = pending_entry(&effects);

    let (state, effects) = update(state, Msg::CancelClicked);
    assert_eq!(state.run(), RunState::Empty);
    assert_eq!(effects, vec![Effect::CancelRun]);
    assert!(!state.ledger().has_running());
    let entry = state.ledger().entry(intake).unwrap();
    assert_eq!(entry.status, CallStatus::Failed);
    assert_eq!(entry.result.as_deref(), Some("cancelled"));

    // A completion that was already in flight when the token fired must not
    // mutate anything.
    let before = state.clone();
    let (state, effects) = finish(state, intake, StageSuccess::Schema(schema()));
    assert!(effects.is_empty());
    assert_eq!(state.ledger(), before.ledger());
    assert_eq!(state.run(), RunState::Empty);
}

#[test]
fn cancel_from_terminal_state_is_a_no_op() {
    init_logging();
    let (state, effects) = run_until_analysis(CLEAN_ANSWER);
    let rag = pending_entry(&effects);
    let (state, effects) = finish(state, rag, StageSuccess::Retrieval(None));
    let report_entry = pending_entry(&effects);
    let (state, _) = finish(state, report_entry, StageSuccess::Report(report()));
    assert_eq!(state.run(), RunState::Success);

    let (state, effects) = update(state, Msg::CancelClicked);
    assert_eq!(state.run(), RunState::Success);
    assert!(effects.is_empty());
}

#[test]
fn stale_stage_completion_is_ignored() {
    init_logging();
    let (state, effects) = start_run(WorkbenchState::new());
    let intake = pending_entry(&effects);

    let (state, effects) = finish(state, intake + 100, StageSuccess::Schema(schema()));
    assert!(effects.is_empty());
    assert_eq!(state.run(), RunState::Running);
    assert!(!state.completed_stages().contains(&Stage::Intake));
}

#[test]
fn new_upload_resets_previous_run_and_cancels_it() {
    init_logging();
    let (state, _) = run_until_analysis(ANSWER_WITH_MISSING);
    assert_eq!(state.run(), RunState::NeedsUser);

    let (state, effects) = update(
        state,
        Msg::UploadRequested {
            file_name: "other.csv".to_string(),
            content: b"a,b\n".to_vec(),
        },
    );
    assert_eq!(effects.len(), 2);
    assert!(matches!(effects[0], Effect::CancelRun));
    assert!(matches!(effects[1], Effect::StartUpload { .. }));
    assert_eq!(state.run(), RunState::Uploading);
    assert!(state.proposal().is_none());
    assert!(state.ledger().tool_calls().is_empty());
    assert!(state.ledger().milestones().is_empty());
}

#[test]
fn sample_request_uploads_the_inline_dataset() {
    init_logging();
    let (state, effects) = update(WorkbenchState::new(), Msg::SampleRequested);
    assert_eq!(state.run(), RunState::Uploading);
    let Effect::StartUpload { source } = &effects[0] else {
        panic!("expected upload effect");
    };
    assert_eq!(source.file_name, workbench_core::SAMPLE_FILE_NAME);
    assert_eq!(source.content, workbench_core::SAMPLE_CSV.as_bytes());
}

#[test]
fn tick_advances_the_clock_only_while_active() {
    init_logging();
    let (state, _) = update(WorkbenchState::new(), Msg::Tick);
    assert_eq!(state.elapsed_seconds(), 0);

    let (state, _) = start_run(state);
    let (state, _) = update(state, Msg::Tick);
    let (state, _) = update(state, Msg::Tick);
    assert_eq!(state.elapsed_seconds(), 2);

    let (state, _) = update(state, Msg::CancelClicked);
    assert_eq!(state.elapsed_seconds(), 0);
}
