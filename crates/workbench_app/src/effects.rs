use std::sync::mpsc;
use std::thread;

use workbench_core::{
    AnalysisSummary, Effect, EvidenceChunk, Msg, RetrievalSummary, ReportSummary, SchemaSummary,
    StageFailure, StageRequest, StageSuccess, ThoughtStep, UploadReceipt,
};
use workbench_engine::{
    BackendSettings, EngineEvent, EngineHandle, StageError, StageOutput, UploadPayload,
};
use workbench_logging::workbench_info;

/// Executes core effects against the engine and pumps engine events back
/// into the message channel.
pub struct EffectRunner {
    engine: EngineHandle,
}

impl EffectRunner {
    pub fn new(settings: BackendSettings, msg_tx: mpsc::Sender<Msg>) -> anyhow::Result<Self> {
        let mut engine = EngineHandle::new(settings)?;
        let event_rx = engine
            .take_event_receiver()
            .expect("event receiver taken once");
        spawn_event_pump(event_rx, msg_tx);
        Ok(Self { engine })
    }

    pub fn run(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::StartUpload { source } => {
                    workbench_info!(
                        "StartUpload file={} bytes={}",
                        source.file_name,
                        source.content.len()
                    );
                    self.engine.start_upload(UploadPayload {
                        file_name: source.file_name,
                        content: source.content,
                        content_type: source.content_type,
                    });
                }
                Effect::RunStage { entry_id, request } => {
                    self.engine.run_stage(entry_id, map_stage_request(request));
                }
                Effect::ResumeRun => self.engine.resume_run(),
                Effect::StartTurn { turn_id, request } => {
                    self.engine.start_turn(
                        turn_id,
                        workbench_engine::TurnRequest {
                            question: request.question,
                            session_id: request.session_id,
                            source_id: request.source_id,
                        },
                    );
                }
                Effect::CancelRun => self.engine.cancel(),
            }
        }
    }
}

fn spawn_event_pump(event_rx: mpsc::Receiver<EngineEvent>, msg_tx: mpsc::Sender<Msg>) {
    thread::spawn(move || {
        while let Ok(event) = event_rx.recv() {
            if msg_tx.send(map_event(event)).is_err() {
                break;
            }
        }
    });
}

fn map_stage_request(request: StageRequest) -> workbench_engine::StageRequest {
    match request {
        StageRequest::FetchSample { source_id } => {
            workbench_engine::StageRequest::FetchSample { source_id }
        }
        StageRequest::ChatAnalysis {
            source_id,
            question,
        } => workbench_engine::StageRequest::ChatAnalysis {
            source_id,
            question,
        },
        StageRequest::RagQuery {
            query,
            top_k,
            source_filter,
        } => workbench_engine::StageRequest::RagQuery {
            query,
            top_k,
            source_filter,
        },
        StageRequest::PreprocessApply {
            dataset_id,
            column,
            strategy,
            fill_value,
        } => workbench_engine::StageRequest::PreprocessApply {
            dataset_id,
            column,
            strategy,
            fill_value,
        },
        StageRequest::CreateReport { session_id } => {
            workbench_engine::StageRequest::CreateReport { session_id }
        }
    }
}

fn map_event(event: EngineEvent) -> Msg {
    match event {
        EngineEvent::UploadProgress { percent } => Msg::UploadProgress { percent },
        EngineEvent::UploadFinished { result, .. } => Msg::UploadFinished {
            result: result.map(map_receipt).map_err(map_failure),
        },
        EngineEvent::StageFinished {
            entry_id,
            result,
            duration_ms,
        } => Msg::StageFinished {
            entry_id,
            duration: format_duration(duration_ms),
            outcome: result.map(map_output).map_err(map_failure),
        },
        EngineEvent::TurnSession {
            turn_id,
            session_id,
        } => Msg::TurnSession {
            turn_id,
            session_id,
        },
        EngineEvent::TurnThought { turn_id, step } => Msg::TurnThought {
            turn_id,
            step: map_thought(step),
        },
        EngineEvent::TurnDisplay { turn_id, text } => Msg::TurnDisplay { turn_id, text },
        EngineEvent::TurnFinalized {
            turn_id,
            answer,
            thoughts,
            duration_ms,
        } => Msg::TurnFinalized {
            turn_id,
            answer,
            thoughts: thoughts.into_iter().map(map_thought).collect(),
            duration: format_duration(duration_ms),
        },
        EngineEvent::TurnFailed {
            turn_id,
            message,
            duration_ms,
        } => Msg::TurnFailed {
            turn_id,
            message,
            duration: format_duration(duration_ms),
        },
    }
}

fn map_output(output: StageOutput) -> StageSuccess {
    match output {
        StageOutput::Schema(sample) => StageSuccess::Schema(SchemaSummary {
            columns: sample.columns,
            sample_rows: sample.rows.len(),
        }),
        StageOutput::Analysis(reply) => StageSuccess::Analysis(AnalysisSummary {
            answer: reply.answer,
            session_id: reply.session_id,
        }),
        StageOutput::Retrieval(reply) => StageSuccess::Retrieval(reply.map(|reply| {
            RetrievalSummary {
                chunks: reply
                    .retrieved_chunks
                    .into_iter()
                    .map(|chunk| EvidenceChunk {
                        score: chunk.score,
                        snippet: chunk.snippet,
                    })
                    .collect(),
            }
        })),
        StageOutput::RemediationApplied => StageSuccess::RemediationApplied,
        StageOutput::Report(reply) => StageSuccess::Report(ReportSummary {
            report_id: reply.report_id,
            summary_text: reply.summary_text,
        }),
    }
}

fn map_receipt(record: workbench_engine::DatasetRecord) -> UploadReceipt {
    UploadReceipt {
        dataset_id: record.id,
        source_id: record.source_id,
        file_name: record.filename,
    }
}

fn map_failure(error: StageError) -> StageFailure {
    StageFailure::new(error.message)
}

fn map_thought(step: workbench_engine::ThoughtStep) -> ThoughtStep {
    ThoughtStep {
        phase: step.phase,
        message: step.message,
        status: step.status,
    }
}

fn format_duration(duration_ms: u64) -> String {
    format!("{:.1}s", duration_ms as f64 / 1000.0)
}
