use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use workbench_logging::workbench_debug;

use crate::client::{BackendClient, BackendSettings, HttpBackendClient, UploadProgress};
use crate::stream::{drive_turn, TurnConfig};
use crate::types::{
    ChatRequest, EngineEvent, EntryId, PreprocessApplyRequest, PreprocessOperation,
    RagQueryRequest, ReportCreateRequest, StageError, StageOutput, StageRequest, TurnId,
    TurnRequest, UploadPayload,
};

enum EngineCommand {
    StartUpload { source: UploadPayload },
    RunStage { entry_id: EntryId, request: StageRequest },
    ResumeRun,
    StartTurn { turn_id: TurnId, request: TurnRequest },
    CancelRun,
}

/// Bridge between the synchronous shell and the async backend client:
/// commands in, events out, one dedicated runtime thread.
///
/// The thread owns the current run's cancellation token. It is minted when
/// an upload starts and replaced on every resume; every spawned task checks
/// it after its remote call resolves and discards the result when the run
/// was cancelled in the meantime.
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<EngineCommand>,
    event_rx: Option<mpsc::Receiver<EngineEvent>>,
}

impl EngineHandle {
    pub fn new(settings: BackendSettings) -> Result<Self, StageError> {
        let client: Arc<dyn BackendClient> = Arc::new(HttpBackendClient::new(settings.clone())?);
        Ok(Self::with_client(client, settings))
    }

    /// Build the engine over any client implementation; the seam tests use.
    pub fn with_client(client: Arc<dyn BackendClient>, settings: BackendSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let (event_tx, event_rx) = mpsc::channel::<EngineEvent>();

        thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");
            let mut token = CancellationToken::new();
            while let Ok(command) = cmd_rx.recv() {
                match command {
                    EngineCommand::StartUpload { source } => {
                        token = CancellationToken::new();
                        runtime.spawn(run_upload(
                            client.clone(),
                            source,
                            token.clone(),
                            event_tx.clone(),
                        ));
                    }
                    EngineCommand::ResumeRun => {
                        token = CancellationToken::new();
                    }
                    EngineCommand::RunStage { entry_id, request } => {
                        runtime.spawn(run_stage(
                            client.clone(),
                            entry_id,
                            request,
                            token.clone(),
                            event_tx.clone(),
                        ));
                    }
                    EngineCommand::StartTurn { turn_id, request } => {
                        let chat = ChatRequest {
                            question: request.question,
                            session_id: Some(request.session_id),
                            source_id: Some(request.source_id),
                        };
                        let config = TurnConfig {
                            pacing_interval: settings.pacing_interval,
                            pacing_chars: settings.pacing_chars,
                        };
                        runtime.spawn(drive_turn(
                            client.clone(),
                            turn_id,
                            chat,
                            config,
                            token.clone(),
                            event_tx.clone(),
                        ));
                    }
                    EngineCommand::CancelRun => {
                        token.cancel();
                    }
                }
            }
        });

        Self {
            cmd_tx,
            event_rx: Some(event_rx),
        }
    }

    pub fn start_upload(&self, source: UploadPayload) {
        let _ = self.cmd_tx.send(EngineCommand::StartUpload { source });
    }

    pub fn run_stage(&self, entry_id: EntryId, request: StageRequest) {
        let _ = self.cmd_tx.send(EngineCommand::RunStage { entry_id, request });
    }

    pub fn resume_run(&self) {
        let _ = self.cmd_tx.send(EngineCommand::ResumeRun);
    }

    pub fn start_turn(&self, turn_id: TurnId, request: TurnRequest) {
        let _ = self.cmd_tx.send(EngineCommand::StartTurn { turn_id, request });
    }

    pub fn cancel(&self) {
        let _ = self.cmd_tx.send(EngineCommand::CancelRun);
    }

    pub fn try_recv(&self) -> Option<EngineEvent> {
        self.event_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }

    /// Hand the event stream to a dedicated pump thread. Can only be taken
    /// once; [`EngineHandle::try_recv`] stops yielding afterwards.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<EngineEvent>> {
        self.event_rx.take()
    }
}

struct ChannelUploadProgress {
    tx: mpsc::Sender<EngineEvent>,
    token: CancellationToken,
}

impl UploadProgress for ChannelUploadProgress {
    fn emit(&self, percent: u8) {
        if !self.token.is_cancelled() {
            let _ = self.tx.send(EngineEvent::UploadProgress { percent });
        }
    }
}

async fn run_upload(
    client: Arc<dyn BackendClient>,
    source: UploadPayload,
    token: CancellationToken,
    events: mpsc::Sender<EngineEvent>,
) {
    let started = Instant::now();
    let progress: Arc<dyn UploadProgress> = Arc::new(ChannelUploadProgress {
        tx: events.clone(),
        token: token.clone(),
    });
    let result = tokio::select! {
        _ = token.cancelled() => return,
        result = client.upload(source, progress) => result,
    };
    if token.is_cancelled() {
        // Resolved just as the run was cancelled; discard.
        return;
    }
    let _ = events.send(EngineEvent::UploadFinished {
        result,
        duration_ms: started.elapsed().as_millis() as u64,
    });
}

async fn run_stage(
    client: Arc<dyn BackendClient>,
    entry_id: EntryId,
    request: StageRequest,
    token: CancellationToken,
    events: mpsc::Sender<EngineEvent>,
) {
    workbench_debug!("stage call {entry_id} dispatched");
    let started = Instant::now();
    let result = tokio::select! {
        _ = token.cancelled() => return,
        result = execute(client.as_ref(), &request) => result,
    };
    if token.is_cancelled() {
        return;
    }
    let _ = events.send(EngineEvent::StageFinished {
        entry_id,
        result,
        duration_ms: started.elapsed().as_millis() as u64,
    });
}

async fn execute(
    client: &dyn BackendClient,
    request: &StageRequest,
) -> Result<StageOutput, StageError> {
    match request {
        StageRequest::FetchSample { source_id } => {
            client.fetch_sample(source_id).await.map(StageOutput::Schema)
        }
        StageRequest::ChatAnalysis {
            source_id,
            question,
        } => client
            .chat(&ChatRequest {
                question: question.clone(),
                session_id: None,
                source_id: Some(source_id.clone()),
            })
            .await
            .map(StageOutput::Analysis),
        StageRequest::RagQuery {
            query,
            top_k,
            source_filter,
        } => client
            .rag_query(&RagQueryRequest {
                query: query.clone(),
                top_k: *top_k,
                source_filter: source_filter.clone(),
            })
            .await
            .map(StageOutput::Retrieval),
        StageRequest::PreprocessApply {
            dataset_id,
            column,
            strategy,
            fill_value,
        } => client
            .apply_preprocess(&PreprocessApplyRequest {
                dataset_id: *dataset_id,
                operations: vec![PreprocessOperation {
                    op: "impute".to_string(),
                    params: serde_json::json!({
                        "column": column,
                        "strategy": strategy,
                        "fill_value": fill_value,
                    }),
                }],
            })
            .await
            .map(|()| StageOutput::RemediationApplied),
        StageRequest::CreateReport { session_id } => client
            .create_report(&ReportCreateRequest {
                session_id: *session_id,
            })
            .await
            .map(StageOutput::Report),
    }
}
