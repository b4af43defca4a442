use std::path::PathBuf;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::Utc;
use workbench_core::{update, Msg, RunState, WorkbenchState, WorkbenchViewModel};
use workbench_engine::BackendSettings;
use workbench_logging::workbench_info;

use crate::effects::EffectRunner;

pub enum InputChoice {
    /// Built-in two-row sample dataset.
    Sample,
    /// CSV file to upload.
    File(PathBuf),
}

/// Scripted answer to the human-in-the-loop gate.
pub enum DecisionPolicy {
    Approve,
    Reject,
    Edit(String),
}

pub struct Options {
    pub api_base: String,
    pub input: InputChoice,
    pub decision: DecisionPolicy,
    pub follow_up: Option<String>,
}

pub fn run_app(options: Options) -> anyhow::Result<()> {
    let (msg_tx, msg_rx) = mpsc::channel::<Msg>();
    let settings = BackendSettings {
        base_url: options.api_base.clone(),
        ..BackendSettings::default()
    };
    let runner = EffectRunner::new(settings, msg_tx.clone())?;

    // One-second clock behind the elapsed-time view.
    {
        let tick_tx = msg_tx.clone();
        thread::spawn(move || {
            while tick_tx.send(Msg::Tick).is_ok() {
                thread::sleep(Duration::from_secs(1));
            }
        });
    }

    let mut renderer = Renderer::default();
    let mut state = WorkbenchState::new();
    workbench_info!("run started at {} against {}", Utc::now().to_rfc3339(), options.api_base);

    let initial = match options.input {
        InputChoice::Sample => Msg::SampleRequested,
        InputChoice::File(path) => {
            let content = std::fs::read(&path)
                .with_context(|| format!("reading input file {}", path.display()))?;
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "upload.csv".to_string());
            Msg::UploadRequested { file_name, content }
        }
    };
    state = dispatch(state, initial, &runner, &mut renderer);

    let mut decided = false;
    let mut follow_up = options.follow_up;

    loop {
        let msg = msg_rx.recv().context("message channel closed")?;
        state = dispatch(state, msg, &runner, &mut renderer);

        match state.run() {
            RunState::NeedsUser if !decided => {
                decided = true;
                let decision = match &options.decision {
                    DecisionPolicy::Approve => Msg::ApproveClicked,
                    DecisionPolicy::Reject => Msg::RejectClicked,
                    DecisionPolicy::Edit(value) => Msg::EditSubmitted {
                        text: value.clone(),
                    },
                };
                state = dispatch(state, decision, &runner, &mut renderer);
            }
            RunState::Success => {
                if let Some(question) = follow_up.take() {
                    state = dispatch(
                        state,
                        Msg::FollowUpSubmitted { text: question },
                        &runner,
                        &mut renderer,
                    );
                } else if state.active_turn().is_none() {
                    break;
                }
            }
            RunState::Error => {
                let error = state.error().expect("error state carries details");
                bail!("pipeline failed at {}: {}", error.tool, error.message);
            }
            _ => {}
        }
    }

    let view = state.view();
    workbench_info!(
        "run finished at {}: {} tool calls, {} milestones",
        Utc::now().to_rfc3339(),
        view.tool_calls.len(),
        view.milestones.len()
    );
    for entry in &view.conversation {
        workbench_info!("{:?}: {}", entry.role, entry.content);
    }
    Ok(())
}

fn dispatch(
    state: WorkbenchState,
    msg: Msg,
    runner: &EffectRunner,
    renderer: &mut Renderer,
) -> WorkbenchState {
    let (mut state, effects) = update(state, msg);
    runner.run(effects);
    if state.consume_dirty() {
        renderer.render(&state.view());
    }
    state
}

/// Logs view-model changes, milestone by milestone.
#[derive(Default)]
struct Renderer {
    milestones_seen: usize,
    last_status_line: String,
}

impl Renderer {
    fn render(&mut self, view: &WorkbenchViewModel) {
        for milestone in view.milestones.iter().skip(self.milestones_seen) {
            workbench_info!(
                "[{}] {:?} {} {}",
                milestone.timestamp,
                milestone.status,
                milestone.title,
                milestone.subtext.as_deref().unwrap_or("")
            );
        }
        self.milestones_seen = view.milestones.len();

        let status_line = match &view.run_status {
            Some(status) => format!(
                "{:?} | {} | {}% | last={}",
                view.run, status.phase, status.progress, status.last_tool
            ),
            None => format!("{:?}", view.run),
        };
        if status_line != self.last_status_line {
            workbench_info!("{status_line}");
            self.last_status_line = status_line;
        }
    }
}
