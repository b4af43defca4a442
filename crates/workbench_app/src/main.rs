mod app;
mod effects;
mod logging;

use clap::Parser;

use app::{DecisionPolicy, InputChoice, Options};
use logging::LogDestination;

/// Headless driver for the analysis pipeline: uploads a dataset, walks the
/// stages, answers the approval gate and optionally streams one follow-up.
#[derive(Parser)]
#[command(name = "workbench")]
struct Cli {
    /// Backend base URL.
    #[arg(long, env = "WORKBENCH_API_BASE", default_value = "http://localhost:8000")]
    api_base: String,

    /// CSV file to upload; omit to use the built-in sample dataset.
    file: Option<std::path::PathBuf>,

    /// Reject the remediation proposal instead of approving it.
    #[arg(long)]
    reject: bool,

    /// Resume with this override fill value instead of plain approval.
    #[arg(long, value_name = "VALUE", conflicts_with = "reject")]
    edit: Option<String>,

    /// Follow-up question to stream once the run succeeds.
    #[arg(long, value_name = "QUESTION")]
    ask: Option<String>,

    /// Also write logs to ./workbench.log.
    #[arg(long)]
    log_file: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(if cli.log_file {
        LogDestination::Both
    } else {
        LogDestination::Terminal
    });

    let decision = if cli.reject {
        DecisionPolicy::Reject
    } else if let Some(value) = cli.edit {
        DecisionPolicy::Edit(value)
    } else {
        DecisionPolicy::Approve
    };

    app::run_app(Options {
        api_base: cli.api_base,
        input: match cli.file {
            Some(path) => InputChoice::File(path),
            None => InputChoice::Sample,
        },
        decision,
        follow_up: cli.ask,
    })
}
