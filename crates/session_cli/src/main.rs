use std::io::{self, Write};
use std::process::ExitCode;
use std::time::Duration;

use agent_session::{
    Delimiters, Event, EventPayload, RetryPolicy, Session, SessionConfig, SessionController,
    SessionObserver, SessionSnapshot, SessionStatus, SolutionArtifact, SubmitRequest,
};
use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

const ENV_AUTH: &str = "AGENT_SESSION_AUTH";
const PREVIEW_CHARS: usize = 120;

/// Submit one request to an agent server and stream its progress.
///
/// Settings not given on the command line fall back to `AGENT_SESSION_*`
/// environment variables, then to built-in defaults.
#[derive(Debug, Parser)]
#[command(name = "agent-session", version)]
struct Cli {
    /// Request text sent to the agent.
    message: String,

    /// Server base URL.
    #[arg(long)]
    base_url: Option<String>,

    /// Model selector passed through to the server.
    #[arg(long)]
    model: Option<String>,

    /// Session id; a random one is generated when omitted.
    #[arg(long)]
    session_id: Option<String>,

    /// Opaque identity token forwarded as the `auth` query parameter.
    #[arg(long, env = ENV_AUTH, hide_env_values = true)]
    auth: Option<String>,

    /// Seconds without events before printing a "still working" notice.
    #[arg(long)]
    grace_secs: Option<u64>,

    /// Retry the initial request this many times on transient failures.
    #[arg(long)]
    max_retries: Option<u32>,

    /// Overall request timeout in seconds. No limit by default.
    #[arg(long)]
    timeout_secs: Option<u64>,

    #[arg(long, requires = "close_tag")]
    open_tag: Option<String>,

    #[arg(long, requires = "open_tag")]
    close_tag: Option<String>,

    /// Print the snapshot as a single JSON line.
    #[arg(long)]
    compact: bool,
}

impl Cli {
    fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::from_env();
        if let Some(base_url) = &self.base_url {
            config.stream.base_url = base_url.clone();
        }
        if let Some(model) = &self.model {
            config.default_model = model.clone();
        }
        if let Some(secs) = self.grace_secs {
            config.grace_period = Duration::from_secs(secs);
        }
        if let Some(max_retries) = self.max_retries {
            config.stream.retry = RetryPolicy::bounded(max_retries);
        }
        if let Some(secs) = self.timeout_secs {
            config.stream.timeout = Some(Duration::from_secs(secs));
        }
        if let (Some(open), Some(close)) = (&self.open_tag, &self.close_tag) {
            config.delimiters = Delimiters::new(open.clone(), close.clone());
        }
        config
    }

    fn submit_request(&self) -> SubmitRequest {
        SubmitRequest {
            message: self.message.clone(),
            model: self.model.clone(),
            session_id: self.session_id.clone(),
            auth: self.auth.clone().filter(|auth| !auth.trim().is_empty()),
        }
    }
}

/// Human-readable progress on stderr.
#[derive(Debug, Default)]
struct ProgressPrinter;

impl SessionObserver for ProgressPrinter {
    fn on_event(&mut self, event: &Event, _session: &Session) {
        let detail = match &event.payload {
            EventPayload::Planning { steps } => format!("{} step(s)", steps.len()),
            EventPayload::ModelInfo { model, .. } => model.clone().unwrap_or_default(),
            EventPayload::Visualization { images, .. } => format!("{} image(s)", images.len()),
            EventPayload::FileOperation {
                operation,
                filename,
                ..
            } => format!("{operation} {filename}"),
            EventPayload::Ping => return,
            _ => event.content().map(preview).unwrap_or_default(),
        };
        eprintln!("[{}] {detail}", event.kind().as_str());
    }

    fn on_solution(&mut self, solution: &SolutionArtifact) {
        let origin = if solution.recovered {
            " (recovered after cancel)"
        } else {
            ""
        };
        eprintln!("solution ready{origin}");
    }

    fn on_advisory(&mut self, waited: Duration) {
        eprintln!("still working... no events for {}s", waited.as_secs());
    }

    fn on_finished(&mut self, snapshot: &SessionSnapshot) {
        let session = &snapshot.session;
        match &session.reason {
            Some(reason) => eprintln!("session {} {:?}: {reason}", session.id, session.status),
            None => eprintln!("session {} {:?}", session.id, session.status),
        }
    }
}

fn preview(text: &str) -> String {
    let line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let mut preview: String = line.chars().take(PREVIEW_CHARS).collect();
    if line.chars().count() > PREVIEW_CHARS || text.lines().count() > 1 {
        preview.push_str("...");
    }
    preview
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    let config = cli.session_config();
    let mut controller = SessionController::with_observer(config, ProgressPrinter)
        .context("failed to build HTTP client")?;
    let session_id = controller.submit(cli.submit_request());
    info!(%session_id, "request submitted");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let interrupted = tokio::select! {
            more = controller.step() => {
                if !more {
                    break;
                }
                false
            }
            _ = &mut ctrl_c => true,
        };
        if interrupted {
            controller.cancel()?;
            break;
        }
    }

    let snapshot = controller
        .snapshot()
        .context("session vanished before completion")?;
    let json = if cli.compact {
        serde_json::to_string(&snapshot)?
    } else {
        snapshot.to_json_pretty()?
    };
    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{json}")?;

    Ok(match snapshot.session.status {
        SessionStatus::Completed | SessionStatus::Cancelled => ExitCode::SUCCESS,
        _ => ExitCode::FAILURE,
    })
}
