use anyhow::{bail, Context, Result};
use clap::builder::NonEmptyStringValueParser;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod api;
mod app;
mod config;
mod error;
mod handler;
mod session;
mod state;
mod tui;
mod ui;

use api::{read_document, Backend, DocQaClient, UploadResponse};
use app::App;
use config::{Config, Settings, API_URL_ENV};
use session::Session;

#[derive(Parser)]
#[command(name = "docqa")]
#[command(version, about = "Upload documents and ask evidence-backed questions about them")]
struct Cli {
    /// Base URL of the DocQ&A API (overrides DOCQA_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Where the interactive UI writes its log
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a PDF and print the snapshot it was indexed into
    Upload {
        /// PDF to upload
        path: PathBuf,
    },
    /// Ask one question and print the answer with its evidence
    Ask {
        /// Your question
        question: String,
        /// Snapshot to search (the backend picks its latest when omitted)
        #[arg(short, long, value_parser = NonEmptyStringValueParser::new())]
        snapshot: Option<String>,
        /// Upload this PDF first and ask against its snapshot
        #[arg(short, long, conflicts_with = "snapshot")]
        file: Option<PathBuf>,
    },
    /// Check whether the API is reachable
    Health,
    /// Print latency, cost and refusal figures for the recent telemetry window
    Metrics {
        /// Sent as X-Admin-Token when the server requires one
        #[arg(long, env = "DOCQA_ADMIN_TOKEN", hide_env_values = true)]
        admin_token: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Config::load()?.resolve(
        cli.api_url,
        std::env::var(API_URL_ENV).ok(),
        cli.log_file,
    )?;
    let client = DocQaClient::new(&settings.api_url, settings.upload_timeout);

    match cli.command {
        None => {
            let _guard = init_file_logging(&settings.log_file)?;
            run_tui(&settings, Arc::new(client)).await
        }
        Some(command) => {
            init_stderr_logging();
            match command {
                Commands::Upload { path } => upload_once(&client, &path).await,
                Commands::Ask { question, snapshot, file } => {
                    ask_once(&client, &settings, &question, snapshot, file.as_deref()).await
                }
                Commands::Health => health_once(&client).await,
                Commands::Metrics { admin_token } => metrics_once(&client, admin_token.as_deref()).await,
            }
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docqa=info"))
}

/// The TUI owns the terminal, so its logs go to a file
fn init_file_logging(path: &Path) -> Result<WorkerGuard> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)
        .with_context(|| format!("could not create log directory {}", dir.display()))?;
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "docqa.log".into());

    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true),
        )
        .init();

    Ok(guard)
}

fn init_stderr_logging() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact(),
        )
        .init();
}

async fn run_tui(settings: &Settings, backend: Arc<dyn Backend>) -> Result<()> {
    tui::install_panic_hook();
    let mut terminal = tui::init()?;
    let mut events = tui::EventHandler::new();

    let mut app = App::new(backend, &settings.api_url, settings.ask_timeout, events.sender());
    app.check_health();
    tracing::info!(api_url = %settings.api_url, "session started");

    let result = async {
        while !app.should_quit {
            terminal.draw(|frame| ui::render(&mut app, frame))?;

            match events.next().await {
                Some(event) => handler::handle_event(&mut app, event),
                None => break,
            }
        }
        Ok::<(), anyhow::Error>(())
    }
    .await;

    tui::restore()?;
    tracing::info!(messages = app.session.messages().len(), "session ended");
    result
}

async fn upload_once(client: &DocQaClient, path: &Path) -> Result<()> {
    let mut session = Session::new();
    let response = upload_into(client, &mut session, path).await?;

    if let Some(announcement) = session.messages().last() {
        println!("{}", announcement.text);
    }
    println!("docs_snapshot_id: {}", response.docs_snapshot_id);
    if let Some(doc_id) = &response.doc_id {
        println!("doc_id: {}", doc_id);
    }
    if let Some(sha) = &response.doc_sha256 {
        println!("doc_sha256: {}", sha);
    }
    Ok(())
}

async fn upload_into(client: &DocQaClient, session: &mut Session, path: &Path) -> Result<UploadResponse> {
    let (file_name, bytes) = read_document(path).await?;
    let response = client
        .upload(&file_name, bytes)
        .await
        .context("Failed to upload document")?;
    session.record_upload(&response.docs_snapshot_id, &file_name);
    Ok(response)
}

async fn ask_once(
    client: &DocQaClient,
    settings: &Settings,
    question: &str,
    snapshot: Option<String>,
    file: Option<&Path>,
) -> Result<()> {
    let mut session = match snapshot {
        Some(snapshot) => Session::resume(&snapshot),
        None => Session::new(),
    };
    if let Some(path) = file {
        upload_into(client, &mut session, path).await?;
    }

    let message = session.ask(client, question, settings.ask_timeout).await?;

    println!("{}", message.text);
    if let Some(code) = &message.refusal_code {
        println!("\nRefusal: {}", code);
    }
    if !message.evidence().is_empty() {
        println!("\nEvidence:");
        for (i, citation) in message.evidence().iter().enumerate() {
            println!(
                "  {}. {} • Page {} ({}% match)\n     \"...{}...\"",
                i + 1,
                citation.doc_name,
                citation.page_num,
                citation.score_percent(),
                citation.snippet
            );
        }
    }
    if let Some(request_id) = &message.request_id {
        println!("\nREQ-ID: {}", request_id);
    }

    Ok(())
}

async fn health_once(client: &DocQaClient) -> Result<()> {
    match client.health().await {
        Ok(true) => {
            println!("{} is healthy", client.base_url());
            Ok(())
        }
        Ok(false) => bail!("{} responded but did not report ok", client.base_url()),
        Err(err) => bail!("{} is unreachable: {}", client.base_url(), err),
    }
}

async fn metrics_once(client: &DocQaClient, admin_token: Option<&str>) -> Result<()> {
    let metrics = client
        .metrics(admin_token)
        .await
        .with_context(|| format!("could not fetch metrics from {}", client.base_url()))?;

    println!("window:         {} .. {}", metrics.window_start_utc, metrics.window_end_utc);
    println!("latency p50:    {} ms", metrics.p50_latency_ms);
    println!("latency p95:    {} ms", metrics.p95_latency_ms);
    println!("avg cost/query: {:.6}", metrics.avg_cost_per_query);
    println!("cache hit rate: {:.1}%", metrics.cache_hit_rate * 100.0);
    if metrics.refusals_by_code.is_empty() {
        println!("refusals:       none");
    } else {
        println!("refusals:");
        for (code, count) in &metrics.refusals_by_code {
            println!("  {:<28} {}", code, count);
        }
    }
    Ok(())
}
