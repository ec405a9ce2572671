//! CLI command definitions, routing, and tracing setup.

use std::io::Read;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use enricher_core::{NodeProcessor, PipelineObserver, RunOutcome, Services, Stage};
use enricher_shared::{
    AppConfig, CacheBackendKind, EnricherError, InvocationEvent, InvocationResponse, NodeId,
    ResponseBody, config_file_path, init_config, load_config,
};
use enricher_storage::EmbeddingStore;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::{Value, json};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// node-enricher: enrich a scraped profile node end to end.
#[derive(Parser)]
#[command(
    name = "node-enricher",
    version,
    about = "Fetch, scrape, deduplicate, describe and embed one profile node.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Process one node and print the invocation response.
    Invoke {
        /// Event JSON file, or `-` for stdin. Takes precedence over the id
        /// flags.
        #[arg(long)]
        event: Option<String>,

        /// Node to process (instead of --event).
        #[arg(long, env = "NODE_ID")]
        node_id: Option<String>,

        /// Owner of the node (instead of --event).
        #[arg(long, env = "USER_ID")]
        user_id: Option<String>,
    },

    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Local embedding cache maintenance.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration (secrets redacted).
    Show,
    /// Check that every required setting is present.
    Validate,
}

/// Cache subcommands (local backend only).
#[derive(Subcommand)]
pub(crate) enum CacheAction {
    /// Print entry and hit counts.
    Stats,
    /// Remove every cached vector.
    Clear,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries
/// the response JSON.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "enricher=info",
        1 => "enricher=debug",
        _ => "enricher=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Invoke {
            event,
            node_id,
            user_id,
        } => cmd_invoke(event.as_deref(), node_id, user_id).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
            ConfigAction::Validate => cmd_config_validate().await,
        },
        Command::Cache { action } => match action {
            CacheAction::Stats => cmd_cache_stats().await,
            CacheAction::Clear => cmd_cache_clear().await,
        },
    }
}

// ---------------------------------------------------------------------------
// invoke
// ---------------------------------------------------------------------------

async fn cmd_invoke(
    source: Option<&str>,
    node_id: Option<String>,
    user_id: Option<String>,
) -> Result<()> {
    let event = read_event(source, node_id, user_id)?;

    let config = load_config()?;
    config.validate()?;
    let services = Services::from_config(&config).await?;

    let budget = Duration::from_secs(config.runtime.processing_timeout_secs.max(1));
    info!(
        worker_id = %config.runtime.worker_id,
        budget_secs = budget.as_secs(),
        "invocation received"
    );

    let progress = CliProgress::new();
    let processor = NodeProcessor::new(&services).with_observer(&progress);

    let response = match tokio::time::timeout(budget, processor.handle_event(&event)).await {
        Ok(response) => response,
        Err(_) => {
            progress.spinner.finish_and_clear();
            timed_out(&processor, &event, &progress, budget).await
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

/// Response for a run abandoned at the time budget. The node the run was
/// working on is marked as failed so it does not stay `processing`.
async fn timed_out(
    processor: &NodeProcessor<'_>,
    event: &Value,
    progress: &CliProgress,
    budget: Duration,
) -> InvocationResponse {
    let message = format!("processing timed out after {}s", budget.as_secs());
    warn!(budget_secs = budget.as_secs(), "run exceeded its time budget");

    let ids = match InvocationEvent::from_value(event) {
        Ok(ids) => ids,
        Err(e) => return InvocationResponse::malformed(event, e.to_string()),
    };
    let target = progress.failure_target(&ids.node_id);
    // Already logged by the processor; the response reports the timeout.
    let _ = processor.mark_failed(&target, &message).await;

    InvocationResponse::completed(ResponseBody {
        node_id: ids.node_id.to_string(),
        user_id: ids.user_id.to_string(),
        success: false,
        message,
        effective_node_id: (target != ids.node_id).then_some(target),
        ..Default::default()
    })
}

/// Build the raw event from a file, stdin, or id flags.
///
/// Missing ids are left for the handler to reject with its standard
/// response.
fn read_event(
    source: Option<&str>,
    node_id: Option<String>,
    user_id: Option<String>,
) -> Result<Value> {
    let raw = match source {
        Some("-") => {
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .map_err(|e| eyre!("failed to read event from stdin: {e}"))?;
            buf
        }
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| EnricherError::io(Path::new(path), e))?,
        None => {
            let mut event = json!({});
            if let Some(id) = node_id {
                event["nodeId"] = Value::String(id);
            }
            if let Some(id) = user_id {
                event["userId"] = Value::String(id);
            }
            return Ok(event);
        }
    };

    serde_json::from_str(&raw).map_err(|e| eyre!("event is not valid JSON: {e}"))
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner on stderr.
struct CliProgress {
    spinner: ProgressBar,
    /// Node the run moved to after dedup, if any.
    target: Mutex<Option<NodeId>>,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        spinner.set_message("loading node");
        Self {
            spinner,
            target: Mutex::new(None),
        }
    }

    /// Node a failure should be recorded on: the latest target, else the
    /// event's node.
    fn failure_target(&self, event_node: &NodeId) -> NodeId {
        self.target
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or_else(|| event_node.clone())
    }
}

impl PipelineObserver for CliProgress {
    fn stage(&self, stage: Stage) {
        let next = match stage {
            Stage::Start => "loading node",
            Stage::Loaded => "resolving duplicates",
            Stage::Deduped => "generating description",
            Stage::Described => "updating skill vector",
            Stage::Embedded => "saving node",
            Stage::Persisted | Stage::Failed => return,
        };
        self.spinner.set_message(next);
    }

    fn retarget(&self, node_id: &NodeId) {
        *self.target.lock().unwrap_or_else(PoisonError::into_inner) = Some(node_id.clone());
    }

    fn degraded(&self, error: &EnricherError) {
        self.spinner.println(format!("  warning: {error}"));
    }

    fn done(&self, outcome: &RunOutcome) {
        self.spinner.finish_and_clear();
        let verdict = match outcome.failed_at {
            None => outcome.stage.to_string(),
            Some(stage) => format!("failed after {stage}"),
        };
        eprintln!(
            "  {verdict} in {:.1}s ({} calls, {} retries)",
            outcome.elapsed_ms as f64 / 1000.0,
            outcome.calls.calls,
            outcome.calls.retries
        );
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("# {}", config_file_path()?.display());
    println!("{toml_str}");

    println!("# secrets (from environment)");
    for env_name in secret_env_names(&config) {
        println!("# {env_name} = {}", redacted(std::env::var(env_name).ok()));
    }
    Ok(())
}

async fn cmd_config_validate() -> Result<()> {
    let config = load_config()?;
    config.validate()?;
    println!("Configuration OK");
    Ok(())
}

/// Environment variables holding credentials, in config order.
fn secret_env_names(config: &AppConfig) -> Vec<&str> {
    let mut names = vec![
        config.api.api_key_env.as_str(),
        config.storage.token_env.as_str(),
        config.vector.token_env.as_str(),
    ];
    if config.cache.backend == CacheBackendKind::Redis {
        names.push(config.cache.token_env.as_str());
    }
    names.push(config.generation.api_key_env.as_str());
    names.push(config.embedding.api_key_env.as_str());
    names
}

fn redacted(value: Option<String>) -> String {
    match value.as_deref().map(str::trim) {
        Some(v) if !v.is_empty() => {
            let tail: String = v
                .chars()
                .rev()
                .take(4)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            if v.chars().count() > 8 {
                format!("set (…{tail})")
            } else {
                "set".into()
            }
        }
        _ => "missing".into(),
    }
}

// ---------------------------------------------------------------------------
// cache
// ---------------------------------------------------------------------------

async fn open_local_cache() -> Result<EmbeddingStore> {
    let config = load_config()?;
    if config.cache.backend != CacheBackendKind::Local {
        return Err(eyre!(
            "cache commands need the local backend (set CACHE_BACKEND=local)"
        ));
    }
    Ok(EmbeddingStore::open(Path::new(&config.cache.path)).await?)
}

async fn cmd_cache_stats() -> Result<()> {
    let store = open_local_cache().await?;
    let stats = store.stats().await?;
    println!("  Entries: {}", stats.entries);
    println!("  Hits:    {}", stats.total_hits);
    Ok(())
}

async fn cmd_cache_clear() -> Result<()> {
    let store = open_local_cache().await?;
    let removed = store.clear().await?;
    println!("Removed {removed} cached vectors");
    Ok(())
}
