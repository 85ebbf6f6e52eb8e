use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use feedsift_core::ContentItem;
use feedsift_pipeline::metrics::LoggingMetricsBackend;
use feedsift_pipeline::{Coordinator, FeedsiftConfig, PipelineMetrics, PolicyStore};
use tokio::io::BufReader;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{EnvFilter, fmt};

mod feed;

use feed::VerdictLine;

#[derive(Parser)]
#[command(
    name = "feedsift",
    version,
    about = "feedsift: belief-aware feed filter that classifies posts and decides whether to show them"
)]
struct Cli {
    /// Config file [default: ~/.feedsift/config.toml]
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Read JSON-lines events from stdin and write verdicts to stdout
    Run,
    /// Classify a single post and print its verdict
    Classify {
        /// Post text
        #[arg(long)]
        text: String,
        /// Image attached to the post
        #[arg(long)]
        image_url: Option<String>,
    },
    /// Write a config file with defaults filled in, keeping existing values
    InitConfig {
        /// Where to write [default: --config or ~/.feedsift/config.toml]
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    match cli.command {
        Command::Run => {
            let config = load_config(cli.config.as_deref())?;
            run(config).await
        }
        Command::Classify { text, image_url } => {
            let config = load_config(cli.config.as_deref())?;
            classify(config, text, image_url).await
        }
        Command::InitConfig { path } => {
            let path = match path.or(cli.config) {
                Some(path) => path,
                None => FeedsiftConfig::default_path()
                    .context("could not determine home directory; pass --path")?,
            };
            init_config(&path)
        }
    }
}

/// Logs go to stderr so they don't mix with the verdict stream on stdout.
fn init_logging(json: bool) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::WARN.into())
        .with_env_var("FEEDSIFT_LOG")
        .from_env_lossy();
    let builder = fmt().with_env_filter(filter).with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> Result<FeedsiftConfig> {
    match path {
        Some(path) => FeedsiftConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => match FeedsiftConfig::default_path() {
            Some(path) => FeedsiftConfig::load_or_default(&path)
                .with_context(|| format!("failed to load config from {}", path.display())),
            None => Ok(FeedsiftConfig::default()),
        },
    }
}

struct Pipeline {
    coordinator: Arc<Coordinator>,
    store: PolicyStore,
    metrics: Arc<PipelineMetrics>,
}

fn build_pipeline(config: &FeedsiftConfig) -> Pipeline {
    let store = PolicyStore::new(config.policy.to_policy());
    let metrics = Arc::new(PipelineMetrics::with_backend(Arc::new(LoggingMetricsBackend)));
    let coordinator = Coordinator::new(
        Arc::new(config.build_classifier()),
        Arc::new(config.build_cache()),
        &store,
    )
    .with_metrics(metrics.clone());

    Pipeline {
        coordinator: Arc::new(coordinator),
        store,
        metrics,
    }
}

async fn run(config: FeedsiftConfig) -> Result<()> {
    let pipeline = build_pipeline(&config);
    tracing::info!(
        provider = ?config.classifier.provider,
        model = %config.classifier.model,
        "Starting feedsift"
    );

    let summary = feed::run_feed(
        &pipeline.coordinator,
        &pipeline.store,
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        config.policy.minimize_posts,
    )
    .await?;

    tracing::info!(
        items = summary.items,
        policy_updates = summary.policy_updates,
        malformed = summary.malformed,
        "Input closed"
    );
    tracing::info!(metrics = ?pipeline.metrics.snapshot(), "Pipeline metrics");
    Ok(())
}

async fn classify(config: FeedsiftConfig, text: String, image_url: Option<String>) -> Result<()> {
    let pipeline = build_pipeline(&config);
    let mut item = ContentItem::new(uuid::Uuid::new_v4().to_string(), text);
    item.image_url = image_url;

    let verdict = pipeline.coordinator.evaluate(&item).await;
    let error = verdict.error().cloned();
    let line = VerdictLine::new(item.id, verdict, config.policy.minimize_posts);
    println!("{}", serde_json::to_string_pretty(&line)?);

    if let Some(error) = error {
        bail!("classification failed: {error}");
    }
    Ok(())
}

fn init_config(path: &Path) -> Result<()> {
    let existed = path.exists();
    let config = FeedsiftConfig::load_or_default(path)
        .with_context(|| format!("failed to read existing config at {}", path.display()))?;
    config
        .write_to(path)
        .with_context(|| format!("failed to write config to {}", path.display()))?;

    if existed {
        println!("Updated {} (existing values kept)", path.display());
    } else {
        println!("Wrote default config to {}", path.display());
    }
    Ok(())
}
