//! # LogCopilot CLI (`logcopilot`)
//!
//! ## Usage
//!
//! ```bash
//! logcopilot --config ./config/logcopilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `logcopilot serve` | Ingest the watch directory, watch it, and serve HTTP |
//! | `logcopilot ingest <PATH>...` | Ingest files or directories once |
//! | `logcopilot query "<text>"` | Answer a question from the indexed logs |
//! | `logcopilot status` | Show store size, dimension and metric |
//!
//! Logging goes to stderr. `--log-level` wins over `RUST_LOG`, which wins
//! over the default `info`.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::warn;
use tracing_subscriber::EnvFilter;

use log_copilot::app::App;
use log_copilot::config::{load_config, Config};
use log_copilot::server::run_server;

/// LogCopilot: retrieval-augmented question answering over log files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/logcopilot.example.toml` for a full example. A missing
/// file means "use defaults".
#[derive(Parser)]
#[command(
    name = "logcopilot",
    about = "LogCopilot: ask questions about your logs",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/logcopilot.toml")]
    config: PathBuf,

    /// Log filter, e.g. `debug` or `log_copilot=trace`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the watcher and the HTTP server until Ctrl-C.
    Serve,

    /// Ingest files or directories.
    ///
    /// Directories are walked for files with an allowlisted suffix; files
    /// named explicitly are ingested whatever their suffix.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a question.
    Query {
        text: String,

        /// Number of evidence chunks to retrieve.
        #[arg(long)]
        k: Option<usize>,

        /// Print the full answer as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show store statistics.
    Status,
}

fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn read_config(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        warn!(path = %path.display(), "config file not found, using defaults");
        Ok(Config::default())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());

    let config = read_config(&cli.config)?;

    match cli.command {
        Commands::Serve => {
            let app = App::open(config).await?;
            let _watch = app.start_watching().await?;
            run_server(&app.config, app.state()).await?;
            app.shutdown().await;
        }
        Commands::Ingest { paths } => {
            let app = App::open(config).await?;
            let mut failures = 0usize;
            for path in &paths {
                if path.is_dir() {
                    let summary = app.pipeline.ingest_directory(path).await?;
                    println!(
                        "{}: {} files, {} chunks ({} skipped, {} failed)",
                        path.display(),
                        summary.files_indexed,
                        summary.chunks_indexed,
                        summary.skipped,
                        summary.failed
                    );
                    failures += summary.failed;
                } else {
                    match app.pipeline.ingest_file(path).await {
                        Ok(n) => println!("{}: {} chunks", path.display(), n),
                        Err(e) => {
                            eprintln!("{}: {} ({})", path.display(), e, e.kind());
                            failures += 1;
                        }
                    }
                }
            }
            app.shutdown().await;
            if failures > 0 {
                anyhow::bail!("{} file(s) failed to ingest", failures);
            }
        }
        Commands::Query { text, k, json } => {
            let app = App::open(config).await?;
            let answer = app.engine.answer(&text, k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                println!("{}\n", answer.answer);
                println!(
                    "confidence: {:.2}  backend: {}",
                    answer.confidence, answer.backend
                );
                if let Some(err) = &answer.generation_error {
                    println!("note: fell back after: {}", err);
                }
                for (i, item) in answer.evidence.iter().enumerate() {
                    println!("{:>2}. [{}] score={:.4}", i + 1, item.doc_id, item.score);
                }
            }
            app.shutdown().await;
        }
        Commands::Status => {
            let app = App::open(config).await?;
            let stats = app.store.stats().await?;
            println!("data dir:   {}", stats.data_dir);
            println!("vectors:    {}", stats.vectors);
            println!("documents:  {}", stats.documents);
            println!(
                "dimension:  {}",
                stats
                    .dimension
                    .map(|d| d.to_string())
                    .unwrap_or_else(|| "unbound".to_string())
            );
            println!("metric:     {}", stats.metric);
            println!("embedding:  {}", app.store.embedder().model_name());
            println!("generation: {}", app.engine.router().chain().join(" → "));
            app.shutdown().await;
        }
    }

    Ok(())
}
