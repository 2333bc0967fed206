//! # LLMix CLI (`llmix`)
//!
//! The `llmix` binary is the primary interface. It starts the watch server,
//! prints the filtered file list, or generates a content artifact directly
//! from the command line.
//!
//! ## Usage
//!
//! ```bash
//! llmix [--dir <path>] [--config <path>] <command>
//! ```
//!
//! Configuration is read from `llmix.toml` in the watched directory unless
//! `--config` points elsewhere; a missing file means defaults.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use llmix::{config, generate, groups, ignore, scanner, server};

/// Generate LLM-friendly content files from your repository.
#[derive(Parser)]
#[command(
    name = "llmix",
    about = "Generate LLM-friendly content files from your repository",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `llmix.toml` in the
    /// watched directory; a missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory to watch.
    #[arg(short, long, global = true, default_value = ".")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Start the watch server.
    ///
    /// Watches the directory for changes, serves the JSON API, and pushes
    /// live file-list updates to connected observers over WebSocket.
    Serve {
        /// Override the configured port (binds 127.0.0.1).
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print the filtered file list and exit.
    ///
    /// Applies the same ignore rules the server uses, so the output is
    /// exactly what observers would see.
    Scan,

    /// Generate a content artifact for a group without starting the server.
    ///
    /// With explicit file arguments, those files are exported; without, the
    /// group's stored selection is used.
    Generate {
        /// Id of the target group.
        #[arg(long)]
        group: String,

        /// Files to include (relative to the watched directory). Defaults to
        /// the group's stored selection.
        files: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("llmix=info")),
        )
        .init();

    let args = Cli::parse();

    let watch_dir = std::fs::canonicalize(&args.dir)
        .with_context(|| format!("Watch directory does not exist: {}", args.dir.display()))?;
    let config_path = args
        .config
        .unwrap_or_else(|| watch_dir.join("llmix.toml"));
    let mut cfg = config::load_config(&config_path)?;

    match args.command {
        Commands::Serve { port } => {
            if let Some(port) = port {
                cfg.server.bind = format!("127.0.0.1:{}", port);
            }
            server::run_server(cfg, &watch_dir).await?;
        }

        Commands::Scan => {
            let matcher = ignore::IgnoreMatcher::new(&cfg.ignore);
            let files = scanner::scan(&watch_dir, &matcher)?;
            for file in &files {
                println!("{}", file);
            }
            eprintln!("{} files", files.len());
        }

        Commands::Generate { group, files } => {
            let store = groups::GroupStore::new(&watch_dir, &cfg);
            store.init().await?;

            let registry = store.get_groups().await;
            let target = registry
                .iter()
                .find(|g| g.id == group)
                .with_context(|| format!("Group not found: {}", group))?;

            let selection = if files.is_empty() {
                target.files.clone()
            } else {
                files
            };
            if selection.is_empty() {
                anyhow::bail!("Group '{}' has no files selected", group);
            }

            let spec = generate::GenerateSpec {
                files: selection,
                name: target.name.clone(),
                description: Some(target.description.clone()),
                group_id: Some(target.id.clone()),
            };

            let result = generate::generate_content_file(&watch_dir, &cfg, &spec).await?;
            store
                .add_generation_to_history(&result.group_id, &result.path)
                .await?;

            println!("Generated {} ({} bytes)", result.path, result.size);
        }
    }

    Ok(())
}
