use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;
use lookalike::embedder::{FaceEmbedder, OnnxEmbedder};
use lookalike::store::HttpReferenceStore;
use lookalike::{config, matcher, server};

#[derive(Parser)]
#[command(name = "lookalike")]
#[command(
    version,
    about = "Celebrity face matching - embed a photo and rank the closest reference faces"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP analysis server
    Serve {
        /// Bind address (defaults to the configured one)
        #[arg(short, long)]
        bind: Option<String>,
    },
    /// Match a local image file against the reference store
    Analyze {
        /// Path to the image file
        image: PathBuf,
        /// Number of matches to print (defaults to the configured one)
        #[arg(short, long)]
        results: Option<usize>,
    },
    /// Open config file in editor
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(None)?;

    match cli.command {
        Commands::Serve { bind } => {
            let mut cfg = cfg;
            if let Some(bind) = bind {
                cfg.bind_addr = bind;
            }
            server::serve(cfg).await
        }
        Commands::Analyze { image, results } => analyze(&cfg, &image, results).await,
        Commands::Config => open_config(),
    }
}

async fn analyze(cfg: &config::Config, image: &Path, results: Option<usize>) -> Result<()> {
    let num_results = results.unwrap_or(cfg.default_results);

    info!("Loading image: {}", image.display());
    let img = image::open(image).context("Failed to open image")?;

    let mut embedder =
        OnnxEmbedder::new(&cfg.models).context("Failed to initialize face recognition pipeline")?;
    let query = tokio::task::block_in_place(|| embedder.embed(&img))?;

    let store = HttpReferenceStore::new(reqwest::Client::new(), cfg.store.clone());
    let matches = matcher::rank_matches(&store, &query, num_results, cfg.chunk_size).await?;

    if matches.is_empty() {
        info!("No reference records to match against.");
        return Ok(());
    }
    for m in &matches {
        info!(
            "{}. {} - similarity {:.2} ({})",
            m.rank, m.name, m.similarity, m.image_url
        );
    }
    Ok(())
}

fn open_config() -> Result<()> {
    let config_path = config::CONFIG_PATH.as_path();
    let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());

    info!("Opening config file: {}", config_path.display());

    let status = std::process::Command::new(editor)
        .arg(config_path)
        .status()
        .context("Failed to open editor")?;

    if !status.success() {
        anyhow::bail!("Editor exited with non-zero status");
    }

    Ok(())
}
