//! # Folio CLI (`folio`)
//!
//! Ask questions about a folder of PDFs.
//!
//! ## Usage
//!
//! ```bash
//! folio --config ./config/folio.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `folio index` | Load the persisted index or build it from the document folder |
//! | `folio refresh` | Delete the index and rebuild it |
//! | `folio status` | Show the persisted index manifest and the PDFs found |
//! | `folio search "<query>"` | Print the closest chunks with scores and pages |
//! | `folio ask "<question>"` | Answer one question, streaming, then list sources |
//! | `folio chat` | Interactive question/answer session |
//!
//! The API key is read from `$OPENAI_API_KEY`, then from `.secrets.toml`,
//! and otherwise asked for on the terminal. It is kept in memory only.
//!
//! Log verbosity follows `RUST_LOG` (default `info`); logs go to stderr.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::EnvFilter;

use folio::cache::{IndexCache, IndexLookup};
use folio::config::{self, Config};
use folio::credential::{self, Credential, CredentialState};
use folio::error::PipelineError;
use folio::extract::PdfExtractor;
use folio::index_cmd;
use folio::llm::create_chat_model;
use folio::retriever;
use folio::session::{self, ChatSession};

/// Folio: retrieval-augmented question answering over a folder of PDFs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means built-in defaults.
#[derive(Parser)]
#[command(
    name = "folio",
    about = "Folio: ask questions about a folder of PDF documents",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/folio.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load or build the index.
    ///
    /// Reuses the persisted index when the document folder is unchanged;
    /// otherwise extracts, chunks and embeds every PDF and persists the result.
    Index {
        /// Index this single PDF in memory instead of the document folder.
        /// Nothing is persisted.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Delete the persisted index and rebuild it from the document folder.
    Refresh,

    /// Show the persisted index and the PDFs in the document folder.
    Status,

    /// Print the chunks closest to a query.
    Search {
        query: String,

        /// Number of chunks to return (defaults to `[retrieval].top_k`).
        #[arg(long)]
        k: Option<usize>,

        /// Search this single PDF instead of the document folder.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Answer a single question.
    Ask {
        question: String,

        /// Wait for the whole answer instead of streaming it.
        #[arg(long)]
        no_stream: bool,

        /// Answer from this single PDF instead of the document folder.
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// Start an interactive chat.
    ///
    /// Type a question per line. `/refresh` rebuilds the index, `/history`
    /// prints the transcript, `/quit` exits.
    Chat {
        /// Chat about this single PDF instead of the document folder.
        #[arg(long)]
        file: Option<PathBuf>,
    },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(err) = run().await {
        error!(error = %err, "command failed");
        for cause in err.chain().skip(1) {
            error!(cause = %cause, "caused by");
        }
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    let answers = matches!(cli.command, Commands::Ask { .. } | Commands::Chat { .. });
    let status = matches!(cli.command, Commands::Status);
    let needs_credential = !status
        && (cfg.embedding.needs_credential() || (answers && cfg.llm.needs_credential()));
    let credential = acquire_credential(&cfg, needs_credential)?;
    let key = credential.credential();

    let cache = Arc::new(IndexCache::new(cfg.clone(), Arc::new(PdfExtractor)));

    match cli.command {
        Commands::Index { file } => {
            index_cmd::run_index(&cache, key, file.as_deref()).await?;
        }
        Commands::Refresh => {
            index_cmd::run_refresh(&cache, key).await?;
        }
        Commands::Search { query, k, file } => {
            if let Some(file) = file {
                load_upload(&cache, &file, key).await?;
            }
            retriever::run_search(&cache, key, &query, k).await?;
        }
        Commands::Ask {
            question,
            no_stream,
            file,
        } => {
            if let Some(file) = file {
                load_upload(&cache, &file, key).await?;
            }
            let model = create_chat_model(&cfg.llm, key)?;
            let mut session = ChatSession::new(cache.clone(), model, credential.clone());
            session::run_ask(&mut session, &question, !no_stream).await?;
        }
        Commands::Chat { file } => {
            let model = create_chat_model(&cfg.llm, key)?;
            let mut session = ChatSession::new(cache.clone(), model, credential.clone());
            session::run_chat(&mut session, file.as_deref()).await?;
        }
        Commands::Status => index_cmd::run_status(&cfg)?,
    }

    Ok(())
}

/// Resolve the API key once for the whole process. Falls back to asking on
/// the terminal when one is needed and none is configured.
fn acquire_credential(cfg: &Config, needed: bool) -> Result<CredentialState> {
    let state = credential::resolve(&cfg.credentials)?;
    if state != CredentialState::Unconfigured || !needed {
        return Ok(state);
    }

    let state = if std::io::stdin().is_terminal() {
        credential::prompt(&mut std::io::stdin().lock(), &mut std::io::stderr())?
    } else {
        CredentialState::Unconfigured
    };

    if state == CredentialState::Unconfigured {
        eprintln!(
            "No API key: set ${} or add {} to {}.",
            cfg.credentials.env,
            cfg.credentials.env,
            cfg.credentials.secrets_file.display()
        );
        return Err(PipelineError::Unconfigured.into());
    }
    Ok(state)
}

async fn load_upload(cache: &IndexCache, file: &Path, key: Option<&Credential>) -> Result<()> {
    match cache.load_upload(file, key).await? {
        IndexLookup::Ready { .. } => Ok(()),
        IndexLookup::NoDocuments { failures } => {
            for f in &failures {
                eprintln!("Warning: could not read {}: {}", f.file, f.reason);
            }
            Err(PipelineError::EmptyCorpus {
                dir: file.to_path_buf(),
            }
            .into())
        }
    }
}
