//! # Document QA CLI (`docqa`)
//!
//! Upload documents, scope them into sessions, ask grounded questions, and
//! run the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! docqa --config ./config/docqa.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docqa serve` | Start the HTTP API |
//! | `docqa ingest <file>` | Upload, extract, chunk and index one file |
//! | `docqa ask "<question>"` | Answer a question with citations |
//! | `docqa summary` | Summarize a session or the whole corpus |
//! | `docqa quiz` | Generate multiple-choice questions |
//! | `docqa documents` | List uploaded documents |
//! | `docqa sessions` | List sessions |
//! | `docqa stats` | Index, document and token statistics |
//! | `docqa health` | Probe every component |
//! | `docqa reset --yes` | Delete all documents, sessions and chunks |
//!
//! ## Examples
//!
//! ```bash
//! docqa ingest ./policies/returns.pdf --session onboarding
//! docqa ask "How long is the return window?" --session onboarding
//! docqa quiz --count 3 --session onboarding
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use docqa::config;
use docqa::logging;
use docqa::server;
use docqa::service::{HealthStatus, RagService, ResetStatus, DEFAULT_QUIZ_QUESTIONS};
use docqa::stats;

/// Document QA: session-scoped question answering over your own files.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/docqa.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "docqa",
    about = "Document QA: session-scoped question answering over your own files",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docqa.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind` and serves `/api/document-qa/*`.
    Serve,

    /// Upload and index a file.
    ///
    /// The content type is inferred from the extension. Processing failures
    /// are reported on the document rather than aborting the command.
    Ingest {
        /// Path to a PDF, DOCX, PPTX, TXT or Markdown file.
        path: PathBuf,

        /// Add the document to this session once it is ready.
        #[arg(long)]
        session: Option<String>,
    },

    /// Ask a question.
    Ask {
        question: String,

        /// Restrict retrieval to this session's documents.
        #[arg(long)]
        session: Option<String>,

        /// Number of chunks to retrieve (defaults to `[retrieval].k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Summarize a session, or every ready document without one.
    Summary {
        #[arg(long)]
        session: Option<String>,
    },

    /// Generate a multiple-choice quiz.
    Quiz {
        /// Number of questions (at most 20).
        #[arg(long, default_value_t = DEFAULT_QUIZ_QUESTIONS)]
        count: usize,

        #[arg(long)]
        session: Option<String>,
    },

    /// List uploaded documents.
    Documents,

    /// List sessions.
    Sessions,

    /// Show index, document and token statistics.
    Stats,

    /// Probe every component. Exits non-zero unless healthy.
    Health,

    /// Delete every document, session, stored file and chunk.
    Reset {
        /// Required confirmation.
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    if let Commands::Reset { yes: false } = cli.command {
        anyhow::bail!("reset deletes all documents, sessions and chunks; pass --yes to confirm");
    }

    let bind = cfg.server.bind.clone();
    let service = RagService::from_config(cfg).await?;

    match cli.command {
        Commands::Serve => server::serve(Arc::new(service), &bind).await?,
        Commands::Ingest { path, session } => {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                anyhow::anyhow!("Failed to read {}: {}", path.display(), e)
            })?;
            let filename = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "upload".to_string());

            let doc = service.add_document(&bytes, &filename, None).await?;
            println!("{}  {}  {}", doc.id, doc.status, doc.filename);
            match &doc.error {
                Some(err) => println!("  error: {}", err),
                None => println!("  chunks: {}", doc.chunk_count),
            }
            if let Some(sid) = session {
                service.add_document_to_session(&sid, &doc.id).await?;
                println!("  added to session {}", sid);
            }
        }
        Commands::Ask {
            question,
            session,
            k,
        } => {
            let result = service.query(&question, session.as_deref(), k).await?;
            println!("{}", result.answer);
            if !result.sources.is_empty() {
                println!();
                println!("Sources:");
                for source in &result.sources {
                    match source.page {
                        Some(page) => println!("  - {} (page {})", source.file_name, page),
                        None => println!("  - {}", source.file_name),
                    }
                }
            }
            if let Some(usage) = result.token_usage {
                println!();
                println!(
                    "tokens: {} in / {} out  cost: ${:.4}",
                    usage.input_tokens, usage.output_tokens, usage.cost_usd
                );
            }
        }
        Commands::Summary { session } => {
            let result = service.generate_summary(session.as_deref()).await?;
            println!("{}", result.summary);
            for point in &result.key_points {
                println!("  - {}", point);
            }
        }
        Commands::Quiz { count, session } => {
            let result = service.generate_quiz(session.as_deref(), count).await?;
            if result.questions.is_empty() {
                println!("No questions could be generated.");
            }
            for q in &result.questions {
                println!("{}. {}", q.id, q.question);
                for (i, option) in q.options.iter().enumerate() {
                    let marker = if i == q.correct_answer { "*" } else { " " };
                    println!("   {} {}) {}", marker, (b'a' + i as u8) as char, option);
                }
            }
        }
        Commands::Documents => {
            let docs = service.list_documents().await;
            if docs.is_empty() {
                println!("No documents.");
            } else {
                println!(
                    "{:<36}  {:<10}  {:>6}  {:>10}  FILENAME",
                    "ID", "STATUS", "CHUNKS", "SIZE"
                );
                for doc in &docs {
                    println!(
                        "{:<36}  {:<10}  {:>6}  {:>10}  {}",
                        doc.id,
                        doc.status.as_str(),
                        doc.chunk_count,
                        stats::format_bytes(doc.size_bytes),
                        doc.filename
                    );
                }
            }
        }
        Commands::Sessions => {
            let sessions = service.list_sessions().await;
            if sessions.is_empty() {
                println!("No sessions.");
            } else {
                println!("{:<36}  {:>5}  CREATED", "ID", "DOCS");
                for s in &sessions {
                    println!(
                        "{:<36}  {:>5}  {}",
                        s.id,
                        s.document_count,
                        s.created_at.format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
        Commands::Stats => stats::run_stats(&service).await?,
        Commands::Health => {
            let report = service.health_check().await;
            println!("status: {}", serde_json::to_string(&report.status)?.trim_matches('"'));
            for (component, state) in &report.components {
                println!("  {:<14} {}", component, state);
            }
            if report.status != HealthStatus::Healthy {
                std::process::exit(1);
            }
        }
        Commands::Reset { .. } => {
            let report = service.reset_system().await;
            println!("{}", report.message);
            if report.status == ResetStatus::Error {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
