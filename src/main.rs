//! # Casanova CLI (`casanova`)
//!
//! Command-line front end for the relationship-advice agent core: builds and
//! inspects the knowledge index, calls the two agent tools directly, and
//! serves them over HTTP for a voice pipeline host.
//!
//! ## Usage
//!
//! ```bash
//! casanova --config ./config/casanova.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `casanova index build` | Load or build the knowledge index |
//! | `casanova index rebuild` | Delete the persisted index and build it again |
//! | `casanova index status` | Show the persisted index's provenance |
//! | `casanova ask "<question>"` | Ask the relationship guide |
//! | `casanova spice "<text>" --style poetic` | Turn a phrase into romantic Spanish |
//! | `casanova tools` | Print tool definitions as JSON |
//! | `casanova serve` | Start the HTTP tool server |
//! | `casanova completions <shell>` | Print shell completions |

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use casanova::config::{self, Config};
use casanova::engine::{EngineState, KnowledgeEngine};
use casanova::gateway::ToolGateway;
use casanova::index;
use casanova::server;

/// Casanova: relationship advice with a knowledge index and a romantic
/// Spanish phrase transformer, exposed as agent tools.
#[derive(Parser)]
#[command(name = "casanova", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/casanova.toml`. A missing file means defaults.
    #[arg(long, global = true, default_value = "./config/casanova.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the persisted knowledge index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Ask the relationship guide a question.
    Ask {
        /// The question; multiple words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        question: Vec<String>,
    },

    /// Transform a plain English phrase into romantic Spanish.
    Spice {
        /// The phrase; multiple words are joined with spaces.
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// poetic, playful, passionate, sweet, or any free-form tone.
        #[arg(long)]
        style: Option<String>,
    },

    /// Print the tool definitions offered to agents, as JSON.
    Tools,

    /// Start the HTTP tool server on `[server].bind`.
    Serve,

    /// Print shell completions to stdout.
    Completions {
        shell: clap_complete::Shell,
    },
}

#[derive(Subcommand)]
enum IndexAction {
    /// Load the persisted index, or build it from the source document.
    Build,
    /// Delete the persisted index, then build it from the source document.
    Rebuild,
    /// Show whether a persisted index exists and what it was built from.
    Status,
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if config.logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        clap_complete::generate(
            *shell,
            &mut Cli::command(),
            "casanova",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    dotenvy::dotenv().ok();

    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg);
    if !cli.config.exists() {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    let engine = Arc::new(KnowledgeEngine::from_config(&cfg)?);
    let gateway = ToolGateway::from_config(&cfg, Arc::clone(&engine))?;

    match cli.command {
        Commands::Index { action } => match action {
            IndexAction::Build => {
                let state = engine.setup().await?;
                print_setup(&engine, state);
            }
            IndexAction::Rebuild => {
                if engine.remove_persisted_index().await? {
                    println!("Removed {}", engine.index_path().display());
                }
                let state = engine.setup().await?;
                print_setup(&engine, state);
            }
            IndexAction::Status => {
                let path = engine.index_path();
                match index::read_persisted_meta(&path)
                    .await
                    .with_context(|| format!("Failed to read index {}", path.display()))?
                {
                    Some((meta, passages)) => {
                        let built = chrono::DateTime::from_timestamp(meta.built_at, 0)
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| meta.built_at.to_string());
                        println!("Index:     {}", path.display());
                        println!("Source:    {}", meta.source_path);
                        println!("SHA-256:   {}", meta.source_hash);
                        println!("Model:     {} ({} dims)", meta.embedding_model, meta.dims);
                        println!("Passages:  {}", passages);
                        println!("Built:     {}", built);
                    }
                    None => println!("No persisted index at {}", path.display()),
                }
            }
        },
        Commands::Ask { question } => {
            if let Err(e) = engine.setup().await {
                tracing::error!(error = %e, "knowledge base setup failed");
            }
            let answer = gateway.get_relationship_wisdom(&question.join(" ")).await;
            println!("{}", answer);
        }
        Commands::Spice { text, style } => {
            let spiced = gateway
                .translate_and_spice(&text.join(" "), style.as_deref())
                .await;
            println!("{}", spiced);
        }
        Commands::Tools => {
            println!("{}", serde_json::to_string_pretty(&gateway.definitions())?);
        }
        Commands::Serve => {
            if let Err(e) = engine.setup().await {
                tracing::error!(error = %e, "knowledge base setup failed, serving without it");
            }
            server::run_server(&cfg, gateway, engine).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

fn print_setup(engine: &KnowledgeEngine, state: EngineState) {
    match state {
        EngineState::Ready => println!(
            "Knowledge base ready: {} passages ({})",
            engine.passage_count().unwrap_or(0),
            engine.index_path().display()
        ),
        EngineState::Degraded => {
            println!("No knowledge base found; answers will improvise.")
        }
        other => println!("Knowledge base state: {}", other.as_str()),
    }
}
