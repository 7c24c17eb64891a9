//! # ragchat CLI
//!
//! The `ragchat` binary runs the chat relay server and exposes the same
//! pipeline from the command line.
//!
//! ## Usage
//!
//! ```bash
//! ragchat --config ./config/ragchat.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `ragchat init` | Create the SQLite database and schema |
//! | `ragchat serve` | Start the HTTP server |
//! | `ragchat chat --user U "<message>"` | Send one chat message through the full pipeline |
//! | `ragchat search "<query>"` | Run the web search gateway |
//! | `ragchat project create\|list\|update\|delete` | Manage projects |
//! | `ragchat ingest --user U --project P <file>` | Add a document to a project |
//! | `ragchat keys create\|list\|revoke` | Manage API keys for `/v1/chat/completions` |

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ragchat::models::ProjectUpdate;
use ragchat::{cli, config, migrate, server};

/// ragchat: a local-first chat relay with knowledge-base and web-search
/// prompt augmentation.
#[derive(Parser)]
#[command(
    name = "ragchat",
    about = "ragchat: a local-first chat relay with knowledge-base and web-search prompt augmentation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/ragchat.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Start the HTTP server on `[server].bind`.
    Serve,

    /// Send one message and print the assistant's reply.
    Chat {
        /// The message text.
        message: String,

        #[arg(long)]
        user: String,

        /// Continue an existing session instead of starting a new one.
        #[arg(long)]
        session: Option<String>,

        /// Bind a project (system prompt + knowledge base).
        #[arg(long)]
        project: Option<String>,

        /// Augment the prompt with web search results.
        #[arg(long)]
        web: bool,
    },

    /// Query the web search providers directly.
    Search {
        query: String,
    },

    /// Manage projects.
    Project {
        #[command(subcommand)]
        action: ProjectAction,
    },

    /// Ingest a document (.txt, .pdf, .doc, .docx) into a project.
    Ingest {
        file: PathBuf,

        #[arg(long)]
        user: String,

        #[arg(long)]
        project: String,
    },

    /// Manage API keys.
    Keys {
        #[command(subcommand)]
        action: KeysAction,
    },
}

#[derive(Subcommand)]
enum ProjectAction {
    Create {
        name: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        system_prompt: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    List {
        #[arg(long)]
        user: String,
    },
    /// Change a project's name, icon, description or system prompt.
    Update {
        id: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        icon: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        system_prompt: Option<String>,
    },
    Delete {
        id: String,
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
enum KeysAction {
    /// Issue a key. The full key is printed once.
    Create {
        name: String,
        #[arg(long)]
        user: String,
    },
    List {
        #[arg(long)]
        user: String,
    },
    Revoke {
        id: String,
        #[arg(long)]
        user: String,
    },
}

fn init_tracing(logging: &config::LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_tracing(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Chat {
            message,
            user,
            session,
            project,
            web,
        } => {
            cli::run_chat(&cfg, &user, session, project, web, &message).await?;
        }
        Commands::Search { query } => {
            cli::run_search(&cfg, &query).await?;
        }
        Commands::Project { action } => match action {
            ProjectAction::Create {
                name,
                user,
                system_prompt,
                description,
            } => {
                cli::run_project_create(&cfg, &user, &name, system_prompt, description).await?;
            }
            ProjectAction::List { user } => {
                cli::run_project_list(&cfg, &user).await?;
            }
            ProjectAction::Update {
                id,
                user,
                name,
                icon,
                description,
                system_prompt,
            } => {
                let changes = ProjectUpdate {
                    name,
                    icon,
                    description,
                    system_prompt,
                };
                cli::run_project_update(&cfg, &user, &id, changes).await?;
            }
            ProjectAction::Delete { id, user } => {
                cli::run_project_delete(&cfg, &user, &id).await?;
            }
        },
        Commands::Ingest {
            file,
            user,
            project,
        } => {
            cli::run_ingest(&cfg, &user, &project, &file).await?;
        }
        Commands::Keys { action } => match action {
            KeysAction::Create { name, user } => {
                cli::run_keys_create(&cfg, &user, &name).await?;
            }
            KeysAction::List { user } => {
                cli::run_keys_list(&cfg, &user).await?;
            }
            KeysAction::Revoke { id, user } => {
                cli::run_keys_revoke(&cfg, &user, &id).await?;
            }
        },
    }

    Ok(())
}
