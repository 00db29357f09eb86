//! Attest CLI — command-line interface for the audit workflow copilot.
//!
//! Reuses the same core domain logic (attest-core) and server bootstrap
//! (attest-server) that power the web UI.

mod commands;

use clap::{Parser, Subcommand};

/// Attest CLI — Audit workflow copilot
#[derive(Parser)]
#[command(name = "attest", version, about = "Attest CLI — Audit workflow copilot")]
pub struct Cli {
    /// Path to the SQLite database file
    #[arg(long, env = "ATTEST_DB_PATH", default_value = "attest.db")]
    db: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the Attest HTTP backend server
    Server {
        /// Host to bind to
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
        /// Port to listen on
        #[arg(long, default_value_t = 3410)]
        port: u16,
        /// Use the scripted offline model (no API key needed)
        #[arg(long)]
        offline: bool,
    },

    /// Manage workflows
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Inspect and set monthly spending limits
    Limit {
        #[command(subcommand)]
        action: LimitAction,
    },

    /// Show a user's spend for the current calendar month
    Usage {
        /// User ID to inspect
        #[arg(long, default_value = "default")]
        user_id: String,
    },
}

#[derive(Subcommand)]
enum WorkflowAction {
    /// List a user's workflows
    List {
        #[arg(long, default_value = "default")]
        user_id: String,
    },
    /// Show one workflow with its execution order and step ledger
    Show {
        /// Workflow ID
        id: String,
        #[arg(long, default_value = "default")]
        user_id: String,
    },
}

#[derive(Subcommand)]
enum LimitAction {
    /// List all configured spending limits
    List,
    /// Set a user's monthly spending limit (USD)
    Set {
        /// User ID
        user_id: String,
        /// Monthly limit in USD
        monthly_limit: f64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attest_core=warn,attest_server=warn,attest_cli=info".into()),
        )
        .init();

    let result = if let Some(command) = cli.command {
        match command {
            Commands::Server {
                host,
                port,
                offline,
            } => commands::server::run(host, port, cli.db, offline).await,

            Commands::Workflow { action } => {
                let state = commands::init_state(&cli.db).await;
                match action {
                    WorkflowAction::List { user_id } => {
                        commands::workflow::list(&state, &user_id).await
                    }
                    WorkflowAction::Show { id, user_id } => {
                        commands::workflow::show(&state, &id, &user_id).await
                    }
                }
            }

            Commands::Limit { action } => {
                let state = commands::init_state(&cli.db).await;
                match action {
                    LimitAction::List => commands::limit::list(&state).await,
                    LimitAction::Set {
                        user_id,
                        monthly_limit,
                    } => commands::limit::set(&state, &user_id, monthly_limit).await,
                }
            }

            Commands::Usage { user_id } => {
                let state = commands::init_state(&cli.db).await;
                commands::limit::usage(&state, &user_id).await
            }
        }
    } else {
        // No subcommand — show help
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        Ok(())
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
