mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use cli::handlers;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chairside")]
#[command(version = "0.1.0")]
#[command(about = "Dental practice workflow orchestrator")]
#[command(
    help_template = "{name} - {version}\n{about}\n\n{usage-heading}\n  {usage}\n\n{all-args}{options}\n"
)]
struct Cli {
    /// Path to configuration file (default: ~/.config/chairside/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Workflow orchestration commands
    ///
    /// Runs are checkpointed after every step. A run that needs a verification
    /// code or a human decision stops as `suspended`; continue it with
    /// `chairside workflow resume <run-id> -f field=value`.
    ///
    /// Examples:
    ///   chairside workflow start single-portal-login -f portal=MoHealthNet
    ///   chairside workflow start eligibility-verification --input patient.json
    ///   chairside workflow resume 3f2c... -f verification_code=482913
    Workflow {
        #[command(subcommand)]
        command: cli::workflow::WorkflowCommands,
    },

    /// Show or initialize configuration
    Config {
        /// Start interactive configuration setup
        #[arg(long)]
        init: bool,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Secrets and overrides may live in a local .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { init, json } => {
            if init {
                handlers::handle_config_init(cli.config).await?;
            } else {
                handlers::handle_config_show(cli.config, json).await?;
            }
        }
        Commands::Workflow { command } => {
            use cli::workflow::WorkflowCommands;
            use cli::workflow_handlers;

            let config = handlers::load_configuration(cli.config.as_deref())?;
            chairside_core::services::logging::init_logging(config.log_level)?;

            match command {
                WorkflowCommands::Start {
                    workflow_name,
                    fields,
                    input,
                    initiator,
                    json,
                } => {
                    workflow_handlers::handle_workflow_start(
                        &config,
                        workflow_name,
                        fields,
                        input,
                        initiator,
                        json,
                    )
                    .await?;
                }
                WorkflowCommands::Resume {
                    run_id,
                    fields,
                    input,
                    json,
                } => {
                    workflow_handlers::handle_workflow_resume(&config, run_id, fields, input, json)
                        .await?;
                }
                WorkflowCommands::Status { run_id, json } => {
                    workflow_handlers::handle_workflow_status(&config, run_id, json).await?;
                }
                WorkflowCommands::Cancel { run_id, json } => {
                    workflow_handlers::handle_workflow_cancel(&config, run_id, json).await?;
                }
                WorkflowCommands::List { json } => {
                    workflow_handlers::handle_workflow_list(&config, json).await?;
                }
                WorkflowCommands::History {
                    workflow,
                    limit,
                    json,
                } => {
                    workflow_handlers::handle_workflow_history(&config, workflow, limit, json)
                        .await?;
                }
                WorkflowCommands::Recover { json } => {
                    workflow_handlers::handle_workflow_recover(&config, json).await?;
                }
                WorkflowCommands::Validate {
                    workflow_file,
                    json,
                } => {
                    workflow_handlers::handle_workflow_validate(&config, workflow_file, json)
                        .await?;
                }
                WorkflowCommands::ListDefs { directory, json } => {
                    workflow_handlers::handle_workflow_list_defs(&config, directory, json).await?;
                }
            }
        }
    }

    Ok(())
}
