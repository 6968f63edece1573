//! Workflow CLI commands

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum WorkflowCommands {
    /// Start a workflow run and drive it until it suspends or ends
    Start {
        /// Name of the workflow to run
        workflow_name: String,

        /// Initial state field as key=value; values are parsed as JSON when possible
        #[arg(short = 'f', long = "field")]
        fields: Vec<String>,

        /// JSON file with an object of initial state fields
        #[arg(long)]
        input: Option<PathBuf>,

        /// Initiator identity
        #[arg(short, long, default_value = "cli-user")]
        initiator: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Supply input to a suspended run and continue it
    Resume {
        /// Run ID (UUID)
        run_id: String,

        /// Field to merge as key=value; values are parsed as JSON when possible
        #[arg(short = 'f', long = "field")]
        fields: Vec<String>,

        /// JSON file with an object of fields to merge
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Get run status from its last checkpoint
    Status {
        /// Run ID (UUID)
        run_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Cancel a run
    Cancel {
        /// Run ID (UUID)
        run_id: String,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List registered workflows
    List {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Show run history and metrics
    History {
        /// Workflow name (optional, shows all if not specified)
        #[arg(short, long)]
        workflow: Option<String>,

        /// Number of recent runs to list
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Continue runs a previous process left running
    Recover {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow definition file
    Validate {
        /// Path to workflow YAML or JSON file
        workflow_file: PathBuf,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// List workflow definition files
    ListDefs {
        /// Directory containing workflow definitions (default: ~/.chairside/workflows)
        #[arg(short, long)]
        directory: Option<PathBuf>,

        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },
}
