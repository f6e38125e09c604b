//! Command type definitions shared between main.rs and the command modules.

use clap::{Args, Subcommand};

#[derive(Args, Debug, Clone)]
pub struct TrainArgs {
    /// Dataset to train on
    #[arg(long)]
    pub dataset: String,

    /// Model alias (see `tsync models`)
    #[arg(long)]
    pub model: String,

    /// Target column
    #[arg(long)]
    pub target: String,

    /// classification or regression
    #[arg(long, default_value = "classification")]
    pub task: String,

    /// Hyperparameter as key=value; values parse as JSON when they can
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Follow the job after it starts
    #[arg(long)]
    pub watch: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// List cached step records
    List {
        #[arg(long)]
        json: bool,
    },

    /// Drop entries that are corrupted or whose dataset no longer exists
    Reconcile {
        #[arg(long)]
        json: bool,
    },

    /// Rebuild cached records from the registry's preprocessing history
    Restore {
        dataset_id: String,

        /// Restore only this step type
        #[arg(long)]
        step: Option<String>,
    },
}
