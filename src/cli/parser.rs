//! CLI argument parsing with clap

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::build;

/// Background job orchestration worker
#[derive(Parser, Debug)]
#[command(name = "taskhive")]
#[command(about = "Background job orchestration worker")]
#[command(long_about = "
taskhive runs the worker pools for one deployment role over a durable job
queue, recording every attempt in the execution ledger.

EXAMPLES:
    # Run every queue in one process
    taskhive work --role all

    # Role from the environment
    WORKER_ROLE=document taskhive work

    # Validate configuration and print the pools the role would start
    taskhive --env production work --role primary --dry-run

    # Apply ledger migrations
    taskhive migrate

    # Revert the last migration
    taskhive migrate --rollback 1
")]
#[command(version = build::CLAP_LONG_VERSION)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Configuration file path
    ///
    /// Loads this single TOML file instead of the layered `config/` directory.
    #[arg(short, long, value_name = "FILE", value_parser = super::validation::validate_config_file_path)]
    pub config: Option<PathBuf>,

    /// Override environment detection
    ///
    /// Selects the `{environment}.toml` overlay and the rules applied to it.
    #[arg(short, long, value_enum)]
    pub env: Option<Environment>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Only log errors
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Run the worker pools of a deployment role (default)
    Work {
        /// Deployment role: primary, document, ai, scheduled or all
        ///
        /// Falls back to `worker.role` from configuration.
        #[arg(long, value_name = "ROLE", env = "WORKER_ROLE")]
        role: Option<String>,

        /// Validate configuration, print the resolved pools and exit
        #[arg(long)]
        dry_run: bool,
    },
    /// Execution ledger schema migrations
    Migrate {
        /// List pending migrations without applying them
        #[arg(long, conflicts_with = "rollback")]
        dry_run: bool,

        /// Number of migrations to revert (1-100)
        #[arg(long, value_name = "STEPS", value_parser = super::validation::validate_rollback_steps)]
        rollback: Option<u32>,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Work {
            role: None,
            dry_run: false,
        }
    }
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum Environment {
    #[value(name = "development", alias = "dev")]
    Development,
    #[value(name = "test")]
    Test,
    #[value(name = "staging", alias = "stage")]
    Staging,
    #[value(name = "production", alias = "prod")]
    Production,
}

impl Cli {
    /// The subcommand to run; `work` when none is given.
    pub fn selected_command(&self) -> Commands {
        self.command.clone().unwrap_or_default()
    }

    /// Log level forced by `--verbose` / `--quiet`.
    pub fn log_level_override(&self) -> Option<&'static str> {
        if self.verbose {
            Some("debug")
        } else if self.quiet {
            Some("error")
        } else {
            None
        }
    }
}

impl From<Environment> for crate::config::Environment {
    fn from(env: Environment) -> Self {
        match env {
            Environment::Development => crate::config::Environment::Development,
            Environment::Test => crate::config::Environment::Test,
            Environment::Staging => crate::config::Environment::Staging,
            Environment::Production => crate::config::Environment::Production,
        }
    }
}
