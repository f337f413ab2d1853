//! Dispatches a parsed command to its handler.

use std::process::ExitCode;

use super::handlers::{MigrateCommandHandler, WorkCommandHandler};
use super::parser::{Cli, Commands};
use crate::config::Settings;
use crate::logger::LogLevelHandle;

/// Run the selected command and map its result to a process exit code.
///
/// `work` exits 0 only after a clean drain.
///
/// # Errors
/// Startup, configuration and migration failures
pub async fn execute_command(
    cli: &Cli,
    settings: Settings,
    log_level: Option<LogLevelHandle>,
) -> anyhow::Result<ExitCode> {
    match cli.selected_command() {
        Commands::Work { dry_run: true, .. } => {
            WorkCommandHandler::new(settings).dry_run()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Work { .. } => {
            let outcome = WorkCommandHandler::new(settings).execute(log_level).await?;
            Ok(ExitCode::from(outcome.exit_code()))
        }
        Commands::Migrate { dry_run, rollback } => {
            MigrateCommandHandler::new(settings)
                .execute(dry_run, rollback)
                .await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[tokio::test]
    async fn test_work_dry_run() {
        let cli = Cli::try_parse_from(["taskhive", "work", "--role", "scheduled", "--dry-run"])
            .unwrap();
        let mut settings = Settings::default();
        settings.worker.role = "scheduled".to_string();

        assert!(execute_command(&cli, settings, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_work_with_unknown_role_fails() {
        let cli = Cli::try_parse_from(["taskhive", "work", "--dry-run"]).unwrap();
        let mut settings = Settings::default();
        settings.worker.role = "billing".to_string();

        let err = execute_command(&cli, settings, None).await.unwrap_err();
        assert!(err.to_string().contains("Unknown worker role 'billing'"));
    }
}
