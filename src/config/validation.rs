//! Configuration validation logic
//!
//! This module provides validation methods for all configuration structures
//! to ensure configuration values are within acceptable ranges and formats.

use std::collections::HashSet;

use crate::config::environment::Environment;
use crate::config::error::ConfigError;
use crate::config::settings::{
    DatabaseConfig, FileSettings, HealthConfig, LedgerBackendKind, LedgerConfig, LoggerSettings,
    QueueBackendKind, QueueConfig, ScheduleConfig, ServicesConfig, Settings, WorkerConfig,
};
use crate::jobs::role::QueueKind;

/// Valid log levels
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid log formats
const VALID_LOG_FORMATS: &[&str] = &["full", "compact", "json"];

/// Smallest accepted result summary cap; smaller values leave no room for the truncation marker
const MIN_RESULT_SUMMARY_LIMIT: usize = 256;

/// Longest accepted ledger retention (100 years)
pub const MAX_RETENTION_DAYS: u32 = 36_500;

impl WorkerConfig {
    /// Validate worker configuration
    ///
    /// The role string is not checked here; it is parsed when the worker
    /// starts so an unknown role surfaces as `UnknownWorkerRole`.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::validation(
                "worker.poll_interval_ms",
                "Poll interval must be greater than 0 milliseconds.",
            ));
        }

        if self.stalled_check_interval == 0 {
            return Err(ConfigError::validation(
                "worker.stalled_check_interval",
                "Stalled check interval must be greater than 0 seconds.",
            ));
        }

        if self.shutdown_grace_period == 0 {
            return Err(ConfigError::validation(
                "worker.shutdown_grace_period",
                "Shutdown grace period must be greater than 0 seconds.",
            ));
        }

        for (name, over) in &self.queues {
            let field = |suffix: &str| format!("worker.queues.{name}.{suffix}");

            if name.parse::<QueueKind>().is_err() {
                return Err(ConfigError::validation(
                    format!("worker.queues.{name}"),
                    format!(
                        "Unknown queue '{name}'. Valid queues are: {}",
                        QueueKind::ALL.map(|k| k.as_str()).join(", ")
                    ),
                ));
            }
            if over.concurrency == Some(0) {
                return Err(ConfigError::validation(
                    field("concurrency"),
                    "Concurrency must be at least 1.",
                ));
            }
            if over.lease_timeout == Some(0) {
                return Err(ConfigError::validation(
                    field("lease_timeout"),
                    "Lease timeout must be greater than 0 seconds.",
                ));
            }
            if over.max_attempts == Some(0) {
                return Err(ConfigError::validation(
                    field("max_attempts"),
                    "Max attempts must be at least 1.",
                ));
            }
            if let Some(multiplier) = over.backoff_multiplier
                && !(multiplier.is_finite() && multiplier >= 1.0)
            {
                return Err(ConfigError::validation(
                    field("backoff_multiplier"),
                    format!("Backoff multiplier must be at least 1.0, got {multiplier}."),
                ));
            }
        }

        Ok(())
    }
}

impl QueueConfig {
    /// Validate queue backend configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backend != QueueBackendKind::Redis {
            return Ok(());
        }

        let redis = &self.redis;
        if !(redis.url.starts_with("redis://")
            || redis.url.starts_with("rediss://")
            || redis.url.starts_with("redis+unix://"))
        {
            return Err(ConfigError::validation(
                "queue.redis.url",
                "Invalid Redis URL. Expected format: redis://[user:password@]host[:port][/db]",
            ));
        }

        if redis.pool_size == 0 {
            return Err(ConfigError::validation(
                "queue.redis.pool_size",
                "Pool size must be greater than 0.",
            ));
        }

        if redis.connection_timeout == 0 {
            return Err(ConfigError::validation(
                "queue.redis.connection_timeout",
                "Connection timeout must be greater than 0 seconds.",
            ));
        }

        if redis.key_prefix.trim().is_empty() || redis.key_prefix.contains(char::is_whitespace) {
            return Err(ConfigError::validation(
                "queue.redis.key_prefix",
                "Key prefix must be non-empty and contain no whitespace.",
            ));
        }

        Ok(())
    }
}

impl LedgerConfig {
    /// Validate ledger configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.result_summary_limit < MIN_RESULT_SUMMARY_LIMIT {
            return Err(ConfigError::validation(
                "ledger.result_summary_limit",
                format!("Result summary limit must be at least {MIN_RESULT_SUMMARY_LIMIT} bytes."),
            ));
        }

        if self.retention_days == 0 || self.retention_days > MAX_RETENTION_DAYS {
            return Err(ConfigError::validation(
                "ledger.retention_days",
                format!("Retention must be between 1 and {MAX_RETENTION_DAYS} days."),
            ));
        }

        if self.write_timeout == 0 {
            return Err(ConfigError::validation(
                "ledger.write_timeout",
                "Ledger write timeout must be at least 1 second.",
            ));
        }

        Ok(())
    }
}

impl DatabaseConfig {
    /// Validate database configuration
    ///
    /// # Validation Rules
    /// - URL must not be empty
    /// - URL must use a PostgreSQL scheme
    /// - Max connections must be greater than 0
    /// - Min connections must be greater than 0
    /// - Min connections must not exceed max connections
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.is_empty() {
            return Err(ConfigError::validation(
                "database.url",
                "Database URL is required. Please specify a valid database connection string.",
            ));
        }

        if !(self.url.starts_with("postgres://") || self.url.starts_with("postgresql://")) {
            return Err(ConfigError::validation(
                "database.url",
                "Invalid database URL format. Expected format: postgres://[user:password@]host[:port]/database",
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::validation(
                "database.max_connections",
                "Max connections must be greater than 0.",
            ));
        }

        if self.min_connections == 0 {
            return Err(ConfigError::validation(
                "database.min_connections",
                "Min connections must be greater than 0.",
            ));
        }

        if self.min_connections > self.max_connections {
            return Err(ConfigError::validation(
                "database.min_connections",
                format!(
                    "Min connections ({}) cannot exceed max connections ({}).",
                    self.min_connections, self.max_connections
                ),
            ));
        }

        Ok(())
    }
}

impl ServicesConfig {
    /// Validate service endpoints
    pub fn validate(&self) -> Result<(), ConfigError> {
        let endpoints = [
            ("services.document_url", &self.document_url),
            ("services.ai_url", &self.ai_url),
            ("services.email_url", &self.email_url),
            ("services.report_url", &self.report_url),
            ("services.integration_url", &self.integration_url),
            ("services.alert_url", &self.alert_url),
        ];

        for (field, url) in endpoints {
            if let Some(url) = url
                && !(url.starts_with("http://") || url.starts_with("https://"))
            {
                return Err(ConfigError::validation(
                    field,
                    format!("Invalid endpoint '{url}'. Expected an http:// or https:// URL."),
                ));
            }
        }

        if self.request_timeout == 0 {
            return Err(ConfigError::validation(
                "services.request_timeout",
                "Request timeout must be greater than 0 seconds.",
            ));
        }

        Ok(())
    }
}

impl HealthConfig {
    /// Validate the operator HTTP surface
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.port == 0 {
            return Err(ConfigError::validation(
                "health.port",
                "Port must be between 1 and 65535. Please specify a valid port number.",
            ));
        }
        Ok(())
    }
}

impl ScheduleConfig {
    fn validate(&self, index: usize) -> Result<(), ConfigError> {
        let field = |suffix: &str| format!("schedules[{index}].{suffix}");

        if self.name.trim().is_empty() {
            return Err(ConfigError::validation(field("name"), "Schedule name is required."));
        }

        let fields = self.cron.split_whitespace().count();
        if !(6..=7).contains(&fields) {
            return Err(ConfigError::validation(
                field("cron"),
                format!(
                    "Cron expression '{}' must have 6 or 7 fields (seconds first).",
                    self.cron
                ),
            ));
        }

        match self.target_queue.parse::<QueueKind>() {
            Ok(QueueKind::ScheduledTriggers) => Err(ConfigError::validation(
                field("target_queue"),
                "A schedule cannot target the scheduled-triggers queue itself.",
            )),
            Ok(_) => Ok(()),
            Err(_) => Err(ConfigError::validation(
                field("target_queue"),
                format!("Unknown queue '{}'.", self.target_queue),
            )),
        }
    }
}

impl FileSettings {
    /// Validate file settings
    fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled && self.path.trim().is_empty() {
            return Err(ConfigError::validation(
                "logger.file.path",
                "File path is required when file logging is enabled.",
            ));
        }

        if !VALID_LOG_FORMATS.contains(&self.format.to_lowercase().as_str()) {
            return Err(ConfigError::validation(
                "logger.file.format",
                format!(
                    "Invalid log format '{}'. Valid formats are: {}",
                    self.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            ));
        }

        Ok(())
    }
}

impl LoggerSettings {
    /// Validate logger settings
    ///
    /// # Validation Rules
    /// - Log level must be a plain level or a valid `EnvFilter` directive
    /// - If file logging is enabled, path must not be empty
    /// - Log format must be one of: full, compact, json
    pub fn validate(&self) -> Result<(), ConfigError> {
        let plain_level = VALID_LOG_LEVELS.contains(&self.level.to_lowercase().as_str());
        if !plain_level && tracing_subscriber::EnvFilter::try_new(&self.level).is_err() {
            return Err(ConfigError::validation(
                "logger.level",
                format!(
                    "Invalid log level '{}'. Valid levels are: {}",
                    self.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            ));
        }

        if !self.console.enabled && !self.file.enabled {
            return Err(ConfigError::validation(
                "logger",
                "At least one output (console or file) must be enabled.",
            ));
        }

        self.file.validate()
    }
}

impl Settings {
    /// Validate all configuration settings
    ///
    /// Returns the first validation error encountered. The database section
    /// is only checked when the postgres ledger is selected.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.worker.validate()?;
        self.queue.validate()?;
        self.ledger.validate()?;
        if self.ledger.backend == LedgerBackendKind::Postgres {
            self.database.validate()?;
        }
        self.services.validate()?;
        self.health.validate()?;

        let mut names = HashSet::new();
        for (index, schedule) in self.schedules.iter().enumerate() {
            schedule.validate(index)?;
            if !names.insert(schedule.name.as_str()) {
                return Err(ConfigError::validation(
                    format!("schedules[{index}].name"),
                    format!("Duplicate schedule name '{}'.", schedule.name),
                ));
            }
        }

        self.logger.validate()
    }

    /// Environment-specific rules applied on top of [`Settings::validate`].
    pub fn validate_for(&self, environment: Environment) -> Result<(), ConfigError> {
        if !environment.requires_durable_backends() {
            return Ok(());
        }

        if self.queue.backend == QueueBackendKind::Memory {
            return Err(ConfigError::validation(
                "queue.backend",
                format!("The memory queue backend is not allowed in {environment}."),
            ));
        }

        if self.ledger.backend == LedgerBackendKind::Memory {
            return Err(ConfigError::validation(
                "ledger.backend",
                format!("The memory ledger backend is not allowed in {environment}."),
            ));
        }

        Ok(())
    }
}
