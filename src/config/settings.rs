//! Configuration settings structures for taskhive
//!
//! This module defines all configuration structures that can be loaded from
//! TOML files and environment variables.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::error::ConfigError;
use crate::jobs::role::{QueueKind, QueueProfile};
use crate::logger::{ConsoleConfig, FileConfig, LogFormat, LoggerConfig};
use crate::queue::{RetryPolicies, RetryPolicy};

// ============================================================================
// Default value functions
// ============================================================================

fn default_app_name() -> String {
    "taskhive".to_string()
}

fn default_app_version() -> String {
    crate::pkg_version().to_string()
}

fn default_role() -> String {
    "all".to_string()
}

fn default_poll_interval_ms() -> u64 {
    250
}

fn default_stalled_check_interval() -> u64 {
    15
}

fn default_shutdown_grace_period() -> u64 {
    30
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connection_timeout() -> u64 {
    30
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_redis_pool_size() -> u32 {
    16
}

fn default_redis_connection_timeout() -> u64 {
    5
}

fn default_redis_key_prefix() -> String {
    "taskhive".to_string()
}

fn default_result_summary_limit() -> usize {
    4096
}

fn default_retention_days() -> u32 {
    30
}

fn default_write_timeout() -> u64 {
    5
}

fn default_service_timeout() -> u64 {
    30
}

fn default_health_host() -> String {
    "127.0.0.1".to_string()
}

fn default_health_port() -> u16 {
    8081
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_log_path() -> String {
    "logs/taskhive.log".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

// ============================================================================
// Application Configuration
// ============================================================================

/// Application metadata configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Application name
    #[serde(default = "default_app_name")]
    pub name: String,

    /// Application version
    #[serde(default = "default_app_version")]
    pub version: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: default_app_name(),
            version: default_app_version(),
        }
    }
}

// ============================================================================
// Worker Configuration
// ============================================================================

/// Per-queue tuning; unset fields keep the queue's built-in defaults.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QueueOverride {
    /// Maximum concurrently executing jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Lease (visibility) timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_timeout: Option<u64>,

    /// Total attempts before dead-lettering
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,

    /// First retry delay in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_delay: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_multiplier: Option<f64>,

    /// Upper bound on the retry delay in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_backoff: Option<u64>,
}

/// Worker process configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Deployment role: primary, document, ai, scheduled or all
    #[serde(default = "default_role")]
    pub role: String,

    /// Idle delay between lease attempts on an empty queue, in milliseconds
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Interval of the expired-lease sweep in seconds
    #[serde(default = "default_stalled_check_interval")]
    pub stalled_check_interval: u64,

    /// Upper bound on graceful drain in seconds
    #[serde(default = "default_shutdown_grace_period")]
    pub shutdown_grace_period: u64,

    /// Warn when a handler runs longer than this many seconds (0 disables)
    #[serde(default)]
    pub slow_job_warning: u64,

    /// Per-queue overrides keyed by queue name
    #[serde(default)]
    pub queues: BTreeMap<String, QueueOverride>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            poll_interval_ms: default_poll_interval_ms(),
            stalled_check_interval: default_stalled_check_interval(),
            shutdown_grace_period: default_shutdown_grace_period(),
            slow_job_warning: 0,
            queues: BTreeMap::new(),
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stalled_check_interval(&self) -> Duration {
        Duration::from_secs(self.stalled_check_interval)
    }

    pub fn shutdown_grace_period(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_period)
    }

    pub fn slow_job_warning(&self) -> Option<Duration> {
        (self.slow_job_warning > 0).then(|| Duration::from_secs(self.slow_job_warning))
    }

    /// Built-in profile of `kind` with any configured override applied.
    pub fn profile_for(&self, kind: QueueKind) -> QueueProfile {
        let mut profile = kind.default_profile();
        let Some(over) = self.queues.get(kind.as_str()) else {
            return profile;
        };

        if let Some(concurrency) = over.concurrency {
            profile.concurrency = concurrency;
        }
        if let Some(secs) = over.lease_timeout {
            profile.lease_timeout = Duration::from_secs(secs);
        }
        if let Some(max_attempts) = over.max_attempts {
            profile.retry.max_attempts = max_attempts;
        }
        if let Some(secs) = over.backoff_delay {
            profile.retry.backoff_delay = Duration::from_secs(secs);
        }
        if let Some(multiplier) = over.backoff_multiplier {
            profile.retry.backoff_multiplier = multiplier;
        }
        if let Some(secs) = over.max_backoff {
            profile.retry.max_backoff = Duration::from_secs(secs);
        }
        profile
    }

    /// Retry policies for every known queue, handed to the queue backend.
    pub fn retry_policies(&self) -> RetryPolicies {
        let per_queue = QueueKind::ALL
            .iter()
            .map(|kind| (kind.as_str().to_string(), self.profile_for(*kind).retry))
            .collect();
        RetryPolicies::new(RetryPolicy::default(), per_queue)
    }
}

// ============================================================================
// Queue Configuration
// ============================================================================

/// Queue backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackendKind {
    /// In-process queue; state is lost on exit
    #[default]
    Memory,
    /// Redis-backed durable queue
    Redis,
}

/// Redis queue adapter configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisQueueConfig {
    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_redis_connection_timeout")]
    pub connection_timeout: u64,

    /// Prefix of every key the adapter writes
    #[serde(default = "default_redis_key_prefix")]
    pub key_prefix: String,
}

impl Default for RedisQueueConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            connection_timeout: default_redis_connection_timeout(),
            key_prefix: default_redis_key_prefix(),
        }
    }
}

/// Queue configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct QueueConfig {
    #[serde(default)]
    pub backend: QueueBackendKind,

    #[serde(default)]
    pub redis: RedisQueueConfig,
}

// ============================================================================
// Ledger Configuration
// ============================================================================

/// Execution ledger backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackendKind {
    #[default]
    Memory,
    Postgres,
}

/// Execution ledger configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub backend: LedgerBackendKind,

    /// Byte cap on the stored result summary
    #[serde(default = "default_result_summary_limit")]
    pub result_summary_limit: usize,

    /// Finished records older than this are purged by the maintenance queue
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,

    /// Seconds a single tracking write may take before it is abandoned
    #[serde(default = "default_write_timeout")]
    pub write_timeout: u64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackendKind::default(),
            result_summary_limit: default_result_summary_limit(),
            retention_days: default_retention_days(),
            write_timeout: default_write_timeout(),
        }
    }
}

impl LedgerConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout)
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Diesel database connection configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database connection URL
    #[serde(default)]
    pub url: String,

    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout: u64,

    /// Whether to automatically run pending migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connection_timeout: default_connection_timeout(),
            auto_migrate: false,
        }
    }
}

// ============================================================================
// Services Configuration
// ============================================================================

/// Endpoints of the services that own each job category's business logic.
///
/// A category without an endpoint gets no handler, so a role that needs it
/// fails to start with `UnknownQueue`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicesConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_service_timeout")]
    pub request_timeout: u64,
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            document_url: None,
            ai_url: None,
            email_url: None,
            report_url: None,
            integration_url: None,
            alert_url: None,
            request_timeout: default_service_timeout(),
        }
    }
}

impl ServicesConfig {
    /// Configured endpoint for a service-backed queue.
    pub fn endpoint_for(&self, kind: QueueKind) -> Option<&str> {
        let url = match kind {
            QueueKind::CriticalAlerts => &self.alert_url,
            QueueKind::EmailDelivery => &self.email_url,
            QueueKind::ReportGeneration => &self.report_url,
            QueueKind::DocumentProcessing => &self.document_url,
            QueueKind::AiProcessing => &self.ai_url,
            QueueKind::IntegrationSync => &self.integration_url,
            QueueKind::WebhookRelay | QueueKind::ScheduledTriggers | QueueKind::Maintenance => {
                return None;
            }
        };
        url.as_deref()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }
}

// ============================================================================
// Health Endpoint Configuration
// ============================================================================

/// Operator HTTP surface configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_health_host")]
    pub host: String,

    #[serde(default = "default_health_port")]
    pub port: u16,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: default_health_host(),
            port: default_health_port(),
        }
    }
}

impl HealthConfig {
    /// Get the bind address as a string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Schedules
// ============================================================================

/// Cron trigger enqueued onto the scheduled-triggers queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub name: String,

    /// Six-field cron expression (seconds first)
    pub cron: String,

    /// Queue the trigger handler forwards the payload to
    pub target_queue: String,

    #[serde(default = "empty_payload")]
    pub payload: serde_json::Value,
}

// ============================================================================
// Logger Configuration
// ============================================================================

/// Console output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsoleSettings {
    /// Whether console output is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether to use colored output
    #[serde(default = "default_true")]
    pub colored: bool,
}

impl Default for ConsoleSettings {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            colored: default_true(),
        }
    }
}

/// File output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSettings {
    /// Whether file output is enabled
    #[serde(default)]
    pub enabled: bool,

    /// Path to the log file
    #[serde(default = "default_log_path")]
    pub path: String,

    /// Whether to append to existing file
    #[serde(default = "default_true")]
    pub append: bool,

    /// Log format: "full", "compact", or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for FileSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            path: default_log_path(),
            append: default_true(),
            format: default_log_format(),
        }
    }
}

/// Logger configuration settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggerSettings {
    /// Log level or `EnvFilter` directive, e.g. "info" or "info,taskhive::jobs=debug"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Console output settings
    #[serde(default)]
    pub console: ConsoleSettings,

    /// File output settings
    #[serde(default)]
    pub file: FileSettings,
}

impl Default for LoggerSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            console: ConsoleSettings::default(),
            file: FileSettings::default(),
        }
    }
}

impl LoggerSettings {
    /// Convert the file representation into the runtime `LoggerConfig`.
    pub fn into_logger_config(self) -> Result<LoggerConfig, ConfigError> {
        let console = ConsoleConfig::new(self.console.enabled, self.console.colored);
        let file = self.file.into_file_config()?;

        LoggerConfig::new(console, file, self.level)
            .map_err(|e| ConfigError::validation("logger", e.to_string()))
    }
}

impl FileSettings {
    /// Convert FileSettings to FileConfig
    pub fn into_file_config(self) -> Result<FileConfig, ConfigError> {
        let format = self
            .format
            .parse::<LogFormat>()
            .map_err(|e| ConfigError::validation("logger.file.format", e.to_string()))?;

        FileConfig::new(self.enabled, PathBuf::from(self.path), self.append, format)
            .map_err(|e| ConfigError::validation("logger.file", e.to_string()))
    }
}

// ============================================================================
// Main Settings Structure
// ============================================================================

/// Complete application settings
///
/// This structure represents the entire configuration that can be loaded
/// from TOML files and environment variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub application: ApplicationConfig,

    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub queue: QueueConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub services: ServicesConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub schedules: Vec<ScheduleConfig>,

    #[serde(default)]
    pub logger: LoggerSettings,
}
