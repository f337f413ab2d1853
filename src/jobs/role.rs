//! Static queue catalogue and the deployment role -> queues table.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::queue::RetryPolicy;

/// Every queue the orchestrator knows how to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    CriticalAlerts,
    EmailDelivery,
    WebhookRelay,
    ReportGeneration,
    DocumentProcessing,
    AiProcessing,
    IntegrationSync,
    ScheduledTriggers,
    Maintenance,
}

/// Built-in tuning for a queue before configuration overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueProfile {
    pub concurrency: usize,
    pub lease_timeout: Duration,
    pub retry: RetryPolicy,
}

const DEFAULT_LEASE: Duration = Duration::from_secs(30);
const LONG_LEASE: Duration = Duration::from_secs(300);

impl QueueKind {
    pub const ALL: [QueueKind; 9] = [
        QueueKind::CriticalAlerts,
        QueueKind::EmailDelivery,
        QueueKind::WebhookRelay,
        QueueKind::ReportGeneration,
        QueueKind::DocumentProcessing,
        QueueKind::AiProcessing,
        QueueKind::IntegrationSync,
        QueueKind::ScheduledTriggers,
        QueueKind::Maintenance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::CriticalAlerts => "critical-alerts",
            QueueKind::EmailDelivery => "email-delivery",
            QueueKind::WebhookRelay => "webhook-relay",
            QueueKind::ReportGeneration => "report-generation",
            QueueKind::DocumentProcessing => "document-processing",
            QueueKind::AiProcessing => "ai-processing",
            QueueKind::IntegrationSync => "integration-sync",
            QueueKind::ScheduledTriggers => "scheduled-triggers",
            QueueKind::Maintenance => "maintenance",
        }
    }

    pub fn default_profile(&self) -> QueueProfile {
        // (concurrency, lease, max attempts, first backoff in seconds)
        let (concurrency, lease_timeout, max_attempts, backoff_secs) = match self {
            QueueKind::CriticalAlerts => (10, DEFAULT_LEASE, 5, 1),
            QueueKind::EmailDelivery => (5, DEFAULT_LEASE, 5, 5),
            QueueKind::WebhookRelay => (10, DEFAULT_LEASE, 3, 10),
            QueueKind::ReportGeneration => (2, DEFAULT_LEASE, 6, 30),
            QueueKind::DocumentProcessing => (8, LONG_LEASE, 3, 30),
            QueueKind::AiProcessing => (4, LONG_LEASE, 3, 15),
            QueueKind::IntegrationSync => (3, DEFAULT_LEASE, 5, 60),
            // A trigger that fails is picked up again by the next cron tick
            QueueKind::ScheduledTriggers => (1, DEFAULT_LEASE, 1, 1),
            QueueKind::Maintenance => (1, DEFAULT_LEASE, 2, 300),
        };

        QueueProfile {
            concurrency,
            lease_timeout,
            retry: RetryPolicy {
                max_attempts,
                backoff_delay: Duration::from_secs(backoff_secs),
                ..RetryPolicy::default()
            },
        }
    }
}

impl fmt::Display for QueueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| AppError::UnknownQueue {
                queue: s.to_string(),
            })
    }
}

/// Deployment role selecting which queues this process consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerRole {
    Primary,
    Document,
    Ai,
    Scheduled,
    All,
}

impl WorkerRole {
    /// Environment variable read once at startup
    pub const ENV_VAR: &'static str = "WORKER_ROLE";

    pub const ALL: [WorkerRole; 5] = [
        WorkerRole::Primary,
        WorkerRole::Document,
        WorkerRole::Ai,
        WorkerRole::Scheduled,
        WorkerRole::All,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerRole::Primary => "primary",
            WorkerRole::Document => "document",
            WorkerRole::Ai => "ai",
            WorkerRole::Scheduled => "scheduled",
            WorkerRole::All => "all",
        }
    }

    pub fn queues(&self) -> &'static [QueueKind] {
        match self {
            WorkerRole::Primary => &[
                QueueKind::CriticalAlerts,
                QueueKind::EmailDelivery,
                QueueKind::WebhookRelay,
                QueueKind::ReportGeneration,
            ],
            WorkerRole::Document => &[QueueKind::DocumentProcessing],
            WorkerRole::Ai => &[QueueKind::AiProcessing],
            WorkerRole::Scheduled => &[QueueKind::ScheduledTriggers, QueueKind::Maintenance],
            WorkerRole::All => &QueueKind::ALL,
        }
    }

    pub fn includes(&self, kind: QueueKind) -> bool {
        self.queues().contains(&kind)
    }
}

impl fmt::Display for WorkerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerRole {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase();
        WorkerRole::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| AppError::UnknownWorkerRole {
                role: s.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn test_role_table() {
        let names = |role: WorkerRole| -> Vec<&str> {
            role.queues().iter().map(|q| q.as_str()).collect()
        };

        assert_eq!(
            names(WorkerRole::Primary),
            ["critical-alerts", "email-delivery", "webhook-relay", "report-generation"]
        );
        assert_eq!(names(WorkerRole::Document), ["document-processing"]);
        assert_eq!(names(WorkerRole::Ai), ["ai-processing"]);
        assert_eq!(names(WorkerRole::Scheduled), ["scheduled-triggers", "maintenance"]);
        assert_eq!(names(WorkerRole::All).len(), 9);
    }

    #[test]
    fn test_specialized_roles_partition_all() {
        let mut seen = HashSet::new();
        for role in [
            WorkerRole::Primary,
            WorkerRole::Document,
            WorkerRole::Ai,
            WorkerRole::Scheduled,
        ] {
            for queue in role.queues() {
                assert!(seen.insert(*queue), "{queue} appears in two roles");
            }
        }
        // integration-sync only runs under `all`
        assert!(!seen.contains(&QueueKind::IntegrationSync));
        assert!(WorkerRole::All.includes(QueueKind::IntegrationSync));
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Document".parse::<WorkerRole>().unwrap(), WorkerRole::Document);
        assert_eq!(" ai ".parse::<WorkerRole>().unwrap(), WorkerRole::Ai);

        let err = "billing".parse::<WorkerRole>().unwrap_err();
        assert!(matches!(err, AppError::UnknownWorkerRole { role } if role == "billing"));
    }

    #[test]
    fn test_queue_parse_unknown() {
        let err = "sms-delivery".parse::<QueueKind>().unwrap_err();
        assert!(matches!(err, AppError::UnknownQueue { queue } if queue == "sms-delivery"));
    }

    #[test]
    fn test_default_profiles_are_sane() {
        for kind in QueueKind::ALL {
            let profile = kind.default_profile();
            assert!(profile.concurrency >= 1, "{kind}");
            assert!(profile.retry.max_attempts >= 1, "{kind}");
            assert!(profile.lease_timeout >= Duration::from_secs(30), "{kind}");
        }
        assert_eq!(QueueKind::DocumentProcessing.default_profile().concurrency, 8);
        assert_eq!(QueueKind::ScheduledTriggers.default_profile().retry.max_attempts, 1);
    }

    proptest! {
        #[test]
        fn prop_queue_names_round_trip(idx in 0usize..9) {
            let kind = QueueKind::ALL[idx];
            prop_assert_eq!(kind.as_str().parse::<QueueKind>().unwrap(), kind);
            let json = serde_json::to_value(kind).unwrap();
            prop_assert_eq!(json, serde_json::json!(kind.as_str()));
        }

        #[test]
        fn prop_role_names_round_trip(idx in 0usize..5) {
            let role = WorkerRole::ALL[idx];
            prop_assert_eq!(role.to_string().to_uppercase().parse::<WorkerRole>().unwrap(), role);
        }
    }
}
