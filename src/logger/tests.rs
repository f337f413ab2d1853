//! Tests for the logger module

use crate::logger::config::*;
use std::path::PathBuf;

#[cfg(test)]
mod config_tests {
    use super::*;

    fn create_test_config() -> LoggerConfig {
        LoggerConfig {
            console: ConsoleConfig {
                enabled: true,
                colored: false,
            },
            file: FileConfig {
                enabled: false,
                path: PathBuf::from("test.log"),
                append: true,
                format: LogFormat::Full,
            },
            level: "info".to_string(),
        }
    }

    #[test]
    fn test_default_config_creation() {
        let config = LoggerConfig::default();
        assert!(config.console.enabled);
        assert!(config.console.colored);
        assert!(!config.file.enabled);
        assert_eq!(config.file.format, LogFormat::Json);
        assert_eq!(config.level, "info");
    }

    #[test]
    fn test_config_validation() {
        let mut config = create_test_config();
        assert!(config.validate().is_ok());

        config.console.enabled = false;
        config.file.enabled = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_with_level_override() {
        let config = create_test_config().with_level("debug,taskhive::queue=trace");
        assert!(config.validate().is_ok());
        assert_eq!(config.level, "debug,taskhive::queue=trace");
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("yaml".parse::<LogFormat>().is_err());
        assert_eq!(LogFormat::default(), LogFormat::Full);
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn property_valid_levels_validate(
            level_idx in 0usize..5usize,
            colored in any::<bool>(),
        ) {
            let levels = ["trace", "debug", "info", "warn", "error"];
            let config = LoggerConfig {
                console: ConsoleConfig::new(true, colored),
                file: FileConfig::default(),
                level: levels[level_idx].to_string(),
            };
            prop_assert!(config.validate().is_ok());
        }

        #[test]
        fn property_blank_levels_fail(whitespace in 0usize..4usize) {
            let config = LoggerConfig::default().with_level(" ".repeat(whitespace));
            prop_assert!(config.validate().is_err());
        }
    }

    #[test]
    fn property_empty_path_fails() {
        let result = FileConfig::new(true, PathBuf::new(), true, LogFormat::Json);
        assert!(result.is_err());

        // Disabled file output does not care about the path
        let result = FileConfig::new(false, PathBuf::new(), true, LogFormat::Json);
        assert!(result.is_ok());
    }
}

#[cfg(test)]
mod writer_tests {
    use crate::logger::open_log_file;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_open_log_file_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/worker.log");

        let writer = open_log_file(&path, true).expect("should open");
        writer.lock().unwrap().write_all(b"line\n").unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), "line\n");
    }

    #[test]
    fn test_open_log_file_append_vs_truncate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("worker.log");
        std::fs::write(&path, "old\n").unwrap();

        let writer = open_log_file(&path, true).unwrap();
        writer.lock().unwrap().write_all(b"new\n").unwrap();
        drop(writer);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nnew\n");

        let writer = open_log_file(&path, false).unwrap();
        writer.lock().unwrap().write_all(b"fresh\n").unwrap();
        drop(writer);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }
}

#[cfg(test)]
mod dynamic_config_tests {
    use crate::logger::LogLevelHandle;
    use proptest::prelude::*;
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt, reload};

    /// Runs `f` with a reloadable subscriber installed as the thread default
    fn with_test_handle<F, R>(initial_level: &str, f: F) -> R
    where
        F: FnOnce(&LogLevelHandle) -> R,
    {
        let filter = EnvFilter::try_new(initial_level).unwrap_or_else(|_| EnvFilter::new("info"));
        let (filter_layer, reload_handle) = reload::Layer::new(filter);

        let subscriber = tracing_subscriber::registry()
            .with(filter_layer)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::sink));

        let handle = LogLevelHandle::new(reload_handle);
        tracing::subscriber::with_default(subscriber, || f(&handle))
    }

    proptest! {
        #[test]
        fn property_dynamic_level_update(level_idx in 0usize..5usize) {
            let levels = ["trace", "debug", "info", "warn", "error"];
            let new_level = levels[level_idx];

            with_test_handle("info", |handle| {
                prop_assert!(handle.set_level(new_level).is_ok());
                let current = handle.current_level().unwrap_or_default();
                prop_assert!(current.contains(new_level), "{} should contain {}", current, new_level);
                Ok(())
            })?;
        }

        #[test]
        fn property_dynamic_envfilter_syntax(
            base_idx in 0usize..5usize,
            module_idx in 0usize..5usize,
        ) {
            let levels = ["trace", "debug", "info", "warn", "error"];
            let directive = format!("{},taskhive::jobs={}", levels[base_idx], levels[module_idx]);

            with_test_handle("info", |handle| {
                prop_assert!(handle.set_level(&directive).is_ok());
                Ok(())
            })?;
        }
    }

    #[test]
    fn test_invalid_level_keeps_previous_filter() {
        with_test_handle("warn", |handle| {
            assert!(handle.set_level("taskhive=loud").is_err());
            assert!(handle.set_level("").is_err());
            assert!(handle.current_level().unwrap_or_default().contains("warn"));
        });
    }

    #[test]
    fn test_reload_fails_after_subscriber_dropped() {
        let filter = EnvFilter::new("info");
        let (filter_layer, reload_handle) = reload::Layer::new(filter);
        let subscriber = tracing_subscriber::registry().with(filter_layer);
        drop(subscriber);

        let handle = LogLevelHandle::new(reload_handle);
        assert!(handle.set_level("debug").is_err());
        assert!(handle.current_level().is_none());
    }
}
