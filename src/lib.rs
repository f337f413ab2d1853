//! taskhive
//!
//! Background job orchestration: role-selected worker pools over a durable
//! queue, an execution ledger recording every attempt, and a lifecycle
//! coordinator that drains the pools on shutdown.

use shadow_rs::shadow;
shadow!(build);

pub mod api;
pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod ledger;
pub mod lifecycle;
pub mod logger;
pub mod queue;
pub mod repositories;
pub mod runtime;
pub mod schema;

pub fn pkg_version() -> &'static str {
    build::PKG_VERSION
}

pub fn clap_long_version() -> &'static str {
    build::CLAP_LONG_VERSION
}
