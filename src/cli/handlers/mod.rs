//! Command handlers, one per subcommand.

pub mod migrate;
pub mod work;

pub use migrate::MigrateCommandHandler;
pub use work::WorkCommandHandler;
