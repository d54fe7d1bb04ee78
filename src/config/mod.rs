//! Configuration for the rotation engine
//!
//! A [`BackupConfig`] is built once (programmatically, or from a TOML file
//! for the CLI), validated, and passed by reference into the engine; nothing
//! mutates it afterwards.
//!
//! Buckets form an ordered list and every bucket names its feeder
//! explicitly (`source = "hourly"`); the first tier feeds from the `current`
//! snapshot (`source` unset). Declaration order is processing order.
//!
//! ## Example
//!
//! ```no_run
//! use rsync_rotator::config::BackupConfig;
//!
//! let mut config = BackupConfig::new("user@host:/srv/www", "/backups/www");
//! config.add_mysql("localhost", "backup", "secret", vec![]);
//! ```

mod loader;
mod types;

pub use loader::{load_config, validate_config, validate_tools, ConfigError};
pub use types::*;
