//! rsync-rotator
//!
//! Rotating hard-link backup scheduler built on rsync and mysqldump: one
//! invocation mirrors a source into `<dest>/current`, then promotes that
//! snapshot through ordered time buckets (hourly → daily → weekly →
//! monthly), expiring old generations with `cp -al` hard-link copies and
//! optionally dumping MySQL databases into the promoted generation.
//!
//! Designed to be embedded: construct a [`config::BackupConfig`], build a
//! [`RotationEngine`], and call `run()` from whatever schedules you (cron,
//! a systemd timer, your own loop). The returned [`RunReport`] holds every
//! external command issued and its output.

pub mod config;
pub mod managers;
pub mod report;
pub mod utils;

// Re-export commonly used types
pub use config::{load_config, validate_config, BackupConfig, BucketSpec, MysqlTarget};
pub use managers::logging::{init_console_logging, init_logging, LogGuard, LoggingConfig};
pub use managers::rotation::{RotateError, RotationEngine};
pub use report::RunReport;
