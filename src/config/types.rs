use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration for one backup destination.
///
/// Constructed once (programmatically via [`BackupConfig::new`] or from a
/// TOML file via [`crate::config::load_config`]), validated, then passed by
/// reference into the rotation engine. There is no runtime mutation.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackupConfig {
    /// Source locator: local absolute path, or `user@host:path` for
    /// remote-over-ssh (selected by the absence of a leading `/`).
    pub source: String,

    /// Destination root holding `current` and the generation directories.
    pub dest: PathBuf,

    /// Ordered retention tiers; each names its feeder bucket explicitly.
    #[serde(default = "default_buckets")]
    pub buckets: Vec<BucketSpec>,

    /// rsync binary name or path
    #[serde(default = "default_rsync_bin")]
    pub rsync_bin: String,

    /// rsync switches, one argument per entry
    #[serde(default = "default_rsync_switches")]
    pub rsync_switches: Vec<String>,

    /// Exclude-pattern file name, checked for existence relative to
    /// `exclude_base` (the working directory when unset).
    #[serde(default = "default_exclude_file")]
    pub exclude_file: String,

    #[serde(default)]
    pub exclude_base: Option<PathBuf>,

    /// MySQL dump settings
    #[serde(default)]
    pub mysql: MysqlConfig,

    /// Advisory wall-clock budget, applied as the timeout of each external
    /// command.
    #[serde(default = "default_time_limit_minutes")]
    pub time_limit_minutes: u64,
}

/// One retention tier: `<name>.0 ... <name>.<retention-1>`, index 0 newest.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BucketSpec {
    pub name: String,

    /// Number of generations kept; minimum 1.
    pub retention: u32,

    /// Minimum age of `<name>.0` before this bucket rotates again.
    pub max_age_seconds: u64,

    /// Feeder bucket, by name. `None` means this bucket is fed straight
    /// from `current` and is due on every invocation.
    #[serde(default)]
    pub source: Option<String>,
}

impl BucketSpec {
    /// Staleness threshold as a duration.
    pub fn max_age(&self) -> Duration {
        Duration::seconds(self.max_age_seconds as i64)
    }

    /// Index of the most senior (oldest) generation.
    pub fn senior_index(&self) -> u32 {
        self.retention - 1
    }
}

/// MySQL dump configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MysqlConfig {
    /// Dump subdirectory inside the target generation
    #[serde(default = "default_mysql_dir")]
    pub dir: String,

    /// Which bucket's promotion triggers dumps
    #[serde(default = "default_mysql_bucket")]
    pub bucket: String,

    /// Gzip dump files (`.sql.gz` instead of `.sql`)
    #[serde(default)]
    pub gzip: bool,

    /// Registered dump targets; empty means no dumps at all.
    #[serde(default)]
    pub targets: Vec<MysqlTarget>,
}

impl Default for MysqlConfig {
    fn default() -> Self {
        Self {
            dir: default_mysql_dir(),
            bucket: default_mysql_bucket(),
            gzip: false,
            targets: Vec::new(),
        }
    }
}

/// One MySQL server to dump from.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MysqlTarget {
    pub host: String,
    pub user: String,
    pub password: String,

    /// Explicit databases to dump; empty means "discover all" by querying
    /// the server catalog.
    #[serde(default)]
    pub dbnames: Vec<String>,
}

impl BackupConfig {
    /// Create a configuration with the default four-tier rotation
    /// (hourly/daily/weekly/monthly, retention 2 each).
    pub fn new(source: impl Into<String>, dest: impl Into<PathBuf>) -> Self {
        let source = source.into();
        // Trailing slashes change rsync's semantics; the engine appends
        // its own.
        let source = source.trim_end_matches('/').to_string();
        Self {
            source,
            dest: dest.into(),
            buckets: default_buckets(),
            rsync_bin: default_rsync_bin(),
            rsync_switches: default_rsync_switches(),
            exclude_file: default_exclude_file(),
            exclude_base: None,
            mysql: MysqlConfig::default(),
            time_limit_minutes: default_time_limit_minutes(),
        }
    }

    /// Replace the bucket list.
    pub fn with_buckets(mut self, buckets: Vec<BucketSpec>) -> Self {
        self.buckets = buckets;
        self
    }

    /// Register a MySQL dump target. An empty `dbnames` list means every
    /// database on the server will be discovered and dumped.
    pub fn add_mysql(
        &mut self,
        host: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
        dbnames: Vec<String>,
    ) {
        self.mysql.targets.push(MysqlTarget {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            dbnames,
        });
    }

    /// True when the source locator is remote (`user@host:path`).
    pub fn source_is_remote(&self) -> bool {
        !self.source.starts_with('/')
    }

    /// The `current` snapshot directory.
    pub fn current_dir(&self) -> PathBuf {
        self.dest.join("current")
    }

    /// Look up a bucket spec by name.
    pub fn bucket(&self, name: &str) -> Option<&BucketSpec> {
        self.buckets.iter().find(|b| b.name == name)
    }

    /// Per-command timeout derived from the advisory time limit.
    pub fn command_timeout(&self) -> Option<std::time::Duration> {
        if self.time_limit_minutes == 0 {
            None
        } else {
            Some(std::time::Duration::from_secs(self.time_limit_minutes * 60))
        }
    }
}

// Default value functions

fn default_rsync_bin() -> String {
    "rsync".to_string()
}

fn default_rsync_switches() -> Vec<String> {
    vec![
        "-a".to_string(),
        "-v".to_string(),
        "-z".to_string(),
        "--delete".to_string(),
    ]
}

fn default_exclude_file() -> String {
    "exclude.txt".to_string()
}

fn default_mysql_dir() -> String {
    "_sql".to_string()
}

fn default_mysql_bucket() -> String {
    "daily".to_string()
}

fn default_time_limit_minutes() -> u64 {
    30
}

const HOUR: u64 = 3600;
const DAY: u64 = 24 * HOUR;

fn default_buckets() -> Vec<BucketSpec> {
    vec![
        BucketSpec {
            name: "hourly".to_string(),
            retention: 2,
            max_age_seconds: HOUR,
            source: None,
        },
        BucketSpec {
            name: "daily".to_string(),
            retention: 2,
            max_age_seconds: DAY,
            source: Some("hourly".to_string()),
        },
        BucketSpec {
            name: "weekly".to_string(),
            retention: 2,
            max_age_seconds: 7 * DAY,
            source: Some("daily".to_string()),
        },
        BucketSpec {
            name: "monthly".to_string(),
            retention: 2,
            max_age_seconds: 30 * DAY,
            source: Some("weekly".to_string()),
        },
    ]
}
