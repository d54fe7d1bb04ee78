use super::types::*;
use std::collections::HashSet;
use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Bucket '{bucket}' names unknown source bucket '{feeder}'")]
    UnknownSourceBucket { bucket: String, feeder: String },

    #[error("MySQL dump bucket '{0}' is not a declared bucket")]
    UnknownDumpBucket(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<BackupConfig> {
    let contents = fs::read_to_string(path)?;
    let config: BackupConfig = toml::from_str(&contents)?;
    validate_config(&config)?;
    Ok(config)
}

/// Validate a configuration, however it was constructed.
pub fn validate_config(config: &BackupConfig) -> Result<()> {
    if config.source.is_empty() {
        return Err(ConfigError::ValidationError(
            "Source locator is empty".to_string(),
        ));
    }

    if !config.dest.is_absolute() {
        return Err(ConfigError::ValidationError(format!(
            "Destination root must be an absolute path: {:?}",
            config.dest
        )));
    }

    if config.buckets.is_empty() {
        return Err(ConfigError::ValidationError(
            "No buckets defined".to_string(),
        ));
    }

    let mut seen: HashSet<&str> = HashSet::new();
    for (position, bucket) in config.buckets.iter().enumerate() {
        validate_bucket(bucket, position, config, &mut seen)?;
    }

    if !config.mysql.targets.is_empty() && config.bucket(&config.mysql.bucket).is_none() {
        return Err(ConfigError::UnknownDumpBucket(config.mysql.bucket.clone()));
    }

    Ok(())
}

fn validate_bucket<'a>(
    bucket: &'a BucketSpec,
    position: usize,
    config: &BackupConfig,
    seen: &mut HashSet<&'a str>,
) -> Result<()> {
    if bucket.name.is_empty()
        || bucket.name.contains('/')
        || bucket.name.contains('.')
        || bucket.name.chars().any(char::is_whitespace)
    {
        return Err(ConfigError::ValidationError(format!(
            "Bucket name is not usable as a directory prefix: {:?}",
            bucket.name
        )));
    }

    if bucket.name == "current" {
        return Err(ConfigError::ValidationError(
            "Bucket name 'current' collides with the snapshot directory".to_string(),
        ));
    }

    if !seen.insert(&bucket.name) {
        return Err(ConfigError::ValidationError(format!(
            "Duplicate bucket name: {}",
            bucket.name
        )));
    }

    if bucket.retention < 1 {
        return Err(ConfigError::ValidationError(format!(
            "Bucket '{}': retention must be at least 1",
            bucket.name
        )));
    }

    if let Some(ref source) = bucket.source {
        // A feeder must be declared earlier in the list so it has rotated
        // (or been gated) before its dependents are considered.
        let feeds_from_earlier = config.buckets[..position].iter().any(|b| &b.name == source);
        if !feeds_from_earlier {
            return Err(ConfigError::UnknownSourceBucket {
                bucket: bucket.name.clone(),
                feeder: source.clone(),
            });
        }
    }

    Ok(())
}

/// Check that the external tools the configuration relies on are present
/// on PATH. Called by the CLI before a run; library embedders may skip it.
pub fn validate_tools(config: &BackupConfig) -> Result<()> {
    which::which(&config.rsync_bin).map_err(|_| {
        ConfigError::ValidationError(format!("rsync binary not found: {}", config.rsync_bin))
    })?;

    if !config.mysql.targets.is_empty() {
        for tool in ["mysql", "mysqldump"] {
            which::which(tool).map_err(|_| {
                ConfigError::ValidationError(format!("{} not found on PATH", tool))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> BackupConfig {
        BackupConfig::new("/srv/www", "/backups/www")
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&base_config()).is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let mut config = base_config();
        config.buckets[0].retention = 0;
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_source_must_be_declared_earlier() {
        let config = base_config().with_buckets(vec![
            BucketSpec {
                name: "daily".to_string(),
                retention: 2,
                max_age_seconds: 86400,
                source: Some("hourly".to_string()),
            },
            BucketSpec {
                name: "hourly".to_string(),
                retention: 2,
                max_age_seconds: 3600,
                source: None,
            },
        ]);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::UnknownSourceBucket { .. })
        ));
    }

    #[test]
    fn test_duplicate_bucket_names_rejected() {
        let config = base_config().with_buckets(vec![
            BucketSpec {
                name: "hourly".to_string(),
                retention: 2,
                max_age_seconds: 3600,
                source: None,
            },
            BucketSpec {
                name: "hourly".to_string(),
                retention: 2,
                max_age_seconds: 3600,
                source: None,
            },
        ]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_dump_bucket_must_exist_when_targets_registered() {
        let mut config = base_config();
        config.mysql.bucket = "fortnightly".to_string();
        // No targets: the dump bucket is irrelevant.
        assert!(validate_config(&config).is_ok());

        config.add_mysql("localhost", "root", "secret", vec![]);
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::UnknownDumpBucket(_))
        ));
    }

    #[test]
    fn test_bucket_name_with_dot_rejected() {
        let mut config = base_config();
        config.buckets[0].name = "hour.ly".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_config_from_toml() {
        let toml = r#"
source = "user@host:/srv/www"
dest = "/backups/www"

[[buckets]]
name = "hourly"
retention = 4
max_age_seconds = 3600

[[buckets]]
name = "daily"
retention = 7
max_age_seconds = 86400
source = "hourly"

[mysql]
bucket = "daily"
gzip = true

[[mysql.targets]]
host = "localhost"
user = "backup"
password = "secret"
dbnames = ["app"]
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, toml).unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.source_is_remote());
        assert_eq!(config.buckets.len(), 2);
        assert_eq!(config.buckets[1].source.as_deref(), Some("hourly"));
        assert!(config.mysql.gzip);
        assert_eq!(config.mysql.targets[0].dbnames, vec!["app"]);
        // Unspecified fields take defaults.
        assert_eq!(config.rsync_bin, "rsync");
        assert_eq!(config.time_limit_minutes, 30);
    }
}
