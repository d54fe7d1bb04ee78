//! Rotation engine - decides which buckets are due and runs the cascade
//!
//! One invocation: mirror `current`, snapshot the gate states, then walk the
//! buckets in declared order. A due bucket evicts its oldest generation,
//! shifts the survivors up one index, and promotes a fresh generation 0 from
//! its feeder (`current` for the first tier, the feeder's most senior
//! generation for the rest). Database dumps chain off the configured bucket's
//! promotion.

use crate::config::{validate_config, BackupConfig, BucketSpec, ConfigError};
use crate::report::RunReport;
use crate::utils::executor::{CommandExecutor, RealExecutor};
use crate::utils::locker::RotationLock;
use crate::utils::store::{DiskStore, GenerationStore};
use crate::utils::{mysql, rsync};
use anyhow::{Context, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Failure kinds a caller can act on. Fatal variants carry the partial run
/// report accumulated up to the failure, so the command log survives an
/// aborted run.
#[derive(Debug, thiserror::Error)]
pub enum RotateError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Destination directory doesn't exist or isn't writable: {0}")]
    DestinationNotWritable(PathBuf),

    #[error("{0}")]
    Locked(String),

    #[error("Sync failed: {reason}")]
    SyncFailed { reason: String, report: String },

    #[error("Rotation of bucket '{bucket}' failed: {reason}")]
    RotationFailed {
        bucket: String,
        reason: String,
        report: String,
    },
}

impl RotateError {
    /// The partial run report, for the fatal variants that carry one.
    pub fn partial_report(&self) -> Option<&str> {
        match self {
            RotateError::SyncFailed { report, .. } => Some(report),
            RotateError::RotationFailed { report, .. } => Some(report),
            _ => None,
        }
    }
}

/// Owns the promotion decisions for one backup root. Collaborators (the
/// executor and the generation store) are injected, so tests script them.
pub struct RotationEngine {
    config: BackupConfig,
    executor: Arc<dyn CommandExecutor>,
    store: Arc<dyn GenerationStore>,
}

impl RotationEngine {
    /// Create an engine over the real filesystem and real subprocesses.
    /// Fails before doing anything if the destination is not writable.
    pub fn new(config: BackupConfig) -> Result<Self, RotateError> {
        check_writable(&config.dest)?;
        let executor: Arc<dyn CommandExecutor> = Arc::new(RealExecutor::new());
        let store = Arc::new(DiskStore::new(
            config.dest.clone(),
            executor.clone(),
            config.command_timeout(),
        ));
        Self::with_parts(config, executor, store)
    }

    /// Create an engine with injected collaborators. The destination
    /// writability precondition is the caller's concern here.
    pub fn with_parts(
        config: BackupConfig,
        executor: Arc<dyn CommandExecutor>,
        store: Arc<dyn GenerationStore>,
    ) -> Result<Self, RotateError> {
        validate_config(&config)?;
        Ok(Self {
            config,
            executor,
            store,
        })
    }

    pub fn config(&self) -> &BackupConfig {
        &self.config
    }

    /// Run one invocation: mirror, then rotate every due bucket.
    ///
    /// Returns the accumulated command log. Concurrent runs against the same
    /// root fail fast with [`RotateError::Locked`].
    pub fn run(&self) -> Result<RunReport, RotateError> {
        let _lock = RotationLock::acquire(&self.config.dest)
            .map_err(|e| RotateError::Locked(e.to_string()))?;

        let mut report = RunReport::new();

        info!("Starting backup run for {:?}", self.config.dest);

        if let Err(e) = rsync::mirror(&self.config, self.executor.as_ref(), &mut report) {
            return Err(RotateError::SyncFailed {
                reason: format!("{:#}", e),
                report: report.render(),
            });
        }

        // Gate states are fixed before any rotation: a feeder promoted
        // during this run opens its dependents' gates next run, not now.
        let seniors = self.snapshot_seniors();

        for bucket in &self.config.buckets {
            if let Err(e) = self.rotate_bucket(bucket, &seniors, &mut report) {
                return Err(RotateError::RotationFailed {
                    bucket: bucket.name.clone(),
                    reason: format!("{:#}", e),
                    report: report.render(),
                });
            }
        }

        info!("Backup run complete for {:?}", self.config.dest);
        Ok(report)
    }

    /// Whether each bucket's most senior generation exists, captured once
    /// per run.
    fn snapshot_seniors(&self) -> HashMap<String, bool> {
        self.config
            .buckets
            .iter()
            .map(|b| (b.name.clone(), self.store.exists(&b.name, b.senior_index())))
            .collect()
    }

    fn is_due(&self, bucket: &BucketSpec) -> Result<bool> {
        // The current-fed tier captures a snapshot on every invocation.
        if bucket.source.is_none() {
            return Ok(true);
        }
        if !self.store.exists(&bucket.name, 0) {
            return Ok(true);
        }
        let captured = self.store.age(&bucket.name, 0)?;
        Ok(captured < Utc::now() - bucket.max_age())
    }

    fn rotate_bucket(
        &self,
        bucket: &BucketSpec,
        seniors: &HashMap<String, bool>,
        report: &mut RunReport,
    ) -> Result<()> {
        if let Some(ref source) = bucket.source {
            let feeder = self
                .config
                .bucket(source)
                .context(format!("Unknown source bucket '{}'", source))?;
            // The feeder's senior generation must exist both in the pre-run
            // snapshot and on disk right now. The snapshot keeps this run's
            // own feeder promotion from opening the gate; the live check
            // keeps an interrupted feeder rotation (shift done, promote
            // missed) from feeding the cascade a generation the feeder's
            // eviction just removed. Not an error; retried next run.
            let open_at_start = seniors.get(source).copied().unwrap_or(false);
            if !open_at_start || !self.store.exists(source, feeder.senior_index()) {
                debug!(
                    "Bucket '{}' gated: feeder '{}' has no senior generation",
                    bucket.name, source
                );
                return Ok(());
            }
        }

        if !self.is_due(bucket)? {
            debug!("Bucket '{}' not due", bucket.name);
            return Ok(());
        }

        info!("Rotating bucket '{}'", bucket.name);

        // Evict the overflow generation first, then open up index 0 by
        // shifting the survivors. With retention 1 the bucket passes
        // through a transient window with no generations at all.
        let senior = bucket.senior_index();
        self.store.evict(&bucket.name, senior, report)?;
        for i in (0..senior).rev() {
            self.store.shift(&bucket.name, i, i + 1, report)?;
        }

        match bucket.source {
            None => {
                self.store
                    .promote(&self.config.current_dir(), &bucket.name, false, report)?;
            }
            Some(ref source) => {
                let feeder = self
                    .config
                    .bucket(source)
                    .context(format!("Unknown source bucket '{}'", source))?;
                // Deliberately the feeder's *oldest* surviving generation:
                // the fully-aged one propagates forward, not the freshest.
                let path = self.store.generation_dir(source, feeder.senior_index());
                self.store.promote(&path, &bucket.name, true, report)?;
            }
        }

        if bucket.name == self.config.mysql.bucket {
            let target = self.store.generation_dir(&bucket.name, 0);
            mysql::dump_into(&self.config, self.executor.as_ref(), &target, report)?;
        }

        Ok(())
    }
}

fn check_writable(dest: &Path) -> Result<(), RotateError> {
    let probe = dest.join(".rotator-write-check");
    match fs::write(&probe, b"") {
        Ok(()) => {
            let _ = fs::remove_file(&probe);
            Ok(())
        }
        Err(_) => Err(RotateError::DestinationNotWritable(dest.to_path_buf())),
    }
}
