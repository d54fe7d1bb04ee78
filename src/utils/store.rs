//! Generation store - numbered snapshot directories under the backup root
//!
//! Each bucket owns directories `<name>.0 .. <name>.<retention-1>`, index 0
//! newest. This module is the only place generation directories are created,
//! renamed, or deleted. The disk implementation routes every mutation
//! through the command executor (`rm`/`mv`/`cp`/`touch`) so each one lands
//! in the run report next to its output; existence and age checks read
//! filesystem metadata directly.

use crate::report::RunReport;
use crate::utils::executor::CommandExecutor;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Filesystem-backed ordered set of generations per bucket.
///
/// Rotations are destructive and not atomic across a bucket: a kill between
/// shift steps can leave an index gap. `exists` treats gaps as absent, so
/// the next run repromotes into the nearest empty slot.
pub trait GenerationStore {
    /// Directory for `<bucket>.<index>`.
    fn generation_dir(&self, bucket: &str, index: u32) -> PathBuf;

    fn exists(&self, bucket: &str, index: u32) -> bool;

    /// Modification time of the generation directory.
    fn age(&self, bucket: &str, index: u32) -> Result<DateTime<Utc>>;

    /// Recursively delete `<bucket>.<index>`; idempotent when absent.
    fn evict(&self, bucket: &str, index: u32, report: &mut RunReport) -> Result<()>;

    /// Rename `<bucket>.<from>` to `<bucket>.<to>`; no-op when `from` is
    /// absent.
    fn shift(&self, bucket: &str, from: u32, to: u32, report: &mut RunReport) -> Result<()>;

    /// Create `<bucket>.0` as a hard-link copy of `source`. With
    /// `refresh_mtime` the new generation is touched afterwards so staleness
    /// checks measure when it was captured, not when its source was.
    fn promote(
        &self,
        source: &Path,
        bucket: &str,
        refresh_mtime: bool,
        report: &mut RunReport,
    ) -> Result<()>;
}

/// Hard-link copy switches. OSX cp has no `-l`; `-pPR` falls back to a
/// plain recursive copy there.
fn cp_switches() -> &'static str {
    if cfg!(target_os = "macos") {
        "-pPR"
    } else {
        "-al"
    }
}

/// Real store over a backup root directory.
pub struct DiskStore {
    root: PathBuf,
    executor: Arc<dyn CommandExecutor>,
    timeout: Option<std::time::Duration>,
}

impl DiskStore {
    pub fn new(
        root: impl Into<PathBuf>,
        executor: Arc<dyn CommandExecutor>,
        timeout: Option<std::time::Duration>,
    ) -> Self {
        Self {
            root: root.into(),
            executor,
            timeout,
        }
    }

    fn run_recorded(&self, program: &str, args: &[&str], report: &mut RunReport) -> Result<String> {
        let result = self.executor.run(program, args, self.timeout)?;
        report.record(format!("{} {}", program, args.join(" ")), result.output.clone());
        if !result.success {
            bail!(
                "{} failed with exit code {:?}: {}",
                program,
                result.exit_code,
                result.output.trim_end()
            );
        }
        Ok(result.output)
    }
}

impl GenerationStore for DiskStore {
    fn generation_dir(&self, bucket: &str, index: u32) -> PathBuf {
        self.root.join(format!("{}.{}", bucket, index))
    }

    fn exists(&self, bucket: &str, index: u32) -> bool {
        self.generation_dir(bucket, index).is_dir()
    }

    fn age(&self, bucket: &str, index: u32) -> Result<DateTime<Utc>> {
        let dir = self.generation_dir(bucket, index);
        let metadata = fs::metadata(&dir).context(format!("Failed to stat {:?}", dir))?;
        let modified = metadata
            .modified()
            .context(format!("No modification time for {:?}", dir))?;
        Ok(modified.into())
    }

    fn evict(&self, bucket: &str, index: u32, report: &mut RunReport) -> Result<()> {
        let dir = self.generation_dir(bucket, index);
        debug!("Evicting {:?}", dir);
        // rm -rf is quiet about an absent target, which keeps eviction
        // idempotent.
        self.run_recorded("rm", &["-rf", &dir.display().to_string()], report)?;
        Ok(())
    }

    fn shift(&self, bucket: &str, from: u32, to: u32, report: &mut RunReport) -> Result<()> {
        if !self.exists(bucket, from) {
            return Ok(());
        }
        let from_dir = self.generation_dir(bucket, from).display().to_string();
        let to_dir = self.generation_dir(bucket, to).display().to_string();
        debug!("Shifting {} -> {}", from_dir, to_dir);
        self.run_recorded("mv", &[&from_dir, &to_dir], report)?;
        Ok(())
    }

    fn promote(
        &self,
        source: &Path,
        bucket: &str,
        refresh_mtime: bool,
        report: &mut RunReport,
    ) -> Result<()> {
        let source = source.display().to_string();
        let dest = self.generation_dir(bucket, 0).display().to_string();
        debug!("Promoting {} -> {}", source, dest);
        self.run_recorded("cp", &[cp_switches(), &source, &dest], report)?;

        if refresh_mtime {
            self.run_recorded("touch", &[&dest], report)?;
        }
        Ok(())
    }
}

/// Scripted in-memory store for rotation policy tests.
pub mod mock {
    use super::*;
    use chrono::Duration;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// One store mutation, recorded in call order.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum StoreOp {
        Evict { bucket: String, index: u32 },
        Shift { bucket: String, from: u32, to: u32 },
        Promote {
            source: PathBuf,
            bucket: String,
            refresh_mtime: bool,
        },
    }

    #[derive(Default)]
    struct State {
        /// (bucket, index) -> mtime
        generations: HashMap<(String, u32), DateTime<Utc>>,
        ops: Vec<StoreOp>,
    }

    /// In-memory [`GenerationStore`] tracking directory state and the exact
    /// mutation order.
    pub struct MockStore {
        root: PathBuf,
        state: Mutex<State>,
    }

    impl Default for MockStore {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockStore {
        pub fn new() -> Self {
            Self {
                root: PathBuf::from("/backups"),
                state: Mutex::default(),
            }
        }

        /// Use a real directory as the root, for tests that let collaborators
        /// write into generation paths.
        pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
            self.root = root.into();
            self
        }

        /// Seed a generation with an mtime of `age_ago` before now.
        pub fn with_generation(self, bucket: &str, index: u32, age_ago: Duration) -> Self {
            self.state
                .lock()
                .unwrap()
                .generations
                .insert((bucket.to_string(), index), Utc::now() - age_ago);
            self
        }

        pub fn ops(&self) -> Vec<StoreOp> {
            self.state.lock().unwrap().ops.clone()
        }

        pub fn present(&self, bucket: &str, index: u32) -> bool {
            self.state
                .lock()
                .unwrap()
                .generations
                .contains_key(&(bucket.to_string(), index))
        }

        /// Indices present for a bucket, ascending.
        pub fn indices(&self, bucket: &str) -> Vec<u32> {
            let mut indices: Vec<u32> = self
                .state
                .lock()
                .unwrap()
                .generations
                .keys()
                .filter(|(name, _)| name == bucket)
                .map(|&(_, index)| index)
                .collect();
            indices.sort_unstable();
            indices
        }
    }

    impl GenerationStore for MockStore {
        fn generation_dir(&self, bucket: &str, index: u32) -> PathBuf {
            self.root.join(format!("{}.{}", bucket, index))
        }

        fn exists(&self, bucket: &str, index: u32) -> bool {
            self.present(bucket, index)
        }

        fn age(&self, bucket: &str, index: u32) -> Result<DateTime<Utc>> {
            self.state
                .lock()
                .unwrap()
                .generations
                .get(&(bucket.to_string(), index))
                .copied()
                .context(format!("No such generation: {}.{}", bucket, index))
        }

        fn evict(&self, bucket: &str, index: u32, _report: &mut RunReport) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state.generations.remove(&(bucket.to_string(), index));
            state.ops.push(StoreOp::Evict {
                bucket: bucket.to_string(),
                index,
            });
            Ok(())
        }

        fn shift(&self, bucket: &str, from: u32, to: u32, _report: &mut RunReport) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            if let Some(mtime) = state.generations.remove(&(bucket.to_string(), from)) {
                state.generations.insert((bucket.to_string(), to), mtime);
                state.ops.push(StoreOp::Shift {
                    bucket: bucket.to_string(),
                    from,
                    to,
                });
            }
            Ok(())
        }

        fn promote(
            &self,
            source: &Path,
            bucket: &str,
            refresh_mtime: bool,
            _report: &mut RunReport,
        ) -> Result<()> {
            let mut state = self.state.lock().unwrap();
            state
                .generations
                .insert((bucket.to_string(), 0), Utc::now());
            state.ops.push(StoreOp::Promote {
                source: source.to_path_buf(),
                bucket: bucket.to_string(),
                refresh_mtime,
            });
            Ok(())
        }
    }
}
