// End-to-end rotation scenarios against a real backup root.
//
// rsync and mysql are scripted through the mock executor; the generation
// store runs for real (cp -al / mv / rm / touch on a tempdir), so these
// tests exercise the actual on-disk cascade.

use rsync_rotator::config::{BackupConfig, BucketSpec};
use rsync_rotator::utils::executor::mock::MockExecutor;
use rsync_rotator::utils::executor::{CommandOutput, RealExecutor};
use rsync_rotator::utils::store::DiskStore;
use rsync_rotator::{RotateError, RotationEngine};
use rstest::rstest;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

const RSYNC_OK: &str = "sent 1 bytes\ntotal size is 42\n";

fn two_tier_config(dest: &Path) -> BackupConfig {
    BackupConfig::new("/srv/www", dest).with_buckets(vec![
        BucketSpec {
            name: "hourly".to_string(),
            retention: 2,
            max_age_seconds: 3600,
            source: None,
        },
        BucketSpec {
            name: "daily".to_string(),
            retention: 2,
            max_age_seconds: 86400,
            source: Some("hourly".to_string()),
        },
    ])
}

fn disk_engine(config: BackupConfig) -> RotationEngine {
    let executor = MockExecutor::new().with_default_response(CommandOutput::ok(RSYNC_OK));
    let store = DiskStore::new(config.dest.clone(), Arc::new(RealExecutor::new()), None);
    RotationEngine::with_parts(config, Arc::new(executor), Arc::new(store)).unwrap()
}

/// Stand-in for the mirror: rsync is mocked, so each "run" writes its own
/// marker content into `current` first.
fn fill_current(dest: &Path, marker: &str) {
    let current = dest.join("current");
    fs::create_dir_all(&current).unwrap();
    // Recreate rather than rewrite: rsync replaces changed files with new
    // inodes, which is what keeps hard-linked generations immutable.
    let path = current.join("marker.txt");
    let _ = fs::remove_file(&path);
    fs::write(&path, marker).unwrap();
}

fn marker(dest: &Path, generation: &str) -> String {
    fs::read_to_string(dest.join(generation).join("marker.txt")).unwrap()
}

#[test]
fn three_run_scenario_promotes_daily_on_the_third_run() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();
    let engine = disk_engine(two_tier_config(dest));

    // Run 1: current -> hourly.0, daily gated.
    fill_current(dest, "run1");
    engine.run().unwrap();
    assert_eq!(marker(dest, "hourly.0"), "run1");
    assert!(!dest.join("hourly.1").exists());
    assert!(!dest.join("daily.0").exists());

    // Run 2: hourly.0 shifts up, fresh hourly.0; daily is still gated
    // because hourly.1 did not exist before this run started.
    fill_current(dest, "run2");
    engine.run().unwrap();
    assert_eq!(marker(dest, "hourly.0"), "run2");
    assert_eq!(marker(dest, "hourly.1"), "run1");
    assert!(!dest.join("daily.0").exists());

    // Run 3: the gate finally passes, and daily.0 is a copy of the oldest
    // surviving hourly generation (run2 after this run's hourly rotation).
    fill_current(dest, "run3");
    engine.run().unwrap();
    assert_eq!(marker(dest, "hourly.0"), "run3");
    assert_eq!(marker(dest, "hourly.1"), "run2");
    assert_eq!(marker(dest, "daily.0"), "run2");
}

#[test]
fn unchanged_files_share_inodes_across_generations() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();
    let engine = disk_engine(two_tier_config(dest));

    fill_current(dest, "static");
    engine.run().unwrap();
    engine.run().unwrap();

    use std::os::unix::fs::MetadataExt;
    let newest = fs::metadata(dest.join("hourly.0/marker.txt")).unwrap();
    let older = fs::metadata(dest.join("hourly.1/marker.txt")).unwrap();
    assert_eq!(newest.ino(), older.ino(), "generations must hard-link unchanged files");
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(3)]
fn repeated_runs_keep_indices_contiguous_within_retention(#[case] retention: u32) {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();
    let config = BackupConfig::new("/srv/www", dest).with_buckets(vec![BucketSpec {
        name: "hourly".to_string(),
        retention,
        max_age_seconds: 3600,
        source: None,
    }]);
    let engine = disk_engine(config);

    for run in 0u32..5 {
        fill_current(dest, &format!("run{}", run));
        engine.run().unwrap();

        let mut present: Vec<u32> = (0..retention + 2)
            .filter(|i| dest.join(format!("hourly.{}", i)).is_dir())
            .collect();
        present.sort_unstable();

        let expected: Vec<u32> = (0..(run + 1).min(retention)).collect();
        assert_eq!(present, expected, "after run {}", run);
    }
}

#[test]
fn interrupted_feeder_rotation_gates_daily_instead_of_failing() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();
    let engine = disk_engine(two_tier_config(dest));

    // Crash state left by a run that died between hourly's shift and
    // promote: hourly.1 exists, hourly.0 does not. The run must recover by
    // repromoting hourly and gating daily, not by promoting daily from a
    // generation this run's hourly eviction just removed.
    fs::create_dir_all(dest.join("hourly.1")).unwrap();
    fs::write(dest.join("hourly.1/marker.txt"), "stale").unwrap();

    fill_current(dest, "fresh");
    engine.run().unwrap();

    assert_eq!(marker(dest, "hourly.0"), "fresh");
    assert!(!dest.join("hourly.1").exists());
    assert!(!dest.join("daily.0").exists());
}

#[test]
fn sync_failure_leaves_existing_generations_untouched() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();

    // Seed state from an earlier successful run.
    let engine = disk_engine(two_tier_config(dest));
    fill_current(dest, "good");
    engine.run().unwrap();

    let failing = MockExecutor::new().with_default_response(CommandOutput::ok(
        "rsync error: error in socket IO (code 10)\n",
    ));
    let store = DiskStore::new(dest.to_path_buf(), Arc::new(RealExecutor::new()), None);
    let engine =
        RotationEngine::with_parts(two_tier_config(dest), Arc::new(failing), Arc::new(store))
            .unwrap();

    let err = engine.run().unwrap_err();
    assert!(matches!(err, RotateError::SyncFailed { .. }));
    assert!(err.partial_report().unwrap().contains("rsync error"));

    // The pre-run generation is byte-identical and nothing new appeared.
    assert_eq!(marker(dest, "hourly.0"), "good");
    assert!(!dest.join("hourly.1").exists());
}

#[test]
fn dumps_land_in_the_promoted_daily_generation() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();

    let mut config = two_tier_config(dest);
    config.add_mysql("localhost", "backup", "secret", vec![]);

    let executor = MockExecutor::new()
        .with_default_response(CommandOutput::ok(RSYNC_OK))
        .expect("mysql", CommandOutput::ok("Database\ninformation_schema\napp\n"))
        .expect("mysqldump", CommandOutput::ok("-- app schema\n"));
    let store = DiskStore::new(dest.to_path_buf(), Arc::new(RealExecutor::new()), None);
    let engine =
        RotationEngine::with_parts(config, Arc::new(executor.clone()), Arc::new(store)).unwrap();

    // Three runs, as above, to get daily promoted.
    for run in 1..=3 {
        fill_current(dest, &format!("run{}", run));
        engine.run().unwrap();
    }

    // Discovery ran once (daily only rotated on run 3) and dumped the one
    // non-system database into the promoted generation.
    assert_eq!(executor.call_count("mysql"), 1);
    assert_eq!(executor.call_count("mysqldump"), 1);

    let dump_dir = dest.join("daily.0/_sql");
    assert_eq!(
        fs::read_to_string(dump_dir.join(".htaccess")).unwrap(),
        "deny from all"
    );
    assert_eq!(
        fs::read_to_string(dump_dir.join("app.sql")).unwrap(),
        "-- app schema\n"
    );
}

#[test]
fn run_report_lists_commands_in_execution_order() {
    let dir = TempDir::new().unwrap();
    let dest = dir.path();
    let engine = disk_engine(two_tier_config(dest));

    fill_current(dest, "run1");
    let report = engine.run().unwrap();
    let text = report.render();

    let rsync_pos = text.find("rsync").unwrap();
    let cp_pos = text.find("cp ").unwrap();
    assert!(rsync_pos < cp_pos);
    assert!(text.contains("hourly.0"));
}
