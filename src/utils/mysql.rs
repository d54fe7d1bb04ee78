//! Database dump invoker - one mysqldump per database into a generation
//!
//! Dumps land in `<generation>/_sql/<dbname>.sql[.gz]` together with a
//! deny-all `.htaccess` marker, since backup roots are sometimes nested
//! under a web-served document root. A failed dump of one database never
//! stops the others; only the accumulated output reports it.

use crate::config::{BackupConfig, MysqlTarget};
use crate::report::RunReport;
use crate::utils::executor::CommandExecutor;
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Marker file content keeping the dump directory off a web server.
const HTACCESS_DENY: &str = "deny from all";

/// Schemas that describe the server rather than its data.
const SYSTEM_SCHEMAS: &[&str] = &["information_schema", "performance_schema", "mysql", "sys"];

fn password_arg(target: &MysqlTarget) -> String {
    format!("-p{}", target.password)
}

/// Command line for the report, with the password blanked.
fn redacted_line(program: &str, args: &[&str], target: &MysqlTarget) -> String {
    let shown: Vec<String> = args
        .iter()
        .map(|a| {
            if *a == password_arg(target) {
                "-p*****".to_string()
            } else {
                a.to_string()
            }
        })
        .collect();
    format!("{} {}", program, shown.join(" "))
}

/// Query the server catalog for database names. The first output line is a
/// column header and is discarded; system schemas are filtered out.
pub fn discover_databases(
    target: &MysqlTarget,
    executor: &dyn CommandExecutor,
    timeout: Option<Duration>,
    report: &mut RunReport,
) -> Result<Vec<String>> {
    let password = password_arg(target);
    let args = [
        "-h",
        target.host.as_str(),
        "-u",
        target.user.as_str(),
        password.as_str(),
        "-e",
        "show databases",
    ];

    let result = executor.run("mysql", &args, timeout)?;
    report.record(redacted_line("mysql", &args, target), result.output.clone());

    if !result.success {
        anyhow::bail!(
            "database discovery failed on {}: {}",
            target.host,
            result.output.trim_end()
        );
    }

    let names = result
        .output
        .lines()
        .skip(1)
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|name| !SYSTEM_SCHEMAS.contains(name))
        .map(str::to_string)
        .collect();
    Ok(names)
}

/// Dump every registered target into `<generation_dir>/<mysql.dir>`.
///
/// An unwritable dump directory skips dumps for this rotation without
/// failing the run; so does a failed discovery or a failed individual dump.
pub fn dump_into(
    config: &BackupConfig,
    executor: &dyn CommandExecutor,
    generation_dir: &Path,
    report: &mut RunReport,
) -> Result<()> {
    if config.mysql.targets.is_empty() {
        return Ok(());
    }

    let dump_dir = generation_dir.join(config.mysql.dir.trim_end_matches('/'));
    if let Err(e) = fs::create_dir_all(&dump_dir) {
        warn!("Cannot create dump directory {:?}: {}", dump_dir, e);
        report.note(format!("skipping mysql dumps: cannot create {:?}: {}", dump_dir, e));
        return Ok(());
    }
    // The marker write doubles as the writability check.
    if let Err(e) = fs::write(dump_dir.join(".htaccess"), HTACCESS_DENY) {
        warn!("Dump directory {:?} is not writable: {}", dump_dir, e);
        report.note(format!("skipping mysql dumps: {:?} not writable: {}", dump_dir, e));
        return Ok(());
    }

    let timeout = config.command_timeout();

    for target in &config.mysql.targets {
        let dbnames = if target.dbnames.is_empty() {
            match discover_databases(target, executor, timeout, report) {
                Ok(names) => names,
                Err(e) => {
                    warn!("{}", e);
                    report.note(e.to_string());
                    continue;
                }
            }
        } else {
            target.dbnames.clone()
        };

        for dbname in &dbnames {
            if let Err(e) = dump_database(config, executor, target, dbname, &dump_dir, report) {
                warn!("Dump of {} on {} failed: {}", dbname, target.host, e);
                report.note(format!("dump of {} failed: {}", dbname, e));
            }
        }
    }

    Ok(())
}

fn dump_database(
    config: &BackupConfig,
    executor: &dyn CommandExecutor,
    target: &MysqlTarget,
    dbname: &str,
    dump_dir: &Path,
    report: &mut RunReport,
) -> Result<()> {
    let sql_path = dump_dir.join(format!("{}.sql", dbname));
    let password = password_arg(target);
    let args = [
        "--opt",
        "-h",
        target.host.as_str(),
        "-u",
        target.user.as_str(),
        password.as_str(),
        dbname,
    ];

    info!("Dumping database {} from {}", dbname, target.host);

    let file = fs::File::create(&sql_path)
        .context(format!("Failed to create dump file {:?}", sql_path))?;
    let result = executor.run_with_stdout_file("mysqldump", &args, file, config.command_timeout())?;

    let mut line = redacted_line("mysqldump", &args, target);
    line.push_str(&format!(" > {}", sql_path.display()));
    report.record(line, result.output.clone());

    if !result.success {
        // Drop the partial dump so a broken file is never retained as a
        // backup.
        let _ = fs::remove_file(&sql_path);
        anyhow::bail!("mysqldump exited with {:?}", result.exit_code);
    }

    if config.mysql.gzip {
        gzip_file(&sql_path)?;
    }

    Ok(())
}

/// Compress `<db>.sql` into `<db>.sql.gz` and remove the original.
fn gzip_file(sql_path: &Path) -> Result<()> {
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io;

    let gz_path = sql_path.with_extension("sql.gz");
    let mut input = fs::File::open(sql_path)
        .context(format!("Failed to reopen dump file {:?}", sql_path))?;
    let output = fs::File::create(&gz_path)
        .context(format!("Failed to create {:?}", gz_path))?;

    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder).context("Failed to compress dump")?;
    encoder.finish().context("Failed to finish gzip stream")?;

    fs::remove_file(sql_path).context("Failed to remove uncompressed dump")?;
    Ok(())
}
