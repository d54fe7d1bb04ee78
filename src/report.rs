//! Run report - accumulated record of every external command issued

use std::fmt;

/// One executed command and what it printed.
#[derive(Debug, Clone)]
pub struct ReportEntry {
    pub command: String,
    pub output: String,
}

/// Ordered log of every external command issued during one invocation,
/// returned to the caller at the end of a run. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    entries: Vec<ReportEntry>,
}

impl RunReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a command and its captured combined output.
    pub fn record(&mut self, command: impl Into<String>, output: impl Into<String>) {
        self.entries.push(ReportEntry {
            command: command.into(),
            output: output.into(),
        });
    }

    /// Record a note that is not tied to a command (precondition checks,
    /// skipped steps).
    pub fn note(&mut self, message: impl Into<String>) {
        self.entries.push(ReportEntry {
            command: String::new(),
            output: message.into(),
        });
    }

    pub fn entries(&self) -> &[ReportEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the whole run as one human-readable text block.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            if !entry.command.is_empty() {
                writeln!(f, "$ {}", entry.command)?;
            }
            if !entry.output.is_empty() {
                writeln!(f, "{}", entry.output.trim_end())?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_preserves_order() {
        let mut report = RunReport::new();
        report.record("rsync -a src/ dst/current", "total size is 42");
        report.record("cp -al dst/current dst/hourly.0", "");
        report.note("daily gated: hourly.1 missing");

        let text = report.render();
        let rsync_pos = text.find("rsync").unwrap();
        let cp_pos = text.find("cp -al").unwrap();
        let note_pos = text.find("daily gated").unwrap();
        assert!(rsync_pos < cp_pos && cp_pos < note_pos);
    }

    #[test]
    fn test_report_render_includes_output() {
        let mut report = RunReport::new();
        report.record("mysqldump --opt app", "dump ok\n");
        let text = report.render();
        assert!(text.contains("$ mysqldump --opt app"));
        assert!(text.contains("dump ok"));
    }
}
