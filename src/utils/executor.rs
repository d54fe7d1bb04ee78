//! Command execution abstraction for testability
//!
//! Trait-based abstraction for launching external tools, enabling dependency
//! injection and a scripted fake in tests. Commands are always argument
//! vectors, never shell strings.

use anyhow::Result;
use std::fs::File;
use std::time::Duration;

/// Exit status plus captured combined stdout+stderr of one invocation.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub output: String,
}

impl CommandOutput {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            exit_code: Some(0),
            output: output.into(),
        }
    }

    pub fn failed(exit_code: i32, output: impl Into<String>) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            output: output.into(),
        }
    }
}

/// Abstraction for command execution, enabling mocking in tests.
///
/// A nonzero exit status is returned as data, not as `Err`: the rotation
/// engine scans captured output for tool markers and treats per-database
/// dump failures as non-fatal, so it needs the output either way. `Err` is
/// reserved for the command not running at all (missing binary, timeout).
pub trait CommandExecutor: Send + Sync {
    /// Run a command with optional timeout, capturing combined output.
    fn run(&self, program: &str, args: &[&str], timeout: Option<Duration>) -> Result<CommandOutput>;

    /// Run a command with stdout redirected to an open file, capturing stderr.
    fn run_with_stdout_file(
        &self,
        program: &str,
        args: &[&str],
        stdout_file: File,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput>;
}

/// Default implementation using real subprocess calls
#[derive(Debug, Clone, Default)]
pub struct RealExecutor;

impl RealExecutor {
    pub fn new() -> Self {
        Self
    }
}

impl CommandExecutor for RealExecutor {
    fn run(&self, program: &str, args: &[&str], timeout: Option<Duration>) -> Result<CommandOutput> {
        super::command::run_command(program, args, timeout)
    }

    fn run_with_stdout_file(
        &self,
        program: &str,
        args: &[&str],
        stdout_file: File,
        timeout: Option<Duration>,
    ) -> Result<CommandOutput> {
        super::command::run_command_stdout_file(program, args, stdout_file, timeout)
    }
}

/// A scripted executor for testing that records calls and replays configured
/// responses.
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    /// Recorded command invocation
    #[derive(Clone, Debug)]
    pub struct CommandCall {
        pub program: String,
        pub args: Vec<String>,
    }

    impl CommandCall {
        /// The invocation as one display string, for assertions.
        pub fn line(&self) -> String {
            if self.args.is_empty() {
                self.program.clone()
            } else {
                format!("{} {}", self.program, self.args.join(" "))
            }
        }
    }

    /// Mock executor replaying scripted responses per program name.
    ///
    /// Responses queue up: `expect("rsync", a).expect("rsync", b)` replays
    /// `a` on the first rsync call and `b` on the second. When a program's
    /// queue is exhausted (or was never scripted) the default response is
    /// used, so rotation tests only script the calls they care about.
    #[derive(Clone)]
    pub struct MockExecutor {
        calls: Arc<Mutex<Vec<CommandCall>>>,
        responses: Arc<Mutex<HashMap<String, Vec<CommandOutput>>>>,
        default_response: Arc<Mutex<CommandOutput>>,
    }

    impl Default for MockExecutor {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MockExecutor {
        pub fn new() -> Self {
            Self {
                calls: Arc::default(),
                responses: Arc::default(),
                default_response: Arc::new(Mutex::new(CommandOutput::ok(""))),
            }
        }

        /// Queue a response for the next unconsumed call to `program`.
        pub fn expect(self, program: &str, response: CommandOutput) -> Self {
            self.responses
                .lock()
                .unwrap()
                .entry(program.to_string())
                .or_default()
                .push(response);
            self
        }

        /// Set the response used when no scripted response remains.
        pub fn with_default_response(self, response: CommandOutput) -> Self {
            *self.default_response.lock().unwrap() = response;
            self
        }

        /// All recorded calls, in execution order.
        pub fn calls(&self) -> Vec<CommandCall> {
            self.calls.lock().unwrap().clone()
        }

        pub fn was_called(&self, program: &str) -> bool {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .any(|c| c.program == program)
        }

        pub fn call_count(&self, program: &str) -> usize {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter(|c| c.program == program)
                .count()
        }

        fn record_call(&self, program: &str, args: &[&str]) {
            self.calls.lock().unwrap().push(CommandCall {
                program: program.to_string(),
                args: args.iter().map(|s| s.to_string()).collect(),
            });
        }

        fn next_response(&self, program: &str) -> CommandOutput {
            let mut responses = self.responses.lock().unwrap();
            match responses.get_mut(program) {
                Some(queue) if !queue.is_empty() => queue.remove(0),
                _ => self.default_response.lock().unwrap().clone(),
            }
        }
    }

    impl CommandExecutor for MockExecutor {
        fn run(
            &self,
            program: &str,
            args: &[&str],
            _timeout: Option<Duration>,
        ) -> Result<CommandOutput> {
            self.record_call(program, args);
            Ok(self.next_response(program))
        }

        fn run_with_stdout_file(
            &self,
            program: &str,
            args: &[&str],
            mut stdout_file: File,
            _timeout: Option<Duration>,
        ) -> Result<CommandOutput> {
            use std::io::Write;

            self.record_call(program, args);
            let response = self.next_response(program);
            // The scripted "stdout" lands in the redirected file, as it
            // would with a real dump tool.
            stdout_file.write_all(response.output.as_bytes())?;
            Ok(CommandOutput {
                output: String::new(),
                ..response
            })
        }
    }
}
