//! Administrative commands for client/server backends
//!
//! Databases are dropped and created through the engines' own command-line
//! clients. Each command carries an allow-list of idempotent-success outcomes
//! (such as "database already exists"); any other non-zero exit, or any
//! non-warning output on the error stream, is a fatal setup fault.

use crate::error::WalkError;
use std::fmt;
use std::process::Command;
use tracing::debug;

/// An exit code plus error text that still counts as success
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdempotentSuccess {
    pub exit_code: i32,
    /// Substring that must appear on the error stream
    pub stderr_contains: String,
}

impl IdempotentSuccess {
    pub fn new(exit_code: i32, stderr_contains: &str) -> Self {
        IdempotentSuccess {
            exit_code,
            stderr_contains: stderr_contains.to_string(),
        }
    }

    fn matches(&self, output: &CommandOutput) -> bool {
        output.status == Some(self.exit_code) && output.stderr.contains(&self.stderr_contains)
    }
}

/// A command-line invocation of a database client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Variables set on the child process only
    pub env: Vec<(String, String)>,
    pub idempotent: Vec<IdempotentSuccess>,
}

impl AdminCommand {
    pub fn new(program: &str) -> Self {
        AdminCommand {
            program: program.to_string(),
            args: Vec::new(),
            env: Vec::new(),
            idempotent: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: &str, value: impl Into<String>) -> Self {
        self.env.push((key.to_string(), value.into()));
        self
    }

    pub fn allow(mut self, success: IdempotentSuccess) -> Self {
        self.idempotent.push(success);
        self
    }

    /// Validate the outcome of running this command
    pub fn check(&self, output: &CommandOutput) -> Result<(), WalkError> {
        let stderr = output.stderr_without_warnings();

        if output.status == Some(0) && stderr.is_empty() {
            return Ok(());
        }

        if self.idempotent.iter().any(|allowed| allowed.matches(output)) {
            debug!("{} reported an allow-listed outcome: {}", self, stderr.trim());
            return Ok(());
        }

        let text = if output.stdout.trim().is_empty() {
            stderr
        } else {
            format!("{}{}", output.stdout, stderr)
        };
        Err(WalkError::AdminCommand {
            command: self.to_string(),
            status: output.status,
            output: text,
        })
    }
}

/// Rendered without environment, so passwords never reach logs
impl fmt::Display for AdminCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code; `None` when terminated by a signal
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success() -> Self {
        CommandOutput {
            status: Some(0),
            ..Default::default()
        }
    }

    pub fn failure(status: i32, stderr: &str) -> Self {
        CommandOutput {
            status: Some(status),
            stdout: String::new(),
            stderr: stderr.to_string(),
        }
    }

    /// Error stream with client warning and notice lines removed
    pub fn stderr_without_warnings(&self) -> String {
        self.stderr
            .lines()
            .filter(|line| !is_warning(line))
            .filter(|line| !line.trim().is_empty())
            .map(|line| format!("{}\n", line))
            .collect()
    }
}

// psql reports `drop database if exists` on an absent database as a NOTICE
fn is_warning(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with("WARNING")
        || trimmed.starts_with("Warning")
        || trimmed.starts_with("NOTICE:")
        || trimmed.contains("[Warning]")
}

/// Executes administrative commands
///
/// Implementations must be shareable between threads; lifecycle operations
/// serialize themselves through the family lock, not through the runner.
pub trait CommandRunner: Send + Sync {
    fn run(&self, command: &AdminCommand) -> Result<CommandOutput, WalkError>;
}

/// Runs commands as child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, command: &AdminCommand) -> Result<CommandOutput, WalkError> {
        debug!("running: {}", command);

        let mut process = Command::new(&command.program);
        process.args(&command.args);
        for (key, value) in &command.env {
            process.env(key, value);
        }

        let output = process.output().map_err(|e| WalkError::AdminCommand {
            command: command.to_string(),
            status: None,
            output: format!("failed to start {}: {}", command.program, e),
        })?;

        let result = CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };
        debug!("{}", if result.stdout.is_empty() { &result.stderr } else { &result.stdout });
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psql_create() -> AdminCommand {
        AdminCommand::new("psql")
            .arg("-w")
            .arg("-c")
            .arg("create database walk;")
            .env("PGPASSWORD", "secret")
            .allow(IdempotentSuccess::new(1, "already exists"))
    }

    #[test]
    fn test_display_hides_env() {
        let rendered = psql_create().to_string();
        assert_eq!(rendered, "psql -w -c 'create database walk;'");
        assert!(!rendered.contains("secret"));
    }

    #[test]
    fn test_clean_success() {
        assert!(psql_create().check(&CommandOutput::success()).is_ok());
    }

    #[test]
    fn test_warnings_are_discarded() {
        let output = CommandOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: "mysql: [Warning] Using a password on the command line interface can be insecure.\n"
                .to_string(),
        };
        assert!(AdminCommand::new("mysql").check(&output).is_ok());
    }

    #[test]
    fn test_notice_on_absent_drop_is_discarded() {
        let command = AdminCommand::new("psql").arg("-c").arg("drop database if exists walk;");
        let output = CommandOutput {
            status: Some(0),
            stdout: "DROP DATABASE\n".to_string(),
            stderr: "NOTICE:  database \"walk\" does not exist, skipping\n".to_string(),
        };
        assert!(command.check(&output).is_ok());

        let output = CommandOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: "NOTICE:  database \"walk\" does not exist, skipping\nERROR:  out of memory\n"
                .to_string(),
        };
        assert!(command.check(&output).is_err());
    }

    #[test]
    fn test_stderr_on_success_is_fatal() {
        let output = CommandOutput {
            status: Some(0),
            stdout: String::new(),
            stderr: "ERROR: permission denied\n".to_string(),
        };
        let err = AdminCommand::new("psql").check(&output).unwrap_err();
        assert!(matches!(err, WalkError::AdminCommand { status: Some(0), .. }));
    }

    #[test]
    fn test_allow_listed_already_exists() {
        let output = CommandOutput::failure(1, "ERROR:  database \"walk\" already exists\n");
        assert!(psql_create().check(&output).is_ok());
    }

    #[test]
    fn test_allow_list_requires_matching_text() {
        let output = CommandOutput::failure(1, "psql: could not connect to server\n");
        assert!(psql_create().check(&output).is_err());

        let output = CommandOutput::failure(2, "database \"walk\" already exists\n");
        assert!(psql_create().check(&output).is_err());
    }

    #[test]
    fn test_missing_program() {
        let runner = SystemCommandRunner;
        let result = runner.run(&AdminCommand::new("schemawalk-no-such-client-binary"));
        assert!(matches!(result, Err(WalkError::AdminCommand { status: None, .. })));
    }
}
