//! Pass-through to the AWS command-line tool for `/api/cli`.
//!
//! The operator's command line is split into arguments (no shell is
//! involved) and run with the request's credentials in the environment.

use log::debug;
use perim_core::{CredentialBundle, PerimeterError, PerimeterResult};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CliOutput {
    pub stdout: String,
    pub stderr: String,
    /// `-1` when the process was killed by a signal.
    pub exit_code: i32,
}

impl CliOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

#[derive(Debug, Clone)]
pub struct CliBridge {
    program: String,
    timeout: Duration,
}

impl Default for CliBridge {
    fn default() -> Self {
        Self {
            program: "aws".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl CliBridge {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Arguments for `command`, without a leading program name.
    pub fn arguments(&self, command: &str) -> PerimeterResult<Vec<String>> {
        let mut args = tokenize(command)?;
        let program_name = std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program);
        if args
            .first()
            .map(|a| a == "aws" || a == program_name)
            .unwrap_or(false)
        {
            args.remove(0);
        }
        if args.is_empty() {
            return Err(PerimeterError::validation("command is empty"));
        }
        Ok(args)
    }

    /// Run `command` with `credentials`. A non-zero exit is reported in the
    /// output, not as an error.
    pub async fn run(&self, command: &str, credentials: &CredentialBundle) -> PerimeterResult<CliOutput> {
        let args = self.arguments(command)?;
        debug!("running {} {}", self.program, args.join(" "));

        let mut cmd = Command::new(&self.program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .env("AWS_ACCESS_KEY_ID", credentials.access_key_id())
            .env("AWS_SECRET_ACCESS_KEY", credentials.secret_access_key())
            .env("AWS_DEFAULT_REGION", &credentials.region().name)
            .env("AWS_REGION", &credentials.region().name)
            .env("AWS_PAGER", "");
        match credentials.session_token() {
            Some(token) => cmd.env("AWS_SESSION_TOKEN", token),
            None => cmd.env_remove("AWS_SESSION_TOKEN"),
        };

        match tokio::time::timeout(self.timeout, cmd.output()).await {
            Err(_) => Err(PerimeterError::timeout(format!(
                "{} did not finish within {}s",
                self.program,
                self.timeout.as_secs_f32()
            ))),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => Err(PerimeterError::io(format!(
                "'{}' was not found on PATH",
                self.program
            ))),
            Ok(Err(e)) => Err(PerimeterError::io(format!("failed to run {}: {}", self.program, e))),
            Ok(Ok(output)) => {
                let exit_code = output.status.code().unwrap_or(-1);
                if exit_code != 0 {
                    debug!("{} exited with code {}", self.program, exit_code);
                }
                Ok(CliOutput {
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                    exit_code,
                })
            }
        }
    }
}

/// Split a command line on whitespace, honouring single quotes, double
/// quotes, and backslash escapes outside single quotes.
pub fn tokenize(command: &str) -> PerimeterResult<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote: Option<char> = None;
    let mut chars = command.chars();

    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some('\''), c) => current.push(c),
            (_, '\\') => match chars.next() {
                Some(next) => {
                    current.push(next);
                    in_token = true;
                }
                None => return Err(PerimeterError::validation("command ends with a dangling escape")),
            },
            (Some(_), c) => current.push(c),
            (None, '\'') | (None, '"') => {
                quote = Some(c);
                in_token = true;
            }
            (None, c) if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            (None, c) => {
                current.push(c);
                in_token = true;
            }
        }
    }

    if quote.is_some() {
        return Err(PerimeterError::validation("command has an unterminated quote"));
    }
    if in_token {
        args.push(current);
    }
    Ok(args)
}
