//! Blocking-until-exit wrapper around external CLIs (`az`, `git`).

use std::ffi::OsStr;
use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;
use tracing::debug;

/// Captured result of one external command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub success: bool,
    /// Raw bytes; patches are not necessarily UTF-8.
    pub stdout: Vec<u8>,
    pub stderr: String,
}

impl CommandOutput {
    pub fn stdout_text(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    /// Trimmed stderr, falling back to stdout when stderr is empty
    /// (git reports merge conflicts on stdout).
    pub fn message(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout_text().trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Human-readable command line for logs and error messages.
pub fn display<I, S>(program: &str, args: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(&arg.as_ref().to_string_lossy());
    }
    line
}

/// Run `program` with `args` to completion. A non-zero exit is reported in
/// `CommandOutput::success`; only spawn failures are errors.
pub async fn run<I, S>(program: &str, args: I, cwd: Option<&Path>) -> std::io::Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let args: Vec<S> = args.into_iter().collect();
    let line = display(program, &args);
    debug!(command = %line, cwd = ?cwd, "running");

    let mut cmd = Command::new(program);
    cmd.args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let output = cmd.output().await?;
    Ok(CommandOutput {
        success: output.status.success(),
        stdout: output.stdout,
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
