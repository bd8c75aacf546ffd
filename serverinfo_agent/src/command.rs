//! Subprocess helper used by the container and software-version samplers.
//! Every call is bounded by a timeout; a hung command is killed on drop.

use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("`{cmd}` timed out after {timeout:?}")]
    Timeout { cmd: String, timeout: Duration },

    #[error("failed to execute `{cmd}`: {source}")]
    Spawn {
        cmd: String,
        source: std::io::Error,
    },

    #[error("`{cmd}` exited with {status}: {stderr}")]
    NonZeroExit {
        cmd: String,
        status: ExitStatus,
        stderr: String,
    },
}

/// Run `program args..` and return its stdout.
pub async fn run(program: &str, args: &[&str], timeout: Duration) -> Result<String, CommandError> {
    let mut cmd = Command::new(program);
    cmd.args(args);
    let display = std::iter::once(program)
        .chain(args.iter().copied())
        .collect::<Vec<_>>()
        .join(" ");
    output(cmd, display, timeout).await
}

/// Run a command line through `sh -c` and return its stdout.
pub async fn run_shell(line: &str, timeout: Duration) -> Result<String, CommandError> {
    let mut cmd = Command::new("sh");
    cmd.args(["-c", line]);
    output(cmd, line.to_string(), timeout).await
}

async fn output(
    mut cmd: Command,
    display: String,
    timeout: Duration,
) -> Result<String, CommandError> {
    let child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| CommandError::Spawn {
            cmd: display.clone(),
            source,
        })?;

    let out = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(out)) => out,
        Ok(Err(source)) => return Err(CommandError::Spawn { cmd: display, source }),
        Err(_) => return Err(CommandError::Timeout { cmd: display, timeout }),
    };

    if !out.status.success() {
        return Err(CommandError::NonZeroExit {
            cmd: display,
            status: out.status,
            stderr: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}
