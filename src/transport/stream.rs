//! KN-011: Streamed local execution.
//!
//! Child stdout and stderr are copied to the console line by line on two
//! tasks of a current-thread runtime. Both tasks are joined before return.

use super::{display_command, CommandResult};
use crate::error::{Error, Result};
use colored::Colorize;
use std::io::Write;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};

#[derive(Debug, Clone, Copy)]
enum Channel {
    Stdout,
    Stderr,
}

/// Run `argv`, teeing its output to the console with `prefix` on every line.
///
/// Returns the captured lines (stdout first, then stderr) and the exit code.
/// With a `timeout`, a child still running at the deadline is killed and
/// [`Error::TimedOut`] is returned.
pub fn stream<S: AsRef<str>>(
    prefix: &str,
    argv: &[S],
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let command = display_command(argv);
    let argv: Vec<String> = argv.iter().map(|s| s.as_ref().to_string()).collect();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| Error::Execution {
            command: command.clone(),
            source,
        })?;

    runtime.block_on(stream_child(prefix, &command, &argv, timeout))
}

async fn stream_child(
    prefix: &str,
    command: &str,
    argv: &[String],
    timeout: Option<Duration>,
) -> Result<CommandResult> {
    let exec_err = |source| Error::Execution {
        command: command.to_string(),
        source,
    };

    let (program, args) = argv.split_first().ok_or_else(|| {
        exec_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ))
    })?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(Stdio::inherit())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(exec_err)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| exec_err(std::io::Error::other("stdout not captured")))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| exec_err(std::io::Error::other("stderr not captured")))?;

    let out_task = tokio::spawn(copy_lines(stdout, prefix.to_string(), Channel::Stdout));
    let err_task = tokio::spawn(copy_lines(stderr, prefix.to_string(), Channel::Stderr));

    let waited = match timeout {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(status) => status,
            Err(_) => {
                let _ = child.kill().await;
                out_task.abort();
                err_task.abort();
                return Err(Error::TimedOut {
                    command: command.to_string(),
                    seconds: limit.as_secs(),
                });
            }
        },
        None => child.wait().await,
    };
    let status = waited.map_err(exec_err)?;

    let (out, err) = tokio::join!(out_task, err_task);
    let mut captured = out.map_err(|e| exec_err(std::io::Error::other(e)))?.map_err(exec_err)?;
    captured.extend(err.map_err(|e| exec_err(std::io::Error::other(e)))?.map_err(exec_err)?);

    Ok(CommandResult {
        raw: captured.join("\n").trim().to_string(),
        exit_code: status.code().unwrap_or(-1),
    })
}

async fn copy_lines<R>(reader: R, prefix: String, channel: Channel) -> std::io::Result<Vec<String>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut captured = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let body = match channel {
            Channel::Stdout => line.green(),
            Channel::Stderr => line.red(),
        };
        writeln!(std::io::stdout().lock(), "{}{}", prefix.blue(), body)?;
        captured.push(line);
    }
    Ok(captured)
}
