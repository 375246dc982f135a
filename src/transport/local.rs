//! KN-010: Captured local execution.

use super::{display_command, CommandResult};
use crate::error::{Error, Result};
use std::io::Read;
use std::process::{Command, Stdio};

/// Run `argv` to completion, capturing stdout and stderr through one pipe.
///
/// Stdin is inherited so `sudo` can prompt. The exit code of a process
/// killed by a signal is reported as -1.
pub fn run<S: AsRef<str>>(argv: &[S]) -> Result<CommandResult> {
    let command = display_command(argv);
    let launch_err = |source| Error::Execution {
        command: command.clone(),
        source,
    };

    let (program, args) = argv.split_first().ok_or_else(|| {
        launch_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "empty command",
        ))
    })?;

    let (mut reader, writer) = std::io::pipe().map_err(launch_err)?;
    let writer_err = writer.try_clone().map_err(launch_err)?;

    // The Command owns the write ends; it must be dropped before reading or
    // the read below never sees EOF.
    let mut child = {
        let mut cmd = Command::new(program.as_ref());
        cmd.args(args.iter().map(AsRef::as_ref))
            .stdin(Stdio::inherit())
            .stdout(writer)
            .stderr(writer_err);
        cmd.spawn().map_err(launch_err)?
    };

    let mut buf = Vec::new();
    reader.read_to_end(&mut buf).map_err(launch_err)?;
    let status = child.wait().map_err(launch_err)?;

    Ok(CommandResult {
        raw: String::from_utf8_lossy(&buf).trim().to_string(),
        exit_code: status.code().unwrap_or(-1),
    })
}
