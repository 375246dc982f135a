//! KN-010: Command transport — captured and streamed local execution.
//!
//! A non-zero exit code is data, not an error: callers inspect
//! [`CommandResult::exit_code`]. Only a failure to launch is an `Err`.

pub mod local;
pub mod stream;

pub use local::run;
pub use stream::stream;

use regex::Regex;
use std::sync::LazyLock;

static LINE_START: LazyLock<Regex> = LazyLock::new(|| Regex::new("(?m)^").expect("static regex"));

/// A finished subprocess: trimmed combined output and exit code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub raw: String,
    pub exit_code: i32,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Output split into lines, each trimmed.
    pub fn lines(&self) -> Vec<&str> {
        self.raw.split('\n').map(str::trim).collect()
    }

    /// Lines containing `needle`.
    pub fn grep(&self, needle: &str) -> Vec<&str> {
        self.lines()
            .into_iter()
            .filter(|line| line.contains(needle))
            .collect()
    }

    pub fn split_colon(&self) -> Vec<&str> {
        self.raw.split(':').collect()
    }

    /// Output with every line indented two tabs, for nesting under a log line.
    pub fn formatted(&self) -> String {
        LINE_START.replace_all(&self.raw, "\t\t").into_owned()
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Wrap `argv` so it runs as `user` through sudo. No user means unchanged.
pub fn as_user(argv: Vec<String>, user: Option<&str>) -> Vec<String> {
    match user {
        Some(user) => {
            let mut wrapped = vec!["sudo".to_string(), "-u".to_string(), user.to_string()];
            wrapped.extend(argv);
            wrapped
        }
        None => argv,
    }
}

/// Wrap `argv` in sudo: as `user` when given, otherwise as root.
pub fn privileged(argv: Vec<String>, user: Option<&str>) -> Vec<String> {
    match user {
        Some(_) => as_user(argv, user),
        None => {
            let mut wrapped = vec!["sudo".to_string()];
            wrapped.extend(argv);
            wrapped
        }
    }
}

/// Single-quote a string for `sh -c`.
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

/// Space-joined command line for logs and error messages.
pub fn display_command<S: AsRef<str>>(argv: &[S]) -> String {
    argv.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
}

/// Run `sh -c <predicate>`.
pub fn run_predicate(predicate: &str) -> crate::error::Result<CommandResult> {
    run(&["sh", "-c", predicate])
}

/// Turn a non-zero exit into [`Error::CommandFailed`].
pub fn require_success<S: AsRef<str>>(argv: &[S], result: CommandResult) -> crate::error::Result<CommandResult> {
    if result.success() {
        Ok(result)
    } else {
        Err(crate::error::Error::CommandFailed {
            command: display_command(argv),
            code: result.exit_code,
            output: result.raw,
        })
    }
}

/// [`run`], requiring exit code 0.
pub fn run_checked<S: AsRef<str>>(argv: &[S]) -> crate::error::Result<CommandResult> {
    let result = run(argv)?;
    log::debug!("{} exited {}", display_command(argv), result.exit_code);
    require_success(argv, result)
}

/// [`stream`], requiring exit code 0.
pub fn stream_checked<S: AsRef<str>>(
    prefix: &str,
    argv: &[S],
    timeout: Option<std::time::Duration>,
) -> crate::error::Result<CommandResult> {
    let result = stream(prefix, argv, timeout)?;
    require_success(argv, result)
}
