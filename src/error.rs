//! KN-002: Error taxonomy for recipe loading, scheduling, and baking.
//!
//! Structural errors (decode, unknown dependency, cycle) abort a run before
//! or during resolution. Run-time errors (guard, command, fetch) are handled
//! by the scheduler according to the run's [`ErrorPolicy`](crate::core::types::ErrorPolicy).

use std::io;
use std::path::PathBuf;

/// Result type alias for kiln operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while loading a recipe or converging resources.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A recipe block failed to decode. All diagnostics for the block are kept.
    #[error("resource '{resource}': {}", diagnostics.join("; "))]
    ConfigDecode {
        /// Block name.
        resource: String,
        /// Every problem found in the block.
        diagnostics: Vec<String>,
    },

    /// A `depends_on` entry names a resource that does not exist.
    #[error("resource '{resource}' depends on unknown resource '{missing}'")]
    UnknownDependency {
        /// Resource declaring the dependency.
        resource: String,
        /// The name that could not be found.
        missing: String,
    },

    /// A resource was requested by name and no block declares it.
    #[error("no resource named '{0}'")]
    UnknownResource(String),

    /// Dependency resolution revisited a resource that was still resolving.
    #[error("dependency cycle detected: {}", path.join(" -> "))]
    DependencyCycle {
        /// Resolution path, first and last entries are the same resource.
        path: Vec<String>,
    },

    /// A guard predicate could not be executed.
    #[error("{guard} guard for '{resource}' could not run: {message}")]
    GuardEvaluation {
        /// Resource owning the guard.
        resource: String,
        /// `only_if` or `not_if`.
        guard: &'static str,
        /// Underlying failure.
        message: String,
    },

    /// A subprocess could not be launched.
    #[error("failed to execute '{command}': {source}")]
    Execution {
        /// Program that failed to start.
        command: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A subprocess ran but exited non-zero where success was required.
    #[error("'{command}' exited with code {code}: {output}")]
    CommandFailed {
        /// Command line, space joined.
        command: String,
        /// Exit code (-1 when killed by a signal).
        code: i32,
        /// Captured output, trimmed.
        output: String,
    },

    /// A streamed subprocess exceeded its deadline and was killed.
    #[error("'{command}' timed out after {seconds}s")]
    TimedOut {
        /// Command line, space joined.
        command: String,
        /// Deadline that expired.
        seconds: u64,
    },

    /// HTTP transport failure (DNS, connect, TLS, reset).
    #[error("transport error fetching {url}: {message}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Error message.
        message: String,
    },

    /// Server answered with something other than 200 OK.
    #[error("server returned HTTP {status} for {url}")]
    ServerResponse {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// Content did not hash to the expected checksum.
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", path.display())]
    ChecksumMismatch {
        /// File that was verified.
        path: PathBuf,
        /// Requested checksum.
        expected: String,
        /// Computed checksum.
        actual: String,
    },

    /// A checksum string could not be understood.
    #[error("invalid checksum '{0}': expected hex digest, optionally prefixed with sha256: or blake3:")]
    InvalidChecksum(String),

    /// Filesystem error.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// Path involved in the error.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },

    /// A settings or recipe document could not be parsed.
    #[error("cannot parse {what}: {message}")]
    Parse {
        /// What was being parsed.
        what: String,
        /// Parser message.
        message: String,
    },

    /// A recipe failed validation; each problem has already been reported.
    #[error("{count} validation error(s)")]
    InvalidRecipe {
        /// Number of problems found.
        count: usize,
    },

    /// A bake failed and the run's policy is to abort.
    #[error("bake of '{resource}' failed: {source}")]
    BakeFailed {
        /// Resource whose bake failed.
        resource: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Build an [`Error::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error describes the recipe itself rather than the host.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Self::ConfigDecode { .. }
                | Self::InvalidRecipe { .. }
                | Self::UnknownResource(_)
                | Self::UnknownDependency { .. }
                | Self::DependencyCycle { .. }
        )
    }
}
