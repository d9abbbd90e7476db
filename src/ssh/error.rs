//! Errors raised by the SSH transport and key handling.

use camino::Utf8PathBuf;
use thiserror::Error;

/// Failures from local SSH tooling or remote commands.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum SshError {
    /// Raised when a local program cannot be started.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Program that failed to start.
        program: String,
        /// Error reported by the operating system.
        message: String,
    },
    /// Raised when a remote command exits unsuccessfully.
    #[error("{description} failed with exit status {status_text}: {stderr}")]
    RemoteCommand {
        /// What the command was meant to do.
        description: String,
        /// Exit code, when the process reported one.
        status: Option<i32>,
        /// Printable exit status.
        status_text: String,
        /// Captured standard output.
        stdout: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when `ssh-keygen` fails.
    #[error("ssh-keygen could not create {path} (exit status {status_text}): {stderr}")]
    KeyGeneration {
        /// Private key path that was requested.
        path: Utf8PathBuf,
        /// Printable exit status.
        status_text: String,
        /// Captured standard error.
        stderr: String,
    },
    /// Raised when a key file cannot be read, copied or restricted.
    #[error("failed to prepare SSH key {path}: {message}")]
    KeyFile {
        /// Path being accessed.
        path: Utf8PathBuf,
        /// Underlying error message.
        message: String,
    },
}

/// Renders an optional exit code for error messages.
pub(crate) fn status_text(code: Option<i32>) -> String {
    code.map_or_else(|| String::from("unknown"), |value| value.to_string())
}
