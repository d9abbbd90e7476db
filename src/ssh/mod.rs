//! SSH transport built on the system `ssh`, `sshpass` and `ssh-keygen`
//! binaries.
//!
//! Every invocation goes through a [`CommandRunner`], so tests can script the
//! outcome of each remote command without a network.

use std::ffi::OsString;
use std::net::Ipv4Addr;

use camino::Utf8Path;
use tracing::debug;

mod bootstrap;
mod error;
mod keys;
mod types;

pub use bootstrap::{RemoteStep, bootstrap_steps};
pub use error::SshError;
pub use keys::{expand_tilde, import_key_pair, public_key_path, read_public_key};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};

use error::status_text;

/// Environment variable `sshpass -e` reads the password from.
pub const SSHPASS_ENV: &str = "SSHPASS";

/// Paths of the local SSH tooling.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTools {
    /// `ssh` executable.
    pub ssh_bin: String,
    /// `sshpass` executable used for password authentication.
    pub sshpass_bin: String,
    /// `ssh-keygen` executable.
    pub ssh_keygen_bin: String,
}

impl Default for SshTools {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            sshpass_bin: String::from("sshpass"),
            ssh_keygen_bin: String::from("ssh-keygen"),
        }
    }
}

/// Remote endpoint of an SSH session.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Address to connect to.
    pub host: Ipv4Addr,
    /// TCP port.
    pub port: u16,
    /// Login user.
    pub user: String,
}

/// Credentials presented to the remote host.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SshAuth<'a> {
    /// Password authentication, fed to `sshpass` through the environment.
    Password(&'a str),
    /// Public key authentication with the given private key file.
    Key(&'a Utf8Path),
}

/// Runs remote commands and manages key pairs.
#[derive(Clone, Debug)]
pub struct SshClient<R: CommandRunner> {
    runner: R,
    tools: SshTools,
}

impl SshClient<ProcessCommandRunner> {
    /// Convenience constructor that wires the real process runner.
    #[must_use]
    pub const fn with_process_runner(tools: SshTools) -> Self {
        Self::new(ProcessCommandRunner, tools)
    }
}

impl<R: CommandRunner> SshClient<R> {
    /// Creates a client from a runner and tool paths.
    #[must_use]
    pub const fn new(runner: R, tools: SshTools) -> Self {
        Self { runner, tools }
    }

    /// Returns the configured tool paths.
    #[must_use]
    pub const fn tools(&self) -> &SshTools {
        &self.tools
    }

    /// Executes `command` on the target and returns its captured output.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::Spawn`] when the local client cannot be started.
    ///
    /// # Security
    ///
    /// `command` is passed verbatim to the remote shell; callers must quote
    /// untrusted input.
    pub fn run(
        &self,
        target: &SshTarget,
        auth: SshAuth<'_>,
        command: &str,
    ) -> Result<CommandOutput, SshError> {
        let mut args = self.ssh_options(target, auth);
        args.push(OsString::from(format!("{}@{}", target.user, target.host)));
        args.push(OsString::from(command));

        match auth {
            SshAuth::Password(password) => {
                let mut wrapped = vec![OsString::from("-e"), OsString::from(&self.tools.ssh_bin)];
                wrapped.extend(args);
                let env = [(String::from(SSHPASS_ENV), password.to_owned())];
                self.runner.run(&self.tools.sshpass_bin, &wrapped, &env)
            }
            SshAuth::Key(_) => self.runner.run(&self.tools.ssh_bin, &args, &[]),
        }
    }

    /// Executes `command` and fails unless it exits with status zero.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::RemoteCommand`] carrying `description` and the
    /// captured output when the command fails, or any error from
    /// [`SshClient::run`].
    pub fn run_checked(
        &self,
        target: &SshTarget,
        auth: SshAuth<'_>,
        description: &str,
        command: &str,
    ) -> Result<CommandOutput, SshError> {
        debug!(host = %target.host, description, "running remote command");
        let output = self.run(target, auth, command)?;
        if output.is_success() {
            return Ok(output);
        }
        Err(SshError::RemoteCommand {
            description: description.to_owned(),
            status: output.code,
            status_text: status_text(output.code),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    /// Generates a passphrase-less 2048-bit RSA key pair at `private_key`;
    /// the public half is written to `<private_key>.pub`.
    ///
    /// # Errors
    ///
    /// Returns [`SshError::KeyGeneration`] when `ssh-keygen` fails.
    pub fn generate_key_pair(&self, private_key: &Utf8Path) -> Result<(), SshError> {
        let args = [
            "-t",
            "rsa",
            "-b",
            "2048",
            "-N",
            "",
            "-q",
            "-f",
            private_key.as_str(),
        ]
        .map(OsString::from);
        let output = self.runner.run(&self.tools.ssh_keygen_bin, &args, &[])?;
        if output.is_success() {
            return Ok(());
        }
        Err(SshError::KeyGeneration {
            path: private_key.to_path_buf(),
            status_text: status_text(output.code),
            stderr: output.stderr,
        })
    }

    fn ssh_options(&self, target: &SshTarget, auth: SshAuth<'_>) -> Vec<OsString> {
        let mut args = vec![OsString::from("-p"), OsString::from(target.port.to_string())];

        let auth_options: &[&str] = match auth {
            SshAuth::Password(_) => &[
                "PubkeyAuthentication=no",
                "PreferredAuthentications=password,keyboard-interactive",
            ],
            SshAuth::Key(identity_file) => {
                args.push(OsString::from("-i"));
                args.push(OsString::from(identity_file.as_str()));
                &["BatchMode=yes", "IdentitiesOnly=yes"]
            }
        };

        let common = [
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
            "LogLevel=ERROR",
        ];
        for option in auth_options.iter().chain(common.iter()) {
            args.push(OsString::from("-o"));
            args.push(OsString::from(*option));
        }
        args
    }
}
