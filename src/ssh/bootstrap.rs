//! Remote steps that install a public key and retire password login.

use shell_escape::unix::escape;

/// One command run during bootstrap.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RemoteStep {
    /// What the command does, used in error messages.
    pub description: &'static str,
    /// Shell command to execute remotely.
    pub command: String,
}

impl RemoteStep {
    fn new(description: &'static str, command: impl Into<String>) -> Self {
        Self {
            description,
            command: command.into(),
        }
    }
}

/// Builds the ordered commands that authorise `public_key` for `user` and
/// delete the user's password.
#[must_use]
pub fn bootstrap_steps(user: &str, public_key: &str) -> Vec<RemoteStep> {
    let escaped_key = escape(public_key.trim().into());
    let escaped_user = escape(user.into());
    vec![
        RemoteStep::new("create ~/.ssh", r#"mkdir -p "$HOME/.ssh""#),
        RemoteStep::new("restrict ~/.ssh", r#"chmod 700 "$HOME/.ssh""#),
        RemoteStep::new(
            "authorise public key",
            format!(r#"echo {escaped_key} >> "$HOME/.ssh/authorized_keys""#),
        ),
        RemoteStep::new(
            "restrict authorized_keys",
            r#"chmod 600 "$HOME/.ssh/authorized_keys""#,
        ),
        RemoteStep::new("disable password login", format!("passwd -d {escaped_user}")),
    ]
}
