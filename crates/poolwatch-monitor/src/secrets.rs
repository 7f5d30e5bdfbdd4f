//! Credential sources for the delivery channel.
//!
//! Credentials are resolved once at startup through a [`SecretProvider`]
//! and handed to the notifier; nothing reads them from globals later.

use std::fmt;
use std::path::PathBuf;

use crate::error::ConfigError;

/// Environment variable holding the SMTP username.
pub const ENV_USERNAME: &str = "POOLWATCH_SMTP_USERNAME";
/// Environment variable holding the SMTP password.
pub const ENV_PASSWORD: &str = "POOLWATCH_SMTP_PASSWORD";
/// Environment variable naming a file that contains the SMTP password.
pub const ENV_PASSWORD_FILE: &str = "POOLWATCH_SMTP_PASSWORD_FILE";

/// SMTP login.
#[derive(Clone, PartialEq, Eq)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Supplies delivery credentials.
pub trait SecretProvider: Send + Sync {
    /// `None` means the channel is used unauthenticated.
    fn smtp_credentials(&self) -> Result<Option<SmtpCredentials>, ConfigError>;
}

/// Fixed credentials, mainly for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticSecrets(pub Option<SmtpCredentials>);

impl SecretProvider for StaticSecrets {
    fn smtp_credentials(&self) -> Result<Option<SmtpCredentials>, ConfigError> {
        Ok(self.0.clone())
    }
}

/// Reads credentials from the process environment.
#[derive(Debug, Clone, Default)]
pub struct EnvSecrets;

impl SecretProvider for EnvSecrets {
    fn smtp_credentials(&self) -> Result<Option<SmtpCredentials>, ConfigError> {
        resolve(|key| std::env::var(key).ok())
    }
}

/// Resolve credentials from a key lookup.
///
/// The password comes from `ENV_PASSWORD`, or failing that from the file
/// named by `ENV_PASSWORD_FILE` (trailing newline stripped). A password
/// without a username, or a username without a password, is an error.
fn resolve(lookup: impl Fn(&str) -> Option<String>) -> Result<Option<SmtpCredentials>, ConfigError> {
    let username = lookup(ENV_USERNAME).filter(|u| !u.is_empty());
    let password = match lookup(ENV_PASSWORD).filter(|p| !p.is_empty()) {
        Some(p) => Some(p),
        None => match lookup(ENV_PASSWORD_FILE) {
            Some(path) => Some(read_password_file(PathBuf::from(path))?),
            None => None,
        },
    };

    match (username, password) {
        (Some(username), Some(password)) => Ok(Some(SmtpCredentials { username, password })),
        (None, None) => Ok(None),
        (Some(_), None) => Err(ConfigError::Credentials(format!(
            "{ENV_USERNAME} is set but no password was provided"
        ))),
        (None, Some(_)) => Err(ConfigError::Credentials(format!(
            "a password was provided but {ENV_USERNAME} is not set"
        ))),
    }
}

fn read_password_file(path: PathBuf) -> Result<String, ConfigError> {
    let text = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::Credentials(format!("{}: {e}", path.display())))?;
    let password = text.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        return Err(ConfigError::Credentials(format!(
            "{}: password file is empty",
            path.display()
        )));
    }
    Ok(password)
}
