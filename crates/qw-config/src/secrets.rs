//! Runtime secret resolution.
//!
//! # Contract
//! - Secrets come from the environment only; config files never carry them.
//! - [`resolve_secrets`] is called once at startup and the result is passed
//!   into constructors. Do not scatter `std::env::var` calls for secrets.
//! - `Debug` output redacts every value.
//! - Error messages name the env var, never its value.

use anyhow::{bail, Result};

pub const ENV_DB_URL: &str = "QW_DATABASE_URL";
pub const ENV_RABBIT_PASSWORD: &str = "QW_RABBIT_PASSWORD";
pub const ENV_EMAIL_PASSWORD: &str = "QW_EMAIL_PASSWORD";

/// Secrets resolved for one process.
#[derive(Clone)]
pub struct ResolvedSecrets {
    /// Postgres connection URL (carries credentials).
    pub database_url: Option<String>,
    /// Broker administrator password. Falls back to `guest` for local brokers.
    pub rabbit_password: String,
    /// SMTP password, when the mail relay requires authentication.
    pub email_password: Option<String>,
}

impl std::fmt::Debug for ResolvedSecrets {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedSecrets")
            .field("database_url", &self.database_url.as_ref().map(|_| "<REDACTED>"))
            .field("rabbit_password", &"<REDACTED>")
            .field("email_password", &self.email_password.as_ref().map(|_| "<REDACTED>"))
            .finish()
    }
}

impl ResolvedSecrets {
    /// The database URL, or an error naming the missing variable.
    pub fn require_database_url(&self) -> Result<&str> {
        match self.database_url.as_deref() {
            Some(url) => Ok(url),
            None => bail!("missing env var {ENV_DB_URL}"),
        }
    }
}

/// Resolve secrets through `lookup`; empty values count as absent.
pub fn resolve_secrets<F>(lookup: F) -> ResolvedSecrets
where
    F: Fn(&str) -> Option<String>,
{
    let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
    ResolvedSecrets {
        database_url: get(ENV_DB_URL),
        rabbit_password: get(ENV_RABBIT_PASSWORD).unwrap_or_else(|| "guest".to_string()),
        email_password: get(ENV_EMAIL_PASSWORD),
    }
}
