//! The account roster: the ordered batch of portal logins to process.
//!
//! Each record carries the login id, its secret, and the contributor
//! identity to select after login. The roster is read once at startup;
//! any missing or empty field is a fatal configuration error reported
//! before the browser is launched.

use std::path::Path;

use anyhow::{Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

/// One portal login to process. Consumed once per batch iteration.
#[derive(Debug, Deserialize)]
pub struct AccountRecord {
    /// Identity typed into the login form.
    pub login_id: String,
    /// Login secret. Only exposed at the point it is typed.
    pub secret: SecretString,
    /// Contributor identity to select from the post-login dropdown.
    pub contributor_id: String,
}

#[derive(Debug, Deserialize)]
struct RosterFile {
    #[serde(default, rename = "account")]
    accounts: Vec<AccountRecord>,
}

/// Load and validate the roster from a TOML file.
///
/// ```toml
/// [[account]]
/// login_id = "20111111111"
/// secret = "..."
/// contributor_id = "20222222222"
/// ```
pub fn load_roster(path: &Path) -> Result<Vec<AccountRecord>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read accounts file: {}", path.display()))?;

    let roster: RosterFile = toml::from_str(&content)
        .with_context(|| format!("Failed to parse accounts file: {}", path.display()))?;

    if roster.accounts.is_empty() {
        anyhow::bail!("Accounts file {} contains no accounts", path.display());
    }

    for (index, account) in roster.accounts.iter().enumerate() {
        let entry = index + 1;
        if account.login_id.trim().is_empty() {
            anyhow::bail!("Account {entry}: login_id is empty");
        }
        if account.secret.expose_secret().trim().is_empty() {
            anyhow::bail!("Account {entry}: secret is empty");
        }
        if account.contributor_id.trim().is_empty() {
            anyhow::bail!("Account {entry}: contributor_id is empty");
        }
    }

    Ok(roster.accounts)
}
