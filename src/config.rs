//! Account and supervisor configuration.
//!
//! Loaded once from a JSON document at startup; never mutated afterwards.
//! The supervisor owns the config and hands each worker a shared reference
//! to its own account entry.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::error::ConfigError;

/// Default IMAPS port.
fn default_port() -> u16 {
    993
}

fn default_mailbox() -> String {
    "INBOX".to_string()
}

/// Default seconds between poll cycles.
fn default_poll_interval() -> u64 {
    60
}

fn default_enabled() -> bool {
    true
}

/// Default seconds to wait for workers to acknowledge shutdown.
fn default_grace_secs() -> u64 {
    20
}

/// Polling configuration for one mail account.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    /// Unique account identifier, used in logs and status reports.
    pub id: String,
    /// Mail server hostname.
    pub host: String,
    /// Mail server port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Login username.
    pub username: String,
    /// Login password. Redacted from `Debug` output.
    pub password: SecretString,
    /// Mailbox to poll.
    #[serde(default = "default_mailbox")]
    pub mailbox: String,
    /// Seconds between poll cycles.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Disabled accounts are kept in the config but never polled.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl AccountConfig {
    /// Poll interval as a `Duration`.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

/// Supervisor-level settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorConfig {
    /// Seconds to wait for workers to acknowledge shutdown before they are
    /// forcibly aborted.
    #[serde(default = "default_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl SupervisorConfig {
    /// Shutdown grace period as a `Duration`.
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: default_grace_secs(),
        }
    }
}

/// Full poller configuration: supervisor settings plus the account list.
#[derive(Debug, Clone, Deserialize)]
pub struct PollerConfig {
    /// Supervisor settings; every field has a default.
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// Accounts to poll, in launch order.
    pub accounts: Vec<AccountConfig>,
}

impl PollerConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    /// Parse and validate a JSON configuration document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::NoAccounts);
        }

        let mut seen = HashSet::new();
        for account in &self.accounts {
            if account.id.trim().is_empty() {
                return Err(ConfigError::InvalidAccount {
                    id: "<unnamed>".to_string(),
                    reason: "account id is empty".to_string(),
                });
            }
            if !seen.insert(account.id.as_str()) {
                return Err(ConfigError::DuplicateAccountId {
                    id: account.id.clone(),
                });
            }
            if account.host.trim().is_empty() {
                return Err(ConfigError::InvalidAccount {
                    id: account.id.clone(),
                    reason: "host is empty".to_string(),
                });
            }
            if account.poll_interval_secs == 0 {
                return Err(ConfigError::InvalidAccount {
                    id: account.id.clone(),
                    reason: "poll_interval_secs must be at least 1".to_string(),
                });
            }
        }

        if self.enabled_count() == 0 {
            return Err(ConfigError::NoEnabledAccounts);
        }

        Ok(())
    }

    /// Accounts that will actually be polled, in config order.
    pub fn enabled_accounts(&self) -> impl Iterator<Item = &AccountConfig> {
        self.accounts.iter().filter(|a| a.enabled)
    }

    /// Number of enabled accounts.
    pub fn enabled_count(&self) -> usize {
        self.enabled_accounts().count()
    }
}
