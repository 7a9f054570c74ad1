//! Runtime configuration for Atrium.
//!
//! Settings live in `~/.atrium/config.toml`; gateway credentials may be
//! overridden (or supplied entirely) through environment variables so that
//! secrets never have to touch the file:
//!
//! ```toml
//! database_path = "/var/lib/atrium/atrium.db"
//! close_grace_secs = 5
//! offer_ttl_secs = 900
//!
//! [paypal]
//! mode = "sandbox"            # or "live"
//! client_id = "..."           # env: PAYPAL_CLIENT_ID
//! client_secret = "..."       # env: PAYPAL_CLIENT_SECRET
//! brand_name = "Atrium"
//! return_url = "https://example.com/success"
//! cancel_url = "https://example.com/cancel"
//! currency = "USD"
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

const CONFIG_DIR: &str = ".atrium";
const CONFIG_FILE: &str = "config.toml";

/// Default visible grace before a closed ticket's channel is deleted.
pub const DEFAULT_CLOSE_GRACE_SECS: u64 = 5;
/// Default lifetime of an application role offer.
pub const DEFAULT_OFFER_TTL_SECS: u64 = 900;

/// Location of the user's config file, if a home directory exists.
#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

/// Location of the data directory used for the database and logs.
#[must_use]
pub fn data_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR))
}

/// Which PayPal environment to talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayPalMode {
    #[default]
    Sandbox,
    Live,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PayPalSettings {
    #[serde(default)]
    pub mode: PayPalMode,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_brand_name")]
    pub brand_name: String,
    #[serde(default = "default_return_url")]
    pub return_url: String,
    #[serde(default = "default_cancel_url")]
    pub cancel_url: String,
    #[serde(default = "default_currency")]
    pub currency: String,
}

// The derive would produce empty strings; a missing `[paypal]` section must
// match what serde fills in field by field.
impl Default for PayPalSettings {
    fn default() -> Self {
        Self {
            mode: PayPalMode::default(),
            client_id: String::new(),
            client_secret: String::new(),
            brand_name: default_brand_name(),
            return_url: default_return_url(),
            cancel_url: default_cancel_url(),
            currency: default_currency(),
        }
    }
}

fn default_brand_name() -> String {
    "Atrium".to_string()
}

fn default_return_url() -> String {
    "https://example.com/success".to_string()
}

fn default_cancel_url() -> String {
    "https://example.com/cancel".to_string()
}

fn default_currency() -> String {
    "USD".to_string()
}

/// Root runtime settings.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AtriumConfig {
    /// SQLite database path; defaults to `<data_dir>/atrium.db`.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_close_grace")]
    pub close_grace_secs: u64,
    #[serde(default = "default_offer_ttl")]
    pub offer_ttl_secs: u64,
    #[serde(default)]
    pub paypal: PayPalSettings,
}

const fn default_close_grace() -> u64 {
    DEFAULT_CLOSE_GRACE_SECS
}

const fn default_offer_ttl() -> u64 {
    DEFAULT_OFFER_TTL_SECS
}

impl AtriumConfig {
    /// Load from the default location, falling back to defaults when no
    /// file exists, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = match config_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default_with_serde(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from an explicit path (no existence fallback).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config at {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config at {}", path.display()))
    }

    // `Default` derives zero values; route through serde so the defaulted
    // fields match what an empty file would produce.
    fn default_with_serde() -> Self {
        toml::from_str("").unwrap_or_default()
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("PAYPAL_CLIENT_ID")
            && !id.is_empty()
        {
            self.paypal.client_id = id;
        }
        if let Ok(secret) = std::env::var("PAYPAL_CLIENT_SECRET")
            && !secret.is_empty()
        {
            self.paypal.client_secret = secret;
        }
        if let Ok(mode) = std::env::var("PAYPAL_MODE") {
            match mode.to_ascii_lowercase().as_str() {
                "live" => self.paypal.mode = PayPalMode::Live,
                "sandbox" => self.paypal.mode = PayPalMode::Sandbox,
                "" => {}
                other => tracing::warn!("Ignoring unknown PAYPAL_MODE '{other}'"),
            }
        }
    }

    /// Resolved database path.
    pub fn database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        match data_dir() {
            Some(dir) => Ok(dir.join("atrium.db")),
            None => bail!("No home directory available; set database_path explicitly"),
        }
    }

    /// Validate that gateway credentials are present.
    pub fn require_paypal_credentials(&self) -> Result<()> {
        if self.paypal.client_id.is_empty() || self.paypal.client_secret.is_empty() {
            bail!(
                "PayPal credentials are missing; set PAYPAL_CLIENT_ID and \
                 PAYPAL_CLIENT_SECRET or add them to the config file"
            );
        }
        Ok(())
    }
}
