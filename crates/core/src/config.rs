//! Core runtime configuration.
//!
//! Configuration is resolved once at process startup and then passed into core services.
//! Nothing in this crate reads the process environment while handling a request; binaries read
//! environment variables and hand the raw values to the parsing helpers below.

use crate::constants::{APPOINTMENTS_TABLE, DEFAULT_CONNECT_TIMEOUT_SECS, REST_API_PREFIX};
use crate::error::{ClinicError, ClinicResult};
use clinic_types::{EmailAddress, NonEmptyText};
use reqwest::Url;
use std::time::Duration;

/// Location and credentials of the remote appointment store.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    base_url: Url,
    api_key: NonEmptyText,
    table: NonEmptyText,
}

impl StoreConfig {
    /// Create a new `StoreConfig`.
    ///
    /// `table` defaults to `appointments` when `None` or blank.
    pub fn new(
        base_url: &str,
        api_key: impl AsRef<str>,
        table: Option<String>,
    ) -> ClinicResult<Self> {
        let mut base_url = Url::parse(base_url.trim())
            .map_err(|e| ClinicError::InvalidConfig(format!("store URL '{base_url}': {e}")))?;
        if !matches!(base_url.scheme(), "http" | "https") {
            return Err(ClinicError::InvalidConfig(format!(
                "store URL must be http(s), got '{}'",
                base_url.scheme()
            )));
        }
        // Url::join replaces the last path segment unless the base ends with '/'.
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let api_key = NonEmptyText::new(api_key)
            .map_err(|_| ClinicError::InvalidConfig("store API key cannot be empty".into()))?;

        let table = table
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(APPOINTMENTS_TABLE);
        if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(ClinicError::InvalidConfig(format!(
                "table name '{table}' must be alphanumeric or '_'"
            )));
        }
        let table = NonEmptyText::new(table)
            .map_err(|_| ClinicError::InvalidConfig("table name cannot be empty".into()))?;

        Ok(Self {
            base_url,
            api_key,
            table,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        self.api_key.as_str()
    }

    pub fn table(&self) -> &str {
        self.table.as_str()
    }

    /// Full URL of the table endpoint, e.g. `https://host/rest/v1/appointments`.
    pub fn table_url(&self) -> Url {
        let mut url = self.base_url.clone();
        let path = format!("{}{}/{}", url.path(), REST_API_PREFIX, self.table);
        url.set_path(&path);
        url
    }
}

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    store: StoreConfig,
    authorized_email: EmailAddress,
}

impl CoreConfig {
    pub fn new(store: StoreConfig, authorized_email: &str) -> ClinicResult<Self> {
        let authorized_email = EmailAddress::parse(authorized_email)
            .map_err(|e| ClinicError::InvalidConfig(format!("admin email: {e}")))?;

        Ok(Self {
            store,
            authorized_email,
        })
    }

    pub fn store(&self) -> &StoreConfig {
        &self.store
    }

    /// The single identity admitted to the admin area.
    pub fn authorized_email(&self) -> &EmailAddress {
        &self.authorized_email
    }
}

/// Parse a connect timeout (whole seconds) from an optional string value.
///
/// If `value` is `None` or empty/whitespace, returns the default of 15 seconds.
pub fn connect_timeout_from_env_value(value: Option<String>) -> ClinicResult<Duration> {
    let value = value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());

    let Some(value) = value else {
        return Ok(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS));
    };

    match value.parse::<u64>() {
        Ok(0) | Err(_) => Err(ClinicError::InvalidConfig(format!(
            "connect timeout must be a positive number of seconds, got '{value}'"
        ))),
        Ok(secs) => Ok(Duration::from_secs(secs)),
    }
}
