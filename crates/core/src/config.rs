//! API credentials loaded from the environment.
//!
//! The key and base URL are resolved once at startup and passed by
//! reference into everything that talks to the remote service. Missing
//! or empty credentials fail here, before any network call is made.

use std::env;

/// Public BFL API base URL, used when `BFL_API_BASE` is not set.
pub const DEFAULT_API_BASE: &str = "https://api.bfl.ai/v1";

/// Immutable API credentials for one process lifetime.
#[derive(Debug, Clone)]
pub struct Credentials {
    /// API key sent as the `x-key` header on every request.
    pub api_key: String,
    /// Base URL of the remote API, without a trailing slash.
    pub base_url: String,
}

/// Errors raised while resolving credentials.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `BFL_API_KEY` is unset or blank.
    #[error("BFL_API_KEY is not set or empty")]
    MissingApiKey,

    /// `BFL_API_BASE` was set to a blank string.
    #[error("BFL_API_BASE is set but empty")]
    EmptyBaseUrl,
}

impl Credentials {
    /// Build credentials from explicit values.
    ///
    /// Both values are trimmed; trailing slashes are stripped from the
    /// base URL so endpoint paths can be appended with a single `/`.
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }

        let base_url = base_url.into().trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(ConfigError::EmptyBaseUrl);
        }

        Ok(Self { api_key, base_url })
    }

    /// Load credentials from environment variables.
    ///
    /// | Env Var        | Default                    |
    /// |----------------|----------------------------|
    /// | `BFL_API_KEY`  | (required)                 |
    /// | `BFL_API_BASE` | `https://api.bfl.ai/v1`    |
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_key = env::var("BFL_API_KEY").map_err(|_| ConfigError::MissingApiKey)?;
        let base_url =
            env::var("BFL_API_BASE").unwrap_or_else(|_| DEFAULT_API_BASE.to_string());
        Self::new(api_key, base_url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_accepts_key_and_base() {
        let creds = Credentials::new("k-123", "https://api.example.com/v1").unwrap();
        assert_eq!(creds.api_key, "k-123");
        assert_eq!(creds.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn new_strips_trailing_slash() {
        let creds = Credentials::new("k-123", "https://api.example.com/v1/").unwrap();
        assert_eq!(creds.base_url, "https://api.example.com/v1");
    }

    #[test]
    fn new_rejects_empty_key() {
        assert!(matches!(
            Credentials::new("", DEFAULT_API_BASE),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn new_rejects_whitespace_key() {
        assert!(matches!(
            Credentials::new("   ", DEFAULT_API_BASE),
            Err(ConfigError::MissingApiKey)
        ));
    }

    #[test]
    fn new_rejects_empty_base_url() {
        assert!(matches!(
            Credentials::new("k-123", ""),
            Err(ConfigError::EmptyBaseUrl)
        ));
    }
}
