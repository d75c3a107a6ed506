//! Configuration defaults and constants.
//!
//! The vendor endpoints and app fingerprint values live here so the session
//! and command layers never duplicate them.

use serde::Deserialize;
use std::time::Duration;

/// Vendor endpoint constants.
pub mod endpoints {
    /// Site used when none is configured.
    pub const DEFAULT_SITE: &str = "amazon.com";
    /// Sign-in host; the login flow always starts on the US site.
    pub const SIGN_IN_BASE: &str = "https://www.amazon.com";
    /// Device registration and OAuth token host.
    pub const API_BASE: &str = "https://api.amazon.com";
    /// Alexa host used for the market-domain lookup right after registration.
    pub const DEFAULT_ALEXA_SERVER: &str = "https://alexa.amazon.com";
    /// Identity domain header value for device registration.
    pub const IDENTITY_AUTH_DOMAIN: &str = "api.amazon.com";
}

/// Values that make the client look like the iOS Alexa app.
pub mod app {
    pub const USER_AGENT: &str = "AmazonWebView/Amazon Alexa/2.2.223830.0/iOS/11.4.1/iPhone";
    pub const APP_VERSION: &str = "2.2.223830.0";
    pub const APP_NAME: &str = "Amazon%20Alexa";
    pub const SDK_VERSION: &str = "6.10.0";
    pub const OS_NAME: &str = "iOS";
    pub const OS_VERSION: &str = "11.4.1";
    pub const HW_VERSION: &str = "iPhone";
    pub const PACKAGE_NAME: &str = "com.amazon.echo";
    pub const DEVICE_TYPE: &str = "A2IVLV5VM2W81";
    pub const REGISTERED_APP_NAME: &str = "openHAB Alexa";
    /// Suffix appended to the hex-encoded device id.
    pub const DEVICE_ID_SUFFIX: &str = "23413249564c5635564d32573831";
    /// Seed for the `map-md` bootstrap cookie, base64-encoded before use.
    pub const MAP_MD_JSON: &str = r#"{"device_user_dictionary":[],"device_registration_data":{"software_version":"1"},"app_identifier":{"app_version":"2.2.223830","bundle_id":"com.amazon.echo"}}"#;
}

/// Session timing and pipeline limits.
pub mod defaults {
    /// Lifetime of exchanged session cookies, in seconds (five days).
    pub const EXPIRY_SECONDS: i64 = 432_000;
    /// Divisor applied to the lifetime when computing the renew deadline.
    pub const RENEW_FACTOR: f64 = 0.8;
    /// Maximum redirect hops followed by the pipeline.
    pub const MAX_REDIRECTS: usize = 30;
    /// Delay before a bad-request retry, in milliseconds.
    pub const BAD_REQUEST_RETRY_DELAY_MS: u64 = 500;
    /// Retries used for behavior (sequence/routine) submissions.
    pub const SEQUENCE_RETRIES: u32 = 3;

    /// Milliseconds between a successful exchange and the renew deadline.
    pub fn renew_interval_millis() -> i64 {
        (EXPIRY_SECONDS as f64 * 1000.0 / RENEW_FACTOR) as i64
    }
}

/// Environment variable names.
pub mod env_vars {
    pub const SITE: &str = "ECHOCONTROL_SITE";
    pub const SESSION_FILE: &str = "ECHOCONTROL_SESSION_FILE";
    pub const USER_AGENT: &str = "ECHOCONTROL_USER_AGENT";
    pub const LOG_JSON: &str = "ECHOCONTROL_LOG_JSON";
}

/// Runtime configuration for one account.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EchoConfig {
    /// Amazon site, e.g. `amazon.de`. Prefixes are stripped on use.
    pub amazon_site: String,
    /// User agent sent unless a caller overrides it per request.
    pub user_agent: String,
    /// Where the serialized session is persisted.
    pub session_file: String,
    /// Rewrite `http://` redirect targets to `https://`.
    pub force_https_redirects: bool,
    /// Transport timeout; `None` keeps the transport default.
    pub request_timeout_secs: Option<u64>,
}

impl Default for EchoConfig {
    fn default() -> Self {
        Self {
            amazon_site: endpoints::DEFAULT_SITE.to_string(),
            user_agent: app::USER_AGENT.to_string(),
            session_file: "echocontrol.session".to_string(),
            force_https_redirects: true,
            request_timeout_secs: None,
        }
    }
}

impl EchoConfig {
    /// Overlay values from environment variables onto this config.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(site) = std::env::var(env_vars::SITE) {
            self.amazon_site = site;
        }
        if let Ok(path) = std::env::var(env_vars::SESSION_FILE) {
            self.session_file = path;
        }
        if let Ok(agent) = std::env::var(env_vars::USER_AGENT) {
            self.user_agent = agent;
        }
        self
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_renew_interval_is_eighty_percent_rule() {
        assert_eq!(defaults::renew_interval_millis(), 540_000_000);
    }

    #[test]
    fn test_config_defaults() {
        let config = EchoConfig::default();
        assert_eq!(config.amazon_site, "amazon.com");
        assert!(config.force_https_redirects);
        assert!(config.request_timeout().is_none());
    }

    #[test]
    fn test_config_partial_deserialize() {
        let config: EchoConfig =
            serde_json::from_str(r#"{"amazon_site":"amazon.de","request_timeout_secs":20}"#)
                .unwrap();
        assert_eq!(config.amazon_site, "amazon.de");
        assert_eq!(config.user_agent, app::USER_AGENT);
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(20)));
    }
}
