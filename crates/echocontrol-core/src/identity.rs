//! Device fingerprint and site handling.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{app, endpoints};

/// The device fingerprint presented to the vendor.
///
/// Generated once per account and inherited across sessions; regenerating it
/// makes the vendor see a new device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    frc: String,
    serial: String,
    device_id: String,
}

impl Identity {
    /// Generate a fresh random identity.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();

        let mut frc = [0u8; 313];
        rng.fill_bytes(&mut frc);

        let mut serial = [0u8; 16];
        rng.fill_bytes(&mut serial);

        let mut device = [0u8; 16];
        rng.fill_bytes(&mut device);
        let device_hex = hex::encode_upper(device);

        Self {
            frc: BASE64.encode(frc),
            serial: hex::encode_upper(serial),
            device_id: format!(
                "{}{}",
                hex::encode(device_hex.as_bytes()),
                app::DEVICE_ID_SUFFIX
            ),
        }
    }

    /// Reuse a previous identity, or generate one when there is none.
    pub fn inherit(previous: Option<&Identity>) -> Self {
        match previous {
            Some(identity) => identity.clone(),
            None => Self::generate(),
        }
    }

    pub fn from_parts(
        frc: impl Into<String>,
        serial: impl Into<String>,
        device_id: impl Into<String>,
    ) -> Self {
        Self {
            frc: frc.into(),
            serial: serial.into(),
            device_id: device_id.into(),
        }
    }

    pub fn frc(&self) -> &str {
        &self.frc
    }

    pub fn serial(&self) -> &str {
        &self.serial
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Adopt the serial of an already registered device entry.
    pub(crate) fn adopt_serial(&mut self, serial: String) {
        self.serial = serial;
    }
}

/// The Amazon marketplace a session is bound to.
///
/// Only the bare host (`amazon.de`) is stored; the Alexa server URL is
/// always derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Site(String);

impl Site {
    /// Normalize a site, stripping `http://`, `https://`, `www.` and `alexa.`.
    pub fn new(input: Option<&str>) -> Self {
        let mut site = input.unwrap_or(endpoints::DEFAULT_SITE);
        for prefix in ["http://", "https://", "www.", "alexa."] {
            if starts_with_ignore_case(site, prefix) {
                site = &site[prefix.len()..];
            }
        }
        Self(site.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `https://alexa.<site>`
    pub fn server_base_url(&self) -> String {
        format!("https://alexa.{}", self.0)
    }

    /// `https://www.<site>`
    pub fn www_url(&self) -> String {
        format!("https://www.{}", self.0)
    }
}

impl Default for Site {
    fn default() -> Self {
        Self::new(None)
    }
}

impl std::fmt::Display for Site {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn starts_with_ignore_case(value: &str, prefix: &str) -> bool {
    value
        .get(..prefix.len())
        .map(|head| head.eq_ignore_ascii_case(prefix))
        .unwrap_or(false)
}
