//! Final response of a pipeline call.

use std::io::Read;

use flate2::read::GzDecoder;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;
use url::Url;

use crate::error::{Error, Result};
use crate::scheduler::ScheduledTask;

static CHARSET_PATTERN: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r#"(?i)\bcharset=\s*"?([^\s;"]*)"#).ok());

/// Response of the last hop of a pipeline call.
#[derive(Debug)]
pub struct RawResponse {
    pub(crate) status: u16,
    pub(crate) reason: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Vec<u8>,
    pub(crate) url: Url,
    pub(crate) location: Option<Url>,
    pub(crate) retry: Option<ScheduledTask>,
}

impl RawResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// URL of the hop that produced this response.
    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Resolved `Location`, already rewritten to https when configured.
    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    /// First header with `name`, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Every header with `name`, compared case-insensitively.
    pub fn header_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Raw body bytes as received.
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Decoded body: gunzipped when `Content-Encoding: gzip`, then decoded
    /// with the `Content-Type` charset (UTF-8 when absent or unknown).
    pub fn text(&self) -> Result<String> {
        if self.body.is_empty() {
            return Ok(String::new());
        }

        let gzipped = self
            .header("content-encoding")
            .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
            .unwrap_or(false);

        let bytes = if gzipped {
            let mut decoded = Vec::new();
            GzDecoder::new(self.body.as_slice()).read_to_end(&mut decoded)?;
            decoded
        } else {
            self.body.clone()
        };

        let encoding = self
            .content_type()
            .and_then(charset_of)
            .and_then(|label| encoding_rs::Encoding::for_label(label.as_bytes()))
            .unwrap_or(encoding_rs::UTF_8);
        let (text, _, _) = encoding.decode(&bytes);
        Ok(text.into_owned())
    }

    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_str(&self.text()?)?)
    }

    /// The scheduled bad-request retry, if this 400 response triggered one.
    pub fn pending_retry(&self) -> Option<&ScheduledTask> {
        self.retry.as_ref()
    }

    /// Take ownership of the scheduled retry to `join` or `cancel` it.
    pub fn take_retry(&mut self) -> Option<ScheduledTask> {
        self.retry.take()
    }

    /// Turn an unaccepted response into [`Error::Http`] naming the
    /// originally requested URL.
    pub(crate) fn into_error(self, method: &str, requested_url: &str) -> Error {
        Error::Http {
            status: self.status,
            message: format!("{} url '{}' failed: {}", method, requested_url, self.reason),
        }
    }
}

fn charset_of(content_type: &str) -> Option<String> {
    let pattern = CHARSET_PATTERN.as_ref()?;
    pattern
        .captures(content_type)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|label| !label.is_empty())
}
