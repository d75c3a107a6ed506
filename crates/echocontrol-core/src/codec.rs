//! Versioned flat-text encoding of a logged-in session.
//!
//! Layout (one value per line):
//!
//! ```text
//! 7                      version tag
//! <frc>
//! <serial>
//! <device id>
//! <refresh token>
//! <amazon site>
//! <device name | null>
//! <customer id | null>   absent in version 5
//! <login time, epoch ms>
//! <cookie count>
//! per cookie, 11 presence-tagged values:
//!   name, value, comment, comment url, domain, max age, path, port list,
//!   version, secure, discard
//! ```
//!
//! A presence-tagged value is `0` when absent, or `1` followed by the value
//! on the next line. Readers accept versions 5, 6 and 7; only version 7
//! customer ids are trusted.

use chrono::{DateTime, Utc};

use crate::cookies::StoredCookie;
use crate::error::{Error, Result};
use crate::identity::{Identity, Site};

/// Version tag written by [`serialize`].
pub const CURRENT_VERSION: u32 = 7;

const NULL_LITERAL: &str = "null";

/// Everything needed to rebuild a session without logging in again.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionData {
    pub identity: Identity,
    pub refresh_token: Option<String>,
    pub site: Site,
    pub device_name: Option<String>,
    pub customer_id: Option<String>,
    pub login_time: Option<DateTime<Utc>>,
    pub cookies: Vec<StoredCookie>,
}

/// Encode a session. Returns an empty string when there is no refresh token
/// or no login time.
pub fn serialize(session: &SessionData) -> String {
    let (Some(refresh_token), Some(login_time)) = (&session.refresh_token, session.login_time)
    else {
        return String::new();
    };

    let mut out = String::new();
    push_line(&mut out, &CURRENT_VERSION.to_string());
    push_line(&mut out, session.identity.frc());
    push_line(&mut out, session.identity.serial());
    push_line(&mut out, session.identity.device_id());
    push_line(&mut out, refresh_token);
    push_line(&mut out, session.site.as_str());
    push_line(&mut out, session.device_name.as_deref().unwrap_or(NULL_LITERAL));
    push_line(&mut out, session.customer_id.as_deref().unwrap_or(NULL_LITERAL));
    push_line(&mut out, &login_time.timestamp_millis().to_string());
    push_line(&mut out, &session.cookies.len().to_string());

    for cookie in &session.cookies {
        write_value(&mut out, Some(&cookie.name));
        write_value(&mut out, Some(&cookie.value));
        write_value(&mut out, cookie.comment.as_deref());
        write_value(&mut out, cookie.comment_url.as_deref());
        write_value(&mut out, cookie.domain.as_deref());
        write_value(&mut out, Some(&cookie.max_age.to_string()));
        write_value(&mut out, cookie.path.as_deref());
        write_value(&mut out, cookie.port_list.as_deref());
        write_value(&mut out, Some(&cookie.version.to_string()));
        write_value(&mut out, Some(&cookie.secure.to_string()));
        write_value(&mut out, Some(&cookie.discard.to_string()));
    }
    out
}

/// Decode a session.
///
/// Returns `Ok(None)` for empty input or an unsupported version tag. Missing
/// lines and malformed numbers are errors: a half-read session must never be
/// mistaken for a valid one.
pub fn deserialize(text: &str, domain_override: Option<&str>) -> Result<Option<SessionData>> {
    if text.is_empty() {
        return Ok(None);
    }

    let mut reader = LineReader::new(text);
    let version = match reader.next_line("version")? {
        "5" => 5,
        "6" => 6,
        "7" => 7,
        other => {
            tracing::debug!(version = other, "Unsupported session serialization version");
            return Ok(None);
        }
    };

    let frc = reader.next_line("frc")?.to_string();
    let serial = reader.next_line("serial")?.to_string();
    let device_id = reader.next_line("device id")?.to_string();
    let refresh_token = reader.next_line("refresh token")?.to_string();

    let stored_site = reader.next_line("amazon site")?;
    let site = Site::new(Some(domain_override.unwrap_or(stored_site)));

    let device_name = non_null(reader.next_line("device name")?);

    let mut customer_id = None;
    if version > 5 {
        let stored = reader.next_line("customer id")?;
        // Version 6 wrote a wrong customer id.
        if version > 6 {
            customer_id = non_null(stored);
        }
    }

    let login_millis = parse_number::<i64>(reader.next_line("login time")?, "login time")?;
    let login_time = DateTime::<Utc>::from_timestamp_millis(login_millis)
        .ok_or_else(|| Error::InvalidSession(format!("login time out of range: {}", login_millis)))?;

    let count = parse_number::<usize>(reader.next_line("cookie count")?, "cookie count")?;
    let mut cookies = Vec::with_capacity(count);
    for _ in 0..count {
        cookies.push(read_cookie(&mut reader)?);
    }

    Ok(Some(SessionData {
        identity: Identity::from_parts(frc, serial, device_id),
        refresh_token: Some(refresh_token),
        site,
        device_name,
        customer_id,
        login_time: Some(login_time),
        cookies,
    }))
}

fn read_cookie(reader: &mut LineReader<'_>) -> Result<StoredCookie> {
    let name = reader.read_value("cookie name")?.unwrap_or_default();
    let value = reader.read_value("cookie value")?.unwrap_or_default();
    let comment = reader.read_value("cookie comment")?;
    let comment_url = reader.read_value("cookie comment url")?;
    let domain = reader.read_value("cookie domain")?;
    let max_age = parse_number::<i64>(&reader.require_value("cookie max age")?, "cookie max age")?;
    let path = reader.read_value("cookie path")?;
    let port_list = reader.read_value("cookie port list")?;
    let version = parse_number::<i32>(&reader.require_value("cookie version")?, "cookie version")?;
    let secure = parse_flag(reader.read_value("cookie secure")?);
    let discard = parse_flag(reader.read_value("cookie discard")?);

    Ok(StoredCookie {
        name,
        value,
        comment,
        comment_url,
        domain,
        max_age,
        path,
        port_list,
        version,
        secure,
        discard,
        host_only: false,
    })
}

fn push_line(out: &mut String, value: &str) {
    out.push_str(value);
    out.push('\n');
}

fn write_value(out: &mut String, value: Option<&str>) {
    match value {
        None => out.push('0'),
        Some(v) => {
            out.push_str("1\n");
            out.push_str(v);
        }
    }
    out.push('\n');
}

fn non_null(value: &str) -> Option<String> {
    if value == NULL_LITERAL {
        None
    } else {
        Some(value.to_string())
    }
}

fn parse_number<T: std::str::FromStr>(value: &str, field: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| Error::InvalidSession(format!("{} is not a number: '{}'", field, value)))
}

fn parse_flag(value: Option<String>) -> bool {
    value
        .map(|v| v.trim().eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

struct LineReader<'a> {
    lines: std::str::Lines<'a>,
}

impl<'a> LineReader<'a> {
    fn new(text: &'a str) -> Self {
        Self { lines: text.lines() }
    }

    fn next_line(&mut self, field: &str) -> Result<&'a str> {
        self.lines
            .next()
            .ok_or_else(|| Error::InvalidSession(format!("unexpected end of data reading {}", field)))
    }

    fn read_value(&mut self, field: &str) -> Result<Option<String>> {
        if self.next_line(field)? == "1" {
            Ok(Some(self.next_line(field)?.to_string()))
        } else {
            Ok(None)
        }
    }

    fn require_value(&mut self, field: &str) -> Result<String> {
        self.read_value(field)?
            .ok_or_else(|| Error::InvalidSession(format!("{} is absent", field)))
    }
}
