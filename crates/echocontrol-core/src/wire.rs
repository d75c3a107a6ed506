//! JSON bodies of the registration, token and bootstrap endpoints.
//!
//! Every field is optional: the vendor omits fields freely, and the session
//! reports which link of a required chain was missing.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::config::app;

#[derive(Debug, Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub requested_extensions: [&'static str; 2],
    pub cookies: RegisterCookies<'a>,
    pub registration_data: RegistrationData<'a>,
    pub auth_data: AuthData<'a>,
    pub user_context_map: UserContextMap<'a>,
    pub requested_token_type: [&'static str; 3],
}

#[derive(Debug, Serialize)]
pub(crate) struct RegisterCookies<'a> {
    pub website_cookies: Vec<WebsiteCookie<'a>>,
    pub domain: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct WebsiteCookie<'a> {
    #[serde(rename = "Name")]
    pub name: &'a str,
    #[serde(rename = "Value")]
    pub value: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RegistrationData<'a> {
    pub domain: &'static str,
    pub app_version: &'static str,
    pub device_type: &'static str,
    pub device_name: String,
    pub os_version: &'static str,
    pub device_serial: &'a str,
    pub device_model: &'static str,
    pub app_name: &'static str,
    pub software_version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct AuthData<'a> {
    pub access_token: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct UserContextMap<'a> {
    pub frc: &'a str,
}

impl<'a> RegisterRequest<'a> {
    pub fn new(
        serial: &'a str,
        access_token: &'a str,
        frc: &'a str,
        website_cookies: Vec<WebsiteCookie<'a>>,
    ) -> Self {
        Self {
            requested_extensions: ["device_info", "customer_info"],
            cookies: RegisterCookies {
                website_cookies,
                domain: ".amazon.com",
            },
            registration_data: RegistrationData {
                domain: "Device",
                app_version: app::APP_VERSION,
                device_type: app::DEVICE_TYPE,
                device_name: format!(
                    "%FIRST_NAME%'s%DUPE_STRATEGY_1ST%{}",
                    app::REGISTERED_APP_NAME
                ),
                os_version: app::OS_VERSION,
                device_serial: serial,
                device_model: app::HW_VERSION,
                app_name: app::REGISTERED_APP_NAME,
                software_version: "1",
            },
            auth_data: AuthData { access_token },
            user_context_map: UserContextMap { frc },
            requested_token_type: ["bearer", "mac_dms", "website_cookies"],
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RegisterResponse {
    pub response: Option<RegisterResponseBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RegisterResponseBody {
    pub success: Option<RegisterSuccess>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RegisterSuccess {
    pub tokens: Option<RegisterTokens>,
    pub extensions: Option<RegisterExtensions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RegisterTokens {
    pub bearer: Option<Bearer>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Bearer {
    #[serde(alias = "refreshToken")]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RegisterExtensions {
    #[serde(alias = "deviceInfo")]
    pub device_info: Option<DeviceInfo>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct DeviceInfo {
    #[serde(alias = "deviceName")]
    pub device_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ExchangeTokenResponse {
    pub response: Option<ExchangeTokenBody>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ExchangeTokenBody {
    pub tokens: Option<ExchangeTokens>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ExchangeTokens {
    pub cookies: Option<HashMap<String, Vec<Option<ExchangedCookie>>>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ExchangedCookie {
    #[serde(alias = "Name")]
    pub name: Option<String>,
    #[serde(alias = "Value")]
    pub value: Option<String>,
    #[serde(alias = "Path")]
    pub path: Option<String>,
    #[serde(alias = "Secure", deserialize_with = "lenient_bool")]
    pub secure: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RenewTokenResponse {
    pub access_token: Option<String>,
    pub token_type: Option<String>,
    pub expires_in: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UsersMeResponse {
    #[serde(rename = "marketPlaceDomainName")]
    pub market_place_domain_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct BootstrapResult {
    pub authentication: Option<Authentication>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub(crate) struct Authentication {
    pub authenticated: bool,
    pub customer_name: Option<String>,
    pub customer_id: Option<String>,
}

/// Accepts `true`, `"true"` and `null`; the exchange endpoint sends strings.
fn lenient_bool<'de, D>(deserializer: D) -> std::result::Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::String(s)) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    })
}
