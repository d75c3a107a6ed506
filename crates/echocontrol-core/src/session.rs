//! Authenticated session for one Amazon account.
//!
//! `AuthSession` owns the device identity, the refresh token and the cookie
//! jar (through its pipeline), and drives registration, token exchange,
//! renewal, verification, restore and logout.
//!
//! Mutating operations take `&mut self`: at most one of them can be in flight
//! per session. Share a session across tasks by wrapping it in a
//! `tokio::sync::Mutex`.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use url::Url;

use crate::codec::{self, SessionData};
use crate::config::{app, defaults, endpoints, EchoConfig};
use crate::cookies::StoredCookie;
use crate::device::{self, Device};
use crate::error::{Error, Result};
use crate::event::{SessionEvent, SessionEventReceiver, SessionEvents, SessionStatus};
use crate::http::{HttpPipeline, RequestOptions};
use crate::identity::{Identity, Site};
use crate::scheduler::Scheduler;
use crate::wire::{
    BootstrapResult, ExchangeTokenResponse, RegisterRequest, RegisterResponse, RenewTokenResponse,
    UsersMeResponse, WebsiteCookie,
};

const UNKNOWN: &str = "Unknown";

/// Query parameters of the sign-in page, after `client_id=device:<id>` is inserted.
const SIGN_IN_QUERY_HEAD: &str = "openid.return_to=https://www.amazon.com/ap/maplanding&openid.assoc_handle=amzn_dp_project_dee_ios&openid.identity=http://specs.openid.net/auth/2.0/identifier_select&pageId=amzn_dp_project_dee_ios&accountStatusPolicy=P1&openid.claimed_id=http://specs.openid.net/auth/2.0/identifier_select&openid.mode=checkid_setup&openid.ns.oa2=http://www.amazon.com/ap/ext/oauth/2&openid.oa2.client_id=device:";
const SIGN_IN_QUERY_TAIL: &str = "&openid.ns.pape=http://specs.openid.net/extensions/pape/1.0&openid.oa2.response_type=token&openid.ns=http://specs.openid.net/auth/2.0&openid.pape.max_auth_age=0&openid.oa2.scope=device_auth_access";

/// Authenticated session state machine.
pub struct AuthSession {
    pipeline: HttpPipeline,
    identity: Identity,
    site: Site,
    refresh_token: Option<String>,
    login_time: Option<DateTime<Utc>>,
    verify_time: Option<DateTime<Utc>>,
    last_exchange: Option<DateTime<Utc>>,
    /// Epoch milliseconds; 0 means renewal is due.
    renew_deadline: i64,
    device_name: Option<String>,
    customer_id: Option<String>,
    customer_name: Option<String>,
    status: SessionStatus,
    events: SessionEvents,
}

impl AuthSession {
    /// Create a logged-out session. `previous` keeps the device identity of
    /// an earlier session so the vendor keeps seeing the same device.
    pub fn new(pipeline: HttpPipeline, site: Site, previous: Option<&Identity>) -> Self {
        Self {
            pipeline,
            identity: Identity::inherit(previous),
            site,
            refresh_token: None,
            login_time: None,
            verify_time: None,
            last_exchange: None,
            renew_deadline: 0,
            device_name: None,
            customer_id: None,
            customer_name: None,
            status: SessionStatus::LoggedOut,
            events: SessionEvents::new(),
        }
    }

    /// Create a session over a `reqwest` transport.
    pub fn from_config(
        config: &EchoConfig,
        scheduler: Arc<dyn Scheduler>,
        previous: Option<&Identity>,
    ) -> Result<Self> {
        let pipeline = HttpPipeline::from_config(config, scheduler)?;
        Ok(Self::new(
            pipeline,
            Site::new(Some(&config.amazon_site)),
            previous,
        ))
    }

    // ---- accessors ----

    pub fn pipeline(&self) -> &HttpPipeline {
        &self.pipeline
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn frc(&self) -> &str {
        self.identity.frc()
    }

    pub fn serial(&self) -> &str {
        self.identity.serial()
    }

    pub fn device_id(&self) -> &str {
        self.identity.device_id()
    }

    pub fn amazon_site(&self) -> &str {
        self.site.as_str()
    }

    /// `https://alexa.<site>`
    pub fn alexa_server(&self) -> String {
        self.site.server_base_url()
    }

    /// Registered device name, `"Unknown"` before registration.
    pub fn device_name(&self) -> &str {
        self.device_name.as_deref().unwrap_or(UNKNOWN)
    }

    pub fn customer_id(&self) -> Option<&str> {
        self.customer_id.as_deref()
    }

    pub fn customer_name(&self) -> Option<&str> {
        self.customer_name.as_deref()
    }

    pub fn login_time(&self) -> Option<DateTime<Utc>> {
        self.login_time
    }

    pub fn verify_time(&self) -> Option<DateTime<Utc>> {
        self.verify_time
    }

    /// Time of the last successful token exchange.
    pub fn last_exchange(&self) -> Option<DateTime<Utc>> {
        self.last_exchange
    }

    /// Epoch milliseconds after which [`ensure_fresh`](Self::ensure_fresh) renews.
    pub fn renew_deadline(&self) -> i64 {
        self.renew_deadline
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token.is_some()
    }

    pub fn is_logged_in(&self) -> bool {
        self.login_time.is_some()
    }

    pub fn status(&self) -> SessionStatus {
        match self.status {
            SessionStatus::LoggedIn if Utc::now().timestamp_millis() >= self.renew_deadline => {
                SessionStatus::RenewalDue
            }
            status => status,
        }
    }

    /// Cookies the jar would send to `server`.
    pub fn session_cookies(&self, server: &str) -> Vec<StoredCookie> {
        match Url::parse(server) {
            Ok(url) => self.pipeline.cookies().cookies_for(&url),
            Err(_) => Vec::new(),
        }
    }

    pub fn subscribe(&self) -> SessionEventReceiver {
        self.events.subscribe()
    }

    fn set_status(&mut self, status: SessionStatus) {
        if self.status != status {
            tracing::info!(category = "session", from = %self.status, to = %status, "Session status changed");
            self.status = status;
            self.events.publish(SessionEvent::StatusChanged { status });
        }
    }

    // ---- login flow ----

    /// Reset the session and fetch the vendor sign-in page.
    ///
    /// The returned HTML is completed interactively elsewhere; the resulting
    /// redirect URL goes to [`complete_registration`](Self::complete_registration).
    pub async fn start_login(&mut self) -> Result<String> {
        self.logout();
        self.set_status(SessionStatus::Registering);
        tracing::debug!(category = "session", server = %self.alexa_server(), "Start login");

        let sign_in = Url::parse(endpoints::SIGN_IN_BASE)?;
        let cookies = self.pipeline.cookies();
        cookies.add(
            Some(&sign_in),
            StoredCookie::new("map-md", BASE64.encode(app::MAP_MD_JSON.as_bytes())),
        );
        cookies.add(Some(&sign_in), StoredCookie::new("frc", self.identity.frc()));

        let url = format!(
            "{}/ap/signin?{}{}{}",
            endpoints::SIGN_IN_BASE,
            SIGN_IN_QUERY_HEAD,
            self.identity.device_id(),
            SIGN_IN_QUERY_TAIL
        );
        let result = self
            .pipeline
            .execute_text(RequestOptions::get(url).header("authority", "www.amazon.com"))
            .await;
        if result.is_err() {
            self.set_status(SessionStatus::LoggedOut);
        }
        result
    }

    /// Register this client as an app device using the OAuth redirect URL
    /// captured after sign-in. Returns the registered device name.
    ///
    /// Any failure logs the session out before the error is returned.
    pub async fn complete_registration(&mut self, redirect_url: &str) -> Result<String> {
        self.set_status(SessionStatus::Registering);
        match self.register(redirect_url).await {
            Ok(device_name) => {
                tracing::info!(category = "session", site = %self.site, "Registration complete");
                self.device_name = Some(device_name.clone());
                self.set_status(SessionStatus::LoggedIn);
                Ok(device_name)
            }
            Err(e) => {
                tracing::warn!(category = "session", error = %e, "Registration failed, logging out");
                self.logout();
                Err(e)
            }
        }
    }

    async fn register(&mut self, redirect_url: &str) -> Result<String> {
        let access_token = query_parameter(redirect_url, "openid.oa2.access_token")?
            .ok_or(Error::MissingField("openid.oa2.access_token"))?;

        let website_cookies = self.session_cookies(endpoints::SIGN_IN_BASE);
        let request = RegisterRequest::new(
            self.identity.serial(),
            &access_token,
            self.identity.frc(),
            website_cookies
                .iter()
                .map(|c| WebsiteCookie {
                    name: &c.name,
                    value: &c.value,
                })
                .collect(),
        );
        let body = serde_json::to_string(&request)?;

        let response_text = self
            .pipeline
            .execute_text(
                RequestOptions::post(format!("{}/auth/register", endpoints::API_BASE))
                    .json_body(body)
                    .header("x-amzn-identity-auth-domain", endpoints::IDENTITY_AUTH_DOMAIN),
            )
            .await?;
        let registered: RegisterResponse = serde_json::from_str(&response_text)?;

        let success = registered
            .response
            .ok_or(Error::MissingField("response"))?
            .success
            .ok_or(Error::MissingField("success"))?;
        let refresh_token = success
            .tokens
            .as_ref()
            .ok_or(Error::MissingField("tokens"))?
            .bearer
            .as_ref()
            .ok_or(Error::MissingField("bearer"))?
            .refresh_token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(Error::MissingField("refreshToken"))?;
        self.refresh_token = Some(refresh_token);

        self.exchange_token().await?;

        let me: UsersMeResponse = self
            .pipeline
            .execute(RequestOptions::get(format!(
                "{}/api/users/me?platform=ios&version={}",
                endpoints::DEFAULT_ALEXA_SERVER,
                app::APP_VERSION
            )))
            .await?
            .json()?;
        let market = me
            .market_place_domain_name
            .ok_or(Error::MissingField("marketPlaceDomainName"))?;
        let host = Url::parse(&market)?
            .host_str()
            .map(|h| h.to_string())
            .ok_or_else(|| Error::InvalidUrl(format!("no host in market domain '{}'", market)))?;

        let market_site = Site::new(Some(&host));
        if market_site != self.site {
            tracing::info!(category = "session", from = %self.site, to = %market_site, "Switching to account home site");
            self.site = market_site;
            self.exchange_token().await?;
        }
        self.verify_login().await?;

        Ok(success
            .extensions
            .and_then(|e| e.device_info)
            .and_then(|d| d.device_name)
            .unwrap_or_else(|| UNKNOWN.to_string()))
    }

    // ---- tokens ----

    /// Trade the refresh token for session cookies on the current site and
    /// verify the result. Moves the renew deadline on success.
    pub async fn exchange_token(&mut self) -> Result<()> {
        self.renew_deadline = 0;
        let refresh_token = self.refresh_token.clone().ok_or(Error::NotLoggedIn)?;

        let site = self.site.as_str().to_string();
        let cookies_json = format!(r#"{{"cookies":{{".{}":[]}}}}"#, site);
        let form = format!(
            "di.os.name={os}&app_version={version}&domain=.{site}&source_token={token}\
             &requested_token_type=auth_cookies&source_token_type=refresh_token\
             &di.hw.version={hw}&di.sdk.version={sdk}&cookies={cookies}\
             &app_name={app_name}&di.os.version={os_version}",
            os = app::OS_NAME,
            version = app::APP_VERSION,
            site = site,
            token = urlencoding::encode(&refresh_token),
            hw = app::HW_VERSION,
            sdk = app::SDK_VERSION,
            cookies = BASE64.encode(cookies_json.as_bytes()),
            app_name = app::APP_NAME,
            os_version = app::OS_VERSION,
        );

        let text = self
            .pipeline
            .execute_text(
                RequestOptions::post(format!("{}/ap/exchangetoken", self.site.www_url()))
                    .form_body(form)
                    .header("Cookie", ""),
            )
            .await?;
        let exchanged: ExchangeTokenResponse = serde_json::from_str(&text)?;

        let cookie_map = exchanged
            .response
            .and_then(|r| r.tokens)
            .and_then(|t| t.cookies)
            .unwrap_or_default();
        let mut stored = 0usize;
        for (domain, cookies) in cookie_map {
            for cookie in cookies.into_iter().flatten() {
                let mut entry = StoredCookie::new(
                    cookie.name.unwrap_or_default(),
                    cookie.value.unwrap_or_default(),
                )
                .with_domain(domain.clone());
                entry.path = cookie.path;
                if let Some(secure) = cookie.secure {
                    entry.secure = secure;
                }
                self.pipeline.cookies().add(None, entry);
                stored += 1;
            }
        }
        tracing::debug!(category = "session", site = %self.site, cookies = stored, "Token exchanged");

        if !self.verify_login().await? {
            return Err(Error::VerifyFailed);
        }

        let now = Utc::now();
        self.last_exchange = Some(now);
        self.renew_deadline = now.timestamp_millis() + defaults::renew_interval_millis();
        Ok(())
    }

    /// Renew when the deadline has passed. Returns whether a renewal ran.
    ///
    /// A failed renewal leaves the refresh token in place so a later call can
    /// try again.
    pub async fn ensure_fresh(&mut self) -> Result<bool> {
        if Utc::now().timestamp_millis() < self.renew_deadline {
            return Ok(false);
        }
        let refresh_token = self.refresh_token.clone().ok_or(Error::NotLoggedIn)?;
        if self.status == SessionStatus::LoggedIn {
            self.set_status(SessionStatus::RenewalDue);
        }
        tracing::info!(category = "session", site = %self.site, "Renewing session");

        match self.renew(&refresh_token).await {
            Ok(()) => {
                if self.is_logged_in() {
                    self.set_status(SessionStatus::LoggedIn);
                }
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(category = "session", error = %e, "Session renewal failed");
                Err(e)
            }
        }
    }

    async fn renew(&mut self, refresh_token: &str) -> Result<()> {
        let form = format!(
            "app_name={app_name}&app_version={version}&di.sdk.version={sdk}&source_token={token}\
             &package_name={package}&di.hw.version={hw}&platform={os}\
             &requested_token_type=access_token&source_token_type=refresh_token\
             &di.os.name={os}&di.os.version={os_version}&current_version={sdk}",
            app_name = app::APP_NAME,
            version = app::APP_VERSION,
            sdk = app::SDK_VERSION,
            token = urlencoding::encode(refresh_token),
            package = app::PACKAGE_NAME,
            hw = app::HW_VERSION,
            os = app::OS_NAME,
            os_version = app::OS_VERSION,
        );
        let text = self
            .pipeline
            .execute_text(
                RequestOptions::post(format!("{}/auth/token", endpoints::API_BASE)).form_body(form),
            )
            .await?;
        let _: RenewTokenResponse = serde_json::from_str(&text)?;
        self.exchange_token().await
    }

    /// Ask the bootstrap endpoint whether the cookies still authenticate.
    ///
    /// A well-formed "not authenticated" answer, a non-JSON answer and a
    /// redirect all yield `Ok(false)`.
    pub async fn verify_login(&mut self) -> Result<bool> {
        if self.refresh_token.is_none() {
            return Ok(false);
        }

        let response = self
            .pipeline
            .execute(
                RequestOptions::get(format!("{}/api/bootstrap", self.alexa_server()))
                    .follow_redirects(false),
            )
            .await?;
        let is_json = response
            .content_type()
            .map(|ct| ct.trim().to_ascii_lowercase().starts_with("application/json"))
            .unwrap_or(false);
        if response.status() != 200 || !is_json {
            return Ok(false);
        }

        let result: BootstrapResult = match response.json() {
            Ok(result) => result,
            Err(e) => {
                tracing::info!(category = "session", error = %e, "No valid json received from bootstrap");
                return Ok(false);
            }
        };
        let Some(auth) = result.authentication.filter(|a| a.authenticated) else {
            return Ok(false);
        };

        self.customer_name = auth.customer_name;
        if self.customer_id.is_none() {
            self.customer_id = auth.customer_id;
        }
        let now = Utc::now();
        self.verify_time = Some(now);
        if self.login_time.is_none() {
            self.login_time = Some(now);
        }
        Ok(true)
    }

    // ---- persistence ----

    /// Encode the session for persistence; empty when not logged in.
    pub fn serialize(&self) -> String {
        codec::serialize(&SessionData {
            identity: self.identity.clone(),
            refresh_token: self.refresh_token.clone(),
            site: self.site.clone(),
            device_name: self.device_name.clone(),
            customer_id: self.customer_id.clone(),
            login_time: self.login_time,
            cookies: self.pipeline.cookies().all(),
        })
    }

    /// Restore a persisted session and check it against the vendor.
    ///
    /// Returns `Ok(false)` for empty or unsupported data and when
    /// verification does not succeed; in the latter case the session ends
    /// logged out. Malformed data is an error and leaves the session as it was.
    pub async fn restore(&mut self, text: &str, domain_override: Option<&str>) -> Result<bool> {
        let Some(data) = codec::deserialize(text, domain_override)? else {
            return Ok(false);
        };
        let stored_login_time = data.login_time;

        self.identity = data.identity;
        self.site = data.site;
        self.refresh_token = data.refresh_token;
        self.device_name = data.device_name;
        self.customer_id = data.customer_id;
        self.customer_name = None;
        self.login_time = None;
        self.verify_time = None;
        self.last_exchange = None;
        self.renew_deadline = 0;
        self.pipeline.cookies().replace_all(data.cookies);
        tracing::debug!(category = "session", site = %self.site, "Session data restored");

        if let Err(e) = self.ensure_fresh().await {
            tracing::debug!(category = "session", error = %e, "Renewal during restore failed");
        }
        if self.customer_id.is_none() {
            if let Err(e) = self.backfill_customer_id().await {
                tracing::debug!(category = "session", error = %e, "Getting account customer id failed");
            }
        }

        let verified = match self.verify_login().await {
            Ok(verified) => verified,
            Err(e) => {
                tracing::warn!(category = "session", error = %e, "Verifying restored session failed");
                false
            }
        };
        if !verified {
            self.logout();
            return Ok(false);
        }

        self.login_time = stored_login_time.or(self.login_time);
        self.set_status(SessionStatus::LoggedIn);
        Ok(true)
    }

    async fn backfill_customer_id(&mut self) -> Result<()> {
        let devices = self.device_list().await?;
        if let Some((customer_id, adopted_serial)) =
            device::customer_from_devices(&devices, self.identity.serial())
        {
            if let Some(serial) = adopted_serial {
                tracing::info!(category = "session", "Adopting serial of the registered app device");
                self.identity.adopt_serial(serial);
            }
            self.customer_id = Some(customer_id);
        }
        Ok(())
    }

    /// Fetch the account's device list.
    pub async fn device_list(&self) -> Result<Vec<Device>> {
        let json = device::fetch_device_list_json(&self.pipeline, &self.alexa_server()).await?;
        let devices = device::parse_device_list(&json)?;
        self.events.publish(SessionEvent::DeviceListUpdated {
            count: devices.len(),
        });
        Ok(devices)
    }

    /// Forget credentials and cookies. Idempotent.
    pub fn logout(&mut self) {
        self.pipeline.cookies().clear();
        self.refresh_token = None;
        self.login_time = None;
        self.verify_time = None;
        self.last_exchange = None;
        self.renew_deadline = 0;
        self.device_name = None;
        self.set_status(SessionStatus::LoggedOut);
    }
}

/// Value of `name` in the query of `url`, split on `&`/`=` and percent-decoded.
fn query_parameter(url: &str, name: &str) -> Result<Option<String>> {
    let parsed = Url::parse(url)?;
    let Some(query) = parsed.query() else {
        return Ok(None);
    };
    for pair in query.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        if form_decode(key) == name {
            return Ok(Some(form_decode(value)));
        }
    }
    Ok(None)
}

fn form_decode(value: &str) -> String {
    let spaced = value.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|v| v.into_owned())
        .unwrap_or(spaced)
}
