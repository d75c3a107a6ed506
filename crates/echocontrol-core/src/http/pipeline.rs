//! Request pipeline: one logical call, many hops.
//!
//! Every request gets the fixed browser-like headers, the jar's cookies and
//! an encoded body. Every response hop feeds its `Set-Cookie` headers back
//! into the jar before anything else happens, which is why redirects are
//! followed here instead of by the HTTP client.

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Method;
use url::Url;

use super::response::RawResponse;
use super::transport::{HttpTransport, ReqwestTransport, TransportRequest};
use crate::config::{app, defaults, EchoConfig};
use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::scheduler::{ScheduledTask, Scheduler};

/// Parameters of one logical request.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub url: String,
    pub body: Option<String>,
    /// Send the body as JSON instead of form-urlencoded.
    pub json: bool,
    pub follow_redirects: bool,
    /// Caller headers. Empty values are not sent, but a `Cookie` or
    /// `User-Agent` key still suppresses the pipeline's own value.
    pub headers: Vec<(String, String)>,
    /// How many times a 400 answer is retried in the background.
    pub bad_request_retries: u32,
}

impl RequestOptions {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            body: None,
            json: false,
            follow_redirects: true,
            headers: Vec::new(),
            bad_request_retries: 0,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn put(url: impl Into<String>) -> Self {
        Self::new(Method::PUT, url)
    }

    pub fn delete(url: impl Into<String>) -> Self {
        Self::new(Method::DELETE, url)
    }

    pub fn json_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.json = true;
        self
    }

    pub fn form_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self.json = false;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    pub fn bad_request_retries(mut self, retries: u32) -> Self {
        self.bad_request_retries = retries;
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

/// Executes requests against one account's cookie jar.
///
/// Cloning is cheap and every clone shares the jar, transport and scheduler.
#[derive(Clone)]
pub struct HttpPipeline {
    transport: Arc<dyn HttpTransport>,
    cookies: Arc<CookieJar>,
    scheduler: Arc<dyn Scheduler>,
    user_agent: String,
    force_https_redirects: bool,
}

impl HttpPipeline {
    pub fn new(transport: Arc<dyn HttpTransport>, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            transport,
            cookies: Arc::new(CookieJar::new()),
            scheduler,
            user_agent: app::USER_AGENT.to_string(),
            force_https_redirects: true,
        }
    }

    /// Pipeline over a `reqwest` transport configured from `config`.
    pub fn from_config(config: &EchoConfig, scheduler: Arc<dyn Scheduler>) -> Result<Self> {
        let transport = ReqwestTransport::new(config.request_timeout())?;
        Ok(Self::new(Arc::new(transport), scheduler)
            .with_user_agent(config.user_agent.clone())
            .with_force_https_redirects(config.force_https_redirects))
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_force_https_redirects(mut self, force: bool) -> Self {
        self.force_https_redirects = force;
        self
    }

    pub fn with_cookie_jar(mut self, cookies: Arc<CookieJar>) -> Self {
        self.cookies = cookies;
        self
    }

    pub fn cookies(&self) -> &Arc<CookieJar> {
        &self.cookies
    }

    pub fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    /// Execute one logical request.
    ///
    /// Resolves with the final response on 200, on a 302 that is not
    /// followed, and on a 400 whose retry was scheduled. Any other status is
    /// [`Error::Http`]; more than 30 redirects is [`Error::TooManyRedirects`].
    pub fn execute(&self, options: RequestOptions) -> BoxFuture<'static, Result<RawResponse>> {
        let pipeline = self.clone();
        Box::pin(async move { pipeline.run(options).await })
    }

    /// Execute and return the decoded body.
    pub async fn execute_text(&self, options: RequestOptions) -> Result<String> {
        self.execute(options).await?.text()
    }

    async fn run(self, options: RequestOptions) -> Result<RawResponse> {
        let mut current = Url::parse(&options.url)?;
        let mut redirects = 0usize;

        loop {
            tracing::debug!(method = %options.method, url = %current, "Make request");
            let request = self.build_request(&options, current.clone());
            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::warn!(url = %options.url, error = %e, "Request failed with transport error");
                    return Err(e);
                }
            };

            self.cookies.store(
                &current,
                response
                    .headers
                    .iter()
                    .filter(|(k, _)| k.eq_ignore_ascii_case("set-cookie"))
                    .map(|(_, v)| v.as_str()),
            );
            let location = self.resolve_location(&current, &response.headers)?;

            let status = response.status;
            let mut raw = RawResponse {
                status,
                reason: response.reason,
                headers: response.headers,
                body: response.body,
                url: current.clone(),
                location,
                retry: None,
            };

            if status == 400 && options.bad_request_retries > 0 {
                let retry = RequestOptions {
                    bad_request_retries: options.bad_request_retries - 1,
                    ..options.clone()
                };
                raw.retry = Some(self.schedule_retry(retry));
                return Ok(raw);
            }
            if status == 200 {
                tracing::debug!(url = %options.url, "Call succeeded");
                return Ok(raw);
            }
            if status == 302 {
                if let Some(next) = raw.location.clone() {
                    tracing::debug!(location = %next, "Redirected");
                    redirects += 1;
                    if redirects > defaults::MAX_REDIRECTS {
                        return Err(Error::TooManyRedirects {
                            limit: defaults::MAX_REDIRECTS,
                        });
                    }
                    if !options.follow_redirects {
                        return Ok(raw);
                    }
                    current = next;
                    continue;
                }
            }
            return Err(raw.into_error(options.method.as_str(), &options.url));
        }
    }

    fn build_request(&self, options: &RequestOptions, url: Url) -> TransportRequest {
        let mut headers: Vec<(String, String)> = Vec::new();
        set_header(&mut headers, "Accept-Language", "en-US");
        if !options.has_header("User-Agent") {
            set_header(&mut headers, "User-Agent", &self.user_agent);
        }
        set_header(&mut headers, "Accept-Encoding", "gzip");
        set_header(&mut headers, "DNT", "1");
        set_header(&mut headers, "Upgrade-Insecure-Requests", "1");
        for (name, value) in &options.headers {
            if !value.is_empty() {
                set_header(&mut headers, name, value);
            }
        }

        if !options.has_header("Cookie") {
            let cookies = self.cookies.cookies_for(&url);
            if let Some(csrf) = cookies.iter().find(|c| c.name == "csrf") {
                set_header(&mut headers, "csrf", &csrf.value);
            }
            if !cookies.is_empty() {
                let header = cookies
                    .iter()
                    .map(|c| format!("{}={}", c.name, c.value))
                    .collect::<Vec<_>>()
                    .join(";");
                set_header(&mut headers, "Cookie", &header);
            }
        }

        let body = options.body.as_ref().map(|body| {
            let bytes = body.as_bytes().to_vec();
            let content_type = if options.json {
                "application/json; charset=UTF-8"
            } else {
                "application/x-www-form-urlencoded"
            };
            set_header(&mut headers, "Content-Type", content_type);
            set_header(&mut headers, "Content-Length", &bytes.len().to_string());
            if options.method == Method::POST {
                set_header(&mut headers, "Expect", "100-continue");
            }
            bytes
        });

        TransportRequest {
            method: options.method.clone(),
            url,
            headers,
            body,
        }
    }

    fn resolve_location(&self, base: &Url, headers: &[(String, String)]) -> Result<Option<Url>> {
        let Some(raw) = headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("location"))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
        else {
            return Ok(None);
        };

        let mut resolved = base.join(raw)?;
        if self.force_https_redirects
            && resolved.scheme() == "http"
            && resolved.set_scheme("https").is_ok()
        {
            tracing::debug!(location = %resolved, "Redirect corrected to https");
        }
        Ok(Some(resolved))
    }

    fn schedule_retry(&self, options: RequestOptions) -> ScheduledTask {
        let pipeline = self.clone();
        self.scheduler.schedule_once(
            Duration::from_millis(defaults::BAD_REQUEST_RETRY_DELAY_MS),
            Box::pin(async move {
                tracing::debug!(url = %options.url, "Retry call");
                match pipeline.execute(options).await {
                    Ok(response) => {
                        tracing::debug!(status = response.status(), "Retry finished");
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "Retry failed");
                    }
                }
            }),
        )
    }
}

/// Set a header, replacing any existing value with the same name.
fn set_header(headers: &mut Vec<(String, String)>, name: &str, value: &str) {
    match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
        Some(existing) => existing.1 = value.to_string(),
        None => headers.push((name.to_string(), value.to_string())),
    }
}
