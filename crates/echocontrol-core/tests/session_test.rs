//! AuthSession tests over the scripted fake transport.
//!
//! Tests include:
//! - Sign-in page seeding
//! - Registration, home-site switch and rollback on failure
//! - Token exchange request shape and the renew deadline
//! - Renewal, verification and logout
//! - Restore with the device-list customer fallback
//! - Status events

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde_json::json;

use echocontrol_core::codec::{self, SessionData};
use echocontrol_core::cookies::StoredCookie;
use echocontrol_core::http::fake::{
    json_response, redirect_response, status_response, text_response, FakeTransport,
};
use echocontrol_core::http::{HttpPipeline, Method};
use echocontrol_core::{
    AuthSession, Error, Identity, SessionEvent, SessionStatus, Site, TokioScheduler,
};

const REDIRECT_URL: &str = "https://www.amazon.com/ap/maplanding?openid.assoc_handle=amzn_dp_project_dee_ios&openid.oa2.access_token=Atna%7Ctoken&openid.oa2.token_type=bearer";

fn session(fake: &Arc<FakeTransport>, site: &str) -> AuthSession {
    let pipeline = HttpPipeline::new(fake.clone(), Arc::new(TokioScheduler::new()));
    AuthSession::new(pipeline, Site::new(Some(site)), None)
}

fn register_ok(fake: &FakeTransport) {
    fake.once(
        Method::POST,
        "https://api.amazon.com/auth/register",
        json_response(
            200,
            &json!({"response":{"success":{
                "tokens":{"bearer":{"access_token":"Atna|a","refresh_token":"Atnr|refresh","expires_in":"3600"}},
                "extensions":{"device_info":{"device_name":"Jane's openHAB Alexa"}}
            }}}),
        ),
    );
}

fn exchange_ok(fake: &FakeTransport, site: &str) {
    fake.always(
        Method::POST,
        &format!("https://www.{}/ap/exchangetoken", site),
        json_response(
            200,
            &json!({"response":{"tokens":{"cookies":{
                format!(".{}", site):[
                    {"Name":"at-main","Value":"Atza|x","Path":"/","Secure":"true"},
                    {"Name":"csrf","Value":"777","Path":"/","Secure":"false"}
                ]
            }}}}),
        ),
    );
}

fn bootstrap_ok(fake: &FakeTransport, site: &str, customer_id: Option<&str>) {
    let mut authentication = json!({"authenticated":true,"customerName":"Jane"});
    if let Some(id) = customer_id {
        authentication["customerId"] = json!(id);
    }
    fake.always(
        Method::GET,
        &format!("https://alexa.{}/api/bootstrap", site),
        json_response(200, &json!({ "authentication": authentication })),
    );
}

fn users_me(fake: &FakeTransport, market: &str) {
    fake.once(
        Method::GET,
        "https://alexa.amazon.com/api/users/me",
        json_response(200, &json!({ "marketPlaceDomainName": market })),
    );
}

async fn registered_session(fake: &Arc<FakeTransport>) -> AuthSession {
    register_ok(fake);
    exchange_ok(fake, "amazon.com");
    bootstrap_ok(fake, "amazon.com", Some("A1CUSTOMER"));
    users_me(fake, "https://www.amazon.com");

    let mut session = session(fake, "amazon.com");
    session.complete_registration(REDIRECT_URL).await.unwrap();
    session
}

#[tokio::test]
async fn test_start_login_seeds_cookies() {
    let fake = Arc::new(FakeTransport::new());
    fake.once(
        Method::GET,
        "https://www.amazon.com/ap/signin",
        text_response(200, "text/html; charset=UTF-8", "<form>sign in</form>"),
    );

    let mut session = session(&fake, "amazon.de");
    let html = session.start_login().await.unwrap();
    assert_eq!(html, "<form>sign in</form>");
    assert_eq!(session.status(), SessionStatus::Registering);

    let request = &fake.requests()[0];
    assert!(request
        .url
        .as_str()
        .contains(&format!("openid.oa2.client_id=device:{}", session.device_id())));
    assert_eq!(request.header("authority"), Some("www.amazon.com"));

    let cookie = request.header("Cookie").unwrap();
    let map_md = BASE64.encode(echocontrol_core::config::app::MAP_MD_JSON);
    assert_eq!(cookie, format!("map-md={};frc={}", map_md, session.frc()));
}

#[tokio::test]
async fn test_registration_stores_token_and_name() {
    let fake = Arc::new(FakeTransport::new());
    let session = registered_session(&fake).await;

    assert!(session.is_logged_in());
    assert!(session.has_refresh_token());
    assert_eq!(session.status(), SessionStatus::LoggedIn);
    assert_eq!(session.device_name(), "Jane's openHAB Alexa");
    assert_eq!(session.customer_id(), Some("A1CUSTOMER"));
    assert_eq!(session.customer_name(), Some("Jane"));

    let register = &fake.requests_to("https://api.amazon.com/auth/register")[0];
    assert_eq!(register.header("x-amzn-identity-auth-domain"), Some("api.amazon.com"));
    let body: serde_json::Value = serde_json::from_str(&register.body_text()).unwrap();
    assert_eq!(body["auth_data"]["access_token"], "Atna|token");
    assert_eq!(body["registration_data"]["device_serial"], session.serial());
    assert_eq!(body["user_context_map"]["frc"], session.frc());
}

#[tokio::test]
async fn test_exchange_request_shape() {
    let fake = Arc::new(FakeTransport::new());
    let _session = registered_session(&fake).await;

    let exchange = &fake.requests_to("https://www.amazon.com/ap/exchangetoken")[0];
    assert!(exchange.header("Cookie").is_none());
    assert_eq!(
        exchange.header("Content-Type"),
        Some("application/x-www-form-urlencoded")
    );

    let cookies = BASE64.encode(r#"{"cookies":{".amazon.com":[]}}"#);
    let expected = format!(
        "di.os.name=iOS&app_version=2.2.223830.0&domain=.amazon.com&source_token=Atnr%7Crefresh\
         &requested_token_type=auth_cookies&source_token_type=refresh_token\
         &di.hw.version=iPhone&di.sdk.version=6.10.0&cookies={}\
         &app_name=Amazon%20Alexa&di.os.version=11.4.1",
        cookies
    );
    assert_eq!(exchange.body_text(), expected);
}

#[tokio::test]
async fn test_renew_deadline_after_exchange() {
    let fake = Arc::new(FakeTransport::new());
    let session = registered_session(&fake).await;

    let exchanged = session.last_exchange().unwrap().timestamp_millis();
    assert_eq!(session.renew_deadline(), exchanged + 540_000_000);
}

#[tokio::test]
async fn test_exchanged_cookies_reach_alexa_server() {
    let fake = Arc::new(FakeTransport::new());
    let session = registered_session(&fake).await;

    let cookies = session.session_cookies("https://alexa.amazon.com");
    let names: Vec<&str> = cookies.iter().map(|c| c.name.as_str()).collect();
    assert!(names.contains(&"at-main"));
    assert!(names.contains(&"csrf"));
    assert!(cookies.iter().find(|c| c.name == "at-main").unwrap().secure);

    let bootstrap = fake.requests_to("https://alexa.amazon.com/api/bootstrap");
    assert_eq!(bootstrap.last().unwrap().header("csrf"), Some("777"));
}

#[tokio::test]
async fn test_registration_switches_to_home_site() {
    let fake = Arc::new(FakeTransport::new());
    register_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    exchange_ok(&fake, "amazon.de");
    bootstrap_ok(&fake, "amazon.com", Some("A1CUSTOMER"));
    bootstrap_ok(&fake, "amazon.de", Some("A1CUSTOMER"));
    users_me(&fake, "https://www.amazon.de");

    let mut session = session(&fake, "amazon.com");
    session.complete_registration(REDIRECT_URL).await.unwrap();

    assert_eq!(session.amazon_site(), "amazon.de");
    assert_eq!(session.alexa_server(), "https://alexa.amazon.de");
    assert_eq!(fake.requests_to("https://www.amazon.de/ap/exchangetoken").len(), 1);
}

#[tokio::test]
async fn test_registration_rollback_on_market_lookup_failure() {
    let fake = Arc::new(FakeTransport::new());
    register_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    bootstrap_ok(&fake, "amazon.com", Some("A1CUSTOMER"));
    fake.once(
        Method::GET,
        "https://alexa.amazon.com/api/users/me",
        status_response(500),
    );

    let mut session = session(&fake, "amazon.com");
    let err = session.complete_registration(REDIRECT_URL).await.unwrap_err();

    assert!(matches!(err, Error::Http { status: 500, .. }));
    assert!(!session.has_refresh_token());
    assert!(!session.is_logged_in());
    assert!(session.pipeline().cookies().is_empty());
    assert_eq!(session.status(), SessionStatus::LoggedOut);
    assert_eq!(session.serialize(), "");
}

#[tokio::test]
async fn test_registration_names_missing_field() {
    let fake = Arc::new(FakeTransport::new());
    fake.once(
        Method::POST,
        "https://api.amazon.com/auth/register",
        json_response(200, &json!({"response":{"success":{"tokens":{}}}})),
    );

    let mut session = session(&fake, "amazon.com");
    let err = session.complete_registration(REDIRECT_URL).await.unwrap_err();
    assert!(matches!(err, Error::MissingField("bearer")));
    assert_eq!(session.status(), SessionStatus::LoggedOut);
}

#[tokio::test]
async fn test_registration_without_access_token() {
    let fake = Arc::new(FakeTransport::new());
    let mut session = session(&fake, "amazon.com");

    let err = session
        .complete_registration("https://www.amazon.com/ap/maplanding?openid.mode=id_res")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MissingField("openid.oa2.access_token")));
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_exchange_fails_when_not_verified() {
    let fake = Arc::new(FakeTransport::new());
    register_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    fake.always(
        Method::GET,
        "https://alexa.amazon.com/api/bootstrap",
        json_response(200, &json!({"authentication":{"authenticated":false}})),
    );

    let mut session = session(&fake, "amazon.com");
    let err = session.complete_registration(REDIRECT_URL).await.unwrap_err();
    assert!(matches!(err, Error::VerifyFailed));
    assert!(!session.has_refresh_token());
}

#[tokio::test]
async fn test_verify_login_rejects_non_json_and_redirect() {
    let fake = Arc::new(FakeTransport::new());
    register_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    users_me(&fake, "https://www.amazon.com");
    let bootstrap = "https://alexa.amazon.com/api/bootstrap";
    let authenticated = json_response(
        200,
        &json!({"authentication":{"authenticated":true,"customerId":"A1"}}),
    );
    // one answer for the exchange, one for the final check
    fake.once(Method::GET, bootstrap, authenticated.clone());
    fake.once(Method::GET, bootstrap, authenticated);
    fake.once(
        Method::GET,
        bootstrap,
        text_response(200, "text/html", "<html>login</html>"),
    );
    fake.once(
        Method::GET,
        bootstrap,
        redirect_response("https://www.amazon.com/ap/signin"),
    );

    let mut session = session(&fake, "amazon.com");
    session.complete_registration(REDIRECT_URL).await.unwrap();

    assert!(!session.verify_login().await.unwrap());
    assert!(!session.verify_login().await.unwrap());
    // the redirect was not followed
    assert!(fake.requests_to("https://www.amazon.com/ap/signin").is_empty());
    assert!(session.has_refresh_token());
}

#[tokio::test]
async fn test_verify_without_token_makes_no_request() {
    let fake = Arc::new(FakeTransport::new());
    let mut session = session(&fake, "amazon.com");
    assert!(!session.verify_login().await.unwrap());
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_ensure_fresh_is_cheap_before_deadline() {
    let fake = Arc::new(FakeTransport::new());
    let mut session = registered_session(&fake).await;
    fake.clear_requests();

    assert!(!session.ensure_fresh().await.unwrap());
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_logout_is_idempotent() {
    let fake = Arc::new(FakeTransport::new());
    let mut session = registered_session(&fake).await;

    for _ in 0..2 {
        session.logout();
        assert!(session.pipeline().cookies().is_empty());
        assert!(!session.has_refresh_token());
        assert!(!session.is_logged_in());
        assert!(session.verify_time().is_none());
        assert_eq!(session.renew_deadline(), 0);
        assert_eq!(session.device_name(), "Unknown");
        assert_eq!(session.status(), SessionStatus::LoggedOut);
    }
}

#[tokio::test]
async fn test_status_events() {
    let fake = Arc::new(FakeTransport::new());
    register_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    bootstrap_ok(&fake, "amazon.com", Some("A1CUSTOMER"));
    users_me(&fake, "https://www.amazon.com");

    let mut session = session(&fake, "amazon.com");
    let mut events = session.subscribe();
    session.complete_registration(REDIRECT_URL).await.unwrap();
    session.logout();

    let mut seen = Vec::new();
    while let Some(event) = events.try_recv() {
        seen.push(event);
    }
    assert_eq!(
        seen,
        vec![
            SessionEvent::StatusChanged { status: SessionStatus::Registering },
            SessionEvent::StatusChanged { status: SessionStatus::LoggedIn },
            SessionEvent::StatusChanged { status: SessionStatus::LoggedOut },
        ]
    );
}

fn persisted(serial: &str, customer_id: Option<&str>) -> (String, DateTime<Utc>) {
    let login_time = DateTime::<Utc>::from_timestamp_millis(1_600_000_000_000).unwrap();
    let text = codec::serialize(&SessionData {
        identity: Identity::from_parts("RlJD", serial, "3132dead"),
        refresh_token: Some("Atnr|refresh".to_string()),
        site: Site::new(Some("amazon.com")),
        device_name: Some("Jane's openHAB Alexa".to_string()),
        customer_id: customer_id.map(String::from),
        login_time: Some(login_time),
        cookies: vec![StoredCookie::new("at-main", "old")
            .with_domain(".amazon.com")
            .with_path("/")],
    });
    (text, login_time)
}

fn renew_ok(fake: &FakeTransport) {
    fake.always(
        Method::POST,
        "https://api.amazon.com/auth/token",
        json_response(
            200,
            &json!({"access_token":"Atza|new","token_type":"bearer","expires_in":3600}),
        ),
    );
}

#[tokio::test]
async fn test_restore_adopts_this_device_serial() {
    let fake = Arc::new(FakeTransport::new());
    renew_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    bootstrap_ok(&fake, "amazon.com", None);
    fake.always(
        Method::GET,
        "https://alexa.amazon.com/api/devices-v2/device",
        json_response(
            200,
            &json!({"devices":[
                {"accountName":"Kitchen","serialNumber":"G090L","deviceOwnerCustomerId":"A1OTHER"},
                {"accountName":"This Device","serialNumber":"APPSERIAL","deviceOwnerCustomerId":"A1SELF"}
            ]}),
        ),
    );

    let (text, login_time) = persisted("OLDSERIAL", None);
    let mut session = session(&fake, "amazon.com");
    let mut events = session.subscribe();

    assert!(session.restore(&text, None).await.unwrap());
    assert_eq!(session.serial(), "APPSERIAL");
    assert_eq!(session.customer_id(), Some("A1SELF"));
    assert_eq!(session.login_time(), Some(login_time));
    assert_eq!(session.status(), SessionStatus::LoggedIn);
    assert_eq!(fake.requests_to("https://api.amazon.com/auth/token").len(), 1);

    let mut device_events = 0;
    while let Some(event) = events.try_recv() {
        if event == (SessionEvent::DeviceListUpdated { count: 2 }) {
            device_events += 1;
        }
    }
    assert_eq!(device_events, 1);
}

#[tokio::test]
async fn test_restore_keeps_persisted_customer_id() {
    let fake = Arc::new(FakeTransport::new());
    renew_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    bootstrap_ok(&fake, "amazon.com", Some("A1BOOT"));

    let (text, _) = persisted("SERIAL", Some("A1STORED"));
    let mut session = session(&fake, "amazon.com");

    assert!(session.restore(&text, None).await.unwrap());
    assert_eq!(session.customer_id(), Some("A1STORED"));
    assert!(fake.requests_to("https://alexa.amazon.com/api/devices-v2").is_empty());

    let again = session.serialize();
    let reread = codec::deserialize(&again, None).unwrap().unwrap();
    assert_eq!(reread.customer_id.as_deref(), Some("A1STORED"));
    assert_eq!(reread.refresh_token.as_deref(), Some("Atnr|refresh"));
}

#[tokio::test]
async fn test_restore_survives_failed_renewal() {
    let fake = Arc::new(FakeTransport::new());
    fake.always(
        Method::POST,
        "https://api.amazon.com/auth/token",
        status_response(503),
    );
    bootstrap_ok(&fake, "amazon.com", Some("A1BOOT"));

    let (text, _) = persisted("SERIAL", Some("A1STORED"));
    let mut session = session(&fake, "amazon.com");

    assert!(session.restore(&text, None).await.unwrap());
    assert_eq!(session.renew_deadline(), 0);
    assert_eq!(session.status(), SessionStatus::RenewalDue);

    let err = session.ensure_fresh().await.unwrap_err();
    assert!(err.is_transient());
    assert!(session.has_refresh_token());
    assert!(session.is_logged_in());
}

#[tokio::test]
async fn test_restore_unverified_logs_out() {
    let fake = Arc::new(FakeTransport::new());
    renew_ok(&fake);
    exchange_ok(&fake, "amazon.com");
    fake.always(
        Method::GET,
        "https://alexa.amazon.com/api/bootstrap",
        json_response(200, &json!({"authentication":{"authenticated":false}})),
    );
    fake.always(
        Method::GET,
        "https://alexa.amazon.com/api/devices-v2/device",
        json_response(200, &json!({"devices":[]})),
    );

    let (text, _) = persisted("SERIAL", None);
    let mut session = session(&fake, "amazon.com");

    assert!(!session.restore(&text, None).await.unwrap());
    assert!(!session.has_refresh_token());
    assert!(session.pipeline().cookies().is_empty());
}

#[tokio::test]
async fn test_restore_domain_override() {
    let fake = Arc::new(FakeTransport::new());
    renew_ok(&fake);
    exchange_ok(&fake, "amazon.co.uk");
    bootstrap_ok(&fake, "amazon.co.uk", Some("A1"));

    let (text, _) = persisted("SERIAL", Some("A1"));
    let mut session = session(&fake, "amazon.com");

    assert!(session
        .restore(&text, Some("https://alexa.amazon.co.uk"))
        .await
        .unwrap());
    assert_eq!(session.amazon_site(), "amazon.co.uk");
}

#[tokio::test]
async fn test_restore_rejects_unknown_version_without_network() {
    let fake = Arc::new(FakeTransport::new());
    let mut session = session(&fake, "amazon.com");

    assert!(!session.restore("", None).await.unwrap());
    assert!(!session.restore("8\nwhatever", None).await.unwrap());
    assert!(fake.requests().is_empty());
}

#[tokio::test]
async fn test_restore_malformed_is_error() {
    let fake = Arc::new(FakeTransport::new());
    let mut session = session(&fake, "amazon.com");

    let err = session.restore("7\nfrc\nserial", None).await.unwrap_err();
    assert!(matches!(err, Error::InvalidSession(_)));
    assert!(fake.requests().is_empty());
}
