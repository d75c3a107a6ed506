//! Request pipeline tests over the scripted fake transport.
//!
//! Tests include:
//! - Redirect cap and cookie capture on intermediate hops
//! - Cookie scoping by host
//! - csrf cookie mirroring
//! - Bad-request retry scheduling
//! - Error classification

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use echocontrol_core::cookies::StoredCookie;
use echocontrol_core::http::fake::{
    redirect_response, status_response, text_response, with_header, FakeTransport,
};
use echocontrol_core::http::{HttpPipeline, Method, RequestOptions};
use echocontrol_core::{Error, TokioScheduler};

fn pipeline(fake: &Arc<FakeTransport>) -> HttpPipeline {
    HttpPipeline::new(fake.clone(), Arc::new(TokioScheduler::new()))
}

#[tokio::test]
async fn test_redirect_cap_after_thirty_hops() {
    let fake = Arc::new(FakeTransport::new());
    let hops = Arc::new(AtomicUsize::new(0));
    let counter = hops.clone();
    fake.respond_with(None, "https://alexa.amazon.de/loop", move |_| {
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Ok(redirect_response(&format!("/loop/{}", n)))
    });

    let err = pipeline(&fake)
        .execute(RequestOptions::get("https://alexa.amazon.de/loop"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::TooManyRedirects { limit: 30 }));
    // the initial request plus 30 followed hops
    assert_eq!(fake.requests().len(), 31);
}

#[tokio::test]
async fn test_cookies_from_redirect_hops_are_kept() {
    let fake = Arc::new(FakeTransport::new());
    fake.once(
        Method::GET,
        "https://www.amazon.com/ap/signin",
        with_header(
            redirect_response("https://www.amazon.com/ap/landing"),
            "Set-Cookie",
            "session-id=135-1; Path=/; Domain=.amazon.com",
        ),
    );
    fake.once(
        Method::GET,
        "https://www.amazon.com/ap/landing",
        text_response(200, "text/html", "<html></html>"),
    );

    let pipeline = pipeline(&fake);
    let body = pipeline
        .execute_text(RequestOptions::get("https://www.amazon.com/ap/signin"))
        .await
        .unwrap();

    assert_eq!(body, "<html></html>");
    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].header("Cookie"), Some("session-id=135-1"));
    assert_eq!(pipeline.cookies().len(), 1);
}

#[tokio::test]
async fn test_cookie_not_sent_to_unrelated_host() {
    let fake = Arc::new(FakeTransport::new());
    fake.once(
        Method::GET,
        "https://www.amazon.com/",
        with_header(status_response(200), "Set-Cookie", "ubid-main=1; Path=/"),
    );
    fake.always(Method::GET, "https://www.amazon.com/gp", status_response(200));
    fake.always(Method::GET, "https://www.example.org/", status_response(200));

    let pipeline = pipeline(&fake);
    pipeline
        .execute(RequestOptions::get("https://www.amazon.com/"))
        .await
        .unwrap();
    pipeline
        .execute(RequestOptions::get("https://www.amazon.com/gp/help"))
        .await
        .unwrap();
    pipeline
        .execute(RequestOptions::get("https://www.example.org/"))
        .await
        .unwrap();

    let requests = fake.requests();
    assert_eq!(requests[1].header("Cookie"), Some("ubid-main=1"));
    assert!(requests[2].header("Cookie").is_none());
}

#[tokio::test]
async fn test_csrf_cookie_mirrored_into_header() {
    let fake = Arc::new(FakeTransport::new());
    fake.always(Method::POST, "https://alexa.amazon.de/", status_response(200));

    let pipeline = pipeline(&fake);
    pipeline.cookies().add(
        None,
        StoredCookie::new("session-id", "1").with_domain(".amazon.de").with_path("/"),
    );
    pipeline.cookies().add(
        None,
        StoredCookie::new("csrf", "-12345").with_domain(".amazon.de").with_path("/"),
    );

    pipeline
        .execute(RequestOptions::post("https://alexa.amazon.de/api/np/command").json_body("{}"))
        .await
        .unwrap();

    let request = &fake.requests()[0];
    assert_eq!(request.header("csrf"), Some("-12345"));
    assert_eq!(request.header("Cookie"), Some("session-id=1;csrf=-12345"));
}

#[tokio::test(start_paused = true)]
async fn test_bad_request_returns_immediately_and_retries_later() {
    let fake = Arc::new(FakeTransport::new());
    fake.once(Method::POST, "https://alexa.amazon.de/api/behaviors/preview", status_response(400));
    fake.once(Method::POST, "https://alexa.amazon.de/api/behaviors/preview", status_response(200));

    let mut response = pipeline(&fake)
        .execute(
            RequestOptions::post("https://alexa.amazon.de/api/behaviors/preview")
                .json_body("{}")
                .bad_request_retries(3),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    assert_eq!(fake.requests().len(), 1);
    let retry = response.take_retry().expect("retry scheduled");
    assert!(!retry.is_finished());

    retry.join().await.unwrap();
    let requests = fake.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].body_text(), "{}");
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_retry_never_runs() {
    let fake = Arc::new(FakeTransport::new());
    fake.always(Method::GET, "https://alexa.amazon.de/", status_response(400));

    let response = pipeline(&fake)
        .execute(RequestOptions::get("https://alexa.amazon.de/x").bad_request_retries(1))
        .await
        .unwrap();
    let retry = response.pending_retry().expect("retry scheduled");
    retry.cancel();

    tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    assert_eq!(fake.requests().len(), 1);
}

#[tokio::test]
async fn test_bad_request_without_retries_is_error() {
    let fake = Arc::new(FakeTransport::new());
    fake.always(Method::GET, "https://alexa.amazon.de/", status_response(400));

    let err = pipeline(&fake)
        .execute(RequestOptions::get("https://alexa.amazon.de/api/x"))
        .await
        .unwrap_err();

    match err {
        Error::Http { status, message } => {
            assert_eq!(status, 400);
            assert_eq!(message, "GET url 'https://alexa.amazon.de/api/x' failed: Bad Request");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_transport_error_propagates() {
    let fake = Arc::new(FakeTransport::new());
    fake.fail_once(Method::GET, "https://alexa.amazon.de/", "connection reset by peer");

    let err = pipeline(&fake)
        .execute(RequestOptions::get("https://alexa.amazon.de/"))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Transport(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let fake = Arc::new(FakeTransport::new());
    let err = pipeline(&fake)
        .execute(RequestOptions::get("not a url"))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidUrl(_)));
    assert!(fake.requests().is_empty());
}
