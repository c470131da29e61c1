//! End-to-end forwarding through the tap over plain HTTP.

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use http_tap::config::TapConfig;
use http_tap::net::TransportKind;
use http_tap::observability::Observation;
use http_tap::security::REDACTED;

mod common;
use common::header;

#[tokio::test]
async fn get_is_forwarded_and_observed() {
    let backend = common::start_echo_backend().await;
    let mut tap = common::start_tap_to(backend).await;

    let resp = common::client()
        .get(tap.url("/hello?name=tap"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "GET /hello?name=tap\n");

    let exchange = tap.next_exchange().await;
    assert_eq!(exchange.method, "GET");
    assert_eq!(exchange.path, "/hello");
    assert_eq!(exchange.query.as_deref(), Some("name=tap"));
    assert_eq!(exchange.version, "HTTP/1.1");
    assert_eq!(exchange.status, Some(200));
    assert_eq!(exchange.transport, TransportKind::Plain);
    assert!(!exchange.upgrade);
    assert!(exchange.error.is_none());
    assert!(exchange.request_body.is_none(), "bodies are off by default");
}

#[tokio::test]
async fn backend_status_is_relayed() {
    let backend = common::start_echo_backend().await;
    let mut tap = common::start_tap_to(backend).await;

    let resp = common::client()
        .delete(tap.url("/status/404"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let exchange = tap.next_exchange().await;
    assert_eq!(exchange.method, "DELETE");
    assert_eq!(exchange.status, Some(404));
}

#[tokio::test]
async fn sensitive_headers_are_redacted_in_observations_only() {
    let backend = common::start_echo_backend().await;
    let mut tap = common::start_tap_to(backend).await;

    let resp = common::client()
        .get(tap.url("/private"))
        .header("authorization", "Bearer s3cret")
        .header("x-trace", "abc")
        .send()
        .await
        .unwrap();

    // The wire is untouched in both directions.
    assert_eq!(resp.headers()["x-echo-authorization"], "Bearer s3cret");
    assert_eq!(resp.headers()["set-cookie"], "session=backend-secret");

    let exchange = tap.next_exchange().await;
    assert_eq!(header(&exchange.request_headers, "authorization"), Some(REDACTED));
    assert_eq!(header(&exchange.request_headers, "x-trace"), Some("abc"));
    assert_eq!(header(&exchange.response_headers, "set-cookie"), Some(REDACTED));
}

#[tokio::test]
async fn custom_redaction_list_replaces_defaults() {
    let backend = common::start_echo_backend().await;
    let mut config = TapConfig::default();
    config.upstream.target = backend.to_string();
    config.capture.redact_headers = vec!["X-Api-Key".to_string()];
    let mut tap = common::start_tap(config).await;

    common::client()
        .get(tap.url("/"))
        .header("x-api-key", "k-123")
        .header("authorization", "Basic Zm9v")
        .send()
        .await
        .unwrap();

    let exchange = tap.next_exchange().await;
    assert_eq!(header(&exchange.request_headers, "x-api-key"), Some(REDACTED));
    assert_eq!(header(&exchange.request_headers, "authorization"), Some("Basic Zm9v"));
}

#[tokio::test]
async fn bodies_are_captured_up_to_the_limit() {
    let backend = common::start_echo_backend().await;
    let mut config = TapConfig::default();
    config.upstream.target = backend.to_string();
    config.capture.include_bodies = true;
    config.capture.max_body_bytes = 8;
    let mut tap = common::start_tap(config).await;

    let resp = common::client()
        .post(tap.url("/upload"))
        .body("0123456789abcdef")
        .send()
        .await
        .unwrap();
    // The client still gets everything.
    assert_eq!(resp.text().await.unwrap(), "POST /upload\n0123456789abcdef");

    let exchange = tap.next_exchange().await;
    let request = exchange.request_body.expect("request body captured");
    assert_eq!(&request.data[..], b"01234567");
    assert_eq!(request.total_bytes, 16);
    assert!(request.truncated);
    assert!(request.complete);

    let response = exchange.response_body.expect("response body captured");
    assert_eq!(&response.data[..], b"POST /up");
    assert_eq!(response.total_bytes, 29);
    assert!(response.truncated);
}

#[tokio::test]
async fn small_bodies_are_not_marked_truncated() {
    let backend = common::start_echo_backend().await;
    let mut config = TapConfig::default();
    config.upstream.target = backend.to_string();
    config.capture.include_bodies = true;
    let mut tap = common::start_tap(config).await;

    common::client()
        .put(tap.url("/item"))
        .body("{\"a\":1}")
        .send()
        .await
        .unwrap()
        .bytes()
        .await
        .unwrap();

    let exchange = tap.next_exchange().await;
    let request = exchange.request_body.unwrap();
    assert_eq!(&request.data[..], b"{\"a\":1}");
    assert!(!request.truncated);
}

#[tokio::test]
async fn host_header_is_forwarded_verbatim_unless_overridden() {
    let backend = common::start_echo_backend().await;
    let tap = common::start_tap_to(backend).await;
    let resp = common::client().get(tap.url("/")).send().await.unwrap();
    assert_eq!(resp.headers()["x-echo-host"], tap.addr.to_string());

    let mut config = TapConfig::default();
    config.upstream.target = backend.to_string();
    config.upstream.host_header = Some("api.example.test".to_string());
    let tap = common::start_tap(config).await;
    let resp = common::client().get(tap.url("/")).send().await.unwrap();
    assert_eq!(resp.headers()["x-echo-host"], "api.example.test");
}

#[tokio::test]
async fn keep_alive_requests_share_a_session() {
    let backend = common::start_echo_backend().await;
    let mut tap = common::start_tap_to(backend).await;
    let client = common::client();

    for path in ["/one", "/two"] {
        client
            .get(tap.url(path))
            .send()
            .await
            .unwrap()
            .bytes()
            .await
            .unwrap();
    }

    let first = tap.next_exchange().await;
    let second = tap.next_exchange().await;
    assert_eq!(first.path, "/one");
    assert_eq!(second.path, "/two");
    assert_eq!(first.session, second.session);
}

#[tokio::test]
async fn unreachable_upstream_yields_bad_gateway_and_tap_keeps_serving() {
    let target = common::closed_port().await;
    let mut tap = common::start_tap_to(target).await;

    for _ in 0..2 {
        let resp = common::client().get(tap.url("/down")).send().await.unwrap();
        assert_eq!(resp.status(), 502);
        assert_eq!(resp.headers()["connection"], "close");

        let exchange = tap.next_exchange().await;
        assert_eq!(exchange.status, Some(502));
        assert!(exchange.error.is_some());
    }
}

#[tokio::test]
async fn unrequested_switching_protocols_is_rejected() {
    let backend = common::start_rogue_upgrade_backend().await;
    let mut tap = common::start_tap_to(backend).await;

    let resp = common::client().get(tap.url("/plain")).send().await.unwrap();
    assert_eq!(resp.status(), 502);

    let exchange = tap.next_exchange().await;
    assert!(!exchange.upgrade);
    assert!(exchange
        .error
        .unwrap()
        .contains("switched protocols without an upgrade request"));
}

#[tokio::test]
async fn malformed_request_is_reported_as_session_error() {
    let backend = common::start_echo_backend().await;
    let mut tap = common::start_tap_to(backend).await;

    let mut stream = TcpStream::connect(tap.addr).await.unwrap();
    stream.write_all(b"\x00\x01\x02 nonsense\r\n\r\n").await.unwrap();

    match tap.next().await {
        Observation::SessionError { stage, .. } => assert_eq!(stage, "http"),
        other => panic!("expected a session error, got {other:?}"),
    }

    // Later clients are unaffected.
    let resp = common::client().get(tap.url("/after")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn connection_closed_before_data_is_silent() {
    let backend = common::start_echo_backend().await;
    let mut tap = common::start_tap_to(backend).await;

    drop(TcpStream::connect(tap.addr).await.unwrap());
    assert!(tap.quiet_for(Duration::from_millis(300)).await);
}

#[tokio::test]
async fn concurrent_requests_are_all_counted() {
    let backend = common::start_echo_backend().await;
    let tap = common::start_tap_to(backend).await;
    let client = common::client();

    let requests = (0..20).map(|i| {
        let client = client.clone();
        let url = if i % 2 == 0 { tap.url("/even") } else { tap.url("/odd?i=1") };
        async move { client.post(url).send().await.unwrap().status() }
    });
    let statuses = futures_util::future::join_all(requests).await;
    assert!(statuses.iter().all(|s| *s == 200));

    let snapshot = tap.aggregator.snapshot();
    assert_eq!(snapshot.len(), 2);
    for (key, entry) in &snapshot {
        assert_eq!(key.method, "POST");
        assert!(key.path == "/even" || key.path == "/odd");
        assert_eq!(entry.count, 10);
    }

    tap.aggregator.clear();
    assert!(tap.aggregator.is_empty());
}

#[tokio::test]
async fn clear_while_two_clients_are_sending() {
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Arc;

    let backend = common::start_echo_backend().await;
    let tap = common::start_tap_to(backend).await;
    let completed = Arc::new(AtomicU64::new(0));
    let sending = Arc::new(AtomicBool::new(true));

    let loops: Vec<_> = (0..2)
        .map(|_| {
            let client = common::client();
            let url = tap.url("/race");
            let completed = Arc::clone(&completed);
            tokio::spawn(async move {
                for _ in 0..40 {
                    let resp = client.get(&url).send().await.unwrap();
                    assert_eq!(resp.status(), 200);
                    completed.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();

    let clearer = {
        let aggregator = tap.aggregator.clone();
        let completed = Arc::clone(&completed);
        let sending = Arc::clone(&sending);
        tokio::spawn(async move {
            let mut done_at_last_clear = 0;
            let mut clears = 0;
            while sending.load(Ordering::SeqCst) || clears == 0 {
                done_at_last_clear = completed.load(Ordering::SeqCst);
                aggregator.clear();
                clears += 1;
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
            done_at_last_clear
        })
    };

    for l in loops {
        l.await.unwrap();
    }
    sending.store(false, Ordering::SeqCst);
    let done_at_last_clear = clearer.await.unwrap();
    let from_loops_after_clear = completed.load(Ordering::SeqCst) - done_at_last_clear;

    const MORE: u64 = 5;
    let client = common::client();
    for _ in 0..MORE {
        assert_eq!(client.get(tap.url("/race")).send().await.unwrap().status(), 200);
    }

    let snapshot = tap.aggregator.snapshot();
    assert_eq!(snapshot.len(), 1);
    let (key, entry) = &snapshot[0];
    assert_eq!((key.method.as_str(), key.path.as_str()), ("GET", "/race"));
    assert!(entry.count >= MORE, "count {} below {MORE}", entry.count);
    assert!(
        entry.count <= MORE + from_loops_after_clear,
        "count {} exceeds {} sent since the last clear",
        entry.count,
        MORE + from_loops_after_clear
    );
}
