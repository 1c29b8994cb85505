//! Client tests against the live mock server.
//!
//! # Design
//! Each test starts its own mock server on a random port and drives
//! `resapi_core::Client` over real HTTP through `UreqTransport`, so request
//! building, token handling, caching and response parsing are exercised
//! end-to-end.

use std::error::Error;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use mock_server::MockApi;
use resapi_core::{
    ApiError, AuthError, AuthState, Client, ClientConfig, Clock, ErrorKind, Filters, Headers, Method, Request,
    SqliteCache, UreqTransport,
};
use serde_json::json;

fn start(api: &MockApi) -> Client {
    let addr = mock_server::spawn(api.clone()).unwrap();
    let config = ClientConfig::new(format!("http://{addr}"), "1", "client", "secret").unwrap();
    Client::new(config, UreqTransport::new(Duration::from_secs(5))).unwrap()
}

struct ManualClock(Mutex<DateTime<Utc>>);

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

#[test]
fn crud_lifecycle() {
    let api = MockApi::new("client", "secret");
    let client = start(&api);

    // create
    let created = client
        .post("cycles", &json!({"id": "c1", "classId": "42", "make": "Honda"}))
        .unwrap();
    assert_eq!(created.http_code(), 201);
    assert_eq!(created.body()["id"], "c1");
    assert!(matches!(client.auth_state(), AuthState::Authenticated { .. }));

    // index with a matching and a non-matching filter
    let hits = client.index("cycles", &Filters::new().with("classId", "42")).unwrap();
    assert_eq!(hits.http_code(), 200);
    assert_eq!(hits.body()["total"], 1);
    assert_eq!(hits.body()["result"][0]["make"], "Honda");

    let misses = client.index("cycles", &Filters::new().with("classId", "7")).unwrap();
    assert_eq!(misses.body()["total"], 0);

    // update
    let updated = client.put("cycles", "c1", &json!({"make": "Yamaha"})).unwrap();
    assert_eq!(updated.http_code(), 204);
    assert_eq!(updated.body(), &json!({}));

    // get
    let fetched = client.get("cycles", "c1").unwrap();
    assert_eq!(fetched.http_code(), 200);
    assert_eq!(fetched.body()["make"], "Yamaha");
    assert_eq!(fetched.body()["classId"], "42");

    // delete
    let deleted = client.delete("cycles", "c1").unwrap();
    assert_eq!(deleted.http_code(), 204);

    // get after delete is data, not an error
    let gone = client.get("cycles", "c1").unwrap();
    assert_eq!(gone.http_code(), 404);
    assert_eq!(gone.body()["error"], "not_found");

    assert_eq!(api.token_requests(), 1);
    assert_eq!(api.resource_requests(), 7);
}

#[test]
fn filter_values_are_url_encoded() {
    let api = MockApi::new("client", "secret");
    let client = start(&api);

    client
        .post("media", &json!({"id": "m1", "title": "a b&c=d"}))
        .unwrap();

    let found = client.index("media", &Filters::new().with("title", "a b&c=d")).unwrap();
    assert_eq!(found.body()["total"], 1);
}

#[test]
fn reads_are_served_from_cache_until_expiry() {
    let api = MockApi::with_options("client", "secret", "1", Some(Duration::from_secs(60)));
    let clock = Arc::new(ManualClock(Mutex::new(Utc::now())));
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap().with_clock(clock.clone()));
    let client = start(&api).with_cache(cache.clone());
    let filters = Filters::new().with("classId", "42");

    let first = client.index("cycles", &filters).unwrap();
    let second = client.index("cycles", &filters).unwrap();
    assert_eq!(first, second);
    assert_eq!(api.resource_requests(), 1);
    assert_eq!(cache.len().unwrap(), 1);

    *clock.0.lock().unwrap() += chrono::Duration::seconds(120);
    client.index("cycles", &filters).unwrap();
    assert_eq!(api.resource_requests(), 2);
}

#[test]
fn reads_without_expires_are_not_cached() {
    let api = MockApi::new("client", "secret");
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let client = start(&api).with_cache(cache.clone());

    client.index("cycles", &Filters::new()).unwrap();
    client.index("cycles", &Filters::new()).unwrap();

    assert_eq!(api.resource_requests(), 2);
    assert!(cache.is_empty().unwrap());
}

#[test]
fn writes_bypass_the_cache() {
    let api = MockApi::with_options("client", "secret", "1", Some(Duration::from_secs(60)));
    let cache = Arc::new(SqliteCache::open_in_memory().unwrap());
    let client = start(&api).with_cache(cache.clone());

    client.post("cycles", &json!({"id": "c1"})).unwrap();
    client.put("cycles", "c1", &json!({"make": "Honda"})).unwrap();
    client.delete("cycles", "c1").unwrap();

    assert!(cache.is_empty().unwrap());
    assert_eq!(api.resource_requests(), 3);
}

#[test]
fn revoked_token_is_refreshed_once() {
    let api = MockApi::new("client", "secret");
    let client = start(&api);

    client.index("cycles", &Filters::new()).unwrap();
    assert_eq!(api.token_requests(), 1);

    api.revoke_tokens();
    let response = client.index("cycles", &Filters::new()).unwrap();

    assert_eq!(response.http_code(), 200);
    assert_eq!(api.token_requests(), 2);
    // first attempt with the stale token, then the retry
    assert_eq!(api.resource_requests(), 3);
}

#[test]
fn token_endpoint_failure_is_an_auth_error() {
    let api = MockApi::new("client", "secret");
    api.fail_token_requests(Some((StatusCode::INTERNAL_SERVER_ERROR, "server down")));
    let client = start(&api);

    let err = client.get("cycles", "c1").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert_eq!(err.source().map(|cause| cause.to_string()).as_deref(), Some("server down"));
    assert!(matches!(err, ApiError::Auth(AuthError::Rejected { status: 500, .. })));
    assert_eq!(client.auth_state(), AuthState::Unauthenticated);
    assert_eq!(api.resource_requests(), 0);
}

#[test]
fn wrong_credentials_are_rejected() {
    let api = MockApi::new("client", "other-secret");
    let client = start(&api);

    let err = client.index("cycles", &Filters::new()).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    match err {
        ApiError::Auth(cause) => assert_eq!(cause.to_string(), "The client credentials are invalid"),
        other => panic!("expected an auth error, got {other:?}"),
    }
}

#[test]
fn non_json_body_is_a_protocol_error() {
    let api = MockApi::new("client", "secret");
    let client = start(&api);

    let request = Request::get(format!("{}/_garbage", client.base_url()));
    let err = client.send(request).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn non_utf8_body_is_a_protocol_error() {
    let api = MockApi::new("client", "secret");
    let client = start(&api);

    let request = Request::get(format!("{}/_binary", client.base_url()));
    let err = client.send(request).unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert!(matches!(err, ApiError::Protocol(_)));
}

#[test]
fn expect_header_is_never_forwarded() {
    let api = MockApi::new("client", "secret");
    let client = start(&api);

    let request = Request::new(
        format!("{}/cycles", client.base_url()),
        Method::Get,
        None,
        Headers::new().with("Expect", "100-continue"),
    );
    let response = client.send(request).unwrap();

    assert_eq!(response.http_code(), 200);
    assert!(!api.saw_expect_header());
}

#[test]
fn unreachable_host_is_a_transport_error() {
    let config = ClientConfig::new("http://127.0.0.1:9", "1", "client", "secret").unwrap();
    let client = Client::new(config, UreqTransport::new(Duration::from_secs(2))).unwrap();

    let err = client.index("cycles", &Filters::new()).unwrap_err();

    // the token exchange is the first request to fail
    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(matches!(err, ApiError::Auth(AuthError::Transport(_))));
}

#[test]
fn shared_client_refreshes_once_under_contention() {
    let api = MockApi::new("client", "secret");
    let client = Arc::new(start(&api));
    client.access_token().unwrap();
    api.revoke_tokens();

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            thread::spawn(move || client.get("cycles", &format!("c{i}")).unwrap().http_code())
        })
        .collect();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), 404);
    }
    assert_eq!(api.token_requests(), 2);
}
