//! In-process stand-in for the resource API.
//!
//! Speaks the same wire protocol as the real service: a client-credentials
//! token endpoint, bearer-authenticated CRUD over arbitrary resources,
//! `{"error": "invalid_grant"}` for revoked tokens and an optional `Expires`
//! header on reads. Counters and switches on [`MockApi`] let tests observe
//! and steer it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::{net::TcpListener, sync::RwLock};
use uuid::Uuid;

/// Items of every resource, keyed by resource name then id.
pub type Db = Arc<RwLock<HashMap<String, BTreeMap<String, Map<String, Value>>>>>;

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub client_id: String,
    pub client_secret: String,
    pub grant_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
}

#[derive(Debug)]
struct Inner {
    version: String,
    client_id: String,
    client_secret: String,
    cache_ttl: Option<Duration>,
    token_failure: Mutex<Option<(StatusCode, String)>>,
    tokens: Mutex<HashSet<String>>,
    db: Db,
    token_requests: AtomicUsize,
    resource_requests: AtomicUsize,
    saw_expect: AtomicBool,
}

/// Shared handle to the mock's state. Clones observe the same server.
#[derive(Debug, Clone)]
pub struct MockApi {
    inner: Arc<Inner>,
}

impl MockApi {
    /// A mock serving `/v1` that accepts exactly these credentials.
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self::with_options(client_id, client_secret, "1", None)
    }

    /// `cache_ttl`: when set, reads carry `Expires: now + ttl`.
    pub fn with_options(client_id: &str, client_secret: &str, version: &str, cache_ttl: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                version: version.to_string(),
                client_id: client_id.to_string(),
                client_secret: client_secret.to_string(),
                cache_ttl,
                token_failure: Mutex::new(None),
                tokens: Mutex::new(HashSet::new()),
                db: Arc::new(RwLock::new(HashMap::new())),
                token_requests: AtomicUsize::new(0),
                resource_requests: AtomicUsize::new(0),
                saw_expect: AtomicBool::new(false),
            }),
        }
    }

    /// Make the token endpoint answer `status` with `description` until
    /// cleared with `None`.
    pub fn fail_token_requests(&self, failure: Option<(StatusCode, &str)>) {
        *lock(&self.inner.token_failure) = failure.map(|(status, d)| (status, d.to_string()));
    }

    /// Invalidate every issued token; the next use gets `invalid_grant`.
    pub fn revoke_tokens(&self) {
        lock(&self.inner.tokens).clear();
    }

    pub fn token_requests(&self) -> usize {
        self.inner.token_requests.load(Ordering::SeqCst)
    }

    pub fn resource_requests(&self) -> usize {
        self.inner.resource_requests.load(Ordering::SeqCst)
    }

    /// Whether any request arrived with an `Expect` header.
    pub fn saw_expect_header(&self) -> bool {
        self.inner.saw_expect.load(Ordering::SeqCst)
    }

    pub fn router(&self) -> Router {
        let v = &self.inner.version;
        Router::new()
            .route(&format!("/v{v}/token"), post(issue_token))
            .route(&format!("/v{v}/_garbage"), get(garbage))
            .route(&format!("/v{v}/_binary"), get(binary))
            .route(&format!("/v{v}/{{resource}}"), get(index).post(create))
            .route(
                &format!("/v{v}/{{resource}}/{{id}}"),
                get(show).put(update).delete(remove),
            )
            .with_state(self.clone())
    }

    fn expires_header(&self) -> Option<HeaderValue> {
        let ttl = chrono::Duration::from_std(self.inner.cache_ttl?).ok()?;
        let expires = (chrono::Utc::now() + ttl).format("%a, %d %b %Y %H:%M:%S GMT").to_string();
        HeaderValue::from_str(&expires).ok()
    }
}

/// A mock with the default credentials `client` / `secret`.
pub fn app() -> Router {
    MockApi::new("client", "secret").router()
}

pub async fn run(listener: TcpListener, api: MockApi) -> Result<(), std::io::Error> {
    axum::serve(listener, api.router()).await
}

/// Serve `api` on a random localhost port from a background thread with its
/// own runtime. Returns the bound address.
pub fn spawn(api: MockApi) -> std::io::Result<SocketAddr> {
    let std_listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = std_listener.local_addr()?;
    std_listener.set_nonblocking(true)?;

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        rt.block_on(async {
            let listener = TcpListener::from_std(std_listener)?;
            run(listener, api).await
        })
    });

    Ok(addr)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn error(status: StatusCode, error: &str, description: &str) -> Response {
    (
        status,
        Json(json!({"error": error, "error_description": description})),
    )
        .into_response()
}

async fn issue_token(State(api): State<MockApi>, headers: HeaderMap, Form(input): Form<TokenRequest>) -> Response {
    api.inner.token_requests.fetch_add(1, Ordering::SeqCst);
    note_expect(&api, &headers);

    if let Some((status, description)) = lock(&api.inner.token_failure).clone() {
        return error(status, "server_error", &description);
    }
    if input.grant_type != "client_credentials" {
        return error(StatusCode::BAD_REQUEST, "unsupported_grant_type", "grant_type must be client_credentials");
    }
    if input.client_id != api.inner.client_id || input.client_secret != api.inner.client_secret {
        return error(StatusCode::UNAUTHORIZED, "invalid_client", "The client credentials are invalid");
    }

    let token = Uuid::new_v4().simple().to_string();
    lock(&api.inner.tokens).insert(token.clone());
    Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in: 3600,
    })
    .into_response()
}

fn note_expect(api: &MockApi, headers: &HeaderMap) {
    if headers.contains_key(header::EXPECT) {
        api.inner.saw_expect.store(true, Ordering::SeqCst);
    }
}

/// Count the request and check its bearer token.
fn authorize(api: &MockApi, headers: &HeaderMap) -> Result<(), Response> {
    api.inner.resource_requests.fetch_add(1, Ordering::SeqCst);
    note_expect(api, headers);

    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    match token {
        None => Err(error(StatusCode::UNAUTHORIZED, "invalid_request", "Missing bearer token")),
        Some(token) if lock(&api.inner.tokens).contains(token) => Ok(()),
        Some(_) => Err(error(StatusCode::UNAUTHORIZED, "invalid_grant", "The access token provided is invalid")),
    }
}

fn cacheable(api: &MockApi, body: Json<Value>) -> Response {
    let mut response = body.into_response();
    if let Some(expires) = api.expires_header() {
        response.headers_mut().insert(header::EXPIRES, expires);
    }
    response
}

fn matches(item: &Map<String, Value>, filters: &HashMap<String, String>) -> bool {
    filters.iter().all(|(key, expected)| match item.get(key) {
        None => true,
        Some(Value::String(s)) => s == expected,
        Some(other) => other.to_string() == *expected,
    })
}

async fn index(
    State(api): State<MockApi>,
    Path(resource): Path<String>,
    Query(filters): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    let db = api.inner.db.read().await;
    let result: Vec<Value> = db
        .get(&resource)
        .map(|items| {
            items
                .values()
                .filter(|item| matches(item, &filters))
                .cloned()
                .map(Value::Object)
                .collect()
        })
        .unwrap_or_default();
    let total = result.len();
    cacheable(&api, Json(json!({"result": result, "total": total})))
}

async fn create(
    State(api): State<MockApi>,
    Path(resource): Path<String>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    let Value::Object(mut item) = input else {
        return error(StatusCode::BAD_REQUEST, "invalid_request", "Body must be a JSON object");
    };
    let id = match item.get("id").and_then(Value::as_str) {
        Some(id) => id.to_string(),
        None => Uuid::new_v4().to_string(),
    };
    item.insert("id".to_string(), Value::String(id.clone()));
    api.inner
        .db
        .write()
        .await
        .entry(resource)
        .or_default()
        .insert(id, item.clone());
    (StatusCode::CREATED, Json(Value::Object(item))).into_response()
}

async fn show(
    State(api): State<MockApi>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    let db = api.inner.db.read().await;
    match db.get(&resource).and_then(|items| items.get(&id)) {
        Some(item) => cacheable(&api, Json(Value::Object(item.clone()))),
        None => error(StatusCode::NOT_FOUND, "not_found", "The requested resource was not found"),
    }
}

async fn update(
    State(api): State<MockApi>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(input): Json<Value>,
) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    let Value::Object(fields) = input else {
        return error(StatusCode::BAD_REQUEST, "invalid_request", "Body must be a JSON object");
    };
    let mut db = api.inner.db.write().await;
    let Some(item) = db.get_mut(&resource).and_then(|items| items.get_mut(&id)) else {
        return error(StatusCode::NOT_FOUND, "not_found", "The requested resource was not found");
    };
    for (key, value) in fields {
        if key != "id" {
            item.insert(key, value);
        }
    }
    StatusCode::NO_CONTENT.into_response()
}

async fn remove(
    State(api): State<MockApi>,
    Path((resource, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    let mut db = api.inner.db.write().await;
    match db.get_mut(&resource).and_then(|items| items.remove(&id)) {
        Some(_) => StatusCode::NO_CONTENT.into_response(),
        None => error(StatusCode::NOT_FOUND, "not_found", "The requested resource was not found"),
    }
}

/// A 200 whose body is not JSON.
/// A 200 whose body is not even UTF-8.
async fn binary(State(api): State<MockApi>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        vec![0xff_u8, 0xfe, b'{', b'}'],
    )
        .into_response()
}

async fn garbage(State(api): State<MockApi>, headers: HeaderMap) -> Response {
    if let Err(rejection) = authorize(&api, &headers) {
        return rejection;
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html")],
        "<html>maintenance</html>",
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_serializes_to_json() {
        let token = TokenResponse {
            access_token: "abc".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
        };
        let json = serde_json::to_value(&token).unwrap();
        assert_eq!(json["access_token"], "abc");
        assert_eq!(json["token_type"], "bearer");
    }

    #[test]
    fn filters_ignore_unknown_fields() {
        let item: Map<String, Value> = serde_json::from_value(json!({"classId": "42", "year": 2004})).unwrap();
        let mut filters = HashMap::new();
        filters.insert("classId".to_string(), "42".to_string());
        filters.insert("view".to_string(), "full".to_string());
        assert!(matches(&item, &filters));

        filters.insert("year".to_string(), "2004".to_string());
        assert!(matches(&item, &filters));

        filters.insert("classId".to_string(), "7".to_string());
        assert!(!matches(&item, &filters));
    }

    #[test]
    fn expires_header_only_with_ttl() {
        assert!(MockApi::new("a", "b").expires_header().is_none());
        let api = MockApi::with_options("a", "b", "1", Some(Duration::from_secs(60)));
        let value = api.expires_header().unwrap();
        assert!(value.to_str().unwrap().ends_with(" GMT"));
    }

    #[test]
    fn revoked_tokens_are_rejected() {
        let api = MockApi::new("a", "b");
        lock(&api.inner.tokens).insert("t".to_string());
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer t"));
        assert!(authorize(&api, &headers).is_ok());

        api.revoke_tokens();
        assert!(authorize(&api, &headers).is_err());
        assert_eq!(api.resource_requests(), 2);
    }
}
