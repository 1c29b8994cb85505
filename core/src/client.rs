//! Authenticated, optionally cached client for the resource API.
//!
//! # Design
//! Each verb is split into a pure `build_*` method that validates arguments
//! and produces a `Request`, and [`Client::send`], which does the I/O:
//!
//! 1. GET only: look the URL up in the cache and return a hit as-is, without
//!    touching the transport or the token.
//! 2. Attach `Authorization: Bearer {token}`, fetching a token on first use.
//! 3. Execute. A `401 invalid_grant` refreshes the token and re-sends the
//!    original request once; see [`crate::auth::next_step`].
//! 4. GET only: hand the final response to the cache, which keeps it only if
//!    it declares `Expires`.
//!
//! Every failure comes back as an [`ApiError`].

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, debug_span, info, warn};

use crate::auth::{next_step, Attempt, AuthState, Authenticator, Next};
use crate::cache::Cache;
use crate::config::ClientConfig;
use crate::error::{ApiError, CacheError, ValidationError};
use crate::http::{Headers, Method, Request, Response};
use crate::transport::{Transport, UreqTransport};
use crate::types::Filters;

/// Client for one API host and version, bound to one set of credentials.
///
/// `Client` is `Sync`; share it behind an `Arc` to issue requests from
/// several threads with a single token.
pub struct Client<T: Transport = UreqTransport> {
    base_url: String,
    transport: T,
    cache: Option<Arc<dyn Cache>>,
    auth: Authenticator,
}

impl Client<UreqTransport> {
    /// A client using the network transport with its default timeout.
    pub fn from_config(config: ClientConfig) -> Result<Self, ValidationError> {
        Self::new(config, UreqTransport::default())
    }
}

impl<T: Transport> Client<T> {
    pub fn new(config: ClientConfig, transport: T) -> Result<Self, ValidationError> {
        config.validate()?;
        Ok(Self {
            base_url: config.base_url(),
            auth: Authenticator::new(&config),
            transport,
            cache: None,
        })
    }

    /// Serve and store GET responses through `cache`.
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn auth_state(&self) -> AuthState {
        self.auth.state()
    }

    /// The current bearer token, exchanging credentials if there is none yet.
    pub fn access_token(&self) -> Result<String, ApiError> {
        Ok(self.auth.access_token(&self.transport)?)
    }

    /// Unconditionally exchange credentials for a new token.
    pub fn refresh_access_token(&self) -> Result<String, ApiError> {
        Ok(self.auth.refresh(&self.transport, None)?)
    }

    /// Search `resource` with `filters`.
    pub fn index(&self, resource: &str, filters: &Filters) -> Result<Response, ApiError> {
        let request = self.build_index(resource, filters)?;
        self.send(request)
    }

    /// Fetch one item of `resource`.
    pub fn get(&self, resource: &str, id: &str) -> Result<Response, ApiError> {
        let request = self.build_get(resource, id)?;
        self.send(request)
    }

    /// Create a new item of `resource` from `data`.
    pub fn post<D: Serialize + ?Sized>(&self, resource: &str, data: &D) -> Result<Response, ApiError> {
        let request = self.build_post(resource, data)?;
        self.send(request)
    }

    /// Replace item `id` of `resource` with `data`.
    pub fn put<D: Serialize + ?Sized>(&self, resource: &str, id: &str, data: &D) -> Result<Response, ApiError> {
        let request = self.build_put(resource, id, data)?;
        self.send(request)
    }

    /// Delete item `id` of `resource`.
    pub fn delete(&self, resource: &str, id: &str) -> Result<Response, ApiError> {
        let request = self.build_delete(resource, id, None::<&()>)?;
        self.send(request)
    }

    /// Delete item `id` of `resource`, sending `data` as the request body.
    pub fn delete_with_body<D: Serialize + ?Sized>(
        &self,
        resource: &str,
        id: &str,
        data: &D,
    ) -> Result<Response, ApiError> {
        let request = self.build_delete(resource, id, Some(data))?;
        self.send(request)
    }

    pub fn build_index(&self, resource: &str, filters: &Filters) -> Result<Request, ValidationError> {
        let mut url = self.collection_url(resource)?;
        if !filters.is_empty() {
            url.push('?');
            url.push_str(&filters.to_query_string());
        }
        Ok(Request::get(url))
    }

    pub fn build_get(&self, resource: &str, id: &str) -> Result<Request, ValidationError> {
        Ok(Request::get(self.item_url(resource, id)?))
    }

    pub fn build_post<D: Serialize + ?Sized>(&self, resource: &str, data: &D) -> Result<Request, ValidationError> {
        let url = self.collection_url(resource)?;
        Ok(json_request(url, Method::Post, Some(encode(data)?)))
    }

    pub fn build_put<D: Serialize + ?Sized>(
        &self,
        resource: &str,
        id: &str,
        data: &D,
    ) -> Result<Request, ValidationError> {
        let url = self.item_url(resource, id)?;
        Ok(json_request(url, Method::Put, Some(encode(data)?)))
    }

    pub fn build_delete<D: Serialize + ?Sized>(
        &self,
        resource: &str,
        id: &str,
        data: Option<&D>,
    ) -> Result<Request, ValidationError> {
        let url = self.item_url(resource, id)?;
        let body = data.map(encode).transpose()?;
        Ok(json_request(url, Method::Delete, body))
    }

    /// Execute `request` with caching, authentication and the one-shot
    /// refresh policy.
    pub fn send(&self, request: Request) -> Result<Response, ApiError> {
        let span = debug_span!("api_request", method = %request.method(), url = request.url());
        let _enter = span.enter();

        let cache = match request.method() {
            Method::Get => self.cache.as_deref(),
            _ => None,
        };

        if let Some(cache) = cache {
            if let Some(hit) = cache.get(&request)? {
                debug!(http_code = hit.http_code(), "served from cache");
                return Ok(hit);
            }
        }

        let response = self.dispatch(&request)?;

        if let Some(cache) = cache {
            match cache.set(&request, &response) {
                Ok(()) => {}
                Err(CacheError::InvalidExpires(value)) => {
                    warn!(expires = %value, "not caching response with unparseable Expires header");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(response)
    }

    fn dispatch(&self, request: &Request) -> Result<Response, ApiError> {
        let mut token = self.auth.access_token(&self.transport)?;
        let mut attempt = Attempt::First;
        loop {
            let authorized = request.with_header("Authorization", format!("Bearer {token}"));
            let response = self.transport.execute(&authorized)?;
            debug!(http_code = response.http_code(), ?attempt, "received response");

            match next_step(attempt, &response) {
                Next::Return => return Ok(response),
                Next::RefreshAndRetry => {
                    info!("access token rejected with invalid_grant");
                    token = self.auth.refresh(&self.transport, Some(&token))?;
                    attempt = Attempt::Retried;
                }
            }
        }
    }

    fn collection_url(&self, resource: &str) -> Result<String, ValidationError> {
        require("resource", resource)?;
        Ok(format!("{}/{}", self.base_url, encode_segment(resource)))
    }

    fn item_url(&self, resource: &str, id: &str) -> Result<String, ValidationError> {
        require("id", id)?;
        Ok(format!("{}/{}", self.collection_url(resource)?, encode_segment(id)))
    }
}

impl<T: Transport> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("base_url", &self.base_url)
            .field("cached", &self.cache.is_some())
            .finish_non_exhaustive()
    }
}

fn require(name: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty(name));
    }
    Ok(())
}

/// Form-style percent encoding for one path segment (`/` is encoded too).
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes()).collect()
}

fn encode<D: Serialize + ?Sized>(data: &D) -> Result<String, ValidationError> {
    serde_json::to_string(data).map_err(|e| ValidationError::Body(e.to_string()))
}

fn json_request(url: String, method: Method, body: Option<String>) -> Request {
    Request::new(
        url,
        method,
        body,
        Headers::new().with("Content-Type", "application/json"),
    )
}
