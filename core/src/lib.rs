//! Synchronous client core for a versioned JSON/HTTP resource API.
//!
//! # Overview
//! `Client` turns resource verbs (`index`, `get`, `post`, `put`, `delete`)
//! into `Request` values, authenticates them with a client-credentials bearer
//! token, executes them through a pluggable `Transport`, and optionally serves
//! GET requests from a `Cache` that honours the server's `Expires` header.
//!
//! # Design
//! - `Request` / `Response` are immutable values; `Response` enforces a status
//!   code in `100..=600`.
//! - `Transport` and `Cache` are traits so tests (and other engines) can be
//!   substituted. `UreqTransport` and `SqliteCache` are the concrete ones.
//! - Tokens are refreshed reactively on `401 invalid_grant`, at most once per
//!   request.
//! - All client operations fail with `ApiError`, which keeps the underlying
//!   cause and exposes its kind.

pub mod auth;
pub mod cache;
pub mod client;
pub mod config;
pub mod error;
pub mod http;
pub mod transport;
pub mod types;

pub use auth::AuthState;
pub use cache::{Cache, Clock, SqliteCache, Sweeper, SystemClock};
pub use client::Client;
pub use config::ClientConfig;
pub use error::{ApiError, AuthError, CacheError, ErrorKind, ProtocolError, TransportError, ValidationError};
pub use http::{Headers, Method, Request, Response};
pub use transport::{Transport, UreqTransport};
pub use types::{ErrorBody, Filters, TokenResponse};
