//! Response caching keyed by request URL.
//!
//! # Design
//! The key is the URL alone, so only GET requests are cacheable: every
//! implementation must refuse other methods instead of widening eligibility.
//! Whether and for how long a response is kept is decided by its `Expires`
//! header; the cache never invents a TTL.

mod sqlite;

pub use sqlite::{SqliteCache, Sweeper};

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::CacheError;
use crate::http::{Method, Request, Response};

/// Storage for GET responses with a declared expiry.
pub trait Cache: Send + Sync {
    /// The cached response for `request.url()`, or `None` on a miss or once
    /// the entry has expired.
    fn get(&self, request: &Request) -> Result<Option<Response>, CacheError>;

    /// Store `response` for `request.url()`. Silently does nothing when the
    /// response has no `Expires` header.
    fn set(&self, request: &Request, response: &Response) -> Result<(), CacheError>;
}

impl<T: Cache + ?Sized> Cache for Arc<T> {
    fn get(&self, request: &Request) -> Result<Option<Response>, CacheError> {
        (**self).get(request)
    }

    fn set(&self, request: &Request, response: &Response) -> Result<(), CacheError> {
        (**self).set(request, response)
    }
}

/// Source of "now" for expiry decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Refuse anything but GET before touching the store.
pub fn ensure_cacheable(request: &Request) -> Result<(), CacheError> {
    match request.method() {
        Method::Get => Ok(()),
        other => Err(CacheError::NotCacheable(other)),
    }
}

/// The absolute expiry declared by `response`, if any.
///
/// Accepts the HTTP date format (`Sun, 06 Nov 1994 08:49:37 GMT`) and, as a
/// courtesy to sloppy servers, RFC 3339.
pub fn expires_at(response: &Response) -> Result<Option<DateTime<Utc>>, CacheError> {
    let Some(raw) = response.headers().get("expires") else {
        return Ok(None);
    };
    parse_http_date(raw).map(Some)
}

fn parse_http_date(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    let value = raw.trim();
    DateTime::parse_from_rfc2822(value)
        .or_else(|_| DateTime::parse_from_rfc3339(value))
        .map(|date| date.with_timezone(&Utc))
        .map_err(|_| CacheError::InvalidExpires(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::http::Headers;

    fn response_with(headers: Headers) -> Response {
        Response::empty(200, headers).unwrap()
    }

    #[test]
    fn no_expires_header_means_no_expiry() {
        let response = response_with(Headers::new());
        assert_eq!(expires_at(&response).unwrap(), None);
    }

    #[test]
    fn http_date_is_parsed() {
        let response = response_with(Headers::new().with("Expires", "Sun, 06 Nov 1994 08:49:37 GMT"));
        let expected = Utc.with_ymd_and_hms(1994, 11, 6, 8, 49, 37).unwrap();
        assert_eq!(expires_at(&response).unwrap(), Some(expected));
    }

    #[test]
    fn rfc3339_is_accepted() {
        let response = response_with(Headers::new().with("expires", "2099-01-01T00:00:00+02:00"));
        let expected = Utc.with_ymd_and_hms(2098, 12, 31, 22, 0, 0).unwrap();
        assert_eq!(expires_at(&response).unwrap(), Some(expected));
    }

    #[test]
    fn garbage_expires_is_an_error() {
        let response = response_with(Headers::new().with("Expires", "tomorrow-ish"));
        let err = expires_at(&response).unwrap_err();
        assert!(matches!(err, CacheError::InvalidExpires(ref v) if v == "tomorrow-ish"));
    }

    #[test]
    fn only_get_is_cacheable() {
        assert!(ensure_cacheable(&Request::get("http://api.test/v1/a")).is_ok());
        let post = Request::new("http://api.test/v1/a", Method::Post, None, Headers::new());
        assert!(matches!(
            ensure_cacheable(&post),
            Err(CacheError::NotCacheable(Method::Post))
        ));
    }
}
