//! HTTP value types exchanged between the client, the transport and the cache.
//!
//! # Design
//! `Request` and `Response` are immutable values: fields are private and only
//! exposed through accessors, so a `Response` that exists always satisfies
//! the `100..=600` status invariant. Header names are case-insensitive; they
//! are stored lower-cased, which is also what the `http` crate hands back
//! from the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;

/// HTTP method for a request. Only the verbs the API understands exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Method {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(ValidationError::UnsupportedMethod(s.to_string())),
        }
    }
}

/// Header mapping with case-insensitive names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(BTreeMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name` to `value`, replacing any previous value.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.to_ascii_lowercase(), value.into());
    }

    /// Add a value for `name`; repeated fields are joined with `", "`.
    pub fn append(&mut self, name: &str, value: &str) {
        self.0
            .entry(name.to_ascii_lowercase())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate `(name, value)` pairs; names are lower-case.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<'a> FromIterator<(&'a str, &'a str)> for Headers {
    fn from_iter<I: IntoIterator<Item = (&'a str, &'a str)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(name, value);
        }
        headers
    }
}

/// One HTTP call described as plain data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    url: String,
    method: Method,
    body: Option<String>,
    headers: Headers,
}

impl Request {
    pub fn new(url: impl Into<String>, method: Method, body: Option<String>, headers: Headers) -> Self {
        Self {
            url: url.into(),
            method,
            body,
            headers,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(url, Method::Get, None, Headers::new())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn body(&self) -> Option<&str> {
        self.body.as_deref()
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// A copy of this request with `name` set to `value`.
    pub fn with_header(&self, name: &str, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.headers.insert(name, value);
        next
    }
}

/// One HTTP result: status, headers and the decoded JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    http_code: u16,
    headers: Headers,
    body: Value,
}

impl Response {
    /// Build a response, rejecting status codes outside `100..=600`.
    pub fn new(http_code: u16, headers: Headers, body: Value) -> Result<Self, ValidationError> {
        if !(100..=600).contains(&http_code) {
            return Err(ValidationError::HttpCode(http_code));
        }
        Ok(Self {
            http_code,
            headers,
            body,
        })
    }

    /// Build a response with an empty JSON object body.
    pub fn empty(http_code: u16, headers: Headers) -> Result<Self, ValidationError> {
        Self::new(http_code, headers, empty_body())
    }

    pub fn http_code(&self) -> u16 {
        self.http_code
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn into_body(self) -> Value {
        self.body
    }
}

/// The body used when the wire body is empty.
pub fn empty_body() -> Value {
    Value::Object(serde_json::Map::new())
}
