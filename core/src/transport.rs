//! Pluggable execution of `Request` values.
//!
//! `UreqTransport` is the network implementation. Tests swap in fakes that
//! implement the same trait.

use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use crate::error::{ProtocolError, TransportError};
use crate::http::{empty_body, Headers, Method, Request, Response};

/// Executes one request and returns the server's answer as data.
///
/// Non-2xx statuses are `Ok`; only failures to obtain a well-formed response
/// are errors. Implementations must not retry.
pub trait Transport: Send + Sync {
    fn execute(&self, request: &Request) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
    fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).execute(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        (**self).execute(request)
    }
}

/// A [`Transport`] backed by a blocking [`ureq`] agent.
#[derive(Debug, Clone)]
pub struct UreqTransport {
    agent: ureq::Agent,
}

impl UreqTransport {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            // Statuses are interpreted by the client, not the engine.
            .http_status_as_error(false)
            .build()
            .new_agent();
        Self { agent }
    }
}

impl Default for UreqTransport {
    fn default() -> Self {
        Self::new(Self::DEFAULT_TIMEOUT)
    }
}

impl Transport for UreqTransport {
    fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        debug!(method = %request.method(), url = request.url(), "executing request");

        let result = match (request.method(), request.body()) {
            (Method::Get, _) => with_headers(self.agent.get(request.url()), request).call(),
            (Method::Post, body) => {
                with_headers(self.agent.post(request.url()), request).send(body.unwrap_or_default().as_bytes())
            }
            (Method::Put, body) => {
                with_headers(self.agent.put(request.url()), request).send(body.unwrap_or_default().as_bytes())
            }
            (Method::Delete, Some(body)) => {
                with_headers(self.agent.delete(request.url()).force_send_body(), request).send(body.as_bytes())
            }
            (Method::Delete, None) => with_headers(self.agent.delete(request.url()), request).call(),
        };

        match result {
            Ok(response) => convert_response(response),
            Err(err) => Err(map_ureq_error(err)),
        }
    }
}

/// Copy request headers onto the builder. `Expect` is never forwarded: the
/// API does not answer `100-continue`.
fn with_headers<B>(mut builder: ureq::RequestBuilder<B>, request: &Request) -> ureq::RequestBuilder<B> {
    for (name, value) in request.headers().iter() {
        if name == "expect" {
            continue;
        }
        builder = builder.header(name, value);
    }
    builder
}

fn convert_response(mut response: ureq::http::Response<ureq::Body>) -> Result<Response, TransportError> {
    let status = response.status().as_u16();

    let headers: Headers = response
        .headers()
        .iter()
        .map(|(name, value)| (name.as_str(), String::from_utf8_lossy(value.as_bytes()).into_owned()))
        .fold(Headers::new(), |mut headers, (name, value)| {
            headers.append(name, &value);
            headers
        });

    let raw = response.body_mut().read_to_vec().map_err(map_ureq_error)?;

    let body = parse_body(&raw)?;
    Response::new(status, headers, body).map_err(|_| TransportError::InvalidStatus(status))
}

/// Decode a raw body: blank is an empty object, anything else must be JSON.
/// Bytes that are not UTF-8 fail like any other malformed document.
pub fn parse_body(raw: &[u8]) -> Result<Value, ProtocolError> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Ok(empty_body());
    }
    Ok(serde_json::from_slice(trimmed)?)
}

fn map_ureq_error(err: ureq::Error) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout,
        ureq::Error::HostNotFound => TransportError::Connection("host not found".to_owned()),
        ureq::Error::Io(e) => TransportError::Connection(e.to_string()),
        other => TransportError::Other(Box::new(other)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;

    use serde_json::json;

    use super::*;

    #[test]
    fn blank_body_parses_to_empty_object() {
        assert_eq!(parse_body(b"").unwrap(), json!({}));
        assert_eq!(parse_body(b"  \r\n").unwrap(), json!({}));
    }

    #[test]
    fn json_body_is_decoded() {
        let body = parse_body(br#" {"result":[1,2]} "#).unwrap();
        assert_eq!(body["result"], json!([1, 2]));
    }

    #[test]
    fn non_json_body_is_a_protocol_error() {
        let err = parse_body(b"<html>oops</html>").unwrap_err();
        assert!(err.to_string().starts_with("unable to parse response body"));
    }

    #[test]
    fn invalid_utf8_body_is_a_protocol_error() {
        let err = parse_body(&[0xff, 0xfe, b'{', b'}']).unwrap_err();
        assert!(err.to_string().starts_with("unable to parse response body"));
    }

    #[test]
    fn invalid_utf8_from_the_wire_is_a_protocol_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf).unwrap();
            stream
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\n\xff\xfe{}")
                .unwrap();
        });

        let err = UreqTransport::new(Duration::from_secs(5))
            .execute(&Request::get(format!("http://{addr}/v1/media/a")))
            .unwrap_err();

        server.join().unwrap();
        assert!(matches!(err, TransportError::Protocol(_)), "got {err:?}");
    }

    #[test]
    fn unreachable_host_is_a_transport_error() {
        let transport = UreqTransport::new(Duration::from_secs(2));
        // Port 9 (discard) on localhost is expected to refuse connections.
        let err = transport
            .execute(&Request::get("http://127.0.0.1:9/v1/cycles"))
            .unwrap_err();
        assert!(!matches!(err, TransportError::Protocol(_)));
    }
}
