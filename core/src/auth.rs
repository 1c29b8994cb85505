//! Bearer-token lifecycle: client-credentials exchange and reactive refresh.
//!
//! # Design
//! The token is fetched lazily and only replaced when the API reports
//! `invalid_grant`; no expiry clock is kept. The state lives behind a mutex
//! that is held for the whole exchange, so concurrent callers that hit an
//! expired token trigger one refresh and then share its result.
//!
//! Retrying is decided by [`next_step`], a pure function of the attempt
//! number and the response. An `Attempt::Retried` request is never retried
//! again.

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::http::{Headers, Method, Request, Response};
use crate::transport::Transport;
use crate::types::{ErrorBody, TokenResponse};

const UNKNOWN_ERROR: &str = "Unknown API error";

/// Authentication state of one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthState {
    Unauthenticated,
    Authenticated { access_token: String },
}

/// Which send of a request is being evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    First,
    Retried,
}

/// What to do after a response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Return,
    RefreshAndRetry,
}

/// Transition for the one-shot refresh policy.
pub fn next_step(attempt: Attempt, response: &Response) -> Next {
    match attempt {
        Attempt::First if is_invalid_grant(response) => Next::RefreshAndRetry,
        Attempt::First | Attempt::Retried => Next::Return,
    }
}

/// `401` with `{"error": "invalid_grant"}`: the bearer token went stale.
pub fn is_invalid_grant(response: &Response) -> bool {
    response.http_code() == 401
        && response.body().get("error").and_then(|e| e.as_str()) == Some("invalid_grant")
}

/// Owns the credentials and the current token of one client.
pub(crate) struct Authenticator {
    token_url: String,
    client_id: String,
    client_secret: String,
    state: Mutex<AuthState>,
}

impl Authenticator {
    pub(crate) fn new(config: &ClientConfig) -> Self {
        Self {
            token_url: format!("{}/token", config.base_url()),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            state: Mutex::new(AuthState::Unauthenticated),
        }
    }

    pub(crate) fn state(&self) -> AuthState {
        self.state.lock().clone()
    }

    /// The current token, exchanging credentials first if there is none.
    pub(crate) fn access_token(&self, transport: &dyn Transport) -> Result<String, AuthError> {
        let mut state = self.state.lock();
        if let AuthState::Authenticated { access_token } = &*state {
            return Ok(access_token.clone());
        }
        let token = self.exchange(transport)?;
        *state = AuthState::Authenticated {
            access_token: token.clone(),
        };
        Ok(token)
    }

    /// Replace the token. When `stale` is given and another caller already
    /// swapped it out, the newer token is returned without a second exchange.
    pub(crate) fn refresh(&self, transport: &dyn Transport, stale: Option<&str>) -> Result<String, AuthError> {
        let mut state = self.state.lock();
        if let (Some(stale), AuthState::Authenticated { access_token }) = (stale, &*state) {
            if access_token != stale {
                debug!("token already refreshed by a concurrent caller");
                return Ok(access_token.clone());
            }
        }
        let token = self.exchange(transport)?;
        info!("access token refreshed");
        *state = AuthState::Authenticated {
            access_token: token.clone(),
        };
        Ok(token)
    }

    /// Run the client-credentials exchange. Leaves the state untouched.
    fn exchange(&self, transport: &dyn Transport) -> Result<String, AuthError> {
        let request = self.token_request();
        debug!(url = request.url(), "requesting access token");
        let response = transport.execute(&request).map_err(AuthError::Transport)?;
        parse_token_response(&response)
    }

    pub(crate) fn token_request(&self) -> Request {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("client_id", &self.client_id)
            .append_pair("client_secret", &self.client_secret)
            .append_pair("grant_type", "client_credentials")
            .finish();
        Request::new(
            self.token_url.clone(),
            Method::Post,
            Some(body),
            Headers::new().with("Content-Type", "application/x-www-form-urlencoded"),
        )
    }
}

/// Extract the token from a token-endpoint response.
pub fn parse_token_response(response: &Response) -> Result<String, AuthError> {
    if response.http_code() != 200 {
        let error: ErrorBody = serde_json::from_value(response.body().clone()).unwrap_or_default();
        return Err(AuthError::Rejected {
            status: response.http_code(),
            description: error
                .error_description
                .unwrap_or_else(|| UNKNOWN_ERROR.to_string()),
        });
    }
    let token: TokenResponse =
        serde_json::from_value(response.body().clone()).map_err(|_| AuthError::MissingToken)?;
    Ok(token.access_token)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(code: u16, body: serde_json::Value) -> Response {
        Response::new(code, Headers::new(), body).unwrap()
    }

    #[test]
    fn invalid_grant_on_first_attempt_triggers_refresh() {
        let resp = response(401, json!({"error": "invalid_grant"}));
        assert_eq!(next_step(Attempt::First, &resp), Next::RefreshAndRetry);
    }

    #[test]
    fn invalid_grant_after_retry_is_returned() {
        let resp = response(401, json!({"error": "invalid_grant"}));
        assert_eq!(next_step(Attempt::Retried, &resp), Next::Return);
    }

    #[test]
    fn other_401_reasons_are_returned() {
        let resp = response(401, json!({"error": "invalid_client"}));
        assert_eq!(next_step(Attempt::First, &resp), Next::Return);
        let resp = response(401, json!({}));
        assert_eq!(next_step(Attempt::First, &resp), Next::Return);
    }

    #[test]
    fn invalid_grant_needs_a_401() {
        let resp = response(400, json!({"error": "invalid_grant"}));
        assert_eq!(next_step(Attempt::First, &resp), Next::Return);
    }

    #[test]
    fn token_is_extracted_from_200() {
        let resp = response(200, json!({"access_token": "abc", "expires_in": 3600}));
        assert_eq!(parse_token_response(&resp).unwrap(), "abc");
    }

    #[test]
    fn non_200_carries_error_description() {
        let resp = response(500, json!({"error_description": "server down"}));
        let err = parse_token_response(&resp).unwrap_err();
        assert_eq!(err.to_string(), "server down");
        assert!(matches!(err, AuthError::Rejected { status: 500, .. }));
    }

    #[test]
    fn non_200_without_description_is_generic() {
        let resp = response(400, json!({}));
        assert_eq!(parse_token_response(&resp).unwrap_err().to_string(), "Unknown API error");
    }

    #[test]
    fn array_error_body_is_still_generic() {
        let resp = response(503, json!([]));
        assert_eq!(parse_token_response(&resp).unwrap_err().to_string(), "Unknown API error");
    }

    #[test]
    fn missing_token_in_200_is_an_error() {
        let resp = response(200, json!({}));
        assert!(matches!(parse_token_response(&resp), Err(AuthError::MissingToken)));
    }

    #[test]
    fn token_request_is_form_encoded() {
        let config = ClientConfig::new("https://api.example", "1", "id 1", "s&cret").unwrap();
        let request = Authenticator::new(&config).token_request();
        assert_eq!(request.url(), "https://api.example/v1/token");
        assert_eq!(request.method(), Method::Post);
        assert_eq!(
            request.body(),
            Some("client_id=id+1&client_secret=s%26cret&grant_type=client_credentials")
        );
        assert_eq!(
            request.headers().get("content-type"),
            Some("application/x-www-form-urlencoded")
        );
    }
}
