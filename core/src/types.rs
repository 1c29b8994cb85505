//! Wire DTOs and the open-ended filter mapping used by `index`.
//!
//! # Design
//! The token endpoint and its error shape are fixed, so they get concrete
//! structs. Resource filters are whatever the API accepts, so `Filters` is an
//! ordered string mapping that keeps insertion order on the wire.

use serde::{Deserialize, Serialize};

/// Successful body of `POST /v{version}/token`. Extra fields are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
}

/// OAuth-style error body, used by both the token endpoint and `401`s.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// Query-string filters for `Client::index`, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filters(Vec<(String, String)>);

impl Filters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a filter. Repeating a key sends it twice.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.push((key.into(), value.into()));
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.push((key.into(), value.into()));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// `application/x-www-form-urlencoded` rendering, without a leading `?`.
    pub fn to_query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.0.iter())
            .finish()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Filters {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_response_ignores_unknown_fields() {
        let token: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","scope":"read"}"#).unwrap();
        assert_eq!(token.access_token, "abc");
        assert!(token.expires_in.is_none());
    }

    #[test]
    fn token_response_rejects_missing_token() {
        let result: Result<TokenResponse, _> = serde_json::from_str(r#"{"token_type":"bearer"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn error_body_fields_are_optional() {
        let body: ErrorBody = serde_json::from_str(r#"{}"#).unwrap();
        assert_eq!(body, ErrorBody::default());
    }

    #[test]
    fn filters_keep_insertion_order() {
        let filters = Filters::new().with("view", "full").with("classId", "42");
        assert_eq!(filters.to_query_string(), "view=full&classId=42");
    }

    #[test]
    fn filters_encode_reserved_characters() {
        let filters: Filters = [("q", "a b&c")].into_iter().collect();
        assert_eq!(filters.to_query_string(), "q=a+b%26c");
    }
}
