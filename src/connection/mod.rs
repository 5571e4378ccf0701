pub mod callback;
pub mod http;

use reqwest::Method;
use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use self::http::BlockingClient;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request could not be delivered: {0}")]
    Transport(String),
    #[error("request could not be built: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_builder() {
            ClientError::InvalidRequest(err.to_string())
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

/// Transport used by test bodies. Implementations perform no retries.
pub trait HttpClient: Send + Sync {
    fn send(&self, request: Request) -> Result<Exchange, ClientError>;
}

#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

/// A request together with the response it produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exchange {
    pub method: String,
    pub url: String,
    pub request_headers: Vec<(String, String)>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_body: Option<String>,
    pub status: u16,
    pub response_headers: Vec<(String, String)>,
    pub response_body: String,
    pub duration_ms: u64,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url).header("Accept", "application/fhir+json")
    }

    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {}", token))
    }

    pub fn basic_auth(self, user: &str, password: &str) -> Self {
        let credentials = base64::encode(format!("{}:{}", user, password));
        self.header("Authorization", format!("Basic {}", credentials))
    }

    /// Sets an `application/x-www-form-urlencoded` body.
    pub fn form(mut self, fields: &[(&str, &str)]) -> Self {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(fields.iter())
            .finish();
        self.body = Some(body);
        self.header("Content-Type", "application/x-www-form-urlencoded")
    }
}

impl Exchange {
    pub fn response_header(&self, name: &str) -> Option<&str> {
        self.response_headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> serde_json::Result<Value> {
        serde_json::from_str(&self.response_body)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Answers requests from a fixed list of `(method, url prefix)` routes.
    #[derive(Default)]
    pub struct ScriptedClient {
        routes: Vec<(Method, String, u16, String)>,
        pub sent: Mutex<Vec<Request>>,
    }

    impl ScriptedClient {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, method: Method, prefix: &str, status: u16, body: Value) -> Self {
            self.routes
                .push((method, prefix.to_owned(), status, body.to_string()));
            self
        }

        pub fn sent_urls(&self) -> Vec<String> {
            self.sent
                .lock()
                .unwrap()
                .iter()
                .map(|request| request.url.clone())
                .collect()
        }
    }

    impl HttpClient for ScriptedClient {
        fn send(&self, request: Request) -> Result<Exchange, ClientError> {
            self.sent.lock().unwrap().push(request.clone());
            let (_, _, status, body) = self
                .routes
                .iter()
                .find(|(method, prefix, _, _)| {
                    *method == request.method && request.url.starts_with(prefix.as_str())
                })
                .ok_or_else(|| ClientError::Transport(format!("no route to {}", request.url)))?;
            Ok(Exchange {
                method: request.method.to_string(),
                url: request.url,
                request_headers: request.headers,
                request_body: request.body,
                status: *status,
                response_headers: vec![(
                    "Content-Type".to_owned(),
                    "application/fhir+json; charset=utf-8".to_owned(),
                )],
                response_body: body.clone(),
                duration_ms: 0,
            })
        }
    }

    #[test]
    fn test_form_body_is_urlencoded() {
        let request = Request::post("http://server/token")
            .form(&[("grant_type", "authorization_code"), ("redirect_uri", "http://a/b c")]);
        assert_eq!(
            request.body.as_deref(),
            Some("grant_type=authorization_code&redirect_uri=http%3A%2F%2Fa%2Fb+c")
        );
    }

    #[test]
    fn test_basic_auth_header() {
        let request = Request::post("http://server/token").basic_auth("client", "secret");
        assert_eq!(
            request.headers[0],
            ("Authorization".to_owned(), "Basic Y2xpZW50OnNlY3JldA==".to_owned())
        );
    }
}
