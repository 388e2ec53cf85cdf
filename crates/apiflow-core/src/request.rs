//! Request and response descriptions exchanged with a [`Runner`](crate::Runner).

use crate::variables::Variables;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// A request description. As part of a [`Step`](crate::Step) it is a template
/// whose URL, header values and body may contain `${name}` placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// HTTP method, passed through verbatim.
    pub method: String,
    /// Target URL.
    pub url: String,
    /// Header names to values.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request payload.
    #[serde(default)]
    pub body: Option<String>,
}

impl Request {
    /// Creates a request with no headers and no body.
    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    /// Creates a `GET` request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    /// Creates a `POST` request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new("POST", url)
    }

    /// Sets a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Returns a concrete request with placeholders in the URL, header values
    /// and body replaced from `variables`. Header names and the method are
    /// left untouched.
    pub fn substitute(&self, variables: &Variables) -> Request {
        Request {
            method: self.method.clone(),
            url: variables.substitute(&self.url),
            headers: self
                .headers
                .iter()
                .map(|(name, value)| (name.clone(), variables.substitute(value)))
                .collect(),
            body: self.body.as_deref().map(|body| variables.substitute(body)),
        }
    }
}

/// A response returned by a [`Runner`](crate::Runner).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Declared content type; empty when the server sent none.
    #[serde(default)]
    pub content_type: String,
    /// Raw body bytes.
    #[serde(default)]
    pub body: Vec<u8>,
}

impl Response {
    /// Creates an empty response with the given status.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            content_type: String::new(),
            body: Vec::new(),
        }
    }

    /// Creates a response carrying a JSON document.
    pub fn json(status: u16, body: &serde_json::Value) -> Self {
        Self::new(status)
            .with_content_type("application/json")
            .with_body(body.to_string())
    }

    /// Sets a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Sets the content type.
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Sets the body.
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    /// Returns the content type, falling back to a `Content-Type` header.
    pub fn content_type(&self) -> &str {
        if !self.content_type.is_empty() {
            return &self.content_type;
        }
        self.headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case("content-type"))
            .map(|(_, value)| value.as_str())
            .unwrap_or("")
    }

    /// Returns `true` if the content type declares a JSON document
    /// (`application/json`, `text/json` or any `+json` suffix).
    pub fn is_json(&self) -> bool {
        let essence = self
            .content_type()
            .split(';')
            .next()
            .unwrap_or("")
            .trim()
            .to_ascii_lowercase();
        essence.ends_with("/json") || essence.ends_with("+json")
    }

    /// Returns the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}
