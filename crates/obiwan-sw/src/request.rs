//! Request and response types seen by the fetch handler.

use bytes::Bytes;
use hashbrown::HashMap;
use http::Method;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use url::Url;

/// What kind of resource a request is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    /// `fetch()` / XHR with no particular destination.
    #[default]
    Empty,
    Document,
    Script,
    Style,
    Worker,
    Image,
    Font,
    Manifest,
}

impl FromStr for Destination {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "" | "empty" => Ok(Self::Empty),
            "document" => Ok(Self::Document),
            "script" => Ok(Self::Script),
            "style" => Ok(Self::Style),
            "worker" => Ok(Self::Worker),
            "image" => Ok(Self::Image),
            "font" => Ok(Self::Font),
            "manifest" => Ok(Self::Manifest),
            other => Err(format!("unknown destination: {other}")),
        }
    }
}

/// Request mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RequestMode {
    /// Top-level page navigation.
    Navigate,
    SameOrigin,
    #[default]
    NoCors,
    Cors,
}

/// An intercepted request.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: Url,
    pub method: Method,
    pub destination: Destination,
    pub mode: RequestMode,
    pub headers: HashMap<String, String>,
}

impl Request {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: Method::GET,
            destination: Destination::Empty,
            mode: RequestMode::NoCors,
            headers: HashMap::new(),
        }
    }

    /// Create a top-level navigation request.
    pub fn navigate(url: Url) -> Self {
        Self {
            destination: Destination::Document,
            mode: RequestMode::Navigate,
            ..Self::get(url)
        }
    }

    /// Parse a URL and create a GET request.
    pub fn parse(url: &str) -> crate::Result<Self> {
        Ok(Self::get(Url::parse(url)?))
    }

    /// Set the destination.
    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    /// Set the method.
    pub fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_navigation(&self) -> bool {
        self.mode == RequestMode::Navigate
    }

    /// Key used for cache lookups: the URL without its fragment.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }
}

/// Response type, mirroring the fetch API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponseType {
    #[default]
    Basic,
    Cors,
    /// Cross-origin no-cors response; status is reported as 0.
    Opaque,
    /// Network error.
    Error,
}

/// A response produced by the network, a cache, or the catch handler.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub status: u16,
    pub status_text: String,
    pub headers: HashMap<String, String>,
    pub body: Bytes,
    pub response_type: ResponseType,
    /// Whether this response was read from a cache.
    pub from_cache: bool,
}

impl Response {
    /// Create a basic response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            status_text: http::StatusCode::from_u16(status)
                .ok()
                .and_then(|s| s.canonical_reason())
                .unwrap_or_default()
                .to_string(),
            headers: HashMap::new(),
            body: body.into(),
            response_type: ResponseType::Basic,
            from_cache: false,
        }
    }

    /// Create a 200 response.
    pub fn ok(body: impl Into<Bytes>) -> Self {
        Self::new(200, body)
    }

    /// Create an opaque response (status 0).
    pub fn opaque() -> Self {
        Self {
            status: 0,
            status_text: String::new(),
            headers: HashMap::new(),
            body: Bytes::new(),
            response_type: ResponseType::Opaque,
            from_cache: false,
        }
    }

    /// Create a network error response.
    pub fn network_error() -> Self {
        Self {
            status: 0,
            status_text: "Network Error".to_string(),
            headers: HashMap::new(),
            body: Bytes::new(),
            response_type: ResponseType::Error,
            from_cache: false,
        }
    }

    /// Add a header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.response_type == ResponseType::Error
    }

    /// Check if the status is 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Bytes counted against the storage quota.
    pub fn size(&self) -> usize {
        self.body.len()
            + self
                .headers
                .iter()
                .map(|(k, v)| k.len() + v.len())
                .sum::<usize>()
    }

    pub(crate) fn into_cached(mut self) -> Self {
        self.from_cache = true;
        self
    }
}
