//! The network substrate strategies fetch through.

use async_trait::async_trait;
use hashbrown::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

use crate::error::{Result, ServiceWorkerError};
use crate::request::{Request, Response, ResponseType};

/// Performs network requests on behalf of the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch a request. Errors only when no response was obtained at all;
    /// HTTP error statuses come back as responses.
    async fn fetch(&self, request: &Request) -> Result<Response>;
}

/// [`Fetcher`] backed by a reqwest client.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Create a fetcher with the Obi-Wan user agent.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("obiwan-sw/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| ServiceWorkerError::Network(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &Request) -> Result<Response> {
        trace!(url = %request.url, method = %request.method, "Network fetch");

        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ServiceWorkerError::Network(e.to_string()))?;

        let status = response.status();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_string(), v.to_str().ok()?.to_string())))
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceWorkerError::Network(e.to_string()))?;

        debug!(url = %request.url, status = status.as_u16(), bytes = body.len(), "Fetched");

        Ok(Response {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers,
            body,
            response_type: ResponseType::Basic,
            from_cache: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_http_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/logo.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(b"PNG".to_vec()),
            )
            .expect(1)
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let request = Request::parse(&format!("{}/logo.png", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "PNG");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("image/png")
        );
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_http_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new().unwrap();
        let request = Request::parse(&format!("{}/missing", server.uri())).unwrap();
        let response = fetcher.fetch(&request).await.unwrap();
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_connection_refused_is_network_error() {
        let fetcher = HttpFetcher::new().unwrap();
        let request = Request::parse("http://127.0.0.1:9/unreachable").unwrap();
        let err = fetcher.fetch(&request).await.unwrap_err();
        assert!(err.is_network_failure());
    }
}
