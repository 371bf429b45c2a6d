//! Fetching book files over HTTP.
//!
//! Stored books point at their upload by URL (`/uploads/<name>`), so opening a
//! book means fetching it first. [`ContentFetcher`] is the seam; the session
//! only sees bytes.

use std::future::Future;

use crate::encoding::decode_text;
use crate::error::FetchError;

pub trait ContentFetcher: Send + Sync {
    fn fetch_bytes(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, FetchError>> + Send;

    /// Fetch and decode as UTF-8 text (BOM stripped, newlines normalized).
    fn fetch_text(&self, url: &str) -> impl Future<Output = Result<String, FetchError>> + Send {
        async move { Ok(decode_text(&self.fetch_bytes(url).await?)) }
    }
}

#[cfg(feature = "net")]
pub use http::HttpFetcher;

#[cfg(feature = "net")]
mod http {
    use super::*;

    /// Fetcher over `reqwest`. Relative URLs resolve against `base_url`.
    #[derive(Debug, Clone)]
    pub struct HttpFetcher {
        client: reqwest::Client,
        base_url: Option<reqwest::Url>,
    }

    impl HttpFetcher {
        pub fn new() -> Self {
            Self {
                client: reqwest::Client::new(),
                base_url: None,
            }
        }

        /// Resolve relative book URLs (e.g. `/uploads/x.epub`) against `base`.
        pub fn with_base_url(base: &str) -> Result<Self, FetchError> {
            let base_url = reqwest::Url::parse(base).map_err(|e| FetchError::Network(format!("{base}: {e}")))?;
            Ok(Self {
                client: reqwest::Client::new(),
                base_url: Some(base_url),
            })
        }

        fn resolve(&self, url: &str) -> Result<reqwest::Url, FetchError> {
            let parsed = match &self.base_url {
                Some(base) => base.join(url),
                None => reqwest::Url::parse(url),
            };
            parsed.map_err(|e| FetchError::Network(format!("{url}: {e}")))
        }
    }

    impl Default for HttpFetcher {
        fn default() -> Self {
            Self::new()
        }
    }

    impl ContentFetcher for HttpFetcher {
        async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            let target = self.resolve(url)?;
            tracing::debug!(url = %target, "Fetching book content");
            let resp = self
                .client
                .get(target.clone())
                .send()
                .await
                .map_err(|e| FetchError::Network(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    url: target.to_string(),
                    status: status.as_u16(),
                });
            }
            let body = resp.bytes().await.map_err(|e| FetchError::Decode(e.to_string()))?;
            Ok(body.to_vec())
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_fetch_text_relative_to_base() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/uploads/1-notes.md"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"\xEF\xBB\xBF# Notes\r\n".to_vec()))
                .mount(&server)
                .await;

            let fetcher = HttpFetcher::with_base_url(&server.uri()).unwrap();
            let text = fetcher.fetch_text("/uploads/1-notes.md").await.unwrap();
            assert_eq!(text, "# Notes\n");
        }

        #[tokio::test]
        async fn test_non_success_status_is_an_error() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;

            let fetcher = HttpFetcher::new();
            let err = fetcher
                .fetch_bytes(&format!("{}/uploads/missing.epub", server.uri()))
                .await
                .unwrap_err();
            assert!(matches!(err, FetchError::Status { status: 404, .. }));
        }

        #[tokio::test]
        async fn test_relative_url_without_base_is_rejected() {
            let err = HttpFetcher::new().fetch_bytes("/uploads/x.epub").await.unwrap_err();
            assert!(matches!(err, FetchError::Network(_)));
        }
    }
}
