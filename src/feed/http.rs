use futures::StreamExt;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::redirect::{self, RedirectState};
use super::writer::WriterError;

/// Default cap on a single response body (10MB).
pub const MAX_RESPONSE_SIZE: usize = 10 * 1024 * 1024;

/// Errors that can occur while fetching an index document or article page.
///
/// Transport failures carry the transport's own message verbatim.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("{0}")]
    Transport(#[from] reqwest::Error),
    /// Final response (after redirects) had a non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// The redirect chain asked for more hops than allowed
    #[error("Maximum redirects reached ({0})")]
    RedirectLimitExceeded(u32),
    /// Index document could not be parsed as a channel
    #[error("Parse error: {0}")]
    Parse(String),
    /// URL could not be parsed
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    /// Response body exceeded the configured size limit
    #[error("Response too large")]
    ResponseTooLarge,
    /// The request was canceled by its owner; not a failure
    #[error("Operation canceled")]
    Canceled,
    /// A fetch was requested while the same fetcher was still active
    #[error("Request already active")]
    AlreadyActive,
    /// The output document could not be written
    #[error("Output error: {0}")]
    Output(#[from] WriterError),
}

impl FetchError {
    pub fn is_canceled(&self) -> bool {
        matches!(self, FetchError::Canceled)
    }
}

/// A successfully fetched document.
#[derive(Debug, Clone)]
pub struct Page {
    /// URL the body was finally served from (after redirects).
    pub url: Url,
    pub body: Vec<u8>,
    /// Number of redirects followed to reach `url`.
    pub redirects: u32,
}

impl Page {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Fetches `url`, following redirects through the bounded resolver.
///
/// The client must have automatic redirects disabled (see
/// [`crate::config::Config::http_client`]) so `Location` headers surface here.
/// Each outstanding request races `cancel`; once the token fires the request
/// is dropped and [`FetchError::Canceled`] is returned. Cancellation wins over
/// any error observed in the same step.
///
/// # Errors
///
/// - [`FetchError::Transport`] - connection, TLS or body read failure
/// - [`FetchError::RedirectLimitExceeded`] - more than [`redirect::MAX_REDIRECTS`] hops
/// - [`FetchError::HttpStatus`] - non-2xx final response
/// - [`FetchError::ResponseTooLarge`] - body exceeded `limit`
/// - [`FetchError::Canceled`] - `cancel` fired
pub async fn get_page(
    client: &reqwest::Client,
    url: &str,
    cancel: &CancellationToken,
    limit: usize,
) -> Result<Page, FetchError> {
    let result = follow_chain(client, url, cancel, limit).await;

    match result {
        Err(e) if !e.is_canceled() && cancel.is_cancelled() => Err(FetchError::Canceled),
        other => other,
    }
}

async fn follow_chain(
    client: &reqwest::Client,
    url: &str,
    cancel: &CancellationToken,
    limit: usize,
) -> Result<Page, FetchError> {
    let mut redirects = RedirectState::new(url);
    let mut current = Url::parse(url).map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))?;

    loop {
        tracing::debug!(url = %current, hop = redirects.hops(), "GET");

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Canceled),
            response = client.get(current.clone()).send() => response?,
        };

        let location = response
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| redirect::resolve(v, response.url()));

        if let Some(next) = location {
            redirects = match redirects.follow() {
                Ok(advanced) => advanced,
                Err(e) => {
                    tracing::warn!(original = %url, location = %next, "Maximum redirects reached");
                    return Err(e);
                }
            };
            current = Url::parse(&next)
                .map_err(|e| FetchError::InvalidUrl(format!("{next}: {e}")))?;
            continue;
        }

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus(response.status().as_u16()));
        }

        let final_url = response.url().clone();
        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Canceled),
            body = read_limited_bytes(response, limit) => body?,
        };

        return Ok(Page {
            url: final_url,
            body,
            redirects: redirects.hops(),
        });
    }
}

/// Reads a response body, failing once it grows past `limit` bytes.
pub(crate) async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    // Fast path: check Content-Length header
    if let Some(len) = response.content_length() {
        if len as usize > limit {
            return Err(FetchError::ResponseTooLarge);
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge);
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> reqwest::Client {
        reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    async fn mount_chain(server: &MockServer, hops: usize) {
        for i in 0..hops {
            Mock::given(method("GET"))
                .and(path(format!("/r{i}")))
                .respond_with(
                    ResponseTemplate::new(302).insert_header("Location", format!("/r{}", i + 1)),
                )
                .mount(server)
                .await;
        }
        Mock::given(method("GET"))
            .and(path(format!("/r{hops}")))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_get_page_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let page = get_page(
            &client(),
            &format!("{}/x", server.uri()),
            &CancellationToken::new(),
            MAX_RESPONSE_SIZE,
        )
        .await
        .unwrap();
        assert_eq!(page.text(), "hello");
        assert_eq!(page.redirects, 0);
    }

    #[tokio::test]
    async fn test_eight_hops_then_success() {
        let server = MockServer::start().await;
        mount_chain(&server, 8).await;

        let page = get_page(
            &client(),
            &format!("{}/r0", server.uri()),
            &CancellationToken::new(),
            MAX_RESPONSE_SIZE,
        )
        .await
        .unwrap();
        assert_eq!(page.text(), "done");
        assert_eq!(page.redirects, 8);
        assert!(page.url.path().ends_with("/r8"));
    }

    #[tokio::test]
    async fn test_nine_hops_exceeds_limit() {
        let server = MockServer::start().await;
        mount_chain(&server, 9).await;

        let result = get_page(
            &client(),
            &format!("{}/r0", server.uri()),
            &CancellationToken::new(),
            MAX_RESPONSE_SIZE,
        )
        .await;
        match result {
            Err(FetchError::RedirectLimitExceeded(8)) => {}
            other => panic!("Expected RedirectLimitExceeded, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_404_is_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let result = get_page(
            &client(),
            &format!("{}/missing", server.uri()),
            &CancellationToken::new(),
            MAX_RESPONSE_SIZE,
        )
        .await;
        assert!(matches!(result, Err(FetchError::HttpStatus(404))));
    }

    #[tokio::test]
    async fn test_response_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(64)))
            .mount(&server)
            .await;

        let result = get_page(
            &client(),
            &server.uri(),
            &CancellationToken::new(),
            16,
        )
        .await;
        assert!(matches!(result, Err(FetchError::ResponseTooLarge)));
    }

    #[tokio::test]
    async fn test_cancel_aborts_outstanding_request() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("slow")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = get_page(&client(), &server.uri(), &cancel, MAX_RESPONSE_SIZE).await;
        assert!(matches!(result, Err(FetchError::Canceled)));
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = get_page(
            &client(),
            "not a url",
            &CancellationToken::new(),
            MAX_RESPONSE_SIZE,
        )
        .await;
        assert!(matches!(result, Err(FetchError::InvalidUrl(_))));
    }
}
