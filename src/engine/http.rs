use super::{BackendError, GenerationBackend};
use crate::model::{GenerationRequest, GenerationResult, StudioConfig};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::error::Error as StdError;
use tokio_util::sync::CancellationToken;

/// Failure body shared by every non-2xx response.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: Option<String>,
}

/// Generation backend reached over HTTP.
#[derive(Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    endpoint: Url,
}

impl HttpBackend {
    pub fn new(cfg: &StudioConfig) -> Result<Self> {
        let endpoint = Url::parse(&cfg.base_url)
            .with_context(|| format!("invalid backend URL: {}", cfg.base_url))?;
        let http = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, request: &GenerationRequest) -> Result<GenerationResult, BackendError> {
        let resp = self
            .http
            .post(self.endpoint.clone())
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(transport_message(&e)))?;

        let status = resp.status();
        let body = resp.bytes().await;

        if status.is_success() {
            let body = body.map_err(|e| BackendError::Transport(transport_message(&e)))?;
            return serde_json::from_slice::<GenerationResult>(&body)
                .map_err(|e| BackendError::Malformed(e.to_string()));
        }
        // The status decides the class; an unreadable body only loses the message.
        Err(error_from_response(status, body.as_deref().unwrap_or_default()))
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn generate(
        &self,
        request: &GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<GenerationResult, BackendError> {
        // Dropping the reqwest future tears down the connection.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(BackendError::Cancelled),
            res = self.send(request) => res,
        }
    }
}

/// Message for a non-2xx response: the body's `message`, else the status text.
fn error_from_response(status: StatusCode, body: &[u8]) -> BackendError {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();
    let message = parsed
        .message
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| status_text(status));
    BackendError::from_status(status.as_u16(), message)
}

fn status_text(status: StatusCode) -> String {
    match status.canonical_reason() {
        Some(reason) => reason.to_string(),
        None if status.as_u16() == super::CLIENT_CLOSED_REQUEST => "Client Closed Request".into(),
        None => format!("HTTP {}", status.as_u16()),
    }
}

/// Walk the source chain so "error sending request" carries its cause.
fn transport_message(err: &reqwest::Error) -> String {
    let mut msg = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        msg.push_str(": ");
        msg.push_str(&cause.to_string());
        source = cause.source();
    }
    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FailureClass, RetryPolicy, Style};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn config(base_url: String) -> StudioConfig {
        StudioConfig {
            base_url,
            user_agent: "genstudio-test".into(),
            retry: RetryPolicy::default(),
            history_path: None,
            auto_save: false,
        }
    }

    /// Direct client that ignores proxy settings from the environment.
    fn backend(url: String) -> HttpBackend {
        HttpBackend {
            http: reqwest::Client::builder().no_proxy().build().unwrap(),
            endpoint: Url::parse(&url).unwrap(),
        }
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            image_data_url: "data:image/png;base64,iVBORw0KGgo=".into(),
            prompt: "denim jacket on a rooftop".into(),
            style: Style::Vintage,
        }
    }

    /// Read one HTTP request (headers plus Content-Length body).
    async fn read_request(sock: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = sock.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let content_length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (k, v) = l.split_once(':')?;
                        k.eq_ignore_ascii_case("content-length")
                            .then(|| v.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + content_length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Serve exactly one canned response and hand back the raw request.
    async fn serve_once(
        status_line: &'static str,
        body: &'static str,
    ) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let raw = read_request(&mut sock).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
            raw
        });
        (format!("http://{addr}/api/generate"), handle)
    }

    #[tokio::test]
    async fn success_payload_is_decoded_and_request_is_posted_as_json() {
        let (url, server) = serve_once(
            "200 OK",
            r#"{"id":"1712-abc","imageUrl":"data:image/png;base64,iVBORw0KGgo=","prompt":"denim jacket on a rooftop","style":"Vintage","createdAt":"2024-04-01T10:00:00.000Z"}"#,
        )
        .await;
        let backend = backend(url);

        let result = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.id, "1712-abc");
        assert_eq!(result.style, "Vintage");

        let raw = server.await.unwrap();
        assert!(raw.starts_with("POST /api/generate"));
        assert!(raw.contains(r#""imageDataUrl":"data:image/png;base64,iVBORw0KGgo=""#));
        assert!(raw.contains(r#""style":"Vintage""#));
    }

    #[tokio::test]
    async fn server_failure_carries_body_message() {
        let (url, _server) =
            serve_once("503 Service Unavailable", r#"{"message":"Model overloaded"}"#).await;
        let backend = backend(url);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Server {
                status: 503,
                message: "Model overloaded".into()
            }
        );
    }

    #[tokio::test]
    async fn client_rejection_without_body_uses_status_text() {
        let (url, _server) = serve_once("400 Bad Request", "").await;
        let backend = backend(url);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 400,
                message: "Bad Request".into()
            }
        );
    }

    #[tokio::test]
    async fn client_closed_status_maps_to_client_closed() {
        let (url, _server) = serve_once("499 Client Closed Request", "").await;
        let backend = backend(url);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::ClientClosed);
    }

    /// Announce a 100 byte body, send a few bytes of it, then hang up.
    async fn serve_truncated(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            let resp = format!(
                "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: 100\r\nconnection: close\r\n\r\n{{\"mess"
            );
            sock.write_all(resp.as_bytes()).await.unwrap();
            sock.shutdown().await.ok();
        });
        format!("http://{addr}/api/generate")
    }

    #[tokio::test]
    async fn truncated_rejection_body_keeps_the_status_class() {
        let backend = backend(serve_truncated("400 Bad Request").await);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            BackendError::Rejected {
                status: 400,
                message: "Bad Request".into()
            }
        );
        assert_eq!(err.classify(), FailureClass::NonRetryable);
    }

    #[tokio::test]
    async fn truncated_client_closed_body_is_still_an_abort() {
        let backend = backend(serve_truncated("499 Client Closed Request").await);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, BackendError::ClientClosed);
        assert_eq!(err.classify(), FailureClass::ClientAbort);
    }

    #[tokio::test]
    async fn truncated_success_body_is_a_transport_failure() {
        let backend = backend(serve_truncated("200 OK").await);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transport(_)), "{err:?}");
    }

    #[tokio::test]
    async fn success_status_with_incomplete_body_is_malformed() {
        let (url, _server) = serve_once("200 OK", r#"{"id":"1"}"#).await;
        let backend = backend(url);

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Malformed(_)), "{err:?}");
    }

    #[tokio::test]
    async fn refused_connection_is_a_transport_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let backend = backend(format!("http://{addr}/api/generate"));

        let err = backend
            .generate(&request(), CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            BackendError::Transport(msg) => assert!(!msg.is_empty()),
            other => panic!("expected transport failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn cancellation_interrupts_a_stalled_call() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        // Accept and never answer.
        let _server = tokio::spawn(async move {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
            drop(sock);
        });
        let backend = backend(format!("http://{addr}/api/generate"));
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let err = backend.generate(&request(), cancel).await.unwrap_err();
        assert_eq!(err, BackendError::Cancelled);
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn invalid_base_url_is_rejected_up_front() {
        assert!(HttpBackend::new(&config("not a url".into())).is_err());
    }
}
