use futures::StreamExt;
use reqwest::multipart;
use reqwest::{Client, Response};
use serde_json::Value;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

/// A file to send as one multipart form field.
#[derive(Debug, Clone)]
pub struct FileUpload {
    pub field: &'static str,
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// The four request shapes the unwrap API needs.
///
/// JSON methods return `Value::Null` for an empty 2xx body so callers can
/// apply their own missing-field rules.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn get_json(&self, path: &str) -> Result<Value, TransportError>;

    /// `get_json` that gives up after `limit` instead of the client-wide
    /// request timeout. Implementations without a per-request timer may
    /// ignore the limit.
    async fn get_json_within(&self, path: &str, _limit: Duration) -> Result<Value, TransportError> {
        self.get_json(path).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError>;

    async fn upload_file(&self, path: &str, upload: FileUpload) -> Result<Value, TransportError>;

    /// Stream a binary body into `writer`, returning the number of bytes written.
    async fn download_to<W>(&self, path: &str, writer: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + Send;

    /// Human-readable location of the service, for error messages.
    fn base_url(&self) -> &str;
}

/// reqwest-backed transport rooted at the versioned API URL.
pub struct HttpTransport {
    http: Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self, TransportError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("uv-unwrap-client/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode(response: Response) -> Result<Value, TransportError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Value::Null);
        }

        serde_json::from_str(&body).map_err(|source| TransportError::Decode { body, source })
    }
}

impl Transport for HttpTransport {
    async fn get_json(&self, path: &str) -> Result<Value, TransportError> {
        let response = self.http.get(self.url(path)).send().await?;
        Self::decode(response).await
    }

    async fn get_json_within(&self, path: &str, limit: Duration) -> Result<Value, TransportError> {
        let response = self
            .http
            .get(self.url(path))
            .timeout(limit)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        let response = self.http.post(self.url(path)).json(body).send().await?;
        Self::decode(response).await
    }

    async fn upload_file(&self, path: &str, upload: FileUpload) -> Result<Value, TransportError> {
        let part = multipart::Part::bytes(upload.bytes)
            .file_name(upload.file_name)
            .mime_str("application/octet-stream")?;
        let form = multipart::Form::new().part(upload.field, part);

        let response = self
            .http
            .post(self.url(path))
            .multipart(form)
            .send()
            .await?;
        Self::decode(response).await
    }

    async fn download_to<W>(&self, path: &str, writer: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let response = self.http.get(self.url(path)).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        writer.flush().await?;

        Ok(written)
    }

    fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned HTTP {status}")]
    Status { status: u16, body: String },

    #[error("Response is not valid JSON: {source}")]
    Decode {
        body: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Local write failed: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Raw response body, when the server sent one.
    pub fn payload(&self) -> String {
        match self {
            TransportError::Status { body, .. } | TransportError::Decode { body, .. } => {
                body.clone()
            }
            _ => String::new(),
        }
    }

    /// Worth retrying for idempotent reads: connection trouble, timeouts,
    /// throttling and server-side errors.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Http(e) => e.is_connect() || e.is_timeout(),
            TransportError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
