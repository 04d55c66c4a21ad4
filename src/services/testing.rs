//! Scripted in-memory transport for unit tests.

use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use super::poll::CancelFlag;
use super::transport::{FileUpload, Transport, TransportError};

#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Bytes(Vec<u8>),
    Status(u16, String),
}

/// Replies are consumed in order per path; the last one repeats forever.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<String>>,
    posted: Mutex<Vec<Value>>,
    uploads: Mutex<Vec<FileUpload>>,
    limits: Mutex<Vec<Duration>>,
    cancel_on_upload: Option<CancelFlag>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(self, path: &str, reply: Reply) -> Self {
        self.routes
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push_back(reply);
        self
    }

    pub fn on_json(self, path: &str, value: Value) -> Self {
        self.on(path, Reply::Json(value))
    }

    /// Trip `flag` while an upload is in flight.
    pub fn cancel_on_upload(mut self, flag: CancelFlag) -> Self {
        self.cancel_on_upload = Some(flag);
        self
    }

    /// Every request as "METHOD path", in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.split_once(' ').map(|(_, p)| p) == Some(path))
            .count()
    }

    pub fn posted(&self) -> Vec<Value> {
        self.posted.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<FileUpload> {
        self.uploads.lock().unwrap().clone()
    }

    /// Time limits passed to `get_json_within`, in order.
    pub fn limits(&self) -> Vec<Duration> {
        self.limits.lock().unwrap().clone()
    }

    fn next(&self, method: &str, path: &str) -> Reply {
        self.calls.lock().unwrap().push(format!("{method} {path}"));
        let mut routes = self.routes.lock().unwrap();
        match routes.get_mut(path) {
            Some(queue) if queue.len() > 1 => queue.pop_front().unwrap(),
            Some(queue) if !queue.is_empty() => queue[0].clone(),
            _ => Reply::Status(404, format!("no route for {path}")),
        }
    }

    fn json(reply: Reply) -> Result<Value, TransportError> {
        match reply {
            Reply::Json(value) => Ok(value),
            Reply::Bytes(bytes) if bytes.is_empty() => Ok(Value::Null),
            Reply::Bytes(bytes) => {
                let body = String::from_utf8_lossy(&bytes).into_owned();
                serde_json::from_slice(&bytes).map_err(|source| TransportError::Decode { body, source })
            }
            Reply::Status(status, body) => Err(TransportError::Status { status, body }),
        }
    }
}

impl Transport for FakeTransport {
    async fn get_json(&self, path: &str) -> Result<Value, TransportError> {
        Self::json(self.next("GET", path))
    }

    async fn get_json_within(&self, path: &str, limit: Duration) -> Result<Value, TransportError> {
        self.limits.lock().unwrap().push(limit);
        Self::json(self.next("GET", path))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Value, TransportError> {
        self.posted.lock().unwrap().push(body.clone());
        Self::json(self.next("POST", path))
    }

    async fn upload_file(&self, path: &str, upload: FileUpload) -> Result<Value, TransportError> {
        self.uploads.lock().unwrap().push(upload);
        if let Some(flag) = &self.cancel_on_upload {
            flag.cancel();
        }
        Self::json(self.next("UPLOAD", path))
    }

    async fn download_to<W>(&self, path: &str, writer: &mut W) -> Result<u64, TransportError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        match self.next("DOWNLOAD", path) {
            Reply::Bytes(bytes) => {
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                Ok(bytes.len() as u64)
            }
            Reply::Json(value) => {
                let bytes = value.to_string().into_bytes();
                writer.write_all(&bytes).await?;
                writer.flush().await?;
                Ok(bytes.len() as u64)
            }
            Reply::Status(status, body) => Err(TransportError::Status { status, body }),
        }
    }

    fn base_url(&self) -> &str {
        "http://fake/api/v1"
    }
}
