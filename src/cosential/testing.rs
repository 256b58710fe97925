//! In-memory [`ApiSession`] for exercising the sync engine without a server.

use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};

use serde_json::Value;

use super::error::ApiError;
use super::session::ApiSession;

enum Route {
    /// Returned as-is for every request.
    Json(Value),
    /// Sliced by the `FROM`/`SIZE` query parameters.
    Feed(Vec<Value>),
    Status(u16),
}

/// A recorded request: path plus query pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Request {
    pub path: String,
    pub query: Vec<(String, String)>,
}

#[derive(Default)]
pub(crate) struct FakeSession {
    routes: HashMap<String, Route>,
    requests: Mutex<Vec<Request>>,
}

impl FakeSession {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn json(mut self, path: &str, body: Value) -> Self {
        self.routes.insert(path.to_string(), Route::Json(body));
        self
    }

    pub fn feed(mut self, path: &str, items: Vec<Value>) -> Self {
        self.routes.insert(path.to_string(), Route::Feed(items));
        self
    }

    pub fn status(mut self, path: &str, status: u16) -> Self {
        self.routes.insert(path.to_string(), Route::Status(status));
        self
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requested_paths(&self) -> Vec<String> {
        self.requests().into_iter().map(|r| r.path).collect()
    }
}

fn query_usize(query: &[(&str, String)], key: &str) -> Option<usize> {
    query
        .iter()
        .find(|(k, _)| *k == key)
        .and_then(|(_, v)| v.parse().ok())
}

#[async_trait::async_trait]
impl ApiSession for FakeSession {
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, ApiError> {
        self.requests.lock().unwrap().push(Request {
            path: path.to_string(),
            query: query
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        });

        match self.routes.get(path) {
            Some(Route::Json(body)) => Ok(body.clone()),
            Some(Route::Feed(items)) => {
                let from = query_usize(query, "FROM").unwrap_or(0).min(items.len());
                let size = query_usize(query, "SIZE").unwrap_or(items.len());
                let end = from.saturating_add(size).min(items.len());
                Ok(Value::Array(items[from..end].to_vec()))
            }
            Some(Route::Status(status)) => Err(ApiError::HttpStatus {
                status: *status,
                path: path.to_string(),
            }),
            None => Err(ApiError::HttpStatus {
                status: 404,
                path: path.to_string(),
            }),
        }
    }
}

/// `n` change-feed items with ids `1..=n` and descending versions.
pub(crate) fn numbered_feed(n: usize) -> Vec<Value> {
    (1..=n)
        .map(|i| serde_json::json!({"Id": i, "Version": (n - i + 1) as i64}))
        .collect()
}

/// Captures formatted log output for the current thread while the returned
/// guard lives. Tests run on tokio's current-thread runtime, so every event
/// of the awaited future lands here.
#[derive(Clone, Default)]
pub(crate) struct LogCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
}

pub(crate) struct LogCaptureWriter {
    buffer: Arc<Mutex<Vec<u8>>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogCapture {
    type Writer = LogCaptureWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogCaptureWriter {
            buffer: self.buffer.clone(),
        }
    }
}

impl Write for LogCaptureWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buffer.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Install as the thread's default subscriber, recording `level` and above.
    pub fn install(&self, level: tracing::Level) -> tracing::subscriber::DefaultGuard {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(level)
            .with_ansi(false)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines(&self) -> Vec<String> {
        let bytes = self.buffer.lock().unwrap().clone();
        String::from_utf8_lossy(&bytes)
            .lines()
            .map(str::to_string)
            .collect()
    }
}
