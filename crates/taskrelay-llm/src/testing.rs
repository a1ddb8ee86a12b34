//! Test doubles for execution units and HTTP endpoints
//!
//! Available to downstream crates through the `test-utils` feature.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskrelay_utils::ProviderError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::types::{ExecutionUnit, Invocation, UnitOutput};

/// Execution unit that replays a fixed script of results.
///
/// Call `n` returns script entry `n`; once the script runs out the last
/// entry repeats. An empty script answers `"ok"` forever.
pub struct ScriptedUnit {
    name: String,
    script: Vec<Result<UnitOutput, ProviderError>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedUnit {
    #[must_use]
    pub fn new(name: impl Into<String>, script: Vec<Result<UnitOutput, ProviderError>>) -> Self {
        Self {
            name: name.into(),
            script,
            delay: None,
            calls: AtomicU32::new(0),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Unit that answers each call with the next text in `texts`.
    #[must_use]
    pub fn texts<I, S>(name: impl Into<String>, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let name = name.into();
        let script = texts
            .into_iter()
            .map(|t| Ok(UnitOutput::new(t, name.as_str())))
            .collect();
        Self::new(name, script)
    }

    /// Unit that fails every call with `error`.
    #[must_use]
    pub fn failing(name: impl Into<String>, error: ProviderError) -> Self {
        Self::new(name, vec![Err(error)])
    }

    /// Sleep this long before answering each call.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every invocation received so far, in call order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations
            .lock()
            .map(|i| i.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ExecutionUnit for ScriptedUnit {
    fn provider(&self) -> &str {
        &self.name
    }

    async fn run(&self, inv: Invocation) -> Result<UnitOutput, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        if let Ok(mut invocations) = self.invocations.lock() {
            invocations.push(inv);
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match self.script.len() {
            0 => Ok(UnitOutput::new("ok", self.name.as_str())),
            len => self.script[call.min(len - 1)].clone(),
        }
    }
}

/// Canned HTTP response served by [`StubServer`].
#[derive(Debug, Clone)]
pub struct StubResponse {
    pub status: u16,
    pub body: String,
    pub headers: Vec<(String, String)>,
    pub delay: Option<Duration>,
}

impl StubResponse {
    #[must_use]
    pub fn json(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            headers: Vec::new(),
            delay: None,
        }
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Hold the response back this long after reading the request.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[derive(Debug, Default)]
struct StubLog {
    heads: Vec<String>,
    bodies: Vec<String>,
}

/// Minimal HTTP/1.1 server on a loopback port.
///
/// Serves `responses` in order, repeating the last one, with one request per
/// connection. The accept loop stops when the server is dropped.
#[derive(Debug)]
pub struct StubServer {
    addr: std::net::SocketAddr,
    log: Arc<Mutex<StubLog>>,
    task: tokio::task::JoinHandle<()>,
}

impl StubServer {
    /// Bind to `127.0.0.1:0` and start serving.
    ///
    /// # Errors
    ///
    /// Returns the bind error if no loopback port is available.
    pub async fn start(responses: Vec<StubResponse>) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let log = Arc::new(Mutex::new(StubLog::default()));
        let served = Arc::new(AtomicU32::new(0));
        let responses = Arc::new(responses);

        let task_log = Arc::clone(&log);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let index = served.fetch_add(1, Ordering::SeqCst) as usize;
                let response = match responses.len() {
                    0 => StubResponse::json(200, "{}"),
                    len => responses[index.min(len - 1)].clone(),
                };
                let log = Arc::clone(&task_log);
                tokio::spawn(async move {
                    let _ = serve_one(stream, response, log).await;
                });
            }
        });

        Ok(Self { addr, log, task })
    }

    /// Absolute URL for `path` on this server.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Request line and headers of every request received.
    #[must_use]
    pub fn requests(&self) -> Vec<String> {
        self.log.lock().map(|l| l.heads.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn request_bodies(&self) -> Vec<String> {
        self.log.lock().map(|l| l.bodies.clone()).unwrap_or_default()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.log.lock().map(|l| l.heads.len()).unwrap_or_default()
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve_one(
    mut stream: TcpStream,
    response: StubResponse,
    log: Arc<Mutex<StubLog>>,
) -> std::io::Result<()> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < head_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let body = String::from_utf8_lossy(&buf[head_end..]).to_string();

    if let Ok(mut log) = log.lock() {
        log.heads.push(head);
        log.bodies.push(body);
    }

    if let Some(delay) = response.delay {
        tokio::time::sleep(delay).await;
    }

    let reason = reqwest::StatusCode::from_u16(response.status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown");
    let mut out = format!(
        "HTTP/1.1 {} {reason}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        response.body.len()
    );
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str("\r\n");
    out.push_str(&response.body);

    stream.write_all(out.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskrelay_utils::ErrorKind;

    #[tokio::test]
    async fn test_scripted_unit_repeats_last_entry() {
        let unit = ScriptedUnit::new(
            "fake",
            vec![
                Err(ProviderError::new(ErrorKind::Network, "down")),
                Ok(UnitOutput::new("up", "fake")),
            ],
        );
        let inv = Invocation::from_prompt("x", Duration::from_secs(1));
        assert!(unit.run(inv.clone()).await.is_err());
        assert_eq!(unit.run(inv.clone()).await.unwrap().text, "up");
        assert_eq!(unit.run(inv).await.unwrap().text, "up");
        assert_eq!(unit.calls(), 3);
        assert_eq!(unit.invocations().len(), 3);
    }

    #[tokio::test]
    async fn test_stub_server_serves_in_order() {
        let server = StubServer::start(vec![
            StubResponse::json(503, ""),
            StubResponse::json(200, r#"{"ok":true}"#),
        ])
        .await
        .unwrap();

        let client = reqwest::Client::new();
        let first = client.get(server.url("/a")).send().await.unwrap();
        assert_eq!(first.status().as_u16(), 503);
        let second = client.get(server.url("/b")).send().await.unwrap();
        assert_eq!(second.status().as_u16(), 200);
        assert_eq!(second.text().await.unwrap(), r#"{"ok":true}"#);

        let requests = server.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].starts_with("GET /b"));
    }
}
