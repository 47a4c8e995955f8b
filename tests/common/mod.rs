//! Scripted mock vendor: a localhost TCP listener that answers one connection
//! per scripted reply and records each request it saw.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use imagegen::config::{Endpoints, StaticCatalog};
use imagegen::credentials::Credentials;
use imagegen::dispatch::ProviderContext;
use imagegen::dispatch::http::HttpClient;
use imagegen::retry::RetryOptions;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// 1x1 transparent PNG.
pub const PNG_BYTES: &[u8] = &[
    0x89, 0x50, 0x4e, 0x47, 0x0d, 0x0a, 0x1a, 0x0a, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x48, 0x44, 0x52,
    0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0x08, 0x06, 0x00, 0x00, 0x00, 0x1f, 0x15, 0xc4,
    0x89, 0x00, 0x00, 0x00, 0x0d, 0x49, 0x44, 0x41, 0x54, 0x78, 0x9c, 0x63, 0x00, 0x01, 0x00, 0x00,
    0x05, 0x00, 0x01, 0x0d, 0x0a, 0x2d, 0xb4, 0x00, 0x00, 0x00, 0x00, 0x49, 0x45, 0x4e, 0x44, 0xae,
    0x42, 0x60, 0x82,
];

#[derive(Clone)]
pub struct Reply {
    pub status: u16,
    pub content_type: String,
    pub body: Vec<u8>,
    /// Hold the connection open without answering.
    pub hang: bool,
    /// Send the body with chunked transfer encoding and no Content-Length.
    pub chunked: bool,
}

impl Reply {
    pub fn json(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            content_type: "application/json".to_string(),
            body: body.to_string().into_bytes(),
            hang: false,
            chunked: false,
        }
    }

    pub fn bytes(status: u16, content_type: &str, body: &[u8]) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body: body.to_vec(),
            hang: false,
            chunked: false,
        }
    }

    pub fn hang() -> Self {
        Self {
            status: 200,
            content_type: "application/json".to_string(),
            body: Vec::new(),
            hang: true,
            chunked: false,
        }
    }

    pub fn chunked(status: u16, content_type: &str, body: Vec<u8>) -> Self {
        Self {
            status,
            content_type: content_type.to_string(),
            body,
            hang: false,
            chunked: true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    /// Path plus query string.
    pub target: String,
    /// Lowercased header names.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Recorded {
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn body_json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

pub struct MockVendor {
    pub url: String,
    requests: Arc<Mutex<Vec<Recorded>>>,
}

impl MockVendor {
    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request(&self, idx: usize) -> Recorded {
        self.requests()[idx].clone()
    }
}

/// Bind a TCP listener on localhost and return (listener, port).
pub async fn mock_listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Serve `replies` in order, one per connection.
pub async fn mock_vendor(replies: Vec<Reply>) -> MockVendor {
    let (listener, port) = mock_listener().await;
    let requests = Arc::new(Mutex::new(Vec::new()));
    let recorded = requests.clone();

    tokio::spawn(async move {
        for reply in replies {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let Some(req) = read_request(&mut socket).await else {
                continue;
            };
            recorded.lock().unwrap().push(req);
            if reply.hang {
                // Keep the socket alive until the client gives up.
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    drop(socket);
                });
                continue;
            }
            write_reply(&mut socket, &reply).await;
        }
    });

    MockVendor {
        url: format!("http://127.0.0.1:{port}"),
        requests,
    }
}

/// A URL nothing is listening on.
pub async fn closed_port_url() -> String {
    let (listener, port) = mock_listener().await;
    drop(listener);
    format!("http://127.0.0.1:{port}")
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(socket: &mut TcpStream) -> Option<Recorded> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut chunk))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.split("\r\n");
    let request_line = lines.next()?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next()?.to_string();
    let target = parts.next()?.to_string();
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_lowercase(), v.trim().to_string()))
        .collect();

    let mut body = buf[header_end + 4..].to_vec();
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|v| v.eq_ignore_ascii_case("chunked"));
    let content_length = headers
        .get("content-length")
        .and_then(|v| v.parse::<usize>().ok());

    loop {
        let complete = if chunked {
            find(&body, b"0\r\n\r\n").is_some()
        } else {
            body.len() >= content_length.unwrap_or(0)
        };
        if complete {
            break;
        }
        let n = tokio::time::timeout(Duration::from_secs(5), socket.read(&mut chunk))
            .await
            .ok()?
            .ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    if chunked {
        body = dechunk(&body);
    }

    Some(Recorded {
        method,
        target,
        headers,
        body,
    })
}

fn dechunk(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    let mut rest = raw;
    while let Some(line_end) = find(rest, b"\r\n") {
        let size_str = String::from_utf8_lossy(&rest[..line_end]).to_string();
        let Ok(size) = usize::from_str_radix(size_str.trim(), 16) else {
            break;
        };
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        let end = (start + size).min(rest.len());
        out.extend_from_slice(&rest[start..end]);
        rest = &rest[(end + 2).min(rest.len())..];
    }
    out
}

async fn write_reply(socket: &mut TcpStream, reply: &Reply) {
    if reply.chunked {
        write_chunked(socket, reply).await;
        return;
    }
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.content_type,
        reply.body.len()
    );
    let _ = socket.write_all(head.as_bytes()).await;
    let _ = socket.write_all(&reply.body).await;
    let _ = socket.shutdown().await;
}

async fn write_chunked(socket: &mut TcpStream, reply: &Reply) {
    let head = format!(
        "HTTP/1.1 {} X\r\nContent-Type: {}\r\nTransfer-Encoding: chunked\r\nConnection: close\r\n\r\n",
        reply.status, reply.content_type
    );
    if socket.write_all(head.as_bytes()).await.is_err() {
        return;
    }
    for chunk in reply.body.chunks(64 * 1024) {
        let size = format!("{:x}\r\n", chunk.len());
        // The client hangs up once it has seen enough.
        if socket.write_all(size.as_bytes()).await.is_err()
            || socket.write_all(chunk).await.is_err()
            || socket.write_all(b"\r\n").await.is_err()
        {
            return;
        }
    }
    let _ = socket.write_all(b"0\r\n\r\n").await;
    let _ = socket.shutdown().await;
}

pub fn fast_retry() -> RetryOptions {
    RetryOptions::default().with_base_delay(Duration::from_millis(1))
}

pub fn context(
    credentials: Credentials,
    endpoints: Endpoints,
    catalog: StaticCatalog,
) -> ProviderContext {
    ProviderContext {
        credentials: Arc::new(credentials),
        catalog: Arc::new(catalog),
        http: HttpClient::new(),
        retry: fast_retry(),
        endpoints: Arc::new(endpoints),
    }
}

/// Endpoints that route every vendor to `url`.
pub fn endpoints_at(url: &str) -> Endpoints {
    Endpoints {
        openai_base_url: url.to_string(),
        grok_api_url: format!("{url}/v1/images/generations"),
        google_vertex_base_url: Some(url.to_string()),
        google_token_uri: format!("{url}/token"),
        ..Default::default()
    }
}
