//! A tiny HTTP/1.1 file server and archive builders shared by the
//! integration tests.

#![allow(dead_code)]

use std::io::{Cursor, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// How the test server behaves.
#[derive(Debug, Clone, Copy)]
pub struct ServerConfig {
    /// Honor `Range` headers and advertise `Accept-Ranges: bytes`.
    pub ranges: bool,
    /// Answer HEAD; otherwise HEAD gets 405.
    pub head: bool,
    /// Number of GET requests answered with 503 before serving normally.
    pub failures: usize,
    /// Serve only the first half of every multi-byte range.
    pub short_bodies: bool,
    /// Serve up to 64 bytes past the end of every range.
    pub overlong_bodies: bool,
    /// Answer ranged GETs other than the one-byte probe with the full resource.
    pub ignore_range_after_probe: bool,
    /// Never answer GET requests.
    pub stall: bool,
    /// Serve ranges from offset 0 whatever was asked, labelled accordingly.
    pub misplaced_ranges: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ranges: true,
            head: true,
            failures: 0,
            short_bodies: false,
            overlong_bodies: false,
            ignore_range_after_probe: false,
            stall: false,
            misplaced_ranges: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub range: Option<String>,
}

pub struct TestServer {
    addr: SocketAddr,
    requests: Arc<Mutex<Vec<Request>>>,
}

struct Shared {
    data: Vec<u8>,
    config: ServerConfig,
    failures_left: AtomicUsize,
    requests: Arc<Mutex<Vec<Request>>>,
}

impl TestServer {
    pub async fn start(data: Vec<u8>) -> Self {
        Self::with_config(data, ServerConfig::default()).await
    }

    pub async fn with_config(data: Vec<u8>, config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let shared = Arc::new(Shared {
            data,
            config,
            failures_left: AtomicUsize::new(config.failures),
            requests: Arc::clone(&requests),
        });

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, Arc::clone(&shared)));
            }
        });

        Self { addr, requests }
    }

    pub fn url(&self) -> String {
        format!("http://{}/archive.zip", self.addr)
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    /// Range header values of all GET requests, in arrival order.
    pub fn ranges(&self) -> Vec<String> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == "GET")
            .filter_map(|r| r.range)
            .collect()
    }
}

async fn serve(mut stream: TcpStream, shared: Arc<Shared>) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }

    let head = String::from_utf8_lossy(&buf).into_owned();
    let mut lines = head.lines();
    let method = lines
        .next()
        .and_then(|l| l.split_whitespace().next())
        .unwrap_or_default()
        .to_string();
    let range = lines.find_map(|line| {
        let (key, value) = line.split_once(':')?;
        key.trim()
            .eq_ignore_ascii_case("range")
            .then(|| value.trim().to_string())
    });
    shared.requests.lock().unwrap().push(Request {
        method: method.clone(),
        range: range.clone(),
    });

    if shared.config.stall && method == "GET" {
        tokio::time::sleep(Duration::from_secs(60)).await;
        return;
    }

    let response = respond(&shared, &method, range.as_deref());
    let mut out = format!("HTTP/1.1 {}\r\n", response.status);
    for (name, value) in &response.headers {
        out.push_str(&format!("{name}: {value}\r\n"));
    }
    out.push_str(&format!("Content-Length: {}\r\n", response.content_length));
    out.push_str("Connection: close\r\n\r\n");

    let _ = stream.write_all(out.as_bytes()).await;
    let _ = stream.write_all(&response.body).await;
    let _ = stream.shutdown().await;
}

struct Response {
    status: &'static str,
    headers: Vec<(&'static str, String)>,
    content_length: usize,
    body: Vec<u8>,
}

impl Response {
    fn new(status: &'static str, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            content_length: body.len(),
            body,
        }
    }
}

fn respond(shared: &Shared, method: &str, range: Option<&str>) -> Response {
    let data = &shared.data;
    let total = data.len();
    let config = shared.config;

    if method == "HEAD" {
        if !config.head {
            return Response::new("405 Method Not Allowed", Vec::new());
        }
        let mut resp = Response::new("200 OK", Vec::new());
        resp.content_length = total;
        if config.ranges {
            resp.headers.push(("Accept-Ranges", "bytes".to_string()));
        }
        return resp;
    }

    let failing = shared
        .failures_left
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok();
    if failing {
        return Response::new("503 Service Unavailable", Vec::new());
    }

    let honored = range.filter(|r| {
        config.ranges && !(config.ignore_range_after_probe && *r != "bytes=0-0")
    });
    match honored.and_then(parse_range) {
        Some((start, last)) if start < total => {
            let mut end = (last + 1).min(total);
            if config.short_bodies && end - start > 1 {
                end = start + (end - start) / 2;
            }
            if config.overlong_bodies {
                end = (end + 64).min(total);
            }
            let first = if config.misplaced_ranges { 0 } else { start };
            let last = first + (end - start) - 1;
            let mut resp = Response::new("206 Partial Content", data[first..=last].to_vec());
            resp.headers.push((
                "Content-Range",
                format!("bytes {first}-{last}/{total}"),
            ));
            resp
        }
        Some(_) => {
            let mut resp = Response::new("416 Range Not Satisfiable", Vec::new());
            resp.headers.push(("Content-Range", format!("bytes */{total}")));
            resp
        }
        None => Response::new("200 OK", data.clone()),
    }
}

fn parse_range(value: &str) -> Option<(usize, usize)> {
    let (start, last) = value.strip_prefix("bytes=")?.split_once('-')?;
    Some((start.parse().ok()?, last.parse().ok()?))
}

/// Write `files` with the `zip` crate; a name ending in '/' becomes a directory.
pub fn build_zip(files: &[(&str, &[u8], CompressionMethod)]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data, method) in files {
        let options = SimpleFileOptions::default().compression_method(*method);
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Rewrite the compression method of `name` in both its local and central headers.
pub fn patch_method(data: &mut [u8], name: &str, method: u16) {
    let name = name.as_bytes();
    // (signature, offset of the method field, offset of the name length, header size)
    let layouts: [([u8; 4], usize, usize, usize); 2] = [
        ([0x50, 0x4b, 0x03, 0x04], 8, 26, 30),
        ([0x50, 0x4b, 0x01, 0x02], 10, 28, 46),
    ];
    let mut patched = 0;
    for (signature, method_at, name_len_at, fixed) in layouts {
        for pos in 0..data.len().saturating_sub(fixed) {
            if data[pos..pos + 4] != signature {
                continue;
            }
            let len = u16::from_le_bytes([data[pos + name_len_at], data[pos + name_len_at + 1]]) as usize;
            if data.get(pos + fixed..pos + fixed + len) == Some(name) {
                data[pos + method_at..pos + method_at + 2].copy_from_slice(&method.to_le_bytes());
                patched += 1;
            }
        }
    }
    assert_eq!(patched, 2, "expected one local and one central header");
}

/// Deterministic bytes that deflate poorly.
pub fn noise(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}
