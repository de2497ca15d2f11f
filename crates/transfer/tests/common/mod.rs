//! In-memory FileHeap service for end-to-end tests.
//!
//! Speaks just enough HTTP/1.1 for the client: one request per connection,
//! `Content-Length` bodies, `Connection: close` responses.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::Utc;
use fileheap_api::{Dataset, Digest, FileInfo, ManifestPage};
use fileheap_client::{BatchLimits, Client, ClientConfig, RetryPolicy};
use parking_lot::Mutex;
use percent_encoding::percent_decode_str;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

const RESPONSE_BOUNDARY: &str = "fakeheapboundary";

#[derive(Default)]
struct State {
    datasets: BTreeMap<String, BTreeMap<String, Vec<u8>>>,
    blobs: HashMap<String, Vec<u8>>,
    uploads: HashMap<String, Vec<u8>>,
    next_id: usize,
    requests: Vec<String>,
    ranges: Vec<Option<String>>,
    upload_batch_sizes: Vec<usize>,
    truncate_next_read: Option<usize>,
    fail_batch_uploads: bool,
    /// Status returned for every file PUT.
    fail_puts: Option<u16>,
}

pub struct FakeServer {
    addr: SocketAddr,
    state: Arc<Mutex<State>>,
    handle: JoinHandle<()>,
}

impl FakeServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(Mutex::new(State::default()));

        let shared = state.clone();
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let state = shared.clone();
                tokio::spawn(async move { serve(stream, state).await });
            }
        });

        Self {
            addr,
            state,
            handle,
        }
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Client with fast retries and the given batch limits.
    pub fn client(&self, limits: BatchLimits) -> Client {
        self.client_with_retry(
            limits,
            RetryPolicy {
                min_wait: std::time::Duration::from_millis(1),
                max_wait: std::time::Duration::from_millis(10),
                max_attempts: 2,
            },
        )
    }

    pub fn client_with_retry(&self, limits: BatchLimits, retry: RetryPolicy) -> Client {
        let mut config = ClientConfig::new(self.address());
        config.limits = limits;
        config.retry = retry;
        Client::with_config(config).unwrap()
    }

    pub fn create_dataset(&self, id: &str) {
        self.state
            .lock()
            .datasets
            .entry(id.to_string())
            .or_default();
    }

    pub fn put_file(&self, dataset: &str, path: &str, data: &[u8]) {
        let mut state = self.state.lock();
        state.blobs.insert(Digest::compute(data).encode(), data.to_vec());
        state
            .datasets
            .entry(dataset.to_string())
            .or_default()
            .insert(path.to_string(), data.to_vec());
    }

    pub fn file(&self, dataset: &str, path: &str) -> Option<Vec<u8>> {
        self.state
            .lock()
            .datasets
            .get(dataset)
            .and_then(|files| files.get(path).cloned())
    }

    pub fn file_count(&self, dataset: &str) -> usize {
        self.state
            .lock()
            .datasets
            .get(dataset)
            .map_or(0, |files| files.len())
    }

    /// Requests seen so far, as `METHOD /path?query`.
    pub fn requests(&self) -> Vec<String> {
        self.state.lock().requests.clone()
    }

    /// Number of requests whose line starts with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|r| r.starts_with(prefix)).count()
    }

    pub fn clear_requests(&self) {
        let mut state = self.state.lock();
        state.requests.clear();
        state.ranges.clear();
    }

    /// `Range` headers of file reads, in order.
    pub fn ranges(&self) -> Vec<Option<String>> {
        self.state.lock().ranges.clone()
    }

    /// Part counts of multipart uploads, in arrival order.
    pub fn upload_batch_sizes(&self) -> Vec<usize> {
        self.state.lock().upload_batch_sizes.clone()
    }

    /// Cuts the next file read short after `n` body bytes.
    pub fn truncate_next_read(&self, n: usize) {
        self.state.lock().truncate_next_read = Some(n);
    }

    pub fn fail_batch_uploads(&self) {
        self.state.lock().fail_batch_uploads = true;
    }

    /// Answers every single-file PUT with `status`.
    pub fn fail_puts_with(&self, status: u16) {
        self.state.lock().fail_puts = Some(status);
    }
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct Request {
    method: String,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl Request {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn query_param(&self, name: &str) -> Option<String> {
        self.query
            .split('&')
            .filter_map(|p| p.split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| decode(&v.replace('+', " ")))
    }
}

#[derive(Default)]
struct Response {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    /// Send only this many body bytes, then drop the connection.
    truncate: Option<usize>,
}

impl Response {
    fn new(status: u16) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    fn json(status: u16, body: Vec<u8>) -> Self {
        Self::new(status)
            .header("Content-Type", "application/json")
            .body(body)
    }

    fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "code": status, "message": message });
        Self::json(status, body.to_string().into_bytes())
    }

    fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }
}

async fn serve(mut stream: TcpStream, state: Arc<Mutex<State>>) {
    let Some(request) = read_request(&mut stream).await else {
        return;
    };

    let is_head = request.method == "HEAD";
    let response = handle(&state, request);

    let mut head = format!("HTTP/1.1 {} Fake\r\n", response.status);
    for (k, v) in &response.headers {
        head.push_str(&format!("{k}: {v}\r\n"));
    }
    head.push_str(&format!(
        "Content-Length: {}\r\nConnection: close\r\n\r\n",
        response.body.len()
    ));

    let _ = stream.write_all(head.as_bytes()).await;
    if !is_head {
        let end = response
            .truncate
            .unwrap_or(response.body.len())
            .min(response.body.len());
        let _ = stream.write_all(&response.body[..end]).await;
    }
    let _ = stream.shutdown().await;
}

fn handle(state: &Mutex<State>, req: Request) -> Response {
    let mut state = state.lock();
    let line = if req.query.is_empty() {
        format!("{} {}", req.method, req.path)
    } else {
        format!("{} {}?{}", req.method, req.path, req.query)
    };
    state.requests.push(line);

    let method = req.method.as_str();
    if req.path == "/datasets" && method == "POST" {
        state.next_id += 1;
        let id = format!("ds{}", state.next_id);
        state.datasets.insert(id.clone(), BTreeMap::new());
        return dataset_json(&id);
    }
    if req.path == "/uploads" && method == "POST" {
        state.next_id += 1;
        let id = format!("up{}", state.next_id);
        state.uploads.insert(id.clone(), Vec::new());
        return Response::new(201)
            .header("Upload-ID", &id)
            .header("Upload-Expires", "Tue, 01 Jun 2100 00:00:00 GMT");
    }
    if let Some(id) = req.path.strip_prefix("/uploads/") {
        if method == "PATCH" {
            return patch_upload(&mut state, id, &req);
        }
    }

    let Some(rest) = req.path.strip_prefix("/datasets/") else {
        return Response::error(404, "not found");
    };
    let (id, sub) = rest.split_once('/').unwrap_or((rest, ""));
    let id = id.to_string();
    if !state.datasets.contains_key(&id) {
        return Response::error(404, "dataset not found");
    }

    match (method, sub) {
        ("GET", "") => dataset_json(&id),
        ("PATCH", "") => Response::new(200),
        ("DELETE", "") => {
            state.datasets.remove(&id);
            Response::new(200)
        }
        ("GET", "manifest") => manifest(&state, &id, &req),
        ("POST", "batch/upload") => batch_upload(&mut state, &id, &req),
        ("POST", "batch/delete") => {
            let files = state.datasets.entry(id).or_default();
            for (headers, _) in parse_multipart(&req) {
                if let Some(path) = find_header(&headers, "Path") {
                    files.remove(path);
                }
            }
            Response::new(200)
        }
        ("POST", "batch/download") => batch_download(&state, &id, &req),
        (_, sub) if sub.starts_with("files/") => {
            let path = decode(&sub["files/".len()..]);
            file_request(&mut state, &id, &path, &req)
        }
        _ => Response::error(405, "method not allowed"),
    }
}

fn dataset_json(id: &str) -> Response {
    let dataset = Dataset {
        id: id.to_string(),
        created: Utc::now(),
        read_only: false,
    };
    Response::json(200, serde_json::to_vec(&dataset).unwrap())
}

fn manifest(state: &State, id: &str, req: &Request) -> Response {
    let prefix = req.query_param("path").unwrap_or_default();
    let start: usize = req
        .query_param("cursor")
        .filter(|c| !c.is_empty())
        .map_or(0, |c| c.parse().unwrap());
    let limit: usize = req
        .query_param("limit")
        .map_or(1000, |l| l.parse().unwrap());

    let matching: Vec<FileInfo> = state.datasets[id]
        .iter()
        .filter(|(path, _)| path.starts_with(&prefix))
        .map(|(path, data)| {
            FileInfo::new(path.clone(), data.len() as u64).with_digest(Digest::compute(data))
        })
        .collect();

    let end = (start + limit).min(matching.len());
    let page = ManifestPage {
        files: matching[start.min(end)..end].to_vec(),
        cursor: if end < matching.len() {
            end.to_string()
        } else {
            String::new()
        },
    };
    Response::json(200, serde_json::to_vec(&page).unwrap())
}

fn file_request(state: &mut State, id: &str, path: &str, req: &Request) -> Response {
    match req.method.as_str() {
        "HEAD" | "GET" => {
            let Some(data) = state.datasets[id].get(path).cloned() else {
                return Response::error(404, "file not found");
            };
            let digest = Digest::compute(&data).encode();
            if req.method == "HEAD" {
                return Response::new(200).header("Digest", &digest).body(data);
            }

            let range = req.header("Range").map(str::to_string);
            state.ranges.push(range.clone());
            let (status, body) = match range.as_deref().and_then(parse_range) {
                Some((start, end)) => {
                    let end = end.map_or(data.len(), |e| (e + 1).min(data.len()));
                    (206, data[start.min(end)..end].to_vec())
                }
                None => (200, data),
            };

            let mut resp = Response::new(status).header("Digest", &digest).body(body);
            resp.truncate = state.truncate_next_read.take();
            resp
        }
        "PUT" => {
            if let Some(status) = state.fail_puts {
                return Response::error(status, "storage unavailable");
            }
            let data = match req.header("Digest") {
                Some(digest) if req.body.is_empty() => match state.blobs.get(digest) {
                    Some(blob) => blob.clone(),
                    None => return Response::error(400, "unknown digest"),
                },
                _ => req.body.clone(),
            };
            state.blobs.insert(Digest::compute(&data).encode(), data.clone());
            state
                .datasets
                .entry(id.to_string())
                .or_default()
                .insert(path.to_string(), data);
            Response::new(200)
        }
        "DELETE" => match state.datasets.entry(id.to_string()).or_default().remove(path) {
            Some(_) => Response::new(200),
            None => Response::error(404, "file not found"),
        },
        _ => Response::error(405, "method not allowed"),
    }
}

fn batch_upload(state: &mut State, id: &str, req: &Request) -> Response {
    if state.fail_batch_uploads {
        return Response::error(400, "dataset is sealed");
    }

    let parts = parse_multipart(req);
    state.upload_batch_sizes.push(parts.len());
    for (headers, body) in parts {
        let Some(path) = find_header(&headers, "Path") else {
            return Response::error(400, "part has no path");
        };
        state.blobs.insert(Digest::compute(&body).encode(), body.clone());
        state
            .datasets
            .entry(id.to_string())
            .or_default()
            .insert(path.to_string(), body);
    }
    Response::new(200)
}

fn batch_download(state: &State, id: &str, req: &Request) -> Response {
    let files = &state.datasets[id];
    let mut body = Vec::new();
    for (i, (headers, _)) in parse_multipart(req).iter().enumerate() {
        let digest = find_header(headers, "Digest").unwrap_or_default();
        let Some(data) = files
            .values()
            .find(|data| Digest::compute(data).encode() == digest)
        else {
            return Response::error(404, "file not found");
        };
        if i > 0 {
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(
            format!("--{RESPONSE_BOUNDARY}\r\nDigest: {digest}\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(data);
    }
    body.extend_from_slice(format!("\r\n--{RESPONSE_BOUNDARY}--\r\n").as_bytes());

    Response::new(200)
        .header(
            "Content-Type",
            &format!("multipart/mixed; boundary={RESPONSE_BOUNDARY}"),
        )
        .body(body)
}

fn patch_upload(state: &mut State, id: &str, req: &Request) -> Response {
    let length: usize = req
        .header("Upload-Length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    let offset: usize = req
        .header("Upload-Offset")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let Some(data) = state.uploads.get_mut(id) else {
        return Response::error(404, "upload not found");
    };
    if offset != data.len() {
        return Response::error(400, "offset mismatch");
    }
    data.extend_from_slice(&req.body);
    if data.len() < length {
        return Response::new(200);
    }

    let data = data.clone();
    let digest = Digest::compute(&data).encode();
    state.blobs.insert(digest.clone(), data);
    Response::new(200).header("Digest", &digest)
}

fn parse_range(value: &str) -> Option<(usize, Option<usize>)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some((start, end))
}

fn find_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

fn decode(s: &str) -> String {
    percent_decode_str(s).decode_utf8_lossy().into_owned()
}

/// Splits a `multipart/mixed` request body into headers and bodies.
fn parse_multipart(req: &Request) -> Vec<(Vec<(String, String)>, Vec<u8>)> {
    let content_type = req.header("Content-Type").unwrap_or_default();
    let boundary = content_type
        .split("boundary=")
        .nth(1)
        .unwrap_or_default()
        .trim_matches('"');
    let delimiter = format!("--{boundary}").into_bytes();
    let separator = format!("\r\n--{boundary}").into_bytes();

    let mut parts = Vec::new();
    let Some(start) = find(&req.body, &delimiter) else {
        return parts;
    };
    let mut rest = &req.body[start + delimiter.len()..];
    while !rest.starts_with(b"--") {
        rest = &rest[2..];
        let header_end = find(rest, b"\r\n\r\n").map_or(0, |i| i + 2);
        let headers = String::from_utf8_lossy(&rest[..header_end])
            .split("\r\n")
            .filter_map(|l| l.split_once(':'))
            .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            .collect();
        rest = &rest[header_end + 2..];

        let end = find(rest, &separator).unwrap_or(rest.len());
        parts.push((headers, rest[..end].to_vec()));
        rest = &rest[(end + separator.len()).min(rest.len())..];
        if rest.is_empty() {
            break;
        }
    }
    parts
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 16 * 1024];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_string();
    let target = request_line.next()?.to_string();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target, String::new()),
    };
    let headers: Vec<(String, String)> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .collect();

    let length = headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end + 4..].to_vec();
    while body.len() < length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }

    Some(Request {
        method,
        path,
        query,
        headers,
        body,
    })
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
