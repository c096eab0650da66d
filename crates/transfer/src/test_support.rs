//! In-process HTTP server used by the transfer tests.
//!
//! Speaks just enough HTTP/1.1 for reqwest: one request per connection,
//! `Content-Length` bodies, `Connection: close` replies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone, Default)]
pub(crate) struct Request {
    pub method: String,
    pub path: String,
    pub query: String,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Omit `Content-Length` and delimit the body by closing the connection.
    pub unsized_body: bool,
}

impl Reply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into(),
            unsized_body: false,
        }
    }

    pub fn header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }
}

pub(crate) trait Handler: Send + Sync + 'static {
    fn handle(&self, req: &Request) -> Reply;

    /// Called when the client went away before sending the whole body.
    fn partial_body(&self, _req: &Request) {}
}

/// Adapts a plain closure into a [`Handler`].
pub(crate) struct FnHandler<F>(pub F);

impl<F> Handler for FnHandler<F>
where
    F: Fn(&Request) -> Reply + Send + Sync + 'static,
{
    fn handle(&self, req: &Request) -> Reply {
        (self.0)(req)
    }
}

impl<H: Handler> Handler for Arc<H> {
    fn handle(&self, req: &Request) -> Reply {
        (**self).handle(req)
    }

    fn partial_body(&self, req: &Request) {
        (**self).partial_body(req)
    }
}

pub(crate) struct MockServer {
    addr: String,
    requests: Arc<Mutex<Vec<Request>>>,
    handle: tokio::task::JoinHandle<()>,
}

impl MockServer {
    pub async fn start(handler: impl Handler) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Arc<dyn Handler> = Arc::new(handler);

        let log = Arc::clone(&requests);
        let handle = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                tokio::spawn(serve_connection(stream, handler, log));
            }
        });

        Self {
            addr,
            requests,
            handle,
        }
    }

    pub async fn start_fn<F>(f: F) -> Self
    where
        F: Fn(&Request) -> Reply + Send + Sync + 'static,
    {
        Self::start(FnHandler(f)).await
    }

    /// `host:port` of the server.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Completed requests, in arrival order.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with_method(&self, method: &str) -> Vec<Request> {
        self.requests()
            .into_iter()
            .filter(|r| r.method == method)
            .collect()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    handler: Arc<dyn Handler>,
    log: Arc<Mutex<Vec<Request>>>,
) {
    let mut buf = Vec::new();
    let mut tmp = vec![0u8; 64 * 1024];
    let head_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n", 0) {
            break pos;
        }
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => return,
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split_whitespace();
    let method = parts.next().unwrap_or_default().to_string();
    let target = parts.next().unwrap_or_default();
    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), q.to_string()),
        None => (target.to_string(), String::new()),
    };
    let headers: HashMap<String, String> = lines
        .filter_map(|l| l.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect();

    let mut req = Request {
        method,
        path,
        query,
        headers,
        body: buf[head_end + 4..].to_vec(),
    };

    let expected: usize = req
        .header("content-length")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);
    while req.body.len() < expected {
        match stream.read(&mut tmp).await {
            Ok(0) | Err(_) => {
                handler.partial_body(&req);
                return;
            }
            Ok(n) => req.body.extend_from_slice(&tmp[..n]),
        }
    }

    let reply = handler.handle(&req);
    let is_head = req.method == "HEAD";
    log.lock().unwrap().push(req);

    let mut out = format!("HTTP/1.1 {} {}\r\n", reply.status, reason(reply.status));
    for (k, v) in &reply.headers {
        out.push_str(&format!("{k}: {v}\r\n"));
    }
    if !reply.unsized_body && !reply.has_header("content-length") {
        out.push_str(&format!("Content-Length: {}\r\n", reply.body.len()));
    }
    out.push_str("Connection: close\r\n\r\n");

    let _ = stream.write_all(out.as_bytes()).await;
    if !is_head {
        let _ = stream.write_all(&reply.body).await;
    }
    let _ = stream.shutdown().await;
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        206 => "Partial Content",
        404 => "Not Found",
        416 => "Range Not Satisfiable",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

pub(crate) fn find(hay: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if from >= hay.len() {
        return None;
    }
    hay[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Deterministic pseudo-random test payload.
pub(crate) fn payload(len: usize) -> Vec<u8> {
    let mut x: u32 = 0x1234_5678;
    (0..len)
        .map(|_| {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            (x >> 24) as u8
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Range-capable file host
// ---------------------------------------------------------------------------

/// Serves one blob at any path, with configurable range support.
pub(crate) struct FileHost {
    pub data: Vec<u8>,
    /// Answer `Range` requests with 206.
    pub ranges: bool,
    /// Advertise `Accept-Ranges: bytes` on plain HEAD.
    pub accept_ranges_header: bool,
    /// Send `Content-Length` (false makes the length unknown).
    pub sized: bool,
    pub disposition: Option<String>,
    /// Number of upcoming GETs answered with 503.
    pub failures: AtomicUsize,
    /// Answer every GET with this status.
    pub fixed_status: Option<u16>,
    /// Number of upcoming GETs whose body stops halfway through the
    /// declared `Content-Length`.
    pub cut_bodies: AtomicUsize,
}

impl FileHost {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data,
            ranges: true,
            accept_ranges_header: true,
            sized: true,
            disposition: None,
            failures: AtomicUsize::new(0),
            fixed_status: None,
            cut_bodies: AtomicUsize::new(0),
        }
    }

    fn full(&self) -> Reply {
        let mut reply = Reply::new(200, self.data.clone());
        if self.ranges && self.accept_ranges_header {
            reply = reply.header("Accept-Ranges", "bytes");
        }
        if let Some(d) = &self.disposition {
            reply = reply.header("Content-Disposition", d);
        }
        if !self.sized {
            reply.unsized_body = true;
        }
        reply
    }
}

impl Handler for FileHost {
    fn handle(&self, req: &Request) -> Reply {
        let mut reply = self.respond(req);
        if req.method == "GET"
            && reply.body.len() > 1
            && take_one(&self.cut_bodies)
        {
            let declared = reply.body.len();
            reply.body.truncate(declared / 2);
            reply = reply.header("Content-Length", declared);
        }
        reply
    }
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FileHost {
    fn respond(&self, req: &Request) -> Reply {
        if req.method == "GET" {
            if let Some(status) = self.fixed_status {
                return Reply::new(status, "nope");
            }
            if take_one(&self.failures) {
                return Reply::new(503, "busy");
            }
        }

        let total = self.data.len();
        let range = req.header("range").filter(|_| self.ranges).and_then(parse_range);
        let Some((start, end)) = range else {
            return self.full();
        };
        if start >= total {
            return Reply::new(416, Vec::new()).header("Content-Range", format!("bytes */{total}"));
        }
        let end = end.unwrap_or(total - 1).min(total - 1);
        let mut reply = Reply::new(206, self.data[start..=end].to_vec())
            .header("Content-Range", format!("bytes {start}-{end}/{total}"));
        if let Some(d) = &self.disposition {
            reply = reply.header("Content-Disposition", d);
        }
        reply
    }
}

fn parse_range(value: &str) -> Option<(usize, Option<usize>)> {
    let range = value.strip_prefix("bytes=")?;
    let (a, b) = range.split_once('-')?;
    let start = a.trim().parse().ok()?;
    let end = if b.trim().is_empty() {
        None
    } else {
        Some(b.trim().parse().ok()?)
    };
    Some((start, end))
}

// ---------------------------------------------------------------------------
// Upload ingest server
// ---------------------------------------------------------------------------

/// Emulates `/file/` multipart ingest and `/resume/check/`.
///
/// Received file bytes are written at `resume_from + i`; the durable
/// checkpoint is the contiguous stored length.
#[derive(Default)]
pub(crate) struct Ingest {
    pub content: Mutex<Vec<u8>>,
    pub file_id: u64,
    /// Replaces the success reply body.
    pub reply: Mutex<Option<String>>,
    /// Replaces the reported checkpoint.
    pub checkpoint: Mutex<Option<u64>>,
    /// Fail this many upcoming POSTs with 503 after reading the body.
    pub failures: AtomicUsize,
    /// Text fields of every completed upload POST.
    pub fields: Mutex<Vec<HashMap<String, String>>>,
    /// File bytes carried by every completed upload POST.
    pub file_bytes: Mutex<Vec<usize>>,
    pub checkpoint_queries: AtomicUsize,
}

impl Ingest {
    pub fn new(file_id: u64) -> Self {
        Self {
            file_id,
            ..Default::default()
        }
    }

    fn store(&self, offset: usize, data: &[u8]) {
        let mut content = self.content.lock().unwrap();
        if content.len() < offset {
            return;
        }
        let end = offset + data.len();
        if content.len() < end {
            content.resize(end, 0);
        }
        content[offset..end].copy_from_slice(data);
    }
}

impl Handler for Ingest {
    fn handle(&self, req: &Request) -> Reply {
        match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/file/") => {
                let Some(form) = Multipart::parse(req, true) else {
                    return Reply::new(400, "bad form");
                };
                if take_one(&self.failures) {
                    return Reply::new(503, "busy");
                }
                let offset = form.resume_from();
                self.store(offset, form.file);
                self.file_bytes.lock().unwrap().push(form.file.len());
                self.fields.lock().unwrap().push(form.fields.clone());
                let body = self
                    .reply
                    .lock()
                    .unwrap()
                    .clone()
                    .unwrap_or_else(|| format!(r#"<resp res="1" fileid="{}" />"#, self.file_id));
                Reply::new(200, body)
            }
            ("GET", "/resume/check/") => {
                self.checkpoint_queries.fetch_add(1, Ordering::SeqCst);
                let size = self
                    .checkpoint
                    .lock()
                    .unwrap()
                    .unwrap_or(self.content.lock().unwrap().len() as u64);
                Reply::new(200, format!(r#"<resp file_size="{size}" />"#))
            }
            _ => Reply::new(404, "not found"),
        }
    }

    fn partial_body(&self, req: &Request) {
        if let Some(form) = Multipart::parse(req, false) {
            self.store(form.resume_from(), form.file);
        }
    }
}

pub(crate) struct Multipart<'a> {
    pub fields: HashMap<String, String>,
    pub file: &'a [u8],
    pub file_name: Option<String>,
}

impl<'a> Multipart<'a> {
    /// Parses a form body; an incomplete body yields the file bytes seen
    /// so far, minus a tail that could belong to the closing boundary.
    pub fn parse(req: &'a Request, complete: bool) -> Option<Self> {
        let boundary = req
            .header("content-type")?
            .split("boundary=")
            .nth(1)?
            .trim_matches('"')
            .to_string();
        let delim = format!("--{boundary}");
        let body = &req.body[..];

        let mut fields = HashMap::new();
        let mut file: &[u8] = &[];
        let mut file_name = None;
        let mut pos = find(body, delim.as_bytes(), 0)?;
        loop {
            let after = pos + delim.len();
            if body.get(after..after + 2) == Some(&b"--"[..]) || after + 2 > body.len() {
                break;
            }
            let headers_start = after + 2;
            let headers_end = find(body, b"\r\n\r\n", headers_start)?;
            let headers = String::from_utf8_lossy(&body[headers_start..headers_end]).into_owned();
            let name = disposition_param(&headers, "name")?;
            let data_start = headers_end + 4;
            let closing = format!("\r\n{delim}");
            let (data, next) = match find(body, closing.as_bytes(), data_start) {
                Some(end) => (&body[data_start..end], Some(end + 2)),
                None if !complete => {
                    let safe_end = body.len().saturating_sub(closing.len() + 4).max(data_start);
                    (&body[data_start..safe_end], None)
                }
                None => return None,
            };
            if name == "file" {
                file = data;
                file_name = disposition_param(&headers, "filename");
            } else {
                fields.insert(name, String::from_utf8_lossy(data).into_owned());
            }
            match next {
                Some(n) => pos = n,
                None => break,
            }
        }

        Some(Self {
            fields,
            file,
            file_name,
        })
    }

    pub fn resume_from(&self) -> usize {
        self.fields
            .get("resume_from")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
    }
}

fn disposition_param(headers: &str, param: &str) -> Option<String> {
    let needle = format!("{param}=\"");
    headers
        .split(';')
        .map(str::trim)
        .find_map(|p| p.strip_prefix(needle.as_str()))
        .map(|rest| rest.trim_end_matches(|c| c == '"' || c == '\r' || c == '\n'))
        .map(|v| v.split('"').next().unwrap_or_default().to_string())
}
