//! Minimal HTTP/1.1 server that supports HEAD and Range GET for integration tests.
//!
//! Serves one body that tests may swap (with a new ETag) between runs. Can
//! refuse HEAD, ignore ranges, cut a ranged response at a given offset,
//! truncate the first full-body GET, and slow writes down. Every request is
//! recorded, along with the peak number of concurrent GETs.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RangeServerOptions {
    /// If false, HEAD returns 405.
    pub head_allowed: bool,
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub support_ranges: bool,
    pub etag: Option<String>,
    /// Close ranged responses once they reach this absolute offset...
    pub fail_at: Option<u64>,
    /// ...this many times.
    pub fail_times: usize,
    /// Send only half of the first full-body (non-ranged) GET, then close.
    pub truncate_first_full_get: bool,
    /// Pause after every 16 KiB written.
    pub write_delay: Option<Duration>,
}

impl Default for RangeServerOptions {
    fn default() -> Self {
        Self {
            head_allowed: true,
            support_ranges: true,
            etag: None,
            fail_at: None,
            fail_times: 0,
            truncate_first_full_get: false,
            write_delay: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    /// Inclusive range from the Range header.
    pub range: Option<(u64, u64)>,
}

struct State {
    body: Mutex<Arc<Vec<u8>>>,
    etag: Mutex<Option<String>>,
    opts: RangeServerOptions,
    failures_left: AtomicUsize,
    full_gets: AtomicUsize,
    requests: Mutex<Vec<RecordedRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

#[derive(Clone)]
pub struct RangeServer {
    pub url: String,
    state: Arc<State>,
}

impl RangeServer {
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.state.requests.lock().unwrap().clone()
    }

    pub fn get_requests(&self) -> Vec<RecordedRequest> {
        self.requests().into_iter().filter(|r| r.method == "GET").collect()
    }

    pub fn clear_requests(&self) {
        self.state.requests.lock().unwrap().clear();
    }

    /// Peak number of GETs being served at once.
    pub fn max_in_flight(&self) -> usize {
        self.state.max_in_flight.load(Ordering::SeqCst)
    }

    /// Replace the served body and its ETag (a new resource version).
    pub fn replace_body(&self, body: Vec<u8>, etag: Option<&str>) {
        *self.state.body.lock().unwrap() = Arc::new(body);
        *self.state.etag.lock().unwrap() = etag.map(String::from);
    }
}

/// Starts a server in a background thread serving `body`.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let state = Arc::new(State {
        body: Mutex::new(Arc::new(body)),
        etag: Mutex::new(opts.etag.clone()),
        failures_left: AtomicUsize::new(opts.fail_times),
        full_gets: AtomicUsize::new(0),
        opts,
        requests: Mutex::new(Vec::new()),
        in_flight: AtomicUsize::new(0),
        max_in_flight: AtomicUsize::new(0),
    });
    let accept_state = Arc::clone(&state);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let state = Arc::clone(&accept_state);
            thread::spawn(move || handle(stream, &state));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/media.bin", port),
        state,
    }
}

fn read_request(stream: &mut TcpStream) -> Option<String> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    String::from_utf8(buf).ok()
}

fn handle(mut stream: TcpStream, state: &State) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(5)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(5)));
    let Some(request) = read_request(&mut stream) else {
        return;
    };
    let (method, range) = parse_request(&request);
    state.requests.lock().unwrap().push(RecordedRequest {
        method: method.to_string(),
        range,
    });

    let body = Arc::clone(&state.body.lock().unwrap());
    let etag = state.etag.lock().unwrap().clone();
    let total = body.len() as u64;
    let mut common = String::from("Connection: close\r\n");
    if state.opts.support_ranges {
        common.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(tag) = &etag {
        common.push_str(&format!("ETag: \"{}\"\r\n", tag));
    }

    if method.eq_ignore_ascii_case("HEAD") {
        if !state.opts.head_allowed {
            let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
            return;
        }
        let response = format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n", total, common);
        let _ = stream.write_all(response.as_bytes());
        return;
    }
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nConnection: close\r\nContent-Length: 0\r\n\r\n");
        return;
    }

    let now = state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    state.max_in_flight.fetch_max(now, Ordering::SeqCst);
    serve_get(&mut stream, state, &body, range, &common);
    state.in_flight.fetch_sub(1, Ordering::SeqCst);
}

fn serve_get(stream: &mut TcpStream, state: &State, body: &[u8], range: Option<(u64, u64)>, common: &str) {
    let total = body.len() as u64;
    let ranged = state.opts.support_ranges && range.is_some();

    let (head, start, end_excl) = match range.filter(|_| ranged) {
        Some((start, end_incl)) => {
            let end_incl = end_incl.min(total.saturating_sub(1));
            if start > end_incl {
                let response = format!(
                    "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n{}\r\n",
                    total, common
                );
                let _ = stream.write_all(response.as_bytes());
                return;
            }
            (
                format!(
                    "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {}-{}/{}\r\n{}\r\n",
                    end_incl + 1 - start,
                    start,
                    end_incl,
                    total,
                    common
                ),
                start,
                end_incl + 1,
            )
        }
        None => (
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n{}\r\n", total, common),
            0,
            total,
        ),
    };
    if stream.write_all(head.as_bytes()).is_err() {
        return;
    }

    // Where this response gets cut short, if anywhere.
    let mut cut = end_excl;
    if ranged {
        if let Some(at) = state.opts.fail_at {
            if start <= at && at < end_excl && take_one(&state.failures_left) {
                cut = at;
            }
        }
    } else if state.opts.truncate_first_full_get
        && state.full_gets.fetch_add(1, Ordering::SeqCst) == 0
    {
        cut = total / 2;
    }

    let mut pos = start;
    while pos < cut {
        let next = (pos + 16 * 1024).min(cut);
        if stream.write_all(&body[pos as usize..next as usize]).is_err() {
            return;
        }
        pos = next;
        if let Some(d) = state.opts.write_delay {
            thread::sleep(d);
        }
    }
    let _ = stream.flush();
}

fn take_one(counter: &AtomicUsize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Returns (method, optional (start, end_inclusive) for Range: bytes=X-Y).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(range_spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = range_spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end = b.trim();
                        let end_incl = if end.is_empty() {
                            u64::MAX
                        } else {
                            end.parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}
