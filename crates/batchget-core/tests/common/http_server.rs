//! Tiny HTTP/1.1 file server for transfer tests.
//!
//! Serves fixed bodies by path. HEAD answers with Content-Length, GET honors
//! `Range: bytes=N-` with 206 and Content-Range, unknown paths get 404. Every
//! request is counted so tests can tell a resumed download from a full one.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Default)]
pub struct Served {
    /// Range start of every GET, 0 for a plain GET.
    pub ranges: Mutex<Vec<u64>>,
    pub heads: AtomicUsize,
}

pub struct FileServer {
    pub base: String,
    pub served: Arc<Served>,
}

impl FileServer {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path.trim_start_matches('/'))
    }
}

/// Serve `files` (path without leading slash → body) until the process exits.
pub fn start(files: &[(&str, Vec<u8>)]) -> FileServer {
    serve(files, true)
}

/// Like `start`, but every GET gets 200 and the whole body, Range or not.
pub fn start_ignoring_ranges(files: &[(&str, Vec<u8>)]) -> FileServer {
    serve(files, false)
}

fn serve(files: &[(&str, Vec<u8>)], honor_ranges: bool) -> FileServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let files: Arc<HashMap<String, Vec<u8>>> = Arc::new(
        files
            .iter()
            .map(|(path, body)| (format!("/{path}"), body.clone()))
            .collect(),
    );
    let served = Arc::new(Served::default());
    let seen = Arc::clone(&served);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let files = Arc::clone(&files);
            let seen = Arc::clone(&seen);
            thread::spawn(move || handle(stream, &files, &seen, honor_ranges));
        }
    });
    FileServer {
        base: format!("http://127.0.0.1:{port}/"),
        served,
    }
}

fn handle(
    mut stream: TcpStream,
    files: &HashMap<String, Vec<u8>>,
    served: &Served,
    honor_ranges: bool,
) {
    let _ = stream.set_read_timeout(Some(Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, path, range_start) = parse_request(request);
    let Some(body) = files.get(path) else {
        let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
        return;
    };
    let total = body.len() as u64;

    if method.eq_ignore_ascii_case("HEAD") {
        served.heads.fetch_add(1, Ordering::SeqCst);
        let head = format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\nAccept-Ranges: bytes\r\n\r\n");
        let _ = stream.write_all(head.as_bytes());
        return;
    }

    served.ranges.lock().unwrap().push(range_start.unwrap_or(0));
    let (head, slice) = match range_start.filter(|_| honor_ranges) {
        Some(start) if start < total => {
            let slice = &body[start as usize..];
            let head = format!(
                "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\nContent-Range: bytes {start}-{}/{total}\r\nAccept-Ranges: bytes\r\n\r\n",
                slice.len(),
                total - 1
            );
            (head, slice)
        }
        Some(_) => (
            format!("HTTP/1.1 416 Range Not Satisfiable\r\nContent-Length: 0\r\nContent-Range: bytes */{total}\r\n\r\n"),
            &body[0..0],
        ),
        None => (
            format!("HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n\r\n"),
            &body[..],
        ),
    };
    let _ = stream.write_all(head.as_bytes());
    let _ = stream.write_all(slice);
}

/// (method, path, start of `Range: bytes=N-`).
fn parse_request(request: &str) -> (&str, &str, Option<u64>) {
    let mut lines = request.lines();
    let mut first = lines.next().unwrap_or("").split_whitespace();
    let method = first.next().unwrap_or("");
    let path = first.next().unwrap_or("/");
    let range = lines
        .take_while(|l| !l.trim().is_empty())
        .filter_map(|l| l.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("range"))
        .and_then(|(_, value)| value.trim().strip_prefix("bytes="))
        .and_then(|bytes| bytes.split('-').next())
        .and_then(|start| start.trim().parse().ok());
    (method, path, range)
}
