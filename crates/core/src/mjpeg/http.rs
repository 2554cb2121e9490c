//! Minimal HTTP/1.1 framing for the MJPEG endpoint.
//!
//! Only what a browser or `ffplay` needs: read one request head, answer
//! with either a single JPEG or a `multipart/x-mixed-replace` stream.

use std::io::{ErrorKind, Read};
use std::time::Instant;

/// Largest request head read before giving up on the client.
pub const MAX_REQUEST_HEAD: usize = 4096;

pub const BAD_REQUEST: &str = "HTTP/1.1 400 Bad Request\r\n\r\n";
pub const BUSY: &str = "HTTP/1.1 503 Service Unavailable\r\n\r\nServer busy\r\n";
pub const NO_FRAME: &str = "HTTP/1.1 503 Service Unavailable\r\n\r\nNo frame available\r\n";

/// Response head that opens a multipart stream.
pub fn stream_header(boundary: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: multipart/x-mixed-replace;boundary={boundary}\r\n\
         Cache-Control: no-cache, no-store, must-revalidate\r\n\
         Pragma: no-cache\r\n\
         Expires: 0\r\n\
         Connection: close\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n"
    )
}

/// Header of one multipart part. The JPEG bytes and a trailing CRLF follow.
pub fn part_header(boundary: &str, len: usize) -> String {
    format!("--{boundary}\r\nContent-Type: image/jpeg\r\nContent-Length: {len}\r\n\r\n")
}

/// Response head for a single-image reply.
pub fn snapshot_header(len: usize) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: image/jpeg\r\n\
         Content-Length: {len}\r\n\
         Cache-Control: no-cache, no-store, must-revalidate\r\n\
         Connection: close\r\n\
         Access-Control-Allow-Origin: *\r\n\
         \r\n"
    )
}

/// Method and path from the request line, e.g. `("GET", "/stream")`.
pub fn request_line(head: &str) -> Option<(&str, &str)> {
    let mut parts = head.lines().next()?.split_whitespace();
    let method = parts.next()?;
    let path = parts.next().unwrap_or("/");
    Some((method, path))
}

/// Read until the blank line ending the request head, a size cap, EOF or a
/// read timeout. A client still sending at `deadline` yields `None`, so a
/// slow trickle cannot hold the thread past it.
pub fn read_request_head<R: Read>(reader: &mut R, deadline: Instant) -> Option<String> {
    let mut head = Vec::with_capacity(512);
    let mut buf = [0u8; 512];
    loop {
        if Instant::now() >= deadline {
            return None;
        }
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                head.extend_from_slice(&buf[..n]);
                if head.windows(4).any(|w| w == b"\r\n\r\n") || head.len() >= MAX_REQUEST_HEAD {
                    break;
                }
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
    if head.is_empty() {
        return None;
    }
    Some(String::from_utf8_lossy(&head).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(2)
    }

    /// Sends one byte per read and never finishes the head.
    struct Trickle;

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            std::thread::sleep(Duration::from_millis(5));
            buf[0] = b'a';
            Ok(1)
        }
    }

    #[test]
    fn stream_header_fields() {
        let h = stream_header("frame");
        assert!(h.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(h.contains("Content-Type: multipart/x-mixed-replace;boundary=frame\r\n"));
        assert!(h.contains("Connection: close\r\n"));
        assert!(h.contains("Access-Control-Allow-Origin: *\r\n"));
        assert!(h.ends_with("\r\n\r\n"));
    }

    #[test]
    fn part_header_format() {
        assert_eq!(
            part_header("frame", 1234),
            "--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 1234\r\n\r\n"
        );
    }

    #[test]
    fn parses_request_line() {
        assert_eq!(
            request_line("GET /stream HTTP/1.1\r\nHost: x\r\n\r\n"),
            Some(("GET", "/stream"))
        );
        assert_eq!(request_line("POST / HTTP/1.1\r\n\r\n"), Some(("POST", "/")));
        assert_eq!(request_line(""), None);
    }

    #[test]
    fn reads_head_from_partial_reads() {
        let data: &[u8] = b"GET / HTTP/1.1\r\nHost: cam\r\n\r\n";
        let mut reader = std::io::Cursor::new(data);
        let head = read_request_head(&mut reader, soon()).unwrap();
        assert!(head.starts_with("GET / HTTP/1.1"));
    }

    #[test]
    fn empty_connection_has_no_head() {
        let mut reader = std::io::Cursor::new(Vec::<u8>::new());
        assert!(read_request_head(&mut reader, soon()).is_none());
    }

    #[test]
    fn trickling_client_hits_deadline() {
        let start = Instant::now();
        let head = read_request_head(&mut Trickle, start + Duration::from_millis(100));
        assert!(head.is_none());
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
