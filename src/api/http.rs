//! Minimal HTTP/1.1 request parsing and response writing over `TcpStream`.

use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::time::Duration;

const MAX_HEADER_BYTES: usize = 16 * 1024;

#[derive(Debug)]
pub(crate) struct HttpRequest {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    pub headers: HashMap<String, String>,
    /// Body bytes that arrived together with the headers.
    pub body_prefix: Vec<u8>,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn content_length(&self) -> Option<Result<u64>> {
        self.header("content-length").map(|v| {
            v.parse::<u64>()
                .map_err(|_| anyhow!("invalid content-length {v:?}"))
        })
    }

    /// Path segments after `prefix`, e.g. `/progress/clip.mp4` -> `clip.mp4`.
    pub fn path_param(&self, prefix: &str) -> Option<String> {
        let rest = self.path.strip_prefix(prefix)?;
        if rest.is_empty() || rest.contains('/') {
            return None;
        }
        Some(percent_decode(rest))
    }
}

pub(crate) fn read_request(stream: &mut TcpStream) -> Result<HttpRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(5)))?;
    let mut buf = [0u8; 4096];
    let mut data = Vec::new();
    let header_end = loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            return Err(anyhow!("connection closed before request headers"));
        }
        data.extend_from_slice(&buf[..n]);
        if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos;
        }
        if data.len() > MAX_HEADER_BYTES {
            return Err(anyhow!("request headers too large"));
        }
    };
    let body_prefix = data[header_end + 4..].to_vec();
    let text = String::from_utf8_lossy(&data[..header_end]);
    let mut lines = text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| anyhow!("empty request"))?;
    let mut parts = request_line.split_whitespace();
    let method = parts.next().ok_or_else(|| anyhow!("missing method"))?;
    let raw_path = parts.next().ok_or_else(|| anyhow!("missing path"))?;
    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(':') {
            headers.insert(k.trim().to_lowercase(), v.trim().to_string());
        }
    }
    let (path, query) = match raw_path.split_once('?') {
        Some((path, query)) => (path, parse_query(query)),
        None => (raw_path, HashMap::new()),
    };
    Ok(HttpRequest {
        method: method.to_string(),
        path: path.to_string(),
        query,
        headers,
        body_prefix,
    })
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

pub(crate) fn percent_decode(value: &str) -> String {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => out.push(b' '),
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(b) => {
                        out.push(b);
                        i += 2;
                    }
                    None => out.push(b'%'),
                }
            }
            b => out.push(b),
        }
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn status_line(status: u16) -> &'static str {
    match status {
        200 => "HTTP/1.1 200 OK",
        204 => "HTTP/1.1 204 No Content",
        400 => "HTTP/1.1 400 Bad Request",
        403 => "HTTP/1.1 403 Forbidden",
        404 => "HTTP/1.1 404 Not Found",
        405 => "HTTP/1.1 405 Method Not Allowed",
        409 => "HTTP/1.1 409 Conflict",
        411 => "HTTP/1.1 411 Length Required",
        413 => "HTTP/1.1 413 Payload Too Large",
        _ => "HTTP/1.1 500 Internal Server Error",
    }
}

/// Response head with CORS headers. `content_length` of `None` omits the header.
pub(crate) fn write_head(
    stream: &mut TcpStream,
    status: u16,
    content_type: &str,
    content_length: Option<u64>,
) -> Result<()> {
    let mut head = format!(
        "{}\r\nContent-Type: {}\r\nCache-Control: no-store\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n",
        status_line(status),
        content_type
    );
    if let Some(len) = content_length {
        head.push_str(&format!("Content-Length: {len}\r\n"));
    }
    head.push_str("\r\n");
    stream.write_all(head.as_bytes())?;
    Ok(())
}

pub(crate) fn write_response(stream: &mut TcpStream, status: u16, content_type: &str, body: &[u8]) -> Result<()> {
    write_head(stream, status, content_type, Some(body.len() as u64))?;
    stream.write_all(body)?;
    Ok(())
}

pub(crate) fn write_json<T: serde::Serialize>(stream: &mut TcpStream, status: u16, value: &T) -> Result<()> {
    let payload = serde_json::to_vec(value)?;
    write_response(stream, status, "application/json", &payload)
}

pub(crate) fn write_error(stream: &mut TcpStream, status: u16, message: &str) -> Result<()> {
    write_json(stream, status, &serde_json::json!({ "error": message }))
}

pub(crate) fn write_preflight(stream: &mut TcpStream) -> Result<()> {
    let head = format!(
        "{}\r\nAccess-Control-Allow-Origin: *\r\nAccess-Control-Allow-Methods: GET, POST, OPTIONS\r\nAccess-Control-Allow-Headers: Content-Type\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        status_line(204)
    );
    stream.write_all(head.as_bytes())?;
    Ok(())
}

pub(crate) fn content_type_for(file_name: &str) -> &'static str {
    let ext = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" => "video/mp4",
        "mjpeg" | "mjpg" => "video/x-motion-jpeg",
        "avi" => "video/x-msvideo",
        "mov" => "video/quicktime",
        "mkv" => "video/x-matroska",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_query_values() {
        assert_eq!(percent_decode("my%20clip.mp4"), "my clip.mp4");
        assert_eq!(percent_decode("a+b"), "a b");
        assert_eq!(percent_decode("100%"), "100%");
        assert_eq!(percent_decode("%zz"), "%zz");
        let query = parse_query("filename=crowd.mp4&x");
        assert_eq!(query.get("filename").map(String::as_str), Some("crowd.mp4"));
        assert_eq!(query.get("x").map(String::as_str), Some(""));
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for("processed_a.mp4"), "video/mp4");
        assert_eq!(content_type_for("processed_a.MJPEG"), "video/x-motion-jpeg");
        assert_eq!(content_type_for("noext"), "application/octet-stream");
    }
}
