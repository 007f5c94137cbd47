//! Metadata probing for one remote resource.
//!
//! Uses the curl crate (libcurl) to learn the declared length, whether
//! byte ranges are honored, and the version token (ETag) plus Last-Modified
//! used to validate a stored manifest. HEAD first; origins that refuse HEAD
//! are probed with a one-byte ranged GET instead.

mod parse;

pub(crate) use parse::{parse_content_range, parse_http_status};

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::str;
use std::time::Duration;

/// Probe outcome: the headers the planner and manifest need.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// Total size in bytes, if known.
    pub content_length: Option<u64>,
    /// True if the origin honors `Range: bytes=`.
    pub accept_ranges: bool,
    /// Version token (`ETag`), quotes stripped. None means unknown.
    pub etag: Option<String>,
    /// `Last-Modified` value if present.
    pub last_modified: Option<String>,
}

/// Probes `url`: HEAD, then a `Range: bytes=0-0` GET if HEAD fails.
///
/// Runs in the current thread; call from `spawn_blocking` if used from async code.
pub fn probe(url: &str, custom_headers: &HashMap<String, String>) -> Result<ProbeResult> {
    match probe_head(url, custom_headers) {
        Ok(head) if head.content_length.unwrap_or(0) > 0 => Ok(head),
        Ok(_) => {
            tracing::debug!(url, "HEAD had no content length, trying range probe");
            probe_range(url, custom_headers)
        }
        Err(e) => {
            tracing::debug!(url, "HEAD failed ({:#}), trying range probe", e);
            probe_range(url, custom_headers)
        }
    }
}

fn new_easy(url: &str, custom_headers: &HashMap<String, String>) -> Result<curl::easy::Easy> {
    let mut easy = curl::easy::Easy::new();
    easy.url(url).context("invalid URL")?;
    easy.follow_location(true)?;
    easy.max_redirections(10)?;
    easy.connect_timeout(Duration::from_secs(15))?;
    easy.timeout(Duration::from_secs(30))?;

    if !custom_headers.is_empty() {
        let mut list = curl::easy::List::new();
        for (k, v) in custom_headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))?;
        }
        easy.http_headers(list)?;
    }
    Ok(easy)
}

fn push_header_line(headers: &mut Vec<String>, data: &[u8]) {
    if let Ok(s) = str::from_utf8(data) {
        let line = s.trim_end();
        if line.starts_with("HTTP/") {
            headers.clear();
        }
        if !line.is_empty() {
            headers.push(line.to_string());
        }
    }
}

/// Performs a HEAD request and returns parsed metadata.
pub fn probe_head(url: &str, custom_headers: &HashMap<String, String>) -> Result<ProbeResult> {
    let mut headers: Vec<String> = Vec::new();
    let mut easy = new_easy(url, custom_headers)?;
    easy.nobody(true)?;

    {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            push_header_line(&mut headers, data);
            true
        })?;
        transfer.perform().context("HEAD request failed")?;
    }

    let code = easy.response_code().context("no response code")?;
    if !(200..300).contains(&code) {
        anyhow::bail!("HEAD {} returned HTTP {}", url, code);
    }

    Ok(parse::parse_headers(&headers))
}

/// GET with `Range: bytes=0-0`; the body is not read beyond the first byte.
///
/// A 206 with `Content-Range: bytes 0-0/<total>` means ranges work; a 200
/// means the origin ignored the Range header, so only `Content-Length` is usable.
pub fn probe_range(url: &str, custom_headers: &HashMap<String, String>) -> Result<ProbeResult> {
    let mut headers: Vec<String> = Vec::new();
    let mut easy = new_easy(url, custom_headers)?;
    easy.range("0-0")?;

    let perform = {
        let mut transfer = easy.transfer();
        transfer.header_function(|data| {
            push_header_line(&mut headers, data);
            true
        })?;
        // Returning 0 stops the transfer once headers are in.
        transfer.write_function(|_| Ok(0))?;
        transfer.perform()
    };
    if let Err(e) = perform {
        if !e.is_write_error() {
            return Err(e).context("range probe failed");
        }
    }

    let code = easy.response_code().context("no response code")?;
    let mut result = parse::parse_headers(&headers);
    match code {
        206 => {
            let (_, _, total) = parse::parse_content_range(&headers)
                .ok_or_else(|| anyhow::anyhow!("206 without Content-Range from {}", url))?;
            result.content_length = total;
            result.accept_ranges = true;
        }
        200..=299 => {
            result.accept_ranges = false;
        }
        _ => anyhow::bail!("range probe {} returned HTTP {}", url, code),
    }
    Ok(result)
}
