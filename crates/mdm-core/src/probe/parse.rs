//! Parse HTTP response header lines collected from curl.

use super::ProbeResult;

/// Parse collected header lines into a ProbeResult.
///
/// Only the last response block counts: callers reset the list on every
/// `HTTP/` status line so redirect hops do not leak headers.
pub(crate) fn parse_headers(lines: &[String]) -> ProbeResult {
    let mut result = ProbeResult::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        let value = value.trim();
        if name.eq_ignore_ascii_case("content-length") {
            if let Ok(n) = value.parse::<u64>() {
                result.content_length = Some(n);
            }
        } else if name.eq_ignore_ascii_case("accept-ranges") {
            result.accept_ranges = value
                .split(',')
                .any(|v| v.trim().eq_ignore_ascii_case("bytes"));
        } else if name.eq_ignore_ascii_case("etag") {
            let tag = value.trim_start_matches("W/").trim_matches('"');
            if !tag.is_empty() {
                result.etag = Some(tag.to_string());
            }
        } else if name.eq_ignore_ascii_case("last-modified") {
            result.last_modified = Some(value.to_string());
        }
    }

    result
}

/// Status code from the last `HTTP/x y` line, if any.
pub(crate) fn parse_http_status(lines: &[String]) -> Option<u32> {
    lines
        .iter()
        .rev()
        .find(|l| l.starts_with("HTTP/"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|code| code.parse().ok())
}

/// `Content-Range: bytes <start>-<end>/<total>` as (start, end, total).
/// `total` is None when the server sends `*`.
pub(crate) fn parse_content_range(lines: &[String]) -> Option<(u64, u64, Option<u64>)> {
    let value = lines.iter().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case("content-range")
            .then(|| value.trim().to_string())
    })?;
    let range_spec = value.strip_prefix("bytes")?.trim();
    let (range, total) = range_spec.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    let total = total.trim().parse().ok();
    Some((start, end, total))
}
