//! One attempt at one part: ranged GET appended to the part file.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::str;

use crate::control::AbortToken;
use crate::manifest;
use crate::planner::Part;
use crate::probe::{parse_content_range, parse_http_status};
use crate::retry::SegmentError;
use crate::storage;

use super::pool::PartProgress;
use super::CurlOptions;

/// Easy2 handler for one part transfer. Validates the response before the
/// first byte is written and appends to the part file.
pub struct PartHandler {
    file: File,
    /// Inclusive absolute range requested; None for a plain GET.
    expected_range: Option<(u64, u64)>,
    /// Bytes this attempt may write.
    budget: u64,
    response_headers: Vec<String>,
    /// None = not checked yet; Some(true) = write; Some(false) = refuse.
    accept: Option<bool>,
    status: Option<u32>,
    bytes_written: u64,
    overflow: bool,
    storage_error: Option<std::io::Error>,
    /// Live progress slot for this part and the offset this attempt began at.
    progress: Option<(PartProgress, usize, u64)>,
    abort: Option<AbortToken>,
}

impl PartHandler {
    pub fn new(file: File, expected_range: Option<(u64, u64)>, budget: u64) -> Self {
        Self {
            file,
            expected_range,
            budget,
            response_headers: Vec::new(),
            accept: None,
            status: None,
            bytes_written: 0,
            overflow: false,
            storage_error: None,
            progress: None,
            abort: None,
        }
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    fn check_response(&mut self) -> bool {
        self.status = parse_http_status(&self.response_headers);
        let status = match self.status {
            Some(s) => s,
            None => return false,
        };
        if !(200..300).contains(&status) {
            return false;
        }
        match self.expected_range {
            None => true,
            Some((start, end)) => {
                status == 206
                    && parse_content_range(&self.response_headers)
                        .map(|(s, e, _)| s == start && e == end)
                        .unwrap_or(false)
            }
        }
    }

    fn report_progress(&self) {
        if let Some((progress, index, base)) = &self.progress {
            progress.set(*index, base + self.bytes_written);
        }
    }
}

impl curl::easy::Handler for PartHandler {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            if line.starts_with("HTTP/") {
                self.response_headers.clear();
            }
            if !line.is_empty() {
                self.response_headers.push(line.to_string());
            }
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        if self.accept.is_none() {
            self.accept = Some(self.check_response());
        }
        if self.accept == Some(false) {
            // Error bodies are swallowed; the status check after perform reports them.
            let is_error_status = self.status.map(|s| !(200..300).contains(&s)).unwrap_or(false);
            return Ok(if is_error_status { data.len() } else { 0 });
        }

        let room = self.budget - self.bytes_written;
        let take = (data.len() as u64).min(room) as usize;
        if let Err(e) = self.file.write_all(&data[..take]) {
            self.storage_error = Some(e);
            return Ok(0);
        }
        self.bytes_written += take as u64;
        self.report_progress();
        if take < data.len() {
            self.overflow = true;
            return Ok(0);
        }
        Ok(data.len())
    }

    fn progress(&mut self, _dltotal: f64, _dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        !self.abort.as_ref().is_some_and(AbortToken::is_aborted)
    }
}

/// Fetch whatever `part` still lacks, appending to its file.
///
/// The starting offset comes from the file on disk, not from the manifest:
/// a previous attempt may have written more (or less) than was recorded.
/// The part's slot in `progress` is kept equal to its bytes on disk.
pub fn fetch_part(
    url: &str,
    headers: &HashMap<String, String>,
    part: &Part,
    ranged: bool,
    curl: CurlOptions,
    progress: &PartProgress,
    abort: &AbortToken,
) -> Result<(), SegmentError> {
    let offset = manifest::measure_part(part, ranged).map_err(SegmentError::Storage)?;
    progress.set(part.index, offset);
    if offset >= part.len() {
        return Ok(());
    }
    if abort.is_aborted() {
        return Err(SegmentError::Aborted);
    }

    let file = storage::open_part_at(&part.path, offset).map_err(SegmentError::Storage)?;
    let expected_range = ranged.then(|| (part.start + offset, part.end));
    let budget = part.len() - offset;

    let mut handler = PartHandler::new(file, expected_range, budget);
    handler.progress = Some((progress.clone(), part.index, offset));
    handler.abort = Some(abort.clone());

    let mut easy = curl::easy::Easy2::new(handler);
    easy.url(url).map_err(SegmentError::Curl)?;
    easy.follow_location(true).map_err(SegmentError::Curl)?;
    easy.connect_timeout(curl.connect_timeout)
        .map_err(SegmentError::Curl)?;
    easy.low_speed_limit(curl.low_speed_limit)
        .map_err(SegmentError::Curl)?;
    easy.low_speed_time(curl.low_speed_time)
        .map_err(SegmentError::Curl)?;
    easy.progress(true).map_err(SegmentError::Curl)?;
    if let Some((start, end)) = expected_range {
        easy.range(&format!("{}-{}", start, end))
            .map_err(SegmentError::Curl)?;
    }
    if !headers.is_empty() {
        let mut list = curl::easy::List::new();
        for (k, v) in headers {
            list.append(&format!("{}: {}", k.trim(), v.trim()))
                .map_err(SegmentError::Curl)?;
        }
        easy.http_headers(list).map_err(SegmentError::Curl)?;
    }

    let performed = easy.perform();
    let h = easy.get_mut();
    if let Err(e) = performed {
        if abort.is_aborted() || e.is_aborted_by_callback() {
            return Err(SegmentError::Aborted);
        }
        if e.is_write_error() {
            if let Some(io_err) = h.storage_error.take() {
                return Err(SegmentError::Storage(io_err));
            }
            if h.overflow {
                return Err(SegmentError::PartialTransfer {
                    expected: budget,
                    received: budget + 1,
                });
            }
            if h.accept == Some(false) {
                return Err(SegmentError::InvalidRangeResponse {
                    status: h.status,
                    expected: expected_range.unwrap_or((0, part.end)),
                });
            }
        }
        return Err(SegmentError::Curl(e));
    }

    let code = easy.response_code().map_err(SegmentError::Curl)?;
    if !(200..300).contains(&code) {
        return Err(SegmentError::Http(code));
    }

    let received = easy.get_ref().bytes_written();
    if received != budget {
        return Err(SegmentError::PartialTransfer {
            expected: budget,
            received,
        });
    }
    Ok(())
}
