//! libcurl-backed transfer: HEAD size probe and resumable GET.

use std::cell::RefCell;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::str;
use std::time::Duration;

use curl::easy::Easy;

use super::pacer::Pacer;
use super::parse::{parse_headers, ResponseHead};
use super::{
    Transfer, TransferError, TransferOutcome, TransferProgress, TransferRequest, TransferSignal,
};

/// Blocking HTTP(S) transfers on the calling thread.
#[derive(Debug, Clone)]
pub struct CurlTransfer {
    connect_timeout: Duration,
    /// Abort if throughput stays under 1 KiB/s for this long.
    low_speed_time: Duration,
    head_timeout: Duration,
}

impl Default for CurlTransfer {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            low_speed_time: Duration::from_secs(60),
            head_timeout: Duration::from_secs(30),
        }
    }
}

impl CurlTransfer {
    pub fn new() -> Self {
        Self::default()
    }

    fn easy(&self, url: &str) -> Result<Easy, TransferError> {
        let mut easy = Easy::new();
        easy.url(url)?;
        easy.follow_location(true)?;
        easy.connect_timeout(self.connect_timeout)?;
        Ok(easy)
    }
}

/// Write-side state shared by the curl callbacks of one GET.
struct Sink {
    file: File,
    downloaded: u64,
    total: Option<u64>,
    resume_from: u64,
    started: bool,
    http_error: Option<u32>,
    io_error: Option<io::Error>,
    pacer: Pacer,
}

impl Sink {
    /// Inspect the response head before the first body byte is written.
    fn begin(&mut self, head: &ResponseHead) -> io::Result<bool> {
        let status = head.status.unwrap_or(200);
        if !(200..300).contains(&status) {
            self.http_error = Some(status);
            return Ok(false);
        }
        if self.total.is_none() {
            self.total = head.content_length.map(|n| n + self.resume_from);
        }
        Ok(true)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)?;
        self.downloaded += data.len() as u64;
        Ok(())
    }
}

impl CurlTransfer {
    /// One GET into `request.destination`, appending from `resume_from` or
    /// truncating when it is 0.
    fn fetch(
        &self,
        request: &TransferRequest<'_>,
        signal: &TransferSignal,
        progress: &mut dyn FnMut(TransferProgress),
        resume_from: u64,
    ) -> Result<TransferOutcome, TransferError> {
        let dest = request.destination;
        let mut file = OpenOptions::new().create(true).write(true).open(dest)?;
        if resume_from == 0 {
            file.set_len(0)?;
        } else {
            file.seek(SeekFrom::Start(resume_from))?;
            tracing::debug!(url = request.url, offset = resume_from, "resuming partial file");
        }

        let headers = RefCell::new(Vec::<String>::new());
        let mut sink = Sink {
            file,
            downloaded: resume_from,
            total: request.known_size,
            resume_from,
            started: false,
            http_error: None,
            io_error: None,
            pacer: Pacer::new(),
        };

        let mut easy = self.easy(request.url)?;
        easy.low_speed_limit(1024)?;
        easy.low_speed_time(self.low_speed_time)?;
        if resume_from > 0 {
            easy.resume_from(resume_from)?;
        }

        let performed = {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.borrow_mut().push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.write_function(|data| {
                if signal.is_cancelled() {
                    return Ok(0);
                }
                if !sink.started {
                    sink.started = true;
                    let head = parse_headers(&headers.borrow());
                    match sink.begin(&head) {
                        Ok(true) => {}
                        Ok(false) => return Ok(0),
                        Err(e) => {
                            sink.io_error = Some(e);
                            return Ok(0);
                        }
                    }
                }
                if let Err(e) = sink.write(data) {
                    sink.io_error = Some(e);
                    return Ok(0);
                }
                progress(TransferProgress {
                    downloaded: sink.downloaded,
                    total: sink.total,
                });
                sink.pacer.pace(data.len() as u64, signal);
                Ok(data.len())
            })?;
            transfer.perform()
        };

        if let Err(e) = performed {
            if let Some(reason) = signal.cancel_reason() {
                return Ok(TransferOutcome::Cancelled(reason));
            }
            if e.is_write_error() {
                if let Some(code) = sink.http_error {
                    return Err(TransferError::Http(code));
                }
                if let Some(io_err) = sink.io_error.take() {
                    return Err(TransferError::Storage(io_err));
                }
            }
            return Err(TransferError::Curl(e));
        }

        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(TransferError::Http(code));
        }
        sink.file.sync_all()?;
        if let Some(expected) = sink.total {
            if sink.downloaded != expected {
                return Err(TransferError::PartialTransfer {
                    expected,
                    received: sink.downloaded,
                });
            }
        }
        Ok(TransferOutcome::Completed)
    }
}

impl Transfer for CurlTransfer {
    fn download(
        &self,
        request: &TransferRequest<'_>,
        signal: &TransferSignal,
        progress: &mut dyn FnMut(TransferProgress),
    ) -> Result<TransferOutcome, TransferError> {
        let dest = request.destination;
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let existing = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
        if let Some(total) = request.known_size {
            if total > 0 && existing == total {
                progress(TransferProgress {
                    downloaded: existing,
                    total: Some(total),
                });
                return Ok(TransferOutcome::Completed);
            }
        }
        let resume_from = match request.known_size {
            Some(total) if existing > 0 && existing < total => existing,
            _ => 0,
        };

        match self.fetch(request, signal, progress, resume_from) {
            // The server does not do ranges: start over with the whole body.
            Err(TransferError::Curl(e)) if resume_from > 0 && e.is_range_error() => {
                tracing::debug!(url = request.url, "range not honored, restarting from 0");
                self.fetch(request, signal, progress, 0)
            }
            other => other,
        }
    }

    fn resolve_remote_size(&self, url: &str) -> Result<u64, TransferError> {
        let mut headers: Vec<String> = Vec::new();
        let mut easy = self.easy(url)?;
        easy.nobody(true)?;
        easy.timeout(self.head_timeout)?;
        {
            let mut transfer = easy.transfer();
            transfer.header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    headers.push(s.trim_end().to_string());
                }
                true
            })?;
            transfer.perform()?;
        }

        let code = easy.response_code()?;
        if !(200..300).contains(&code) {
            return Err(TransferError::Http(code));
        }
        parse_headers(&headers)
            .content_length
            .ok_or_else(|| TransferError::UnknownSize(url.to_string()))
    }
}
