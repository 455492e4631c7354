//! Parse HTTP response header lines collected by curl.

/// Headers of the last response in a (possibly redirected) exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct ResponseHead {
    pub status: Option<u32>,
    pub content_length: Option<u64>,
}

/// Fold header lines into the last response's status and Content-Length.
///
/// Curl hands over every response of a redirect chain; a new status line
/// starts a new response, so earlier Content-Length values are discarded.
pub(super) fn parse_headers(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();
    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(status) = parse_status_line(line) {
            head = ResponseHead {
                status: Some(status),
                content_length: None,
            };
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.trim().parse::<u64>() {
                    head.content_length = Some(n);
                }
            }
        }
    }
    head
}

fn parse_status_line(line: &str) -> Option<u32> {
    if !line.starts_with("HTTP/") {
        return None;
    }
    line.split_whitespace().nth(1)?.parse().ok()
}
