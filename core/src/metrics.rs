//! Trial result types and status-code classification

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structured report parsed from ab's final output
///
/// Numeric fields default to 0 when ab did not print them. The status
/// breakdown is the exception: it stays `None` unless at least one status
/// line was observed, so "nothing observed" and "zero of a class" differ.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// `Server Software`
    pub server_software: String,
    /// `Server Hostname`
    pub server_hostname: String,
    /// `Server Port`
    pub server_port: u16,
    /// `SSL/TLS Protocol`, only for https targets
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tls_protocol: Option<String>,

    /// `Document Path`
    pub document_path: String,
    /// `Document Length` in bytes
    pub document_length: u64,

    /// `Concurrency Level` as reported by ab
    pub concurrency_level: u64,
    /// `Time taken for tests` in seconds
    pub time_taken_secs: f64,
    /// `Complete requests`
    pub complete_requests: u64,
    /// `Failed requests`
    pub failed_requests: u64,
    /// `Non-2xx responses`
    pub non_2xx_responses: u64,
    /// `Keep-Alive requests`
    pub keep_alive_requests: u64,
    /// `Write errors`
    pub write_errors: u64,

    /// `Total transferred` in bytes
    pub total_transferred: u64,
    /// `HTML transferred` in bytes
    pub html_transferred: u64,

    /// `Requests per second`
    pub requests_per_second: f64,
    /// `Time per request` (mean) in milliseconds
    pub time_per_request_ms: f64,
    /// `Time per request` (mean, across all concurrent requests) in milliseconds
    pub time_per_request_all_ms: f64,
    /// `Transfer rate` in Kbytes/sec
    pub transfer_rate_kbps: f64,

    /// Connection times table
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_times: Option<ConnectionTimes>,

    /// Percentage of requests served within a time, keyed by percent
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub percentiles: BTreeMap<u8, u64>,

    /// Status code histogram (code -> count)
    #[serde(default)]
    pub status_codes: BTreeMap<String, u64>,

    /// Classification derived from the histogram
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_breakdown: Option<StatusBreakdown>,
}

impl TrialResult {
    /// Fraction of completed requests that did not fail (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.complete_requests == 0 {
            return 0.0;
        }
        let ok = self.complete_requests.saturating_sub(self.failed_requests);
        ok as f64 / self.complete_requests as f64
    }
}

/// One row of ab's "Connection Times (ms)" table
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TimingRow {
    /// Minimum
    pub min: f64,
    /// Mean
    pub mean: f64,
    /// Standard deviation
    pub sd: f64,
    /// Median
    pub median: f64,
    /// Maximum
    pub max: f64,
}

/// ab's "Connection Times (ms)" table
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionTimes {
    /// `Connect:` row
    pub connect: TimingRow,
    /// `Processing:` row
    pub processing: TimingRow,
    /// `Waiting:` row
    pub waiting: TimingRow,
    /// `Total:` row
    pub total: TimingRow,
}

/// Status classes derived from the histogram
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBreakdown {
    /// 2xx responses
    pub successful: u64,
    /// 3xx responses
    pub redirects: u64,
    /// 4xx responses
    pub client_errors: u64,
    /// 5xx responses
    pub server_errors: u64,
    /// Human-readable line per non-empty class
    pub summaries: Vec<String>,
    /// One entry per non-2xx status code, ascending by code
    pub errors: Vec<StatusErrorSummary>,
}

impl StatusBreakdown {
    /// Classify a status-code histogram
    ///
    /// Returns `None` for an empty histogram.
    pub fn from_histogram(histogram: &BTreeMap<String, u64>) -> Option<Self> {
        if histogram.is_empty() {
            return None;
        }

        let mut breakdown = StatusBreakdown::default();
        let mut codes: Vec<(u16, u64)> = histogram
            .iter()
            .filter_map(|(code, count)| code.parse::<u16>().ok().map(|c| (c, *count)))
            .collect();
        codes.sort_unstable();

        for (code, count) in codes {
            match code {
                200..=299 => breakdown.successful += count,
                300..=399 => breakdown.redirects += count,
                400..=499 => breakdown.client_errors += count,
                500..=599 => breakdown.server_errors += count,
                _ => {}
            }
            if !(200..=299).contains(&code) {
                let reason = reason_phrase(code);
                breakdown.errors.push(StatusErrorSummary {
                    status_code: code,
                    count,
                    reason: reason.clone(),
                    message: format!("{code} {reason}: {count} {}", plural(count)),
                });
            }
        }

        for (label, count) in [
            ("successful (2xx)", breakdown.successful),
            ("redirects (3xx)", breakdown.redirects),
            ("client errors (4xx)", breakdown.client_errors),
            ("server errors (5xx)", breakdown.server_errors),
        ] {
            if count > 0 {
                breakdown
                    .summaries
                    .push(format!("{count} {} {label}", plural(count)));
            }
        }

        Some(breakdown)
    }

    /// Total responses that were not 2xx
    pub fn total_errors(&self) -> u64 {
        self.errors.iter().map(|e| e.count).sum()
    }
}

fn plural(count: u64) -> &'static str {
    if count == 1 {
        "request"
    } else {
        "requests"
    }
}

/// Summary of one non-2xx status code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusErrorSummary {
    /// HTTP status code
    pub status_code: u16,
    /// Number of occurrences
    pub count: u64,
    /// Reason phrase
    pub reason: String,
    /// Human-readable summary line
    pub message: String,
}

/// Reason phrase for a status code, `HTTP <code>` when unlisted
pub fn reason_phrase(code: u16) -> String {
    let phrase = match code {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => return format!("HTTP {code}"),
    };
    phrase.to_string()
}
