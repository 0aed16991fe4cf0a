//! Aggregation of ab's final report into a [`TrialResult`]

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

use crate::metrics::{ConnectionTimes, StatusBreakdown, TimingRow, TrialResult};

static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"HTTP/\d(?:\.\d)?\s+(\d{3})\b").expect("valid regex"));

static PERCENTILE_ROW: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d{1,3})%\s+(\d+)").expect("valid regex"));

const ACROSS_ALL: &str = "across all concurrent requests";

/// Report fields, each fed by exactly one `Label: value` line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ServerSoftware,
    ServerHostname,
    ServerPort,
    TlsProtocol,
    DocumentPath,
    DocumentLength,
    ConcurrencyLevel,
    TimeTaken,
    CompleteRequests,
    FailedRequests,
    Non2xxResponses,
    KeepAliveRequests,
    WriteErrors,
    TotalTransferred,
    HtmlTransferred,
    RequestsPerSecond,
    TimePerRequest,
    TransferRate,
}

const LABELS: &[(&str, Field)] = &[
    ("Server Software", Field::ServerSoftware),
    ("Server Hostname", Field::ServerHostname),
    ("Server Port", Field::ServerPort),
    ("SSL/TLS Protocol", Field::TlsProtocol),
    ("Document Path", Field::DocumentPath),
    ("Document Length", Field::DocumentLength),
    ("Concurrency Level", Field::ConcurrencyLevel),
    ("Time taken for tests", Field::TimeTaken),
    ("Complete requests", Field::CompleteRequests),
    ("Failed requests", Field::FailedRequests),
    ("Non-2xx responses", Field::Non2xxResponses),
    ("Keep-Alive requests", Field::KeepAliveRequests),
    ("Write errors", Field::WriteErrors),
    ("Total transferred", Field::TotalTransferred),
    ("HTML transferred", Field::HtmlTransferred),
    ("Requests per second", Field::RequestsPerSecond),
    ("Time per request", Field::TimePerRequest),
    ("Transfer rate", Field::TransferRate),
];

fn leading_f64(value: &str) -> f64 {
    value
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0.0)
}

fn leading_u64(value: &str) -> u64 {
    value
        .split_whitespace()
        .next()
        .and_then(|token| token.parse().ok())
        .unwrap_or(0)
}

fn timing_row(values: &str) -> Option<TimingRow> {
    let numbers: Vec<f64> = values
        .split_whitespace()
        .map(|token| token.parse::<f64>())
        .collect::<Result<_, _>>()
        .ok()?;

    match numbers.as_slice() {
        [min, mean, sd, median, max] => Some(TimingRow {
            min: *min,
            mean: *mean,
            sd: *sd,
            median: *median,
            max: *max,
        }),
        // ab -S prints min/avg/max only
        [min, mean, max] => Some(TimingRow {
            min: *min,
            mean: *mean,
            max: *max,
            ..TimingRow::default()
        }),
        _ => None,
    }
}

fn apply(result: &mut TrialResult, field: Field, value: &str) {
    match field {
        Field::ServerSoftware => result.server_software = value.to_string(),
        Field::ServerHostname => result.server_hostname = value.to_string(),
        Field::ServerPort => {
            result.server_port = value
                .split_whitespace()
                .next()
                .and_then(|t| t.parse().ok())
                .unwrap_or(0)
        }
        Field::TlsProtocol => result.tls_protocol = Some(value.to_string()),
        Field::DocumentPath => result.document_path = value.to_string(),
        Field::DocumentLength => result.document_length = leading_u64(value),
        Field::ConcurrencyLevel => result.concurrency_level = leading_u64(value),
        Field::TimeTaken => result.time_taken_secs = leading_f64(value),
        Field::CompleteRequests => result.complete_requests = leading_u64(value),
        Field::FailedRequests => result.failed_requests = leading_u64(value),
        Field::Non2xxResponses => result.non_2xx_responses = leading_u64(value),
        Field::KeepAliveRequests => result.keep_alive_requests = leading_u64(value),
        Field::WriteErrors => result.write_errors = leading_u64(value),
        Field::TotalTransferred => result.total_transferred = leading_u64(value),
        Field::HtmlTransferred => result.html_transferred = leading_u64(value),
        Field::RequestsPerSecond => result.requests_per_second = leading_f64(value),
        Field::TimePerRequest if value.contains(ACROSS_ALL) => {
            result.time_per_request_all_ms = leading_f64(value)
        }
        Field::TimePerRequest => result.time_per_request_ms = leading_f64(value),
        Field::TransferRate => result.transfer_rate_kbps = leading_f64(value),
    }
}

/// Count `HTTP/x.y NNN` occurrences in the output
pub fn status_histogram(output: &str) -> BTreeMap<String, u64> {
    let mut histogram = BTreeMap::new();
    for caps in STATUS_LINE.captures_iter(output) {
        *histogram.entry(caps[1].to_string()).or_insert(0) += 1;
    }
    histogram
}

/// Parse ab's complete stdout into a result
///
/// Unrecognized lines are ignored; missing numbers stay 0.
pub fn aggregate(output: &str) -> TrialResult {
    let mut result = TrialResult::default();
    let mut connection_times: Option<ConnectionTimes> = None;
    let mut in_connection_table = false;

    for raw in output.lines() {
        let line = raw.trim_end();

        if line.starts_with("Connection Times") {
            in_connection_table = true;
            continue;
        }
        if line.starts_with("Percentage of the requests") {
            in_connection_table = false;
            continue;
        }

        if let Some(caps) = PERCENTILE_ROW.captures(line) {
            if let (Ok(percent), Ok(ms)) = (caps[1].parse::<u8>(), caps[2].parse::<u64>()) {
                result.percentiles.insert(percent, ms);
            }
            continue;
        }

        let Some((label, value)) = line.split_once(':') else {
            continue;
        };
        let label = label.trim();
        let value = value.trim();

        if in_connection_table {
            let times = connection_times.get_or_insert_with(ConnectionTimes::default);
            let slot = match label {
                "Connect" => Some(&mut times.connect),
                "Processing" => Some(&mut times.processing),
                "Waiting" => Some(&mut times.waiting),
                "Total" => Some(&mut times.total),
                _ => None,
            };
            if let (Some(slot), Some(row)) = (slot, timing_row(value)) {
                *slot = row;
            }
            continue;
        }

        if let Some((_, field)) = LABELS.iter().find(|(name, _)| *name == label) {
            apply(&mut result, *field, value);
        }
    }

    result.connection_times = connection_times;
    result.status_codes = status_histogram(output);
    result.status_breakdown = StatusBreakdown::from_histogram(&result.status_codes);

    tracing::debug!(
        complete = result.complete_requests,
        failed = result.failed_requests,
        rps = result.requests_per_second,
        status_codes = result.status_codes.len(),
        "Aggregated ab output"
    );

    result
}
