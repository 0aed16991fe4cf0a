//! Translation of a trial configuration into an `ab` invocation

use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use url::form_urlencoded;

use crate::config::{proxy_authority, HttpMethod, TrialConfig};
use crate::error::{BenchError, BenchResult};

/// Verbosity always passed to ab so that per-response lines are printed
pub const MIN_AB_VERBOSITY: u8 = 3;

const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";
const JSON: &str = "application/json";
const DEFAULT_CONTENT_TYPE: &str = "text/plain";

/// A built `ab` invocation
#[derive(Debug)]
pub struct BuiltCommand {
    /// Arguments in the order ab receives them, URL last
    pub args: Vec<String>,

    /// Request body file referenced by `-p`/`-u`
    pub payload: Option<PayloadFile>,
}

/// Temporary request body file
///
/// The file is removed when this value is dropped, so the run that owns it
/// deletes it exactly once regardless of how the run ends.
#[derive(Debug)]
pub struct PayloadFile {
    file: NamedTempFile,
}

impl PayloadFile {
    /// Location of the payload on disk
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Remove the file now, logging rather than failing on errors
    pub fn remove(self) {
        let path = self.file.path().to_path_buf();
        if let Err(e) = self.file.close() {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove payload file");
            }
        }
    }
}

/// Build the argument vector for a trial
///
/// Validates the configuration first and reports every violation at once.
/// When the method carries a body, the transformed body is written to a
/// uniquely named file under `scratch_dir`.
pub fn build_command(
    config: &TrialConfig,
    session_id: &str,
    scratch_dir: &Path,
) -> BenchResult<BuiltCommand> {
    let report = config.validate();
    if !report.is_ok() {
        return Err(BenchError::ConfigValidation(report.errors));
    }

    let mut args: Vec<String> = Vec::new();
    let mut push = |flag: &str, value: Option<String>| {
        args.push(flag.to_string());
        if let Some(value) = value {
            args.push(value);
        }
    };

    push("-n", Some(config.requests.to_string()));
    push("-c", Some(config.concurrency.to_string()));
    if let Some(limit) = config.time_limit {
        push("-t", Some(limit.to_string()));
    }
    if config.keep_alive {
        push("-k", None);
    }
    if matches!(config.method, HttpMethod::Delete | HttpMethod::Head) {
        push("-m", Some(config.method.as_str().to_string()));
    }
    if let Some(timeout) = config.timeout {
        push("-s", Some(timeout.to_string()));
    }
    let verbosity = config.requested_verbosity().max(MIN_AB_VERBOSITY);
    push("-v", Some(verbosity.to_string()));
    if config.accept_variable_length {
        push("-l", None);
    }
    for (name, value) in &config.headers {
        push("-H", Some(format!("{name}: {value}")));
    }
    for (name, value) in &config.cookies {
        push("-C", Some(format!("{name}={value}")));
    }
    if let Some(auth) = &config.auth {
        push("-A", Some(format!("{}:{}", auth.username, auth.password)));
    }
    if let Some(proxy) = config.proxy.as_deref().and_then(proxy_authority) {
        push("-X", Some(proxy));
    }

    let mut payload = None;
    if config.method.requires_body() {
        if let Some(body) = config.body_text() {
            let content_type = config
                .content_type
                .as_deref()
                .filter(|ct| !ct.trim().is_empty())
                .unwrap_or(DEFAULT_CONTENT_TYPE);
            let file = write_payload(
                scratch_dir,
                session_id,
                transform_body(&body, config.content_type.as_deref()).as_bytes(),
            )?;
            let flag = if config.method == HttpMethod::Put {
                "-u"
            } else {
                "-p"
            };
            push(flag, Some(file.path().display().to_string()));
            push("-T", Some(content_type.to_string()));
            payload = Some(file);
        }
    }

    args.push(normalized_url(&config.url));

    Ok(BuiltCommand { args, payload })
}

fn normalized_url(raw: &str) -> String {
    url::Url::parse(raw.trim())
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.trim().to_string())
}

fn write_payload(dir: &Path, session_id: &str, bytes: &[u8]) -> BenchResult<PayloadFile> {
    std::fs::create_dir_all(dir).map_err(BenchError::Payload)?;
    let mut file = tempfile::Builder::new()
        .prefix(&format!("ab-payload-{session_id}-"))
        .suffix(".txt")
        .tempfile_in(dir)
        .map_err(BenchError::Payload)?;
    file.write_all(bytes).map_err(BenchError::Payload)?;
    file.flush().map_err(BenchError::Payload)?;
    Ok(PayloadFile { file })
}

/// Transform a raw body according to its content type
///
/// Parsing is strictly two-stage: structured JSON first, then the raw text.
pub fn transform_body(raw: &str, content_type: Option<&str>) -> String {
    let parsed = serde_json::from_str::<serde_json::Value>(raw.trim()).ok();
    let media_type = content_type
        .map(|ct| ct.split(';').next().unwrap_or(ct).trim().to_ascii_lowercase())
        .unwrap_or_default();

    match (media_type.as_str(), parsed) {
        (FORM_URLENCODED, Some(serde_json::Value::Object(map))) => {
            let mut form = form_urlencoded::Serializer::new(String::new());
            for (key, value) in &map {
                form.append_pair(key, &scalar_text(value));
            }
            form.finish()
        }
        (FORM_URLENCODED, _) => raw.to_string(),
        (JSON, Some(value)) => value.to_string(),
        (JSON, None) => raw.to_string(),
        (_, Some(serde_json::Value::String(text))) => text,
        (_, Some(value)) => value.to_string(),
        (_, None) => raw.to_string(),
    }
}

fn scalar_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Recover the header map from an argument vector
pub fn parse_header_args(args: &[String]) -> BTreeMap<String, String> {
    args.windows(2)
        .filter(|pair| pair[0] == "-H")
        .filter_map(|pair| {
            let (name, value) = pair[1].split_once(':')?;
            Some((name.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}
