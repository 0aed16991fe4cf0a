//! Shell-script stand-ins for `ab` used by tests

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Report printed by the successful stand-in
pub(crate) const REPORT: &str = "\
Server Software:        fake/1.0
Server Hostname:        localhost
Server Port:            8080
Complete requests:      3
Failed requests:        0
Requests per second:    482.33 [#/sec] (mean)
LOG: header received:
HTTP/1.1 200 OK
HTTP/1.1 200 OK
HTTP/1.1 404 Not Found
";

/// Write an executable `/bin/sh` script into `dir`
pub(crate) fn fake_ab(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    let mut perms = std::fs::metadata(&path).unwrap().permissions();
    perms.set_mode(0o755);
    std::fs::set_permissions(&path, perms).unwrap();
    path
}

/// Stand-in that prints a start marker, one stderr progress line and a report
pub(crate) fn succeeding_ab(dir: &Path) -> PathBuf {
    fake_ab(
        dir,
        "ab-ok",
        &format!(
            "echo 'Benchmarking localhost (be patient)'\n\
             echo 'Completed 3 requests' >&2\n\
             cat <<'REPORT'\n{REPORT}REPORT"
        ),
    )
}

/// Stand-in that fails with exit code 22
pub(crate) fn failing_ab(dir: &Path) -> PathBuf {
    fake_ab(dir, "ab-fail", "echo 'ab: invalid URL' >&2\nexit 22")
}

/// Stand-in that prints a start marker and then blocks
pub(crate) fn sleeping_ab(dir: &Path, secs: u32) -> PathBuf {
    fake_ab(
        dir,
        "ab-sleep",
        &format!("echo 'Benchmarking localhost (be patient)'\nexec sleep {secs}"),
    )
}
