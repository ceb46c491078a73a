// src/logging.rs
//
// `tlog!`: local-time stamped diagnostics on stderr, mirrored into a
// per-run log file once `init_file_logging` has been called.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

/// Timestamp prefix for every log line.
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S%.3f";

/// Name of the link pointing at the most recent run's log.
const LATEST_LINK: &str = "ttytap.log";

/// Mirror target for `tlog!`. `None` means stderr only.
pub(crate) static LOG_FILE: Mutex<Option<File>> = Mutex::new(None);

pub(crate) fn log_file() -> MutexGuard<'static, Option<File>> {
    match LOG_FILE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

macro_rules! tlog {
    ($($arg:tt)*) => {{
        use std::io::Write as _;
        let line = format!(
            "{} {}",
            chrono::Local::now().format($crate::logging::TIME_FORMAT),
            format_args!($($arg)*)
        );
        eprintln!("{}", line);
        if let Some(ref mut f) = *$crate::logging::log_file() {
            let _ = writeln!(f, "{}", line);
        }
    }};
}

/// Start mirroring `tlog!` into `<log_dir>/<YYYYmmdd-HHMMSS>-ttytap.log`.
///
/// Returns the path of the new file. On Unix `ttytap.log` in the same
/// directory is repointed at it.
pub fn init_file_logging(log_dir: &Path) -> io::Result<PathBuf> {
    std::fs::create_dir_all(log_dir)?;

    let filename = chrono::Local::now()
        .format("%Y%m%d-%H%M%S-ttytap.log")
        .to_string();
    let log_path = log_dir.join(&filename);
    let file = OpenOptions::new().create(true).append(true).open(&log_path)?;

    #[cfg(unix)]
    if let Err(e) = link_latest(log_dir, &filename) {
        tlog!("[logging] Could not update {}: {}", LATEST_LINK, e);
    }

    *log_file() = Some(file);
    tlog!("[logging] Writing log to {}", log_path.display());
    Ok(log_path)
}

#[cfg(unix)]
fn link_latest(log_dir: &Path, filename: &str) -> io::Result<()> {
    let link = log_dir.join(LATEST_LINK);
    match std::fs::remove_file(&link) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e),
        _ => {}
    }
    std::os::unix::fs::symlink(filename, link)
}

/// Stop mirroring into the log file. Harmless when file logging is off.
pub fn stop_file_logging() {
    if log_file().is_some() {
        tlog!("[logging] Log file closed");
        *log_file() = None;
    }
}
