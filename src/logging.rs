//! Log files: naming, creation and retention.
//!
//! Each run writes to a file named after its start time, e.g. `2024-05-01_03:00:00.log`.
//! Files in the log directory that are older than the retention period are removed.

use std::{
    fs::{self, File},
    io,
    path::{Path, PathBuf},
};

use chrono::{NaiveDateTime, TimeDelta};
use log::{debug, info};

/// [`LogErrorKind`] describes the errors that can happen while managing log files
#[derive(thiserror::Error, Debug, displaydoc::Display)]
#[non_exhaustive]
pub enum LogErrorKind {
    /// error creating log directory `{path:?}`: `{source:?}`
    CreatingDirectoryFailed { path: PathBuf, source: io::Error },
    /// error creating log file `{path:?}`: `{source:?}`
    CreatingFileFailed { path: PathBuf, source: io::Error },
    /// error listing log directory `{path:?}`: `{source:?}`
    ListingDirectoryFailed { path: PathBuf, source: io::Error },
    /// error removing log file `{path:?}`: `{source:?}`
    RemovingFileFailed { path: PathBuf, source: io::Error },
}

pub(crate) type LogResult<T> = Result<T, LogErrorKind>;

/// Timestamp format of log file names.
pub const LOG_FILE_TIMESTAMP: &str = "%Y-%m-%d_%H:%M:%S";

const LOG_FILE_EXTENSION: &str = "log";

/// The name of the log file of a run started at `now`.
pub fn log_file_name(now: NaiveDateTime) -> String {
    format!("{}.{LOG_FILE_EXTENSION}", now.format(LOG_FILE_TIMESTAMP))
}

/// Create the log directory if needed and a new log file in it.
///
/// # Errors
///
/// * [`LogErrorKind::CreatingDirectoryFailed`] if the directory can not be created
/// * [`LogErrorKind::CreatingFileFailed`] if the file can not be created
pub fn create_log_file(dir: &Path, now: NaiveDateTime) -> LogResult<(PathBuf, File)> {
    fs::create_dir_all(dir).map_err(|source| LogErrorKind::CreatingDirectoryFailed {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(log_file_name(now));
    let file = File::create(&path).map_err(|source| LogErrorKind::CreatingFileFailed {
        path: path.clone(),
        source,
    })?;
    Ok((path, file))
}

/// Whether a log file name carries a timestamp older than `retention_days` before `now`.
///
/// Names that are not log file names are never expired.
pub fn is_expired(file_name: &str, now: NaiveDateTime, retention_days: u64) -> bool {
    let Some(stem) = file_name
        .strip_suffix(LOG_FILE_EXTENSION)
        .and_then(|s| s.strip_suffix('.'))
    else {
        return false;
    };
    let Ok(timestamp) = NaiveDateTime::parse_from_str(stem, LOG_FILE_TIMESTAMP) else {
        return false;
    };
    let cutoff = i64::try_from(retention_days)
        .ok()
        .and_then(TimeDelta::try_days)
        .and_then(|delta| now.checked_sub_signed(delta));
    // a retention beyond the representable range keeps everything
    cutoff.is_some_and(|cutoff| timestamp < cutoff)
}

/// Remove all expired log files from `dir` and return their paths.
///
/// A missing directory is not an error.
///
/// # Errors
///
/// * [`LogErrorKind::ListingDirectoryFailed`] if the directory can not be read
/// * [`LogErrorKind::RemovingFileFailed`] if an expired file can not be removed
pub fn remove_expired_logs(
    dir: &Path,
    now: NaiveDateTime,
    retention_days: u64,
) -> LogResult<Vec<PathBuf>> {
    let listing_failed = |source| LogErrorKind::ListingDirectoryFailed {
        path: dir.to_path_buf(),
        source,
    };
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(listing_failed(err)),
    };

    let mut removed = Vec::new();
    for entry in entries {
        let entry = entry.map_err(listing_failed)?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !entry.file_type().map_err(listing_failed)?.is_file() {
            continue;
        }
        if is_expired(name, now, retention_days) {
            let path = entry.path();
            fs::remove_file(&path).map_err(|source| LogErrorKind::RemovingFileFailed {
                path: path.clone(),
                source,
            })?;
            info!("removed old log file {}", path.display());
            removed.push(path);
        } else {
            debug!("keeping {name}");
        }
    }
    removed.sort();
    Ok(removed)
}
