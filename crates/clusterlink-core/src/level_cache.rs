//! On-disk cache of a process's timed log level.
//!
//! `SetLogLevel` stores the requested level together with its expiry so a
//! restarted daemon keeps the verbosity a user asked for. The cache lives in
//! the logging directory as `<process>-log-level.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::timed_level::{TimedLevel, parse_level};

/// Cached level entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct CachedLevel {
    level: String,
    /// `None` means the level never expires.
    expires_at: Option<DateTime<Utc>>,
}

/// Path of the cache file for `process` inside `dir`.
pub fn cache_path(dir: &Path, process: &str) -> PathBuf {
    dir.join(format!("{process}-log-level.json"))
}

/// Apply `level` to `timed` for `duration` and persist it.
///
/// An empty `level` resets `timed` to its default and removes the cache
/// entry. A zero `duration` makes the level permanent.
pub fn set_and_store(
    dir: &Path,
    process: &str,
    timed: &TimedLevel,
    level: &str,
    duration: Duration,
) -> Result<()> {
    if level.trim().is_empty() {
        timed.reset();
        return remove(dir, process);
    }

    let parsed = parse_level(level)?;
    let expires_at = if duration.is_zero() {
        None
    } else {
        let out_of_range =
            || Error::Config(format!("log level duration {duration:?} out of range"));
        let ttl = chrono::Duration::from_std(duration).map_err(|_| out_of_range())?;
        Some(Utc::now().checked_add_signed(ttl).ok_or_else(out_of_range)?)
    };
    timed.set(parsed, duration);

    let entry = CachedLevel {
        level: parsed.to_string(),
        expires_at,
    };

    std::fs::create_dir_all(dir)?;
    std::fs::write(cache_path(dir, process), serde_json::to_vec_pretty(&entry)?)?;
    debug!(level = %parsed, ?expires_at, "Stored timed log level");
    Ok(())
}

/// Restore a cached level into `timed`, if one exists and has not expired.
///
/// An expired entry is removed. A missing file is not an error.
pub fn load_into(dir: &Path, process: &str, timed: &TimedLevel) -> Result<()> {
    load_at(dir, process, timed, Utc::now())
}

fn load_at(dir: &Path, process: &str, timed: &TimedLevel, now: DateTime<Utc>) -> Result<()> {
    let path = cache_path(dir, process);
    let content = match std::fs::read(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    let entry: CachedLevel = serde_json::from_slice(&content)?;
    let level = parse_level(&entry.level)?;

    match entry.expires_at {
        None => {
            info!(%level, "Restored log level from cache");
            timed.set(level, Duration::ZERO);
        }
        Some(expires_at) => match (expires_at - now).to_std() {
            Ok(remaining) if !remaining.is_zero() => {
                info!(%level, remaining_secs = remaining.as_secs(), "Restored timed log level from cache");
                timed.set(level, remaining);
            }
            _ => {
                debug!(%level, "Cached log level has expired");
                remove(dir, process)?;
            }
        },
    }
    Ok(())
}

fn remove(dir: &Path, process: &str) -> Result<()> {
    match std::fs::remove_file(cache_path(dir, process)) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}
