//! Output file naming and keep-last-N retention

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::constants::{FILE_TIMESTAMP_FORMAT, FORECAST_FILE_PREFIX};
use crate::error::{HydrometError, Result};

/// `forecast_<point-id>_<timestamp>.csv`
pub fn output_file_name(point_id: &str, timestamp: DateTime<Utc>) -> String {
    format!(
        "{}{}_{}.csv",
        FORECAST_FILE_PREFIX,
        point_id,
        timestamp.format(FILE_TIMESTAMP_FORMAT)
    )
}

/// Path for a new output file in `dir`. When a file with the plain name
/// already exists, a `-<n>` suffix keeps the name unique.
pub fn next_output_path(dir: &Path, point_id: &str, timestamp: DateTime<Utc>) -> PathBuf {
    let path = dir.join(output_file_name(point_id, timestamp));
    if !path.exists() {
        return path;
    }

    let stamp = timestamp.format(FILE_TIMESTAMP_FORMAT);
    (1..)
        .map(|n| dir.join(format!("{FORECAST_FILE_PREFIX}{point_id}_{stamp}-{n}.csv")))
        .find(|candidate| !candidate.exists())
        .unwrap_or(path)
}

/// Timestamp and collision suffix of an output file of `point_id`, `None`
/// for any other name. A missing suffix counts as 0. The remainder after the
/// id must be a timestamp so that `a` does not claim the files of `a_b`.
fn output_order(file_name: &str, point_id: &str) -> Option<(NaiveDateTime, u32)> {
    let rest = file_name
        .strip_prefix(FORECAST_FILE_PREFIX)?
        .strip_prefix(point_id)?
        .strip_prefix('_')?
        .strip_suffix(".csv")?;

    let (stamp, n) = match rest.split_once('-') {
        Some((stamp, n)) if !n.is_empty() && n.bytes().all(|b| b.is_ascii_digit()) => {
            (stamp, n.parse().ok()?)
        }
        Some(_) => return None,
        None => (rest, 0),
    };
    let stamp = NaiveDateTime::parse_from_str(stamp, FILE_TIMESTAMP_FORMAT).ok()?;
    Some((stamp, n))
}

fn is_output_for(file_name: &str, point_id: &str) -> bool {
    output_order(file_name, point_id).is_some()
}

/// Orders scanned files by creation time, then by the timestamp and suffix
/// in their names, so files created within the same tick keep write order.
fn oldest_first(found: Vec<(SystemTime, PathBuf)>, point_id: &str) -> Vec<PathBuf> {
    let mut keyed: Vec<_> = found
        .into_iter()
        .filter_map(|(created, path)| {
            let order = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| output_order(name, point_id))?;
            Some(((created, order), path))
        })
        .collect();
    keyed.sort();
    keyed.into_iter().map(|(_, path)| path).collect()
}

/// Output files per point, oldest first
#[derive(Debug, Default)]
pub struct RetentionLedger {
    files: HashMap<String, VecDeque<PathBuf>>,
}

impl RetentionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the list for `point_id` with the matching files already in
    /// `dir`, ordered by creation time. Filesystems without birth times fall
    /// back to modification time; equal times are ordered by the timestamp
    /// and collision suffix in the name.
    pub fn scan(&mut self, dir: &Path, point_id: &str) -> Result<usize> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                self.files.insert(point_id.to_string(), VecDeque::new());
                return Ok(0);
            }
            Err(e) => return Err(HydrometError::file_system(dir, e)),
        };

        let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| HydrometError::file_system(dir, e))?;
            let path = entry.path();
            let matches = entry
                .file_name()
                .to_str()
                .is_some_and(|name| is_output_for(name, point_id));
            if !matches {
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| HydrometError::file_system(&path, e))?;
            if !metadata.is_file() {
                continue;
            }
            let created = metadata
                .created()
                .or_else(|_| metadata.modified())
                .map_err(|e| HydrometError::file_system(&path, e))?;
            found.push((created, path));
        }

        let found = oldest_first(found, point_id);
        let count = found.len();
        tracing::debug!(point_id, dir = %dir.display(), count, "Existing output files found");

        self.files.insert(point_id.to_string(), found.into());
        Ok(count)
    }

    /// Appends a freshly written file for `point_id`
    pub fn record(&mut self, point_id: &str, path: PathBuf) {
        self.files.entry(point_id.to_string()).or_default().push_back(path);
    }

    /// Tracked files for `point_id`, oldest first
    pub fn files(&self, point_id: &str) -> Vec<&Path> {
        self.files
            .get(point_id)
            .map(|files| files.iter().map(PathBuf::as_path).collect())
            .unwrap_or_default()
    }

    /// Deletes the oldest files of `point_id` until at most `keep` remain and
    /// returns the deleted paths. Files that are already gone count as
    /// deleted.
    pub fn prune(&mut self, point_id: &str, keep: usize) -> Result<Vec<PathBuf>> {
        let Some(files) = self.files.get_mut(point_id) else {
            return Ok(Vec::new());
        };

        let mut removed = Vec::new();
        while files.len() > keep {
            let Some(oldest) = files.pop_front() else {
                break;
            };
            match fs::remove_file(&oldest) {
                Ok(()) => tracing::info!(point_id, path = %oldest.display(), "Removed old output file"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    tracing::debug!(point_id, path = %oldest.display(), "Old output file already gone");
                }
                Err(e) => {
                    let err = HydrometError::file_system(&oldest, e);
                    files.push_front(oldest);
                    return Err(err);
                }
            }
            removed.push(oldest);
        }

        Ok(removed)
    }
}
