//! Durable record of completed reposts
//!
//! The store is a flat text file with one uri per line. When a retention
//! window is configured each line also carries the time the repost was
//! made (`uri<TAB>timestamp`) so old entries can be pruned.
//!
//! Two write modes are supported:
//! - `append`: every successful repost is appended and synced immediately,
//!   so a crash never loses progress already made
//! - `overwrite`: the full set is written once at the end of the run
//!
//! Full rewrites always go through a temporary file and a rename. While a
//! store is open it holds an exclusive lock on `<path>.lock`, so two runs
//! against the same file cannot interleave.

use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::filter::SeenSet;
use crate::time::parse_timestamp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    #[default]
    Append,
    Overwrite,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEntry {
    pub uri: String,
    /// When the repost was made; absent for lines written without retention
    pub done_at: Option<DateTime<Utc>>,
}

pub struct ProgressStore {
    path: PathBuf,
    mode: StoreMode,
    retention: Option<Duration>,
    entries: Vec<StoreEntry>,
    index: HashSet<String>,
    /// Entries added this run that have not reached the file yet
    unsaved: Vec<StoreEntry>,
    /// Set after pruning or a failed load: the next flush rewrites the whole file
    needs_rewrite: bool,
    degraded: bool,
    /// Whether the on-disk file currently ends with a newline (or is empty)
    ends_with_newline: bool,
    _lock: File,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("path", &self.path)
            .field("mode", &self.mode)
            .field("retention", &self.retention)
            .field("entries", &self.entries.len())
            .field("unsaved", &self.unsaved.len())
            .field("degraded", &self.degraded)
            .finish()
    }
}

impl ProgressStore {
    /// Open (or create) the store at `path` and load it into memory
    ///
    /// A file that cannot be read or parsed is treated as empty: the error is
    /// logged and the file is copied to `<path>.corrupt`. In append mode the
    /// file is then replaced with an empty one right away, so appends made
    /// this run land on a readable file; otherwise the next flush rewrites
    /// it. Duplicate reposts are preferred over never acting again.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Locked` if another run holds the store, or an IO
    /// error if the parent directory or lock file cannot be created.
    pub fn open(
        path: impl Into<PathBuf>,
        mode: StoreMode,
        retention: Option<Duration>,
    ) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let lock = acquire_lock(&path)?;

        let (entries, degraded, backed_up) = match Self::read_entries(&path) {
            Ok(entries) => (entries, false, false),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Progress store unreadable, starting empty");
                let backed_up = backup_corrupt_file(&path);
                (Vec::new(), true, backed_up)
            }
        };

        let ends_with_newline = file_ends_with_newline(&path);
        let index = entries.iter().map(|e| e.uri.clone()).collect();

        debug!(path = %path.display(), entries = entries.len(), "Loaded progress store");

        let mut store = Self {
            path,
            mode,
            retention,
            entries,
            index,
            unsaved: Vec::new(),
            needs_rewrite: degraded,
            degraded,
            ends_with_newline,
            _lock: lock,
        };

        // Never append behind unreadable content; without a backup the
        // original stays until the end-of-run flush.
        if degraded && backed_up && mode == StoreMode::Append {
            match store.save() {
                Ok(()) => {
                    store.needs_rewrite = false;
                    store.ends_with_newline = true;
                    info!(path = %store.path.display(), "Reset unreadable progress store");
                }
                Err(e) => {
                    warn!(path = %store.path.display(), error = %e, "Could not reset unreadable progress store");
                }
            }
        }

        Ok(store)
    }

    /// Read the set of uris stored at `path`; a missing file is an empty set
    pub fn load(path: &Path) -> Result<HashSet<String>, StoreError> {
        Ok(Self::read_entries(path)?
            .into_iter()
            .map(|e| e.uri)
            .collect())
    }

    /// Parse every entry in the file at `path`, keeping the first of any duplicates
    pub fn read_entries(path: &Path) -> Result<Vec<StoreEntry>, StoreError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let content = String::from_utf8(bytes).map_err(|e| {
            let valid = &e.as_bytes()[..e.utf8_error().valid_up_to()];
            StoreError::Corrupt {
                line: valid.iter().filter(|b| **b == b'\n').count() + 1,
                message: "invalid UTF-8".to_string(),
            }
        })?;

        let mut seen = HashSet::new();
        let mut entries = Vec::new();
        for (number, line) in content.lines().enumerate() {
            let Some(entry) = parse_line(line, number + 1)? else {
                continue;
            };
            if seen.insert(entry.uri.clone()) {
                entries.push(entry);
            }
        }

        Ok(entries)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.index.contains(uri)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[StoreEntry] {
        &self.entries
    }

    /// True when the file could not be loaded and the run started empty
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Entries added this run that are not yet persisted
    pub fn unsaved(&self) -> usize {
        self.unsaved.len()
    }

    /// Record a completed repost
    ///
    /// In append mode the line is written and synced before returning. If that
    /// write fails the entry stays in memory and is retried at [`flush`].
    /// Returns `Ok(false)` if the uri was already present.
    ///
    /// [`flush`]: ProgressStore::flush
    pub fn mark_done(&mut self, uri: &str, done_at: DateTime<Utc>) -> Result<bool, StoreError> {
        if self.index.contains(uri) {
            return Ok(false);
        }

        let entry = StoreEntry {
            uri: uri.to_string(),
            done_at: Some(done_at),
        };
        self.index.insert(entry.uri.clone());
        self.entries.push(entry.clone());

        match self.mode {
            StoreMode::Overwrite => {
                self.unsaved.push(entry);
                Ok(true)
            }
            StoreMode::Append => match self.append_line(&entry) {
                Ok(()) => Ok(true),
                Err(e) => {
                    self.unsaved.push(entry);
                    Err(e)
                }
            },
        }
    }

    fn append_line(&mut self, entry: &StoreEntry) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        let mut line = String::new();
        if !self.ends_with_newline {
            line.push('\n');
        }
        line.push_str(&self.format_line(entry));
        line.push('\n');

        file.write_all(line.as_bytes())?;
        file.sync_data()?;
        self.ends_with_newline = true;
        Ok(())
    }

    /// Drop entries older than the retention window
    ///
    /// Entries without a timestamp are kept. Returns the number removed.
    pub fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let Some(cutoff) = chrono::Duration::from_std(retention)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        else {
            return 0;
        };

        let before = self.entries.len();
        self.entries
            .retain(|e| e.done_at.map_or(true, |done| done >= cutoff));
        let removed = before - self.entries.len();

        if removed > 0 {
            self.index = self.entries.iter().map(|e| e.uri.clone()).collect();
            self.needs_rewrite = true;
            info!(removed, retained = self.entries.len(), "Pruned progress store");
        }

        removed
    }

    /// Persist anything not yet on disk
    ///
    /// Overwrite mode, a prune, a failed append, or a failed load all lead to
    /// a full atomic rewrite. Otherwise append mode has nothing left to do.
    pub fn flush(&mut self) -> Result<(), StoreError> {
        let rewrite = self.needs_rewrite
            || !self.unsaved.is_empty()
            || (self.mode == StoreMode::Overwrite && !self.path.exists());
        if !rewrite {
            return Ok(());
        }

        self.save()?;
        self.unsaved.clear();
        self.needs_rewrite = false;
        self.ends_with_newline = true;
        Ok(())
    }

    /// Atomically replace the file with the full in-memory set
    pub fn save(&self) -> Result<(), StoreError> {
        let tmp_path = sibling_path(&self.path, ".tmp");

        let mut content = String::new();
        for entry in &self.entries {
            content.push_str(&self.format_line(entry));
            content.push('\n');
        }

        {
            let mut tmp = File::create(&tmp_path)?;
            tmp.write_all(content.as_bytes())?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "Saved progress store");
        Ok(())
    }

    fn format_line(&self, entry: &StoreEntry) -> String {
        match (self.retention, entry.done_at) {
            (Some(_), Some(done_at)) => format!(
                "{}\t{}",
                entry.uri,
                done_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            ),
            _ => entry.uri.clone(),
        }
    }
}

impl SeenSet for ProgressStore {
    fn contains_uri(&self, uri: &str) -> bool {
        self.contains(uri)
    }
}

fn parse_line(line: &str, number: usize) -> Result<Option<StoreEntry>, StoreError> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let mut fields = line.split_whitespace();
    let uri = fields.next().unwrap_or_default();
    let done_at = match fields.next() {
        None => None,
        Some(raw) => Some(parse_timestamp(raw).ok_or_else(|| StoreError::Corrupt {
            line: number,
            message: format!("unreadable timestamp '{}'", raw),
        })?),
    };

    if fields.next().is_some() || uri.contains('\0') {
        return Err(StoreError::Corrupt {
            line: number,
            message: "unexpected content".to_string(),
        });
    }

    Ok(Some(StoreEntry {
        uri: uri.to_string(),
        done_at,
    }))
}

fn sibling_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn acquire_lock(path: &Path) -> Result<File, StoreError> {
    let lock_path = sibling_path(path, ".lock");
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)?;

    match lock.try_lock_exclusive() {
        Ok(()) => Ok(lock),
        Err(e) if e.kind() == fs2::lock_contended_error().kind() => {
            Err(StoreError::Locked(path.display().to_string()))
        }
        Err(e) => Err(e.into()),
    }
}

/// Copy an unreadable store aside; true once a backup exists
fn backup_corrupt_file(path: &Path) -> bool {
    let backup = sibling_path(path, ".corrupt");
    match fs::copy(path, &backup) {
        Ok(_) => true,
        Err(e) => {
            warn!(path = %backup.display(), error = %e, "Could not back up corrupt progress store");
            false
        }
    }
}

fn file_ends_with_newline(path: &Path) -> bool {
    match fs::read(path) {
        Ok(bytes) => bytes.last().map_or(true, |b| *b == b'\n'),
        Err(_) => true,
    }
}
