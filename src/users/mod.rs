//! Reloadable flat-file credential table.
//!
//! The users file is a sequence of records separated by blank lines, each
//! record a set of `key=value` lines. Lines starting with `#` are comments.
//! A record's `name` attribute is the client's system id:
//!
//! ```text
//! name=alice
//! password=secret
//!
//! name=bob
//! password=hunter2
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, warn};

/// Errors loading the users file. Not-found is distinct from other I/O
/// failures so callers can decide whether to warn or fall back.
#[derive(Debug, Error)]
pub enum UserTableError {
    #[error("users file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read users file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One record from the users file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserRecord {
    attributes: HashMap<String, String>,
}

impl UserRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    /// The record's system id.
    pub fn name(&self) -> Option<&str> {
        self.get("name")
    }

    pub fn password(&self) -> Option<&str> {
        self.get("password")
    }

    fn insert(&mut self, key: String, value: String) {
        self.attributes.insert(key, value);
    }

    fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }
}

/// Credential table backed by a flat file, reloadable in place.
///
/// `reload` swaps the record set atomically; sessions authenticated against
/// the old table are unaffected, and a failed reload leaves the previous
/// records in effect.
#[derive(Debug)]
pub struct UserTable {
    path: PathBuf,
    records: RwLock<Vec<UserRecord>>,
}

impl UserTable {
    /// Load the table from `path`.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, UserTableError> {
        let path = path.into();
        let records = read_records(&path)?;
        debug!(path = %path.display(), users = records.len(), "users table loaded");
        Ok(Self {
            path,
            records: RwLock::new(records),
        })
    }

    /// An empty table pointed at `path`; used as the fallback when the file
    /// is missing at startup. A later `reload` can still populate it.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: RwLock::new(Vec::new()),
        }
    }

    /// Re-read the file. On error the previous records stay in effect.
    pub fn reload(&self) -> Result<usize, UserTableError> {
        let records = read_records(&self.path)?;
        let count = records.len();
        *self.records.write().unwrap_or_else(|e| e.into_inner()) = records;
        debug!(path = %self.path.display(), users = count, "users table reloaded");
        Ok(count)
    }

    /// Find the record whose `name` equals `system_id`.
    pub fn lookup(&self, system_id: &str) -> Option<UserRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.name() == Some(system_id))
            .cloned()
    }

    /// Check a system id/password pair against the table.
    pub fn authenticate(&self, system_id: &str, password: &str) -> bool {
        match self.lookup(system_id) {
            Some(record) => match record.password() {
                Some(expected) => expected == password,
                None => {
                    warn!(system_id, "user record has no password attribute");
                    false
                }
            },
            None => false,
        }
    }

    pub fn count(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_records(path: &Path) -> Result<Vec<UserRecord>, UserTableError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == io::ErrorKind::NotFound {
            UserTableError::NotFound(path.to_path_buf())
        } else {
            UserTableError::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    Ok(parse_records(&contents))
}

fn parse_records(contents: &str) -> Vec<UserRecord> {
    let mut records = Vec::new();
    let mut current = UserRecord::default();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                records.push(std::mem::take(&mut current));
            }
            continue;
        }
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            current.insert(key.trim().to_string(), value.trim().to_string());
        } else {
            warn!(line, "ignoring malformed users file line");
        }
    }

    if !current.is_empty() {
        records.push(current);
    }

    records
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = "\
# test users
name=alice
password=secret
timeout=unlimited

name=bob
password=hunter2
";

    fn write_users(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_parse_records() {
        let records = parse_records(SAMPLE);
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].name(), Some("alice"));
        assert_eq!(records[0].get("timeout"), Some("unlimited"));
        assert_eq!(records[1].name(), Some("bob"));
    }

    #[test]
    fn test_lookup_and_authenticate() {
        let file = write_users(SAMPLE);
        let table = UserTable::load(file.path()).unwrap();

        assert!(table.lookup("alice").is_some());
        assert!(table.lookup("carol").is_none());

        assert!(table.authenticate("alice", "secret"));
        assert!(!table.authenticate("alice", "wrong"));
        assert!(!table.authenticate("carol", "secret"));
    }

    #[test]
    fn test_reload_picks_up_new_users() {
        let file = write_users(SAMPLE);
        let table = UserTable::load(file.path()).unwrap();
        assert!(!table.authenticate("dave", "pw"));

        std::fs::write(
            file.path(),
            format!("{SAMPLE}\nname=dave\npassword=pw\n"),
        )
        .unwrap();

        assert_eq!(table.reload().unwrap(), 3);
        assert!(table.authenticate("dave", "pw"));
    }

    #[test]
    fn test_missing_file_is_distinct_error() {
        let err = UserTable::load("/nonexistent/users.txt").unwrap_err();
        assert!(matches!(err, UserTableError::NotFound(_)));
    }

    #[test]
    fn test_failed_reload_keeps_previous_table() {
        let file = write_users(SAMPLE);
        let table = UserTable::load(file.path()).unwrap();
        let path = file.path().to_path_buf();
        drop(file); // removes the file

        assert!(table.reload().is_err());
        assert!(table.authenticate("alice", "secret"));
        assert_eq!(table.path(), path);
    }
}
