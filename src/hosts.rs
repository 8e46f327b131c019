//! Persisted list of monitored targets.
//!
//! The file is a JSON array whose entries are either a bare target string or
//! an object with a display alias:
//!
//! ```json
//! ["10.0.0.1", { "target": "example.com", "alias": "web" }]
//! ```

use std::io::ErrorKind;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Host list error types.
#[derive(Error, Debug)]
pub enum HostsError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid host list: {0}")]
    Json(#[from] serde_json::Error),
}

/// A monitored target and its optional display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostEntry {
    pub target: String,
    pub alias: Option<String>,
}

impl HostEntry {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            alias: None,
        }
    }

    pub fn with_alias(mut self, alias: Option<String>) -> Self {
        self.alias = alias.filter(|a| !a.trim().is_empty());
        self
    }
}

/// On-disk form of an entry.
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum StoredEntry {
    Plain(String),
    Aliased {
        target: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        alias: Option<String>,
    },
}

impl From<StoredEntry> for HostEntry {
    fn from(stored: StoredEntry) -> Self {
        match stored {
            StoredEntry::Plain(target) => HostEntry::new(target),
            StoredEntry::Aliased { target, alias } => HostEntry::new(target).with_alias(alias),
        }
    }
}

impl From<&HostEntry> for StoredEntry {
    fn from(entry: &HostEntry) -> Self {
        match &entry.alias {
            None => StoredEntry::Plain(entry.target.clone()),
            Some(alias) => StoredEntry::Aliased {
                target: entry.target.clone(),
                alias: Some(alias.clone()),
            },
        }
    }
}

/// Ordered, duplicate-free list of targets.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HostList {
    entries: Vec<HostEntry>,
}

impl HostList {
    /// Load the list from `path`. A missing file is an empty list.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, HostsError> {
        let data = match std::fs::read_to_string(path.as_ref()) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        let stored: Vec<StoredEntry> = serde_json::from_str(&data)?;
        let mut list = Self::default();
        for entry in stored.into_iter().map(HostEntry::from) {
            if normalize_target(&entry.target).is_none() {
                tracing::warn!("Skipping invalid host entry {:?}", entry.target);
                continue;
            }
            list.insert(entry);
        }
        Ok(list)
    }

    /// Write the list to `path`, replacing the previous file atomically.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), HostsError> {
        let path = path.as_ref();
        let stored: Vec<StoredEntry> = self.entries.iter().map(StoredEntry::from).collect();
        let json = serde_json::to_string_pretty(&stored)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Append an entry. Returns `false` if the target is already listed.
    pub fn insert(&mut self, entry: HostEntry) -> bool {
        if self.get(&entry.target).is_some() {
            return false;
        }
        self.entries.push(entry);
        true
    }

    pub fn remove(&mut self, target: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.target != target);
        self.entries.len() != before
    }

    pub fn get(&self, target: &str) -> Option<&HostEntry> {
        self.entries.iter().find(|e| e.target == target)
    }

    pub fn entries(&self) -> &[HostEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Clean up user input into a target: trims whitespace and strips a URL
/// scheme, path, query and fragment. `None` if nothing usable is left.
pub fn normalize_target(input: &str) -> Option<String> {
    let mut target = input.trim();
    if let Some((_, rest)) = target.split_once("://") {
        target = rest;
    }
    if let Some(end) = target.find(['/', '?', '#']) {
        target = &target[..end];
    }

    if target.is_empty() || target.chars().any(char::is_whitespace) {
        return None;
    }
    Some(target.to_string())
}
