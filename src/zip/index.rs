//! Parsed central directory with name lookup and pattern selection.

use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::structures::{CentralDirectoryEntry, EntrySummary};

/// Entry name pattern with at most one `*` wildcard.
///
/// Names are compared as stored in the archive, `/`-separated, whatever the
/// host's path separator is. A wildcard pattern matches names starting with
/// the text before `*` and ending with the text after it; the two parts may
/// overlap, so `a*a` matches `a`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pattern {
    Exact(String),
    Wildcard { prefix: String, suffix: String },
}

impl Pattern {
    pub fn parse(pattern: &str) -> Result<Self> {
        let mut parts = pattern.split('*');
        let first = parts.next().unwrap_or_default();
        match (parts.next(), parts.next()) {
            (None, _) => Ok(Pattern::Exact(first.to_string())),
            (Some(suffix), None) => Ok(Pattern::Wildcard {
                prefix: first.to_string(),
                suffix: suffix.to_string(),
            }),
            (Some(_), Some(_)) => Err(Error::InvalidPattern(pattern.to_string())),
        }
    }

    pub fn matches(&self, name: &str) -> bool {
        match self {
            Pattern::Exact(exact) => name == exact,
            Pattern::Wildcard { prefix, suffix } => {
                name.starts_with(prefix.as_str()) && name.ends_with(suffix.as_str())
            }
        }
    }
}

impl FromStr for Pattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Pattern::parse(s)
    }
}

/// Entries in central directory order, built once per opened archive.
#[derive(Debug, Clone, Default)]
pub struct ArchiveIndex {
    entries: Vec<CentralDirectoryEntry>,
    // First occurrence wins for duplicated names.
    by_name: HashMap<String, usize>,
}

impl ArchiveIndex {
    pub fn new(entries: Vec<CentralDirectoryEntry>) -> Self {
        let mut by_name = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            by_name.entry(entry.file_name.clone()).or_insert(i);
        }
        Self { entries, by_name }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CentralDirectoryEntry] {
        &self.entries
    }

    pub fn get(&self, position: usize) -> Option<&CentralDirectoryEntry> {
        self.entries.get(position)
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.file_name.as_str()).collect()
    }

    pub fn summaries(&self) -> Vec<EntrySummary> {
        self.entries.iter().map(CentralDirectoryEntry::summary).collect()
    }

    pub fn lookup(&self, name: &str) -> Result<&CentralDirectoryEntry> {
        self.by_name
            .get(name)
            .map(|&i| &self.entries[i])
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Positions of matching entries, in directory order.
    pub fn positions(&self, pattern: &Pattern) -> Vec<usize> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| pattern.matches(&e.file_name))
            .map(|(i, _)| i)
            .collect()
    }

    pub fn select(&self, pattern: &Pattern) -> Vec<&CentralDirectoryEntry> {
        self.positions(pattern)
            .into_iter()
            .map(|i| &self.entries[i])
            .collect()
    }

    pub fn select_by_pattern(&self, pattern: &str) -> Result<Vec<&CentralDirectoryEntry>> {
        Ok(self.select(&Pattern::parse(pattern)?))
    }
}
