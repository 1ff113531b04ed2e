//! Batch extraction over one or more patterns.
//!
//! Failures stay scoped: a bad or unmatched pattern is reported and the
//! remaining patterns still run; a failing entry is reported and its
//! siblings still get extracted.

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use futures_util::{StreamExt, stream};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::io::RangeFetcher;

use super::archive::ArchiveHandle;
use super::index::Pattern;
use super::structures::CentralDirectoryEntry;

/// A pattern that selected nothing or could not be parsed.
#[derive(Debug)]
pub struct PatternFailure {
    pub pattern: String,
    pub error: Error,
}

#[derive(Debug)]
pub enum EntryOutcome {
    /// Written in full; `path` is set for per-entry file destinations.
    Extracted { bytes: u64, path: Option<PathBuf> },
    /// Left alone, e.g. because the destination already existed.
    Skipped { reason: String },
    Failed(Error),
}

#[derive(Debug)]
pub struct EntryReport {
    pub name: String,
    pub outcome: EntryOutcome,
}

/// What happened to every pattern and selected entry of a batch.
///
/// Entries are listed in central directory order.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub pattern_failures: Vec<PatternFailure>,
    pub entries: Vec<EntryReport>,
}

impl BatchReport {
    pub fn is_success(&self) -> bool {
        self.pattern_failures.is_empty()
            && self
                .entries
                .iter()
                .all(|e| !matches!(e.outcome, EntryOutcome::Failed(_)))
    }

    pub fn extracted_bytes(&self) -> u64 {
        self.entries
            .iter()
            .map(|e| match e.outcome {
                EntryOutcome::Extracted { bytes, .. } => bytes,
                _ => 0,
            })
            .sum()
    }

    pub fn failed_entries(&self) -> impl Iterator<Item = (&str, &Error)> {
        self.entries.iter().filter_map(|e| match &e.outcome {
            EntryOutcome::Failed(err) => Some((e.name.as_str(), err)),
            _ => None,
        })
    }
}

/// Where per-entry files go.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    pub root: PathBuf,
    /// Keep the archive's directory structure instead of flattening to base names.
    pub keep_paths: bool,
    /// Replace destination files that already exist.
    pub overwrite: bool,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            keep_paths: true,
            overwrite: false,
        }
    }

    /// Destination of `name`, refusing names that would leave `root`.
    pub fn target(&self, name: &str) -> Result<PathBuf> {
        if name.starts_with('/') {
            return Err(Error::UnsafePath(name.to_string()));
        }
        let mut parts = Vec::new();
        for part in name.split('/') {
            match part {
                "" | "." => continue,
                ".." => return Err(Error::UnsafePath(name.to_string())),
                p if p.contains('\\') || p.contains(':') => {
                    return Err(Error::UnsafePath(name.to_string()));
                }
                p => parts.push(p),
            }
        }

        let parts: &[&str] = if self.keep_paths {
            &parts
        } else {
            parts.last().map(std::slice::from_ref).unwrap_or(&[])
        };
        if parts.is_empty() {
            return Err(Error::UnsafePath(name.to_string()));
        }
        Ok(parts.iter().fold(self.root.clone(), |path, p| path.join(p)))
    }
}

/// Drives selection, fetching, decompression and writing for a batch.
pub struct ExtractionEngine<'a, R: RangeFetcher + ?Sized> {
    handle: &'a ArchiveHandle<R>,
    cancel: CancellationToken,
}

impl<'a, R: RangeFetcher + ?Sized> ExtractionEngine<'a, R> {
    pub fn new(handle: &'a ArchiveHandle<R>) -> Self {
        Self {
            handle,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the batch when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Directory positions of the non-directory entries selected by any
    /// pattern, deduplicated and sorted.
    fn resolve<S: AsRef<str>>(&self, patterns: &[S], report: &mut BatchReport) -> Result<Vec<usize>> {
        let index = self.handle.index()?;
        let mut selected = BTreeSet::new();
        for pattern in patterns {
            let pattern = pattern.as_ref();
            let positions = match Pattern::parse(pattern) {
                Ok(parsed) => index.positions(&parsed),
                Err(error) => {
                    warn!(pattern, %error, "skipping pattern");
                    report.pattern_failures.push(PatternFailure {
                        pattern: pattern.to_string(),
                        error,
                    });
                    continue;
                }
            };
            if positions.is_empty() {
                warn!(pattern, "no entry matches");
                report.pattern_failures.push(PatternFailure {
                    pattern: pattern.to_string(),
                    error: Error::NotFound(pattern.to_string()),
                });
            }
            selected.extend(positions);
        }

        Ok(selected
            .into_iter()
            .filter(|&i| index.get(i).is_some_and(|e| !e.is_directory))
            .collect())
    }

    fn entry(&self, position: usize) -> Result<&'a CentralDirectoryEntry> {
        self.handle
            .index()?
            .get(position)
            .ok_or_else(|| Error::NotFound(format!("entry #{position}")))
    }

    async fn read_entry(&self, entry: &CentralDirectoryEntry) -> Result<Vec<u8>> {
        let reader = self.handle.entry_reader();
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Error::Cancelled),
            result = reader.read_to_vec(entry) => result,
        }
    }

    /// Write every selected entry, in directory order, one after the other
    /// into `sink`.
    ///
    /// Entries are fetched concurrently but an entry's bytes reach the sink
    /// only once it decompressed completely, so a failed entry contributes
    /// nothing. A failing sink aborts the batch.
    pub async fn extract_concatenated<S, W>(&self, patterns: &[S], sink: &mut W) -> Result<BatchReport>
    where
        S: AsRef<str>,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let _session = self.handle.session().await?;
        let mut report = BatchReport::default();
        let positions = self.resolve(patterns, &mut report)?;

        // `buffered` yields in input order whatever order fetches finish in.
        let mut results = stream::iter(positions)
            .map(|position| async move {
                match self.entry(position) {
                    Ok(entry) => (entry.file_name.clone(), self.read_entry(entry).await),
                    Err(error) => (format!("entry #{position}"), Err(error)),
                }
            })
            .buffered(self.handle.options().workers());

        while let Some((name, result)) = results.next().await {
            let outcome = match result {
                Ok(data) => {
                    sink.write_all(&data).await?;
                    info!(name = %name, bytes = data.len(), "extracted");
                    EntryOutcome::Extracted {
                        bytes: data.len() as u64,
                        path: None,
                    }
                }
                Err(error) => {
                    warn!(name = %name, %error, "extraction failed");
                    EntryOutcome::Failed(error)
                }
            };
            report.entries.push(EntryReport { name, outcome });
        }
        sink.flush().await?;
        Ok(report)
    }

    /// Write each selected entry to its own file under `dest`.
    ///
    /// A file appears only after its entry was fetched and decompressed in
    /// full; failures and cancellation leave no partial file behind.
    pub async fn extract_to_dir<S: AsRef<str>>(
        &self,
        patterns: &[S],
        dest: &DirectorySink,
    ) -> Result<BatchReport> {
        let _session = self.handle.session().await?;
        let mut report = BatchReport::default();
        let positions = self.resolve(patterns, &mut report)?;

        let mut done: Vec<(usize, EntryReport)> = stream::iter(positions)
            .map(|position| async move {
                let report = match self.entry(position) {
                    Ok(entry) => EntryReport {
                        name: entry.file_name.clone(),
                        outcome: self.extract_one(entry, dest).await,
                    },
                    Err(error) => EntryReport {
                        name: format!("entry #{position}"),
                        outcome: EntryOutcome::Failed(error),
                    },
                };
                (position, report)
            })
            .buffer_unordered(self.handle.options().workers())
            .collect()
            .await;

        done.sort_by_key(|(position, _)| *position);
        report.entries.extend(done.into_iter().map(|(_, r)| r));
        Ok(report)
    }

    async fn extract_one(&self, entry: &CentralDirectoryEntry, dest: &DirectorySink) -> EntryOutcome {
        let target = match dest.target(&entry.file_name) {
            Ok(target) => target,
            Err(error) => return EntryOutcome::Failed(error),
        };
        if !dest.overwrite && tokio::fs::try_exists(&target).await.unwrap_or(false) {
            return skipped(&entry.file_name, "destination exists");
        }

        let data = match self.read_entry(entry).await {
            Ok(data) => data,
            Err(error) => {
                warn!(name = %entry.file_name, %error, "extraction failed");
                return EntryOutcome::Failed(error);
            }
        };

        let bytes = data.len() as u64;
        let overwrite = dest.overwrite;
        let path = target.clone();
        let written = tokio::task::spawn_blocking(move || persist(&path, &data, overwrite)).await;

        match written {
            Ok(Ok(())) => {
                info!(name = %entry.file_name, path = %target.display(), bytes, "extracted");
                EntryOutcome::Extracted {
                    bytes,
                    path: Some(target),
                }
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                skipped(&entry.file_name, "destination exists")
            }
            Ok(Err(e)) => EntryOutcome::Failed(Error::Io(e)),
            Err(e) => EntryOutcome::Failed(Error::Io(std::io::Error::other(e))),
        }
    }
}

fn skipped(name: &str, reason: &str) -> EntryOutcome {
    info!(name, reason, "skipping");
    EntryOutcome::Skipped {
        reason: reason.to_string(),
    }
}

/// Write `data` next to `target` and move it into place in one rename.
fn persist(target: &Path, data: &[u8], overwrite: bool) -> std::io::Result<()> {
    let parent = target
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    if overwrite {
        tmp.persist(target).map_err(|e| e.error)?;
    } else {
        tmp.persist_noclobber(target).map_err(|e| e.error)?;
    }
    Ok(())
}
