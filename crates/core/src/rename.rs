//! Collision-free bulk renames.
//!
//! Every file is first moved to a unique quarantine name inside its own
//! directory. That step is all-or-nothing: a failure moves everything back.
//! Files are then committed to their final names one by one, and a file whose
//! commit fails simply stays in quarantine.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, error, warn};

pub const QUARANTINE_PREFIX: &str = ".photo_indexer_tmp_";

/// Filesystem operations used by the rename engine.
pub trait RenameFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()>;

    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StdFs;

impl RenameFs for StdFs {
    fn rename(&self, from: &Path, to: &Path) -> io::Result<()> {
        fs::rename(from, to)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageState {
    Quarantined,
    Committed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct StagedRename {
    pub original: PathBuf,
    pub temp: PathBuf,
    pub target: Option<PathBuf>,
    pub state: StageState,
}

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("could not move {} into quarantine as {}: {source}; all files were restored", .original.display(), .temp.display())]
    RolledBack {
        original: PathBuf,
        temp: PathBuf,
        source: io::Error,
    },
    #[error("could not move {} into quarantine ({cause}) and {} file(s) could not be restored: {}", .original.display(), .stranded.len(), describe_stranded(.stranded))]
    RollbackFailed {
        original: PathBuf,
        cause: io::Error,
        /// `(quarantine name, original name)` for each file left behind.
        stranded: Vec<(PathBuf, PathBuf)>,
    },
}

fn describe_stranded(stranded: &[(PathBuf, PathBuf)]) -> String {
    stranded
        .iter()
        .map(|(temp, original)| format!("{} (was {})", temp.display(), original.display()))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Identifies one run; part of every quarantine name it produces.
pub fn new_run_tag() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0)
        .to_string()
}

pub fn quarantine_path(original: &Path, run_tag: &str, index: usize) -> PathBuf {
    let parent = original.parent().unwrap_or_else(|| Path::new("."));
    let ext = original
        .extension()
        .map(|v| format!(".{}", v.to_string_lossy()))
        .unwrap_or_default();
    parent.join(format!("{QUARANTINE_PREFIX}{run_tag}_{index:04}{ext}"))
}

/// A set of files currently held under quarantine names.
#[derive(Debug)]
pub struct Quarantine {
    entries: Vec<StagedRename>,
}

impl Quarantine {
    /// Moves every file in `originals` to its quarantine name, or none of them.
    pub fn enter<F: RenameFs + ?Sized>(
        fs: &F,
        originals: &[PathBuf],
        run_tag: &str,
    ) -> Result<Self, QuarantineError> {
        let mut entries = Vec::<StagedRename>::with_capacity(originals.len());
        for (index, original) in originals.iter().enumerate() {
            let temp = quarantine_path(original, run_tag, index);
            let moved = if fs.exists(&temp) {
                Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "quarantine name already taken",
                ))
            } else {
                fs.rename(original, &temp)
            };

            if let Err(cause) = moved {
                warn!(file = %original.display(), error = %cause, "quarantine failed, restoring");
                let stranded = rollback(fs, &entries);
                if stranded.is_empty() {
                    return Err(QuarantineError::RolledBack {
                        original: original.clone(),
                        temp,
                        source: cause,
                    });
                }
                return Err(QuarantineError::RollbackFailed {
                    original: original.clone(),
                    cause,
                    stranded,
                });
            }

            debug!(from = %original.display(), to = %temp.display(), "quarantined");
            entries.push(StagedRename {
                original: original.clone(),
                temp,
                target: None,
                state: StageState::Quarantined,
            });
        }
        Ok(Self { entries })
    }

    pub fn entries(&self) -> &[StagedRename] {
        &self.entries
    }

    /// Moves one quarantined file to `target`. Never overwrites an existing file.
    pub fn commit<F: RenameFs + ?Sized>(
        &mut self,
        fs: &F,
        index: usize,
        target: PathBuf,
    ) -> io::Result<()> {
        let entry = self.entries.get_mut(index).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "no such quarantined entry")
        })?;
        if entry.state != StageState::Quarantined {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "entry is not in quarantine",
            ));
        }

        let result = if fs.exists(&target) {
            Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("{} already exists", target.display()),
            ))
        } else {
            fs.rename(&entry.temp, &target)
        };

        entry.target = Some(target);
        entry.state = match result {
            Ok(()) => StageState::Committed,
            Err(_) => StageState::Failed,
        };
        result
    }

    /// Entries that are still sitting under their quarantine name.
    pub fn stranded(&self) -> impl Iterator<Item = &StagedRename> {
        self.entries
            .iter()
            .filter(|entry| entry.state != StageState::Committed)
    }
}

/// Moves quarantined files back, newest first. Returns whatever could not be restored.
fn rollback<F: RenameFs + ?Sized>(fs: &F, staged: &[StagedRename]) -> Vec<(PathBuf, PathBuf)> {
    let mut stranded = Vec::new();
    for entry in staged.iter().rev() {
        if !fs.exists(&entry.temp) {
            continue;
        }
        if let Err(err) = fs.rename(&entry.temp, &entry.original) {
            error!(
                temp = %entry.temp.display(),
                original = %entry.original.display(),
                error = %err,
                "rollback failed; file left in quarantine"
            );
            stranded.push((entry.temp.clone(), entry.original.clone()));
        }
    }
    stranded
}
