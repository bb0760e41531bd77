use crate::discovery::{collect_all_images, file_name};
use crate::index::{read_index, write_index, IndexError, PhotoIndex};
use crate::rename::{
    new_run_tag, Quarantine, QuarantineError, RenameFs, StdFs, QUARANTINE_PREFIX,
};
use crate::sanitize::sanitize_filename;
use crate::template::{
    normalize_date, parse_template, render_template, RenderContext, TemplateError, TemplatePart,
};
use crate::{DEFAULT_INDEX_PATH, DEFAULT_TEMPLATE};
use anyhow::{anyhow, Context};
use chrono::{Local, SecondsFormat};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{error, info, warn};

pub const BACKUP_DIR_NAME: &str = "backup_original_names";
pub const BACKUP_FILE_NAME: &str = "original_names.json";
pub const MAPPING_FILE_NAME: &str = "name_mapping.json";

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("target directory does not exist: {0}")]
    MissingDirectory(PathBuf),
    #[error(transparent)]
    Index(#[from] IndexError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error(transparent)]
    Quarantine(#[from] QuarantineError),
    #[error("no rename mapping to undo: {0}")]
    NothingToUndo(PathBuf),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub target_dir: PathBuf,
    pub index_path: PathBuf,
    pub template: String,
    pub counter_start: u64,
    pub backup: bool,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            target_dir: PathBuf::new(),
            index_path: PathBuf::from(DEFAULT_INDEX_PATH),
            template: DEFAULT_TEMPLATE.to_string(),
            counter_start: 1,
            backup: true,
        }
    }
}

/// A file in the target directory that matches an index record.
#[derive(Debug, Clone, Serialize)]
pub struct SyncCandidate {
    pub original_name: String,
    pub record_index: usize,
    pub record_id: String,
    /// Lowercased, with the leading dot.
    pub extension: String,
    pub date: Option<String>,
    /// Name this file gets if every earlier commit succeeds.
    pub planned_name: String,
}

impl SyncCandidate {
    fn render(&self, parts: &[TemplatePart], counter: u64) -> String {
        let ctx = RenderContext {
            counter,
            ext: &self.extension,
            date: self.date.as_deref(),
            id: &self.record_id,
        };
        sanitize_filename(&render_template(parts, &ctx))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SyncPlan {
    pub target_dir: PathBuf,
    pub index_path: PathBuf,
    pub template: String,
    pub counter_start: u64,
    pub backup: bool,
    pub candidates: Vec<SyncCandidate>,
    /// Image files in the directory that no record refers to.
    pub unmatched: Vec<String>,
    #[serde(skip)]
    parts: Vec<TemplatePart>,
    #[serde(skip)]
    index: PhotoIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RenameEntry {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedCommit {
    pub original_name: String,
    pub quarantine_name: String,
    pub target_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub renamed: Vec<RenameEntry>,
    pub failed: Vec<FailedCommit>,
    pub unmatched: Vec<String>,
    pub backup_path: Option<PathBuf>,
    pub mapping_path: Option<PathBuf>,
    /// Index or mapping writes that failed after files were already renamed.
    pub persistence_errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct UndoReport {
    pub restored: Vec<RenameEntry>,
    pub failed: Vec<FailedCommit>,
    /// Mapping entries whose renamed file is no longer on disk.
    pub missing: Vec<String>,
    pub persistence_errors: Vec<String>,
}

/// Checks preconditions and works out what a run would do. Touches nothing.
pub fn plan_sync(options: &SyncOptions) -> Result<SyncPlan, SyncError> {
    if !options.target_dir.is_dir() {
        return Err(SyncError::MissingDirectory(options.target_dir.clone()));
    }
    let index = read_index(&options.index_path)?;
    let parts = parse_template(&options.template)?;

    let mut by_filename = HashMap::<&str, usize>::new();
    for (position, record) in index.photos.iter().enumerate() {
        match by_filename.entry(record.filename.as_str()) {
            Entry::Vacant(slot) => {
                slot.insert(position);
            }
            Entry::Occupied(_) => {
                warn!(filename = %record.filename, id = %record.id, "duplicate filename in index, first record wins");
            }
        }
    }

    let mut candidates = Vec::new();
    let mut unmatched = Vec::new();
    for path in collect_all_images(&options.target_dir)? {
        let name = file_name(&path);
        if name.starts_with(QUARANTINE_PREFIX) {
            continue;
        }
        let Some(&record_index) = by_filename.get(name.as_str()) else {
            warn!(file = %name, "not in index, skipped");
            unmatched.push(name);
            continue;
        };
        let record = &index.photos[record_index];
        let extension = path
            .extension()
            .map(|ext| format!(".{}", ext.to_string_lossy().to_lowercase()))
            .unwrap_or_default();
        candidates.push(SyncCandidate {
            original_name: name,
            record_index,
            record_id: record.id.clone(),
            extension,
            date: record.date_text().as_deref().and_then(normalize_date),
            planned_name: String::new(),
        });
    }

    let mut seen = HashSet::<String>::new();
    for (offset, candidate) in candidates.iter_mut().enumerate() {
        candidate.planned_name = candidate.render(&parts, options.counter_start + offset as u64);
        if !seen.insert(candidate.planned_name.clone()) {
            warn!(name = %candidate.planned_name, "template produces a duplicate name; the later file will stay in quarantine");
        }
    }

    Ok(SyncPlan {
        target_dir: options.target_dir.clone(),
        index_path: options.index_path.clone(),
        template: options.template.clone(),
        counter_start: options.counter_start,
        backup: options.backup,
        candidates,
        unmatched,
        parts,
        index,
    })
}

pub fn apply_sync(plan: SyncPlan) -> Result<SyncReport, SyncError> {
    apply_sync_with(plan, &StdFs, &new_run_tag())
}

/// Renames the planned files in two phases and rewrites the index.
///
/// Quarantine is all-or-nothing. Commits are per file: a failed one leaves
/// its file under the quarantine name, leaves its record alone and does not
/// consume a counter value. Once commits start, nothing is reverted, even if
/// the index or mapping cannot be written.
pub fn apply_sync_with<F: RenameFs + ?Sized>(
    mut plan: SyncPlan,
    ops: &F,
    run_tag: &str,
) -> Result<SyncReport, SyncError> {
    let mut report = SyncReport {
        unmatched: plan.unmatched.clone(),
        ..SyncReport::default()
    };
    if plan.candidates.is_empty() {
        warn!(dir = %plan.target_dir.display(), "no files match the index, nothing renamed");
        return Ok(report);
    }

    if plan.backup {
        report.backup_path = Some(write_backup_manifest(
            &plan.target_dir,
            &plan.candidates,
        )?);
    }

    let originals: Vec<PathBuf> = plan
        .candidates
        .iter()
        .map(|candidate| plan.target_dir.join(&candidate.original_name))
        .collect();
    let mut quarantine = Quarantine::enter(ops, &originals, run_tag)?;
    info!(count = originals.len(), "files quarantined");

    let mut counter = plan.counter_start;
    for (position, candidate) in plan.candidates.iter().enumerate() {
        let new_name = candidate.render(&plan.parts, counter);
        match quarantine.commit(ops, position, plan.target_dir.join(&new_name)) {
            Ok(()) => {
                info!(from = %candidate.original_name, to = %new_name, "renamed");
                plan.index.photos[candidate.record_index].rename_to(&new_name);
                report.renamed.push(RenameEntry {
                    from: candidate.original_name.clone(),
                    to: new_name,
                });
                counter += 1;
            }
            Err(err) => {
                let quarantine_name = file_name(&quarantine.entries()[position].temp);
                warn!(
                    file = %candidate.original_name,
                    target = %new_name,
                    left_as = %quarantine_name,
                    error = %err,
                    "rename failed, file left in quarantine"
                );
                report.failed.push(FailedCommit {
                    original_name: candidate.original_name.clone(),
                    quarantine_name,
                    target_name: new_name,
                    error: err.to_string(),
                });
            }
        }
    }

    if !report.renamed.is_empty() {
        mark_renamed(&mut plan.index, report.backup_path.as_deref());
    }
    if let Err(err) = write_index(&plan.index_path, &plan.index) {
        error!(error = %format!("{err:#}"), "index not updated; renamed files are kept");
        report.persistence_errors.push(format!("{err:#}"));
    }
    match write_mapping(&plan.target_dir, &report.renamed) {
        Ok(path) => report.mapping_path = Some(path),
        Err(err) => {
            error!(error = %format!("{err:#}"), "rename mapping not written");
            report.persistence_errors.push(format!("{err:#}"));
        }
    }

    info!(
        renamed = report.renamed.len(),
        failed = report.failed.len(),
        "rename finished"
    );
    Ok(report)
}

pub fn undo_sync(target_dir: &Path, index_path: &Path) -> Result<UndoReport, SyncError> {
    undo_sync_with(target_dir, index_path, &StdFs, &new_run_tag())
}

/// Reverses the last run recorded in the target directory's mapping file.
pub fn undo_sync_with<F: RenameFs + ?Sized>(
    target_dir: &Path,
    index_path: &Path,
    ops: &F,
    run_tag: &str,
) -> Result<UndoReport, SyncError> {
    if !target_dir.is_dir() {
        return Err(SyncError::MissingDirectory(target_dir.to_path_buf()));
    }
    let mapping_path = target_dir.join(MAPPING_FILE_NAME);
    if !mapping_path.is_file() {
        return Err(SyncError::NothingToUndo(mapping_path));
    }
    let mapping = read_mapping(&mapping_path)?;
    let mut index = read_index(index_path)?;

    let mut report = UndoReport::default();
    let (present, missing): (Vec<RenameEntry>, Vec<RenameEntry>) = mapping
        .into_iter()
        .partition(|entry| ops.exists(&target_dir.join(&entry.to)));
    for entry in &missing {
        warn!(file = %entry.to, "renamed file is gone, cannot restore");
    }
    report.missing = missing.iter().map(|entry| entry.to.clone()).collect();

    let mut remaining = missing;
    if !present.is_empty() {
        let currents: Vec<PathBuf> = present
            .iter()
            .map(|entry| target_dir.join(&entry.to))
            .collect();
        let mut quarantine = Quarantine::enter(ops, &currents, run_tag)?;

        for (position, entry) in present.into_iter().enumerate() {
            match quarantine.commit(ops, position, target_dir.join(&entry.from)) {
                Ok(()) => {
                    info!(from = %entry.to, to = %entry.from, "restored");
                    if let Some(record) = index.photos.iter_mut().find(|r| r.filename == entry.to) {
                        record.restore_to(&entry.from);
                    }
                    report.restored.push(RenameEntry {
                        from: entry.to,
                        to: entry.from,
                    });
                }
                Err(err) => {
                    let quarantine_name = file_name(&quarantine.entries()[position].temp);
                    warn!(file = %entry.to, left_as = %quarantine_name, error = %err, "restore failed, file left in quarantine");
                    report.failed.push(FailedCommit {
                        original_name: entry.to.clone(),
                        quarantine_name,
                        target_name: entry.from.clone(),
                        error: err.to_string(),
                    });
                    remaining.push(entry);
                }
            }
        }
    }

    if let Err(err) = write_index(index_path, &index) {
        report.persistence_errors.push(format!("{err:#}"));
    }
    let mapping_result = if remaining.is_empty() {
        fs::remove_file(&mapping_path)
            .with_context(|| format!("could not remove mapping: {}", mapping_path.display()))
    } else {
        write_mapping(target_dir, &remaining).map(|_| ())
    };
    if let Err(err) = mapping_result {
        report.persistence_errors.push(format!("{err:#}"));
    }

    info!(
        restored = report.restored.len(),
        failed = report.failed.len(),
        missing = report.missing.len(),
        "undo finished"
    );
    Ok(report)
}

fn mark_renamed(index: &mut PhotoIndex, backup: Option<&Path>) {
    if let Some(meta) = index.metadata.as_mut() {
        meta.files_renamed = Some(true);
        meta.rename_date = Some(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false));
        meta.original_files_backup = backup.map(|p| p.display().to_string());
    }
}

fn write_backup_manifest(dir: &Path, candidates: &[SyncCandidate]) -> anyhow::Result<PathBuf> {
    let backup_dir = dir.join(BACKUP_DIR_NAME);
    fs::create_dir_all(&backup_dir).with_context(|| {
        format!(
            "could not create backup directory: {}",
            backup_dir.display()
        )
    })?;
    let path = backup_dir.join(BACKUP_FILE_NAME);
    let names: Vec<&str> = candidates
        .iter()
        .map(|candidate| candidate.original_name.as_str())
        .collect();
    let body = serde_json::to_string_pretty(&names).context("could not serialize backup")?;
    fs::write(&path, body)
        .with_context(|| format!("could not write backup manifest: {}", path.display()))?;
    info!(path = %path.display(), "original names saved");
    Ok(path)
}

fn write_mapping(dir: &Path, entries: &[RenameEntry]) -> anyhow::Result<PathBuf> {
    let path = dir.join(MAPPING_FILE_NAME);
    let mapping: Map<String, Value> = entries
        .iter()
        .map(|entry| (entry.from.clone(), Value::from(entry.to.clone())))
        .collect();
    let body = serde_json::to_string_pretty(&mapping).context("could not serialize mapping")?;
    fs::write(&path, body)
        .with_context(|| format!("could not write mapping: {}", path.display()))?;
    Ok(path)
}

fn read_mapping(path: &Path) -> anyhow::Result<Vec<RenameEntry>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("could not read mapping: {}", path.display()))?;
    let mapping: Map<String, Value> = serde_json::from_str(&raw)
        .with_context(|| format!("mapping is not a JSON object: {}", path.display()))?;
    mapping
        .into_iter()
        .map(|(from, to)| match to {
            Value::String(to) => Ok(RenameEntry { from, to }),
            other => Err(anyhow!("mapping value for {from} is not a name: {other}")),
        })
        .collect()
}
