use crate::discovery::{collect_images, dedupe_case_insensitive, file_name};
use crate::index::{write_index, PhotoIndex, PhotoRecord};
use crate::tags::extract_tags;
use crate::tool::{FieldMap, MetadataTool};
use crate::{DEFAULT_INDEX_PATH, DEFAULT_PATH_PREFIX};
use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Keys that every exiftool answer carries and that say nothing about the image.
const BOOKKEEPING_FIELDS: &[&str] = &["SourceFile", "ExifToolVersion"];
const TOP_TAGS_LOGGED: usize = 10;

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub source_dir: PathBuf,
    pub output: PathBuf,
    /// Prepended to the file name to form each record's `path`.
    pub path_prefix: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            source_dir: PathBuf::new(),
            output: PathBuf::from(DEFAULT_INDEX_PATH),
            path_prefix: DEFAULT_PATH_PREFIX.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedImage {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ExtractReport {
    pub index: PhotoIndex,
    pub discovered: usize,
    pub skipped: Vec<SkippedImage>,
}

impl ExtractReport {
    pub fn processed(&self) -> usize {
        self.index.photos.len()
    }
}

/// Builds the index for `options.source_dir` and writes it to `options.output`.
///
/// Files the tool cannot handle are skipped and do not consume an id. The run
/// fails without writing anything when no image yields usable metadata.
pub fn extract_index(options: &ExtractOptions, tool: &dyn MetadataTool) -> Result<ExtractReport> {
    if !options.source_dir.is_dir() {
        bail!(
            "source directory does not exist: {}",
            options.source_dir.display()
        );
    }
    let source = fs::canonicalize(&options.source_dir).with_context(|| {
        format!(
            "could not resolve source directory: {}",
            options.source_dir.display()
        )
    })?;

    let version = tool
        .probe()
        .with_context(|| format!("metadata tool {} is not usable", tool.name()))?;
    info!(tool = %tool.name(), %version, "metadata tool ready");

    let images = dedupe_case_insensitive(collect_images(&source)?);
    if images.is_empty() {
        bail!("no images found in {}", source.display());
    }
    info!(count = images.len(), dir = %source.display(), "processing images");

    let mut records = Vec::with_capacity(images.len());
    let mut skipped = Vec::new();
    for (position, path) in images.iter().enumerate() {
        let name = file_name(path);
        info!("[{}/{}] {}", position + 1, images.len(), name);
        match tool.read_fields(path) {
            Ok(fields) if has_usable_metadata(&fields) => {
                let record = build_record(&fields, &name, records.len() + 1, &options.path_prefix);
                if record.tags.is_empty() {
                    info!(file = %name, "no tags, other metadata kept");
                } else {
                    info!(file = %name, tags = record.tags.len(), "extracted");
                }
                records.push(record);
            }
            Ok(_) => {
                warn!(file = %name, "no usable metadata, skipped");
                skipped.push(SkippedImage {
                    filename: name,
                    reason: "no usable metadata".to_string(),
                });
            }
            Err(err) => {
                warn!(file = %name, error = %err, "metadata tool failed, skipped");
                skipped.push(SkippedImage {
                    filename: name,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        succeeded = records.len(),
        failed = skipped.len(),
        "extraction finished"
    );
    if records.is_empty() {
        bail!("no image in {} yielded usable metadata", source.display());
    }

    let index = PhotoIndex::generate(&source, records);
    write_index(&options.output, &index)?;
    info!(path = %options.output.display(), "index written");
    log_tag_summary(&index);

    Ok(ExtractReport {
        index,
        discovered: images.len(),
        skipped,
    })
}

pub fn photo_id(sequence: usize) -> String {
    format!("photo-{sequence:03}")
}

/// Assembles one record; `sequence` is the 1-based position among successful files.
pub fn build_record(
    fields: &FieldMap,
    filename: &str,
    sequence: usize,
    path_prefix: &str,
) -> PhotoRecord {
    let mut record = PhotoRecord::new(photo_id(sequence), filename);
    record.path = format!("{path_prefix}{filename}");
    record.tags = extract_tags(fields);
    record.date = field_value(fields, &["DateTimeOriginal", "ModifyDate"]);
    record.width = field_u32(fields, "ImageWidth").map(Value::from);
    record.height = field_u32(fields, "ImageHeight").map(Value::from);
    record.caption = field_value(fields, &["Caption", "Description"]);
    record.software = field_value(fields, &["Software"]);
    record.camera = field_value(fields, &["Model"]);
    record
}

fn has_usable_metadata(fields: &FieldMap) -> bool {
    fields
        .iter()
        .any(|(key, value)| !value.is_null() && !BOOKKEEPING_FIELDS.contains(&key.as_str()))
}

/// First non-empty value among `keys`, copied as the tool reported it.
fn field_value(fields: &FieldMap, keys: &[&str]) -> Option<Value> {
    keys.iter().find_map(|key| match fields.get(*key)? {
        Value::Null => None,
        Value::String(text) if text.trim().is_empty() => None,
        other => Some(other.clone()),
    })
}

fn field_u32(fields: &FieldMap, key: &str) -> Option<u32> {
    match fields.get(key)? {
        Value::Number(n) => n.as_u64().and_then(|v| u32::try_from(v).ok()),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn log_tag_summary(index: &PhotoIndex) {
    let total: usize = index.photos.iter().map(|p| p.tags.len()).sum();
    if total == 0 {
        warn!("no tags found in any image");
        return;
    }
    info!(unique = index.unique_tags().len(), total, "tag statistics");
    for (tag, count) in index.top_tags(TOP_TAGS_LOGGED) {
        info!("  {tag}: {count} photo(s)");
    }
}

/// Convenience for callers that only have a source directory.
pub fn extract_to(source_dir: &Path, output: &Path, tool: &dyn MetadataTool) -> Result<ExtractReport> {
    extract_index(
        &ExtractOptions {
            source_dir: source_dir.to_path_buf(),
            output: output.to_path_buf(),
            ..ExtractOptions::default()
        },
        tool,
    )
}
