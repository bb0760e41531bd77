use anyhow::{Context, Result};
use chrono::{Local, SecondsFormat};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const GENERATOR_NAME: &str = "photo-indexer";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoRecord {
    #[serde(default)]
    pub id: String,
    pub filename: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_filename: Option<String>,
    /// `path` as it was before the first rename; undo puts it back.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_path: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub tags: Vec<String>,
    // Scalar metadata is kept exactly as read, so `None` means "key absent"
    // and an explicit `null` survives a rewrite.
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub date: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub width: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub height: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub caption: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub software: Option<Value>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub camera: Option<Value>,
    /// Fields written by other tools; carried through rewrites untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

/// Text form of a scalar field: strings as they are, numbers and booleans
/// printed, everything else (null, empty text, arrays, objects) as `None`.
pub fn scalar_text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) if text.trim().is_empty() => None,
        Value::String(text) => Some(text.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl PhotoRecord {
    pub fn new(id: impl Into<String>, filename: impl Into<String>) -> Self {
        let filename = filename.into();
        Self {
            id: id.into(),
            path: filename.clone(),
            filename,
            original_filename: None,
            original_path: None,
            tags: Vec::new(),
            date: None,
            width: None,
            height: None,
            caption: None,
            software: None,
            camera: None,
            extra: Map::new(),
        }
    }

    pub fn date_text(&self) -> Option<String> {
        scalar_text(self.date.as_ref())
    }

    /// Points the record at a new on-disk name, remembering the first name it had.
    pub fn rename_to(&mut self, new_name: &str) {
        if self.original_filename.is_none() {
            self.original_filename = Some(self.filename.clone());
            self.original_path = Some(self.path.clone());
        }
        self.filename = new_name.to_string();
        self.path = new_name.to_string();
    }

    /// Reverses one rename back to `old_name`. Returning to the first name
    /// also brings back the first `path` and clears the bookkeeping.
    pub fn restore_to(&mut self, old_name: &str) {
        self.filename = old_name.to_string();
        if self.original_filename.as_deref() == Some(old_name) {
            self.path = self
                .original_path
                .take()
                .unwrap_or_else(|| old_name.to_string());
            self.original_filename = None;
        } else {
            self.path = old_name.to_string();
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_photos: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_tags: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub files_renamed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rename_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_files_backup: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoIndex {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<IndexMetadata>,
    pub photos: Vec<PhotoRecord>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index file does not exist: {0}")]
    NotFound(PathBuf),
    #[error("could not read index file {path}: {source}")]
    Unreadable { path: PathBuf, source: io::Error },
    #[error("index file is not valid JSON: {path}: {source}")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("index file has no 'photos' array: {0}")]
    MissingPhotos(PathBuf),
}

impl PhotoIndex {
    /// Builds a fresh index with a header describing `photos`.
    pub fn generate(source: &Path, photos: Vec<PhotoRecord>) -> Self {
        let mut index = Self {
            metadata: None,
            photos,
            extra: Map::new(),
        };
        index.metadata = Some(IndexMetadata {
            generated: Some(Local::now().to_rfc3339_opts(SecondsFormat::Secs, false)),
            source: Some(source.display().to_string()),
            total_photos: Some(index.photos.len()),
            total_tags: Some(index.unique_tags().len()),
            generator: Some(GENERATOR_NAME.to_string()),
            ..IndexMetadata::default()
        });
        index
    }

    pub fn unique_tags(&self) -> Vec<String> {
        self.photos
            .iter()
            .flat_map(|photo| photo.tags.iter().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn tag_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::<String, usize>::new();
        for photo in &self.photos {
            for tag in &photo.tags {
                *counts.entry(tag.clone()).or_default() += 1;
            }
        }
        counts
    }

    /// Most frequent tags first; ties are broken alphabetically.
    pub fn top_tags(&self, limit: usize) -> Vec<(String, usize)> {
        let mut counts: Vec<(String, usize)> = self.tag_counts().into_iter().collect();
        counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        counts.truncate(limit);
        counts
    }
}

pub fn read_index(path: &Path) -> Result<PhotoIndex, IndexError> {
    if !path.is_file() {
        return Err(IndexError::NotFound(path.to_path_buf()));
    }
    let raw = fs::read_to_string(path).map_err(|source| IndexError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    parse_index(&raw, path)
}

fn parse_index(raw: &str, path: &Path) -> Result<PhotoIndex, IndexError> {
    let malformed = |source| IndexError::Malformed {
        path: path.to_path_buf(),
        source,
    };
    let value: Value = serde_json::from_str(raw).map_err(malformed)?;
    if !value.get("photos").is_some_and(Value::is_array) {
        return Err(IndexError::MissingPhotos(path.to_path_buf()));
    }
    serde_json::from_value(value).map_err(malformed)
}

pub fn write_index(path: &Path, index: &PhotoIndex) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("could not create index directory: {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(index).context("could not serialize index")?;
    fs::write(path, body)
        .with_context(|| format!("could not write index file: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn tagged(id: &str, filename: &str, tags: &[&str]) -> PhotoRecord {
        let mut record = PhotoRecord::new(id, filename);
        record.tags = tags.iter().map(|t| t.to_string()).collect();
        record
    }

    #[test]
    fn index_round_trips_through_disk() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("nested").join("photos.json");

        let mut first = tagged("photo-001", "a.jpg", &["cat", "dog"]);
        first.date = Some(json!("2023:05:01 10:00:00"));
        first.width = Some(json!(4000));
        first.height = Some(json!(3000));
        first.camera = Some(json!("X-T5"));
        let second = tagged("photo-002", "b.png", &[]);
        let index = PhotoIndex::generate(temp.path(), vec![first, second]);

        write_index(&path, &index).expect("write");
        let reread = read_index(&path).expect("read");
        assert_eq!(reread, index);
        assert_eq!(reread.photos[0].id, "photo-001");
        assert_eq!(reread.photos[1].filename, "b.png");
    }

    #[test]
    fn unknown_fields_survive_rewrite() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("photos.json");
        let body = json!({
            "metadata": {"source": "/pics", "total_photos": 1, "owner": "web"},
            "photos": [{
                "id": "photo-001",
                "filename": "a.jpg",
                "path": "content/a.jpg",
                "tags": ["x"],
                "width": null,
                "height": null,
                "caption": 2023,
                "camera": "X-T5",
                "rating": 5
            }],
            "schema": 2
        });
        fs::write(&path, body.to_string()).expect("seed");

        let index = read_index(&path).expect("read");
        assert_eq!(index.photos[0].extra.get("rating"), Some(&json!(5)));
        assert_eq!(index.photos[0].width, Some(Value::Null));
        assert_eq!(index.photos[0].date, None);
        write_index(&path, &index).expect("write");

        let raw: Value =
            serde_json::from_str(&fs::read_to_string(&path).expect("reread")).expect("json");
        assert_eq!(raw["schema"], json!(2));
        assert_eq!(raw["metadata"]["owner"], json!("web"));
        assert_eq!(raw["photos"][0]["rating"], json!(5));
        let photo = raw["photos"][0].as_object().expect("record");
        assert_eq!(photo.get("width"), Some(&Value::Null));
        assert_eq!(photo.get("height"), Some(&Value::Null));
        assert_eq!(photo.get("caption"), Some(&json!(2023)));
        assert!(!photo.contains_key("date"));
    }

    #[test]
    fn scalar_fields_accept_any_json_scalar() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("photos.json");
        let body = json!({
            "photos": [{
                "filename": "a.jpg",
                "date": 20230501,
                "width": 4000.0,
                "software": true,
                "camera": ""
            }]
        });
        fs::write(&path, body.to_string()).expect("seed");

        let index = read_index(&path).expect("read");
        let photo = &index.photos[0];
        assert_eq!(photo.date_text().as_deref(), Some("20230501"));
        assert_eq!(photo.width, Some(json!(4000.0)));
        assert_eq!(scalar_text(photo.software.as_ref()).as_deref(), Some("true"));
        assert_eq!(scalar_text(photo.camera.as_ref()), None);
        assert_eq!(scalar_text(photo.height.as_ref()), None);
    }

    #[test]
    fn read_index_reports_missing_photos() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("photos.json");
        fs::write(&path, r#"{"metadata": {}}"#).expect("seed");

        let err = read_index(&path).expect_err("must fail");
        assert!(matches!(err, IndexError::MissingPhotos(_)));
    }

    #[test]
    fn read_index_reports_malformed_json() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("photos.json");
        fs::write(&path, "{not json").expect("seed");

        let err = read_index(&path).expect_err("must fail");
        assert!(matches!(err, IndexError::Malformed { .. }));
    }

    #[test]
    fn read_index_reports_missing_file() {
        let temp = tempdir().expect("tempdir");
        let err = read_index(&temp.path().join("nope.json")).expect_err("must fail");
        assert!(matches!(err, IndexError::NotFound(_)));
    }

    #[test]
    fn rename_to_keeps_first_original_name() {
        let mut record = PhotoRecord::new("photo-001", "IMG_1.jpg");
        record.rename_to("img_001.jpg");
        record.rename_to("img_010.jpg");
        assert_eq!(record.original_filename.as_deref(), Some("IMG_1.jpg"));
        assert_eq!(record.filename, "img_010.jpg");
        assert_eq!(record.path, "img_010.jpg");
        assert_eq!(record.id, "photo-001");
    }

    #[test]
    fn restore_to_first_name_brings_back_first_path() {
        let mut record = PhotoRecord::new("photo-001", "IMG_1.jpg");
        record.path = "content/IMG_1.jpg".to_string();
        record.rename_to("first.jpg");
        record.rename_to("second.jpg");
        assert_eq!(record.original_path.as_deref(), Some("content/IMG_1.jpg"));

        record.restore_to("first.jpg");
        assert_eq!(record.path, "first.jpg");
        assert_eq!(record.original_filename.as_deref(), Some("IMG_1.jpg"));

        record.restore_to("IMG_1.jpg");
        assert_eq!(record.filename, "IMG_1.jpg");
        assert_eq!(record.path, "content/IMG_1.jpg");
        assert_eq!(record.original_filename, None);
        assert_eq!(record.original_path, None);
    }

    #[test]
    fn generate_counts_unique_tags() {
        let index = PhotoIndex::generate(
            Path::new("/pics"),
            vec![
                tagged("photo-001", "a.jpg", &["cat", "dog"]),
                tagged("photo-002", "b.jpg", &["dog", "fox"]),
            ],
        );
        let meta = index.metadata.as_ref().expect("header");
        assert_eq!(meta.total_photos, Some(2));
        assert_eq!(meta.total_tags, Some(3));
        assert_eq!(meta.generator.as_deref(), Some(GENERATOR_NAME));
        assert_eq!(index.unique_tags(), vec!["cat", "dog", "fox"]);
        assert_eq!(
            index.top_tags(2),
            vec![("dog".to_string(), 2), ("cat".to_string(), 1)]
        );
    }
}
