use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "tiff"];

/// Image files directly inside `dir`, ordered by case-insensitive file name.
///
/// Hidden files are skipped, which also keeps stranded quarantine files out of
/// the index.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    scan_images(dir, false)
}

/// Like [`collect_images`], but dot-files are listed too.
pub fn collect_all_images(dir: &Path) -> Result<Vec<PathBuf>> {
    scan_images(dir, true)
}

fn scan_images(dir: &Path, include_hidden: bool) -> Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry =
            entry.with_context(|| format!("could not read directory: {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() || (!include_hidden && is_hidden(path)) || !is_image(path) {
            continue;
        }
        out.push(path.to_path_buf());
    }
    out.sort_by(|a, b| {
        let (a, b) = (file_name(a), file_name(b));
        a.to_lowercase().cmp(&b.to_lowercase()).then_with(|| a.cmp(&b))
    });
    Ok(out)
}

/// Keeps the first of each group of names that differ only by case.
pub fn dedupe_case_insensitive(paths: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::<String>::new();
    paths
        .into_iter()
        .filter(|path| seen.insert(file_name(path).to_lowercase()))
        .collect()
}

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy();
            IMAGE_EXTENSIONS
                .iter()
                .any(|allowed| ext.eq_ignore_ascii_case(allowed))
        })
        .unwrap_or(false)
}

pub fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|name| name.to_string_lossy().starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn names(paths: &[PathBuf]) -> Vec<String> {
        paths.iter().map(|p| file_name(p)).collect()
    }

    #[test]
    fn collects_only_top_level_images_sorted_case_insensitively() {
        let temp = tempdir().expect("tempdir");
        for name in ["b.PNG", "A.jpg", "c.tiff", "notes.txt", "d.jpeg", ".hidden.jpg"] {
            fs::write(temp.path().join(name), b"x").expect("seed");
        }
        fs::create_dir_all(temp.path().join("sub")).expect("subdir");
        fs::write(temp.path().join("sub").join("e.jpg"), b"x").expect("nested");

        let found = collect_images(temp.path()).expect("collect");
        assert_eq!(names(&found), vec!["A.jpg", "b.PNG", "c.tiff", "d.jpeg"]);
    }

    #[test]
    fn collect_all_images_keeps_dot_files() {
        let temp = tempdir().expect("tempdir");
        for name in ["b.jpg", ".a.jpg", ".notes"] {
            fs::write(temp.path().join(name), b"x").expect("seed");
        }
        let found = collect_all_images(temp.path()).expect("collect");
        assert_eq!(names(&found), vec![".a.jpg", "b.jpg"]);
    }

    #[test]
    fn dedupe_keeps_one_name_per_case_group() {
        let paths = vec![
            PathBuf::from("/p/A.JPG"),
            PathBuf::from("/p/a.jpg"),
            PathBuf::from("/p/b.jpg"),
        ];
        let deduped = dedupe_case_insensitive(paths);
        assert_eq!(names(&deduped), vec!["A.JPG", "b.jpg"]);
    }

    #[test]
    fn is_image_matches_allow_list_ignoring_case() {
        assert!(is_image(Path::new("x.JPEG")));
        assert!(is_image(Path::new("x.Tiff")));
        assert!(!is_image(Path::new("x.gif")));
        assert!(!is_image(Path::new("jpg")));
    }
}
