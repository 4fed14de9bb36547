// crates/core/src/dataset.rs
//! Dataset directory analysis.
//!
//! Expects the usual YOLO layout:
//!
//! ```text
//! <root>/data.yaml            (or dataset.yaml) with a `names` list or map
//! <root>/images/{train,val,test}/*.jpg|png|jpeg
//! <root>/labels/train/*.txt   one `<class_id> x y w h` per line
//! ```
//!
//! This does synchronous filesystem work; async callers should run it
//! on the blocking pool.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::DatasetError;
use crate::types::DatasetInfo;

const CLASS_FILES: [&str; 2] = ["data.yaml", "dataset.yaml"];
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Derive a [`DatasetInfo`] from a dataset directory.
pub fn analyze_dataset(path: &Path) -> Result<DatasetInfo, DatasetError> {
    let meta = fs::metadata(path).map_err(|e| DatasetError::io(path, e))?;
    if !meta.is_dir() {
        return Err(DatasetError::NotADirectory {
            path: path.to_path_buf(),
        });
    }

    let classes = match class_file(path) {
        Some(yaml) => read_class_names(&yaml)?,
        None => scan_label_classes(&path.join("labels").join("train")),
    };

    let train_images = count_images(&path.join("images").join("train"))?;
    let val_images = count_images(&path.join("images").join("val"))?;
    let test_images = count_images(&path.join("images").join("test"))?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    tracing::debug!(
        path = %path.display(),
        classes = classes.len(),
        train_images,
        val_images,
        test_images,
        "Analyzed dataset"
    );

    Ok(DatasetInfo {
        name,
        path: path.display().to_string(),
        classes,
        train_images,
        val_images,
        test_images: (test_images > 0).then_some(test_images),
    })
}

fn class_file(root: &Path) -> Option<PathBuf> {
    CLASS_FILES
        .iter()
        .map(|f| root.join(f))
        .find(|p| p.is_file())
}

/// Read `names` from a dataset YAML. Accepts a list or an index → name map.
fn read_class_names(yaml_path: &Path) -> Result<Vec<String>, DatasetError> {
    let content = fs::read_to_string(yaml_path).map_err(|e| DatasetError::io(yaml_path, e))?;
    let doc: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| DatasetError::MalformedYaml {
            path: yaml_path.to_path_buf(),
            message: e.to_string(),
        })?;

    let names = match doc.get("names") {
        Some(serde_yaml::Value::Sequence(seq)) => seq.iter().filter_map(yaml_scalar).collect(),
        Some(serde_yaml::Value::Mapping(map)) => {
            let mut indexed: Vec<(i64, String)> = map
                .iter()
                .filter_map(|(k, v)| {
                    let idx = match k {
                        serde_yaml::Value::Number(n) => n.as_i64()?,
                        serde_yaml::Value::String(s) => s.trim().parse().ok()?,
                        _ => return None,
                    };
                    Some((idx, yaml_scalar(v)?))
                })
                .collect();
            indexed.sort_by_key(|(idx, _)| *idx);
            indexed.into_iter().map(|(_, name)| name).collect()
        }
        _ => Vec::new(),
    };
    Ok(names)
}

fn yaml_scalar(value: &serde_yaml::Value) -> Option<String> {
    match value {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Collect class ids present in YOLO label files and name them `class_<id>`.
///
/// Unreadable files and unparsable lines are skipped.
fn scan_label_classes(labels_dir: &Path) -> Vec<String> {
    let Ok(entries) = fs::read_dir(labels_dir) else {
        return Vec::new();
    };

    let mut ids = BTreeSet::new();
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("txt") {
            continue;
        }
        let Ok(content) = fs::read_to_string(&path) else {
            tracing::debug!(path = %path.display(), "Skipping unreadable label file");
            continue;
        };
        for line in content.lines() {
            if let Some(Ok(id)) = line.split_whitespace().next().map(str::parse::<u32>) {
                ids.insert(id);
            }
        }
    }
    ids.into_iter().map(|id| format!("class_{id}")).collect()
}

fn count_images(dir: &Path) -> Result<usize, DatasetError> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(DatasetError::io(dir, e)),
    };
    Ok(entries
        .flatten()
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|ext| {
                    IMAGE_EXTENSIONS
                        .iter()
                        .any(|known| ext.eq_ignore_ascii_case(known))
                })
                .unwrap_or(false)
        })
        .count())
}
