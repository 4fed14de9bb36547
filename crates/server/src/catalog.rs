// crates/server/src/catalog.rs
//! Filesystem catalogue of trained models and datasets.
//!
//! A model is a directory `<models>/<id>/` holding one weights file
//! (`.pt` or `.onnx`). Trainers write `<models>/<job id>/best.pt`, so a
//! finished job's model shares the job's id. A dataset is any
//! subdirectory of `<datasets>`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::fs;
use visiontrain_core::{analyze_dataset, DatasetInfo};

const MODEL_EXTENSIONS: [&str; 2] = ["pt", "onnx"];
const PREFERRED_MODEL_FILES: [&str; 3] = ["best.pt", "model.pt", "model.onnx"];

#[derive(Debug, Clone, PartialEq, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ModelInfo {
    pub id: String,
    pub file_name: String,
    pub file_path: String,
    pub file_size: u64,
    pub format: String,
    pub modified_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_path: Option<String>,
}

/// Ids name a single directory entry: no separators, no leading dot.
pub fn is_valid_entry_id(id: &str) -> bool {
    !id.is_empty() && !id.starts_with('.') && !id.contains(['/', '\\'])
}

async fn is_dir(path: &Path) -> std::io::Result<bool> {
    match fs::metadata(path).await {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// The weights file of a model directory: a well-known name first, then
/// the first `.pt`/`.onnx` file by name.
async fn find_model_file(dir: &Path) -> std::io::Result<Option<PathBuf>> {
    for name in PREFERRED_MODEL_FILES {
        let path = dir.join(name);
        if fs::try_exists(&path).await? {
            return Ok(Some(path));
        }
    }

    let mut entries = fs::read_dir(dir).await?;
    let mut candidates = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_model = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| MODEL_EXTENSIONS.contains(&e));
        if is_model && entry.file_type().await?.is_file() {
            candidates.push(path);
        }
    }
    candidates.sort();
    Ok(candidates.into_iter().next())
}

/// Describe `<models_dir>/<id>`, or `None` if it holds no weights file.
pub async fn model_info(models_dir: &Path, id: &str) -> std::io::Result<Option<ModelInfo>> {
    if !is_valid_entry_id(id) {
        return Ok(None);
    }
    let dir = models_dir.join(id);
    if !is_dir(&dir).await? {
        return Ok(None);
    }
    let Some(file) = find_model_file(&dir).await? else {
        return Ok(None);
    };

    let meta = fs::metadata(&file).await?;
    let modified_at = meta
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());
    let logs = dir.join("results.csv");
    let logs_path = fs::try_exists(&logs)
        .await
        .unwrap_or(false)
        .then(|| logs.display().to_string());

    Ok(Some(ModelInfo {
        id: id.to_owned(),
        file_name: file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        format: file
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path: file.display().to_string(),
        file_size: meta.len(),
        modified_at,
        logs_path,
    }))
}

/// Every model under `models_dir`, newest first. A missing directory is
/// an empty catalogue.
pub async fn list_models(models_dir: &Path) -> std::io::Result<Vec<ModelInfo>> {
    let mut entries = match fs::read_dir(models_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut models = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let Some(id) = entry.file_name().to_str().map(str::to_owned) else {
            continue;
        };
        match model_info(models_dir, &id).await {
            Ok(Some(info)) => models.push(info),
            Ok(None) => {}
            Err(e) => tracing::warn!(model = %id, "Skipping unreadable model: {e}"),
        }
    }
    models.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    Ok(models)
}

/// Remove `<models_dir>/<id>` and everything in it. Returns `false` when
/// there was nothing to remove.
pub async fn delete_model(models_dir: &Path, id: &str) -> std::io::Result<bool> {
    if !is_valid_entry_id(id) {
        return Ok(false);
    }
    match fs::remove_dir_all(models_dir.join(id)).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Analyze one dataset directory under `datasets_dir`.
pub async fn dataset_info(datasets_dir: &Path, id: &str) -> std::io::Result<Option<DatasetInfo>> {
    if !is_valid_entry_id(id) {
        return Ok(None);
    }
    let dir = datasets_dir.join(id);
    if !is_dir(&dir).await? {
        return Ok(None);
    }
    let analyzed = tokio::task::spawn_blocking(move || analyze_dataset(&dir))
        .await
        .map_err(std::io::Error::other)?;
    analyzed
        .map(Some)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e.to_string()))
}

/// Every analyzable dataset under `datasets_dir`, sorted by name.
/// Directories that fail analysis are logged and skipped.
pub async fn list_datasets(datasets_dir: &Path) -> std::io::Result<Vec<DatasetInfo>> {
    let mut entries = match fs::read_dir(datasets_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if !hidden && entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }

    let mut datasets = tokio::task::spawn_blocking(move || {
        dirs.iter()
            .filter_map(|dir| match analyze_dataset(dir) {
                Ok(info) => Some(info),
                Err(e) => {
                    tracing::warn!(path = %dir.display(), "Skipping dataset: {e}");
                    None
                }
            })
            .collect::<Vec<_>>()
    })
    .await
    .map_err(std::io::Error::other)?;
    datasets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(datasets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_entry_id_validation() {
        assert!(is_valid_entry_id("job_1a2b3c4d"));
        assert!(!is_valid_entry_id(""));
        assert!(!is_valid_entry_id(".."));
        assert!(!is_valid_entry_id(".hidden"));
        assert!(!is_valid_entry_id("a/b"));
        assert!(!is_valid_entry_id("a\\b"));
    }

    #[tokio::test]
    async fn test_list_models_picks_weights_and_skips_empty_dirs() {
        let tmp = TempDir::new().unwrap();
        let models = tmp.path();
        write(&models.join("job_a/best.pt"), b"weights");
        write(&models.join("job_a/results.csv"), b"epoch\n");
        write(&models.join("custom/zz.onnx"), b"onnx!");
        write(&models.join("custom/aa.onnx"), b"first");
        std::fs::create_dir_all(models.join("empty")).unwrap();
        write(&models.join("stray.pt"), b"not in a dir");

        let listed = list_models(models).await.unwrap();
        let mut ids: Vec<&str> = listed.iter().map(|m| m.id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["custom", "job_a"]);

        let job_a = listed.iter().find(|m| m.id == "job_a").unwrap();
        assert_eq!(job_a.file_name, "best.pt");
        assert_eq!(job_a.format, "pt");
        assert_eq!(job_a.file_size, 7);
        assert!(job_a.logs_path.as_deref().unwrap().ends_with("results.csv"));

        let custom = listed.iter().find(|m| m.id == "custom").unwrap();
        assert_eq!(custom.file_name, "aa.onnx");
        assert!(custom.logs_path.is_none());
    }

    #[tokio::test]
    async fn test_missing_dirs_are_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(list_models(&tmp.path().join("nope")).await.unwrap().is_empty());
        assert!(list_datasets(&tmp.path().join("nope")).await.unwrap().is_empty());
        assert!(model_info(tmp.path(), "nope").await.unwrap().is_none());
        assert!(!delete_model(tmp.path(), "nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_model_removes_directory() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("job_a/best.pt"), b"w");
        assert!(delete_model(tmp.path(), "job_a").await.unwrap());
        assert!(!tmp.path().join("job_a").exists());
        assert!(!delete_model(tmp.path(), "..").await.unwrap());
    }

    #[tokio::test]
    async fn test_list_datasets_sorted_by_name() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("zebra/data.yaml"), b"names: [stripe]\n");
        write(&tmp.path().join("zebra/images/train/a.jpg"), b"");
        write(&tmp.path().join("apple/data.yaml"), b"names: [red, green]\n");
        write(&tmp.path().join("notes.txt"), b"ignored");

        let datasets = list_datasets(tmp.path()).await.unwrap();
        let names: Vec<&str> = datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["apple", "zebra"]);
        assert_eq!(datasets[1].train_images, 1);
        assert_eq!(datasets[0].classes, vec!["red", "green"]);

        let one = dataset_info(tmp.path(), "zebra").await.unwrap().unwrap();
        assert_eq!(one.classes, vec!["stripe"]);
        assert!(dataset_info(tmp.path(), "missing").await.unwrap().is_none());
    }
}
