use anyhow::{Context, Result};
use std::path::Path;
use tokio::fs;
use walkdir::WalkDir;

/// Reads plain-text sources. Richer formats are converted upstream.
pub struct FileReader;

impl FileReader {
    fn is_supported(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("txt") | Some("md")
        )
    }

    pub async fn read_file(path: &Path) -> Result<String> {
        if !Self::is_supported(path) {
            let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            anyhow::bail!("Unsupported file format: {}", extension);
        }

        fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read file: {:?}", path))
    }

    /// Recursively read every supported file under `dir`, sorted by path.
    pub async fn read_directory(dir: &Path) -> Result<Vec<(String, String)>> {
        let mut paths: Vec<_> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file() && Self::is_supported(entry.path()))
            .map(|entry| entry.into_path())
            .collect();
        paths.sort();

        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            let content = Self::read_file(&path).await?;
            files.push((path.to_string_lossy().to_string(), content));
        }

        Ok(files)
    }
}
