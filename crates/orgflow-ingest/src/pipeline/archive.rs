//! Source file archiving

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::debug;

/// `{archive_dir}/{stem}_{YYYYmmdd_HHMMSS}.{ext}`
pub fn archive_path(source: &Path, archive_dir: &Path, at: DateTime<Utc>) -> PathBuf {
    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    let stamp = at.format("%Y%m%d_%H%M%S");

    let name = match source.extension() {
        Some(ext) => format!("{}_{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}_{}", stem, stamp),
    };
    archive_dir.join(name)
}

/// Move `source` into `archive_dir`, returning its new location.
///
/// Falls back to copy-and-remove when a rename is not possible, e.g. across
/// filesystems.
pub async fn archive_source(source: &Path, archive_dir: &Path) -> std::io::Result<PathBuf> {
    tokio::fs::create_dir_all(archive_dir).await?;

    let target = archive_path(source, archive_dir, Utc::now());

    if let Err(e) = tokio::fs::rename(source, &target).await {
        debug!(error = %e, "Rename failed, copying instead");
        tokio::fs::copy(source, &target).await?;
        tokio::fs::remove_file(source).await?;
    }

    Ok(target)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_archive_path() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).single().unwrap();
        assert_eq!(
            archive_path(Path::new("/in/data.json"), Path::new("/archive"), at),
            PathBuf::from("/archive/data_20250102_030405.json")
        );
        assert_eq!(
            archive_path(Path::new("/in/data"), Path::new("/archive"), at),
            PathBuf::from("/archive/data_20250102_030405")
        );
    }

    #[tokio::test]
    async fn test_archive_moves_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("data.json");
        std::fs::write(&source, b"{}").unwrap();

        let target = archive_source(&source, &dir.path().join("archive")).await.unwrap();

        assert!(!source.exists());
        assert_eq!(std::fs::read(&target).unwrap(), b"{}");
        assert!(target.starts_with(dir.path().join("archive")));
    }

    #[tokio::test]
    async fn test_archive_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(archive_source(&dir.path().join("absent.json"), dir.path())
            .await
            .is_err());
    }
}
