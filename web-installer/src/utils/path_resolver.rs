use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

const LOG_FOLDER_NAME: &str = "web-installer-logs";

/// Resolve log folder (absolute path), creating it when missing.
///
/// Order: explicit override, the per-user data directory, then the current working directory.
pub fn resolve_log_folder(override_dir: Option<&Path>) -> Result<PathBuf> {
    let dir = match override_dir {
        Some(p) => p.to_path_buf(),
        None => dirs::data_local_dir()
            .map(|d| d.join("passbolt").join(LOG_FOLDER_NAME))
            .unwrap_or_else(|| {
                std::env::current_dir()
                    .unwrap_or_else(|_| PathBuf::from("."))
                    .join(LOG_FOLDER_NAME)
            }),
    };

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create log folder: {:?}", dir))?;
    Ok(dir)
}

/// Temporary sibling used for write-then-rename.
pub fn temp_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "file".to_string());
    path.with_file_name(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()))
}
