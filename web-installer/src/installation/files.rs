//! File write helpers for installer artifacts.
//!
//! - Async I/O only (tokio)
//! - Whole-file semantics: content goes to a temp sibling, then is renamed over the target
//! - Retry transient errors, timeout every attempt
//! - Never log file contents (config and keys hold secrets)

use anyhow::{Context, Result};
use log::{debug, warn};
use std::path::Path;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::time::{timeout, Duration};

use crate::utils::path_resolver::temp_sibling;

const WRITE_ATTEMPTS: u32 = 3;

fn is_transient_fs_error(e: &anyhow::Error) -> bool {
    let msg = format!("{:#}", e).to_ascii_lowercase();
    msg.contains("resource busy")
        || msg.contains("temporarily")
        || msg.contains("interrupted")
        || msg.contains("timed out")
        || msg.contains("would block")
}

pub async fn ensure_dir_with_retries(path: &Path, label: &str) -> Result<()> {
    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=WRITE_ATTEMPTS {
        let started = Instant::now();
        match timeout(Duration::from_secs(5), tokio::fs::create_dir_all(path)).await {
            Ok(Ok(())) => {
                debug!(
                    "[PHASE: install] [STEP: fs] {} ok (attempt={}, duration_ms={})",
                    label,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
            Ok(Err(e)) => {
                warn!(
                    "[PHASE: install] [STEP: fs] {} failed (attempt={}, path={:?}, error={})",
                    label, attempt, path, e
                );
                let err = anyhow::Error::new(e)
                    .context(format!("create_dir_all failed: {:?}", path));
                let transient = is_transient_fs_error(&err);
                last_err = Some(err);
                if !transient {
                    break;
                }
            }
            Err(_) => {
                warn!(
                    "[PHASE: install] [STEP: fs] {} timed out (attempt={}, path={:?})",
                    label, attempt, path
                );
                last_err = Some(anyhow::anyhow!("create_dir_all timed out: {:?}", path));
            }
        }
        let backoff_ms = 50_u64.saturating_mul(1_u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Failed to create directory: {:?}", path)))
}

/// Create the temp sibling exclusively, already carrying `mode` on Unix.
async fn create_temp_file(tmp: &Path, mode: Option<u32>) -> Result<tokio::fs::File> {
    let mut opts = tokio::fs::OpenOptions::new();
    opts.write(true).create_new(true);
    #[cfg(unix)]
    opts.mode(mode.unwrap_or(0o666));
    #[cfg(not(unix))]
    let _ = mode;
    opts.open(tmp)
        .await
        .with_context(|| format!("create temp file failed: {:?}", tmp))
}

async fn write_once_atomic(path: &Path, tmp: &Path, bytes: &[u8], mode: Option<u32>) -> Result<()> {
    let result = async {
        let mut f = create_temp_file(tmp, mode).await?;
        f.write_all(bytes)
            .await
            .with_context(|| format!("write failed: {:?}", tmp))?;
        f.sync_all()
            .await
            .with_context(|| format!("sync failed: {:?}", tmp))?;
        drop(f);

        // The umask may have narrowed the open mode.
        #[cfg(unix)]
        {
            if let Some(mode) = mode {
                use std::os::unix::fs::PermissionsExt;
                tokio::fs::set_permissions(tmp, std::fs::Permissions::from_mode(mode))
                    .await
                    .with_context(|| format!("chmod failed: {:?}", tmp))?;
            }
        }

        tokio::fs::rename(tmp, path)
            .await
            .with_context(|| format!("rename {:?} -> {:?} failed", tmp, path))?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if result.is_err() {
        let _ = tokio::fs::remove_file(tmp).await;
    }
    result
}

/// Run one write attempt under `limit`. `None` means it timed out; the temp sibling is removed
/// since the dropped attempt never reached its own cleanup.
async fn timed_attempt<F>(tmp: &Path, limit: Duration, attempt: F) -> Option<Result<()>>
where
    F: std::future::Future<Output = Result<()>>,
{
    match timeout(limit, attempt).await {
        Ok(result) => Some(result),
        Err(_) => {
            let _ = tokio::fs::remove_file(tmp).await;
            None
        }
    }
}

/// Replace `path` with `bytes` as a whole file, creating the parent directory.
///
/// `mode` is set when the temp sibling is created and again before the rename (private key
/// material uses 0o600).
pub async fn write_file_atomic(path: &Path, bytes: &[u8], mode: Option<u32>, label: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_dir_with_retries(parent, label).await?;
    }

    let mut last_err: Option<anyhow::Error> = None;
    for attempt in 1..=WRITE_ATTEMPTS {
        let started = Instant::now();
        let tmp = temp_sibling(path);
        let attempt_result = timed_attempt(
            &tmp,
            Duration::from_secs(10),
            write_once_atomic(path, &tmp, bytes, mode),
        )
        .await;
        match attempt_result {
            Some(Ok(())) => {
                debug!(
                    "[PHASE: install] [STEP: fs] {} ok (attempt={}, path={:?}, bytes={}, duration_ms={})",
                    label,
                    attempt,
                    path,
                    bytes.len(),
                    started.elapsed().as_millis()
                );
                return Ok(());
            }
            Some(Err(e)) => {
                let transient = is_transient_fs_error(&e);
                warn!(
                    "[PHASE: install] [STEP: fs] {} failed (attempt={}, transient={}, path={:?}, error={:#})",
                    label, attempt, transient, path, e
                );
                last_err = Some(e);
                if !transient {
                    break;
                }
            }
            None => {
                warn!(
                    "[PHASE: install] [STEP: fs] {} timed out (attempt={}, path={:?})",
                    label, attempt, path
                );
                last_err = Some(anyhow::anyhow!("write timed out: {:?}", path));
            }
        }

        let backoff_ms = 50_u64.saturating_mul(1_u64 << (attempt - 1));
        tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("Failed to write file: {:?}", path)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_file_atomic_creates_parents_and_replaces_content() {
        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("config").join("passbolt.php");

        write_file_atomic(&target, b"first", None, "test_write").await.unwrap();
        write_file_atomic(&target, b"second", None, "test_write").await.unwrap();

        assert_eq!(tokio::fs::read_to_string(&target).await.unwrap(), "second");

        // No temp siblings left behind.
        let mut rd = tokio::fs::read_dir(target.parent().unwrap()).await.unwrap();
        let mut names = Vec::new();
        while let Some(ent) = rd.next_entry().await.unwrap() {
            names.push(ent.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["passbolt.php".to_string()]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_file_atomic_applies_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let target = tmp.path().join("serverkey_private.asc");
        write_file_atomic(&target, b"key", Some(0o600), "test_mode").await.unwrap();

        let mode = tokio::fs::metadata(&target).await.unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn write_into_a_file_path_fails_without_retrying_forever() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("not_a_dir");
        tokio::fs::write(&blocker, b"x").await.unwrap();

        let err = write_file_atomic(&blocker.join("passbolt.php"), b"x", None, "test_fail")
            .await
            .unwrap_err();
        assert!(format!("{:#}", err).contains("not_a_dir"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn temp_file_is_created_with_the_requested_mode() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let sibling = temp_sibling(&tmp.path().join("serverkey_private.asc"));
        let f = create_temp_file(&sibling, Some(0o600)).await.unwrap();

        // Checked before anything is written.
        let mode = f.metadata().await.unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
        assert!(create_temp_file(&sibling, Some(0o600)).await.is_err());
    }

    #[tokio::test]
    async fn timed_out_attempt_removes_the_temp_sibling() {
        let tmp = tempfile::tempdir().unwrap();
        let sibling = temp_sibling(&tmp.path().join("passbolt.php"));
        tokio::fs::write(&sibling, b"partial secret").await.unwrap();

        let out = timed_attempt(
            &sibling,
            Duration::from_millis(20),
            std::future::pending::<Result<()>>(),
        )
        .await;

        assert!(out.is_none());
        assert!(!sibling.exists());
    }
}
