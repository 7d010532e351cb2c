//! Logged, best-effort filesystem helpers.
//!
//! Save-path I/O failures never propagate to callers; they are logged
//! at error severity and the extension keeps running.

use camino::Utf8Path;
use tokio::fs;
use tracing::error;

/// Creates a directory tree. Idempotent; failures are logged.
pub(crate) async fn ensure_dir(path: &Utf8Path) {
    if let Err(err) = fs::create_dir_all(path).await {
        if err.kind() != std::io::ErrorKind::AlreadyExists {
            error!(%path, "failed to create directory: {err}");
        }
    }
}

/// Writes a file, logging failures instead of propagating them.
pub(crate) async fn write_best_effort(path: &Utf8Path, bytes: &[u8]) {
    if let Err(err) = fs::write(path, bytes).await {
        error!(%path, "failed to write file: {err}");
    }
}
