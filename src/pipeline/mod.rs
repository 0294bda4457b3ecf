//! # Media Acquisition Pipeline
//!
//! URL validation, the metadata probe, the external downloader, and the
//! audio extractor. Everything here wraps a failure-prone external process
//! behind a classified error and guaranteed best-effort cleanup.

pub mod audio;
pub mod download;
pub mod url;

use std::path::Path;
use tracing::{info, warn};

/// Best-effort removal of a transient pipeline file. Deletion failures are
/// logged and swallowed; a leftover file must never fail the operation that
/// triggered cleanup.
pub async fn cleanup_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => info!(path = %path.display(), "Cleaned up transient file"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), error = %err, "Failed to clean up transient file"),
    }
}
