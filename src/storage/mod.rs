// Staging area for uploaded audio
// Files are written by the API process and read (then deleted) by whichever
// worker claims the job, so the directory must be shared between them.

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

const FALLBACK_STEM: &str = "upload";

#[derive(Debug, Clone)]
pub struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    /// Create the directory if needed and pin it to an absolute path, since
    /// the path is handed to other processes.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        std::fs::create_dir_all(root.as_ref())?;
        let root = std::fs::canonicalize(root.as_ref())?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `data` under a sanitized, collision-free name and return the
    /// absolute path.
    pub async fn stage(&self, original_name: &str, data: &[u8]) -> io::Result<PathBuf> {
        let name = format!("{}_{}", Uuid::new_v4().simple(), sanitize_filename(original_name));
        let path = self.root.join(name);
        tokio::fs::write(&path, data).await?;
        debug!(path = %path.display(), bytes = data.len(), "Staged upload");
        Ok(path)
    }

    /// Best-effort removal, used when a staged file never made it into the queue.
    pub async fn discard(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %path.display(), "Failed to discard staged file: {}", e);
            }
        }
    }
}

/// Reduce a client-supplied name to a safe single path component: ASCII
/// alphanumerics plus `.`, `-` and `_`, whitespace folded to `_`, no
/// leading dots or underscores. The extension survives even when nothing
/// of the stem does (`录音.m4a` becomes `upload.m4a`).
pub fn sanitize_filename(name: &str) -> String {
    // Drop any directory part, whichever separator the client used
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let (stem, extension) = match base.rsplit_once('.') {
        Some((stem, extension)) => (clean_component(stem), clean_component(extension)),
        None => (clean_component(base), String::new()),
    };
    let stem = if stem.is_empty() { FALLBACK_STEM.to_string() } else { stem };

    if extension.is_empty() {
        stem
    } else {
        format!("{stem}.{extension}")
    }
}

fn clean_component(raw: &str) -> String {
    let mut cleaned = String::with_capacity(raw.len());
    for word in raw.split_whitespace() {
        if !cleaned.is_empty() {
            cleaned.push('_');
        }
        cleaned.extend(
            word.chars()
                .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')),
        );
    }
    cleaned.trim_start_matches(['.', '_']).to_string()
}

/// Extension check, case-insensitive: `clip.M4A` matches `m4a`.
pub fn has_extension(name: &str, extension: &str) -> bool {
    name.rsplit_once('.')
        .is_some_and(|(_, ext)| ext.eq_ignore_ascii_case(extension))
}
