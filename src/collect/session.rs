use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::prelude::*;

/// Prefix of auto-numbered session directories.
const SESSION_DIR_PREFIX: &str = "about-memory-";

/// Create the caller-specified session directory.
pub fn create_specific_output_dir(path: &Path) -> Result<PathBuf> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create output directory {}", path.display()))?;
    Ok(path.to_path_buf())
}

/// Create `about-memory-<N>` under `parent`, picking the smallest N not
/// already in use.
pub fn create_new_output_dir(parent: &Path) -> Result<PathBuf> {
    for n in 0u32.. {
        let candidate = parent.join(format!("{SESSION_DIR_PREFIX}{n}"));
        match std::fs::create_dir(&candidate) {
            Ok(()) => {
                debug!("Created session directory {}", candidate.display());
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                return Err(e).context(format!(
                    "Failed to create output directory {}",
                    candidate.display()
                ));
            }
        }
    }
    unreachable!()
}

/// Run the collection work. If it fails and left nothing in the session
/// directory, the directory is removed; a non-empty directory is kept for
/// inspection.
pub async fn run_and_delete_dir_on_exception<T, F, Fut>(out_dir: &Path, work: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match work().await {
        Ok(value) => Ok(value),
        Err(error) => {
            if dir_is_empty(out_dir) {
                debug!("Removing empty session directory {}", out_dir.display());
                let _ = std::fs::remove_dir(out_dir);
            }
            Err(error)
        }
    }
}

fn dir_is_empty(dir: &Path) -> bool {
    match std::fs::read_dir(dir) {
        Ok(mut entries) => entries.next().is_none(),
        Err(_) => false,
    }
}
