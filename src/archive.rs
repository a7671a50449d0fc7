use std::path::{Path, PathBuf};

use crate::prelude::*;
use async_compression::tokio::write::GzipEncoder;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio_tar::Builder;

/// Package the whole session directory into `<dir>.tar.gz`.
pub async fn create_archive(out_dir: &Path) -> Result<PathBuf> {
    let archive_path = PathBuf::from(format!("{}.tar.gz", out_dir.display()));
    debug!("Creating archive {}", archive_path.display());

    let file = File::create(&archive_path)
        .await
        .with_context(|| format!("Failed to create {}", archive_path.display()))?;
    let encoder = GzipEncoder::new(file);
    let mut tar = Builder::new(encoder);
    let dir_name = out_dir.file_name().unwrap_or(out_dir.as_os_str());
    tar.append_dir_all(dir_name, out_dir).await?;
    let mut encoder = tar.into_inner().await?;
    encoder.shutdown().await?;
    encoder.into_inner().sync_all().await?;

    Ok(archive_path)
}
