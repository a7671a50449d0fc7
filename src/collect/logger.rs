use crate::local_logger::get_local_logger;
use crate::logger::{GROUP_TARGET, OPENED_GROUP_TARGET};
use crate::prelude::*;
use log::LevelFilter;
use simplelog::{CombinedLogger, WriteLogger};
use std::fs::copy;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Basename of the log file persisted into the session directory.
const LOG_FILENAME: &str = "collector.log";

/// Console logger plus a trace-level file logger whose content is persisted
/// into the session directory once the collection has produced something.
pub struct Logger {
    log_file_path: PathBuf,
}

impl Logger {
    pub fn new() -> Result<Self> {
        let log_file = NamedTempFile::new().context("Failed to create log file")?;
        let log_file_path = log_file.path().to_path_buf();
        let file_logger_config = simplelog::ConfigBuilder::new()
            // Groups are not logged to the file
            .add_filter_ignore_str(GROUP_TARGET)
            .add_filter_ignore_str(OPENED_GROUP_TARGET)
            .build();
        let file_logger = WriteLogger::new(LevelFilter::Trace, file_logger_config, log_file);
        CombinedLogger::init(vec![get_local_logger(), file_logger])
            .context("Failed to init logger")?;
        Ok(Self { log_file_path })
    }

    pub fn persist_log_to_session_dir(&self, out_dir: &Path) -> Result<()> {
        let dest_log_file_path = out_dir.join(LOG_FILENAME);
        debug!("Persisting log file to {}", dest_log_file_path.display());
        log::logger().flush();
        copy(&self.log_file_path, dest_log_file_path).context("Failed to copy log file")?;
        Ok(())
    }
}
