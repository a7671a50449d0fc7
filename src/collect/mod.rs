use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::config::ToolConfig;
use crate::prelude::*;
use crate::report;
use crate::rewriter;
use crate::transport::{AdbTransport, DeviceTransport, PullRequest};
use crate::{archive, collect::config::Config, collect::logger::Logger};
use crate::{end_group, start_group, start_opened_group};
use clap::{ArgAction, Args};
use itertools::Itertools;
use self::dmd::DmdOptions;
use url::Url;

pub mod config;
pub mod dmd;
pub mod gpu;
pub mod logger;
pub mod proc_names;
pub mod session;

/// Prefixes of the per-process memory report fragments the device produces.
const REPORT_PREFIXES: [&str; 2] = ["memory-report-", "unified-memory-report-"];
const DMD_PREFIX: &str = "dmd-";

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Minimize memory usage before collecting the memory reports
    #[arg(long = "minimize", short = 'm')]
    pub minimize_memory_usage: bool,

    /// The directory to store the reports in. By default, the reports are
    /// stored in the directory about-memory-N, for some N
    #[arg(long = "directory", short = 'd', value_name = "DIR")]
    pub output_directory: Option<String>,

    /// Package the reports into a <directory>.tar.gz archive and remove the
    /// intermediate directory
    #[arg(long = "archive")]
    pub create_archive: bool,

    /// Leave the reports on the device after pulling them
    #[arg(long, short = 'l')]
    pub leave_on_device: bool,

    /// By default, we try to open the merged report in Firefox.
    /// Specify this option to prevent this
    #[arg(long = "no-auto-open", short = 'o', action = ArgAction::SetFalse)]
    pub open_in_viewer: bool,

    /// Don't delete the individual memory reports which are merged to create
    /// the memory-reports file. You shouldn't need to pass this parameter
    /// except for debugging
    #[arg(long)]
    pub keep_individual_reports: bool,

    /// Don't process DMD dumps, even if the device produced some
    #[arg(long)]
    pub no_dmd: bool,

    /// Do not compress each individual DMD report after processing
    #[arg(long = "uncompressed-dmd-logs", action = ArgAction::SetFalse)]
    pub compress_dmd_logs: bool,

    /// Don't pull the GPU (kgsl) memory logs
    #[arg(long)]
    pub no_gpu_logs: bool,

    /// The adb binary used to reach the device
    #[arg(long, env = "MEMREPORT_ADB")]
    pub adb: Option<String>,

    /// Serial of the device to target when several are attached
    #[arg(long, short = 's')]
    pub serial: Option<String>,

    /// Stack fixer binary piped over each DMD dump
    #[arg(long, value_name = "BIN")]
    pub fix_stacks: Option<PathBuf>,
}

#[cfg(test)]
impl CollectArgs {
    /// Constructs a new `CollectArgs` with default values for testing
    /// purposes
    pub fn test() -> Self {
        Self {
            minimize_memory_usage: false,
            output_directory: None,
            create_archive: false,
            leave_on_device: false,
            open_in_viewer: true,
            keep_individual_reports: false,
            no_dmd: false,
            compress_dmd_logs: true,
            no_gpu_logs: false,
            adb: None,
            serial: None,
            fix_stacks: None,
        }
    }
}

pub async fn run(args: CollectArgs, tool_config: &ToolConfig) -> Result<()> {
    let config = Config::new(args, tool_config);
    let logger = Logger::new()?;
    debug!("memreport v{}", crate::VERSION);
    debug!("config: {:#?}", config);

    let transport = AdbTransport::new(config.adb_binary.as_deref(), config.serial.as_deref());

    let out_dir = match &config.output_directory {
        Some(dir) => session::create_specific_output_dir(dir)?,
        None => session::create_new_output_dir(Path::new("."))?,
    };

    let (merged_reports_path, dmd_files) =
        session::run_and_delete_dir_on_exception(&out_dir, || {
            get_dumps(&transport, &config, &out_dir)
        })
        .await?;

    match &merged_reports_path {
        Some(path) => show_report_location(path, config.open_in_viewer),
        None => {
            // This can happen if all child processes die or restart during
            // measurement.
            warn!("Failed to retrieve memory reports");
        }
    }

    if !config.no_dmd && !dmd_files.is_empty() {
        info!("Got {} DMD dump(s).", dmd_files.len());
        start_group!("Processing DMD dumps");
        process_dmd_dumps(&dmd_files, &config, &out_dir).await;
        end_group!();
    }

    if !config.no_gpu_logs {
        start_group!("Pulling GPU memory logs");
        gpu::pull_gpu_memory_logs(&transport, &out_dir).await?;
        end_group!();
    }

    logger.persist_log_to_session_dir(&out_dir)?;

    if config.create_archive {
        info!("Archiving logs...");
        let archive_path = archive::create_archive(&out_dir).await?;
        let _ = std::fs::remove_dir_all(&out_dir);
        info!("Archive written to {}", archive_path.display());
    }

    Ok(())
}

/// Trigger a collection round, pull everything it produced and merge the
/// memory report fragments. Returns the merged report path (when the device
/// delivered any fragment) and the raw DMD dumps pulled along the way.
async fn get_dumps(
    transport: &AdbTransport,
    config: &Config,
    out_dir: &Path,
) -> Result<(Option<PathBuf>, Vec<PathBuf>)> {
    start_opened_group!("Pulling memory reports from the device");
    let request = PullRequest {
        fifo_msg: config.fifo_msg,
        outfiles_prefixes: &["memory-report-"],
        optional_outfiles_prefixes: &["dmd-"],
        remove_from_device: !config.leave_on_device,
    };
    let new_files = transport.notify_and_pull_files(&request, out_dir).await?;

    let memory_report_files: Vec<&String> = new_files
        .iter()
        .filter(|file| REPORT_PREFIXES.iter().any(|prefix| file.starts_with(prefix)))
        .collect();
    let dmd_files: Vec<PathBuf> = new_files
        .iter()
        .filter(|file| file.starts_with(DMD_PREFIX))
        .map(|file| out_dir.join(file))
        .collect();

    let merged_reports_path = if memory_report_files.is_empty() {
        None
    } else {
        merge_report_fragments(out_dir, &memory_report_files).await?
    };

    transport.pull_process_snapshot(out_dir).await?;

    if !config.keep_individual_reports {
        for file in &memory_report_files {
            tokio::fs::remove_file(out_dir.join(file.as_str())).await?;
        }
    }
    end_group!();

    Ok((merged_reports_path, dmd_files))
}

/// Merge the pulled fragments into the consolidated report. A schema
/// mismatch between fragments means no consolidated report, not a failed
/// collection.
async fn merge_report_fragments(
    out_dir: &Path,
    fragment_files: &[&String],
) -> Result<Option<PathBuf>> {
    let mut dumps = Vec::with_capacity(fragment_files.len());
    for file in fragment_files {
        dumps.push(report::load_fragment(&out_dir.join(file.as_str())).await?);
    }

    match report::merge_dumps(dumps) {
        Ok(Some(merged)) => {
            for conflict in &merged.conflicts {
                warn!(
                    "Memory report dumps don't have the same value for property '{}'; \
                     keeping {} over {}",
                    conflict.property, conflict.kept, conflict.conflicting
                );
            }
            let path = report::write_merged(out_dir, &merged)?;
            Ok(Some(path.canonicalize()?))
        }
        Ok(None) => Ok(None),
        Err(error) => {
            warn!("{error:#}");
            Ok(None)
        }
    }
}

fn show_report_location(merged_reports_path: &Path, open_in_viewer: bool) {
    let Ok(url) = Url::from_file_path(merged_reports_path) else {
        info!(
            "To view this report, load {} in Firefox via about:memory.",
            merged_reports_path.display()
        );
        return;
    };
    let about_memory_url = format!("about:memory?file={}", url.path());

    let mut opened = false;
    if open_in_viewer {
        // If Firefox is already running this opens a new tab in the existing
        // process; otherwise the viewer starts detached from our terminal.
        opened = open::with_detached(&about_memory_url, "firefox").is_ok();
        if opened {
            info!(
                "I just tried to open the memory report in Firefox. If that didn't work \
                 for some reason, or if you want to open this report at a later time, \
                 open the following URL in Firefox:\n\n  {about_memory_url}"
            );
        }
    }

    if !opened {
        info!(
            "To view this report, open Firefox on this machine and load the \
             following URL:\n\n  {about_memory_url}"
        );
    }
}

async fn process_dmd_dumps(dmd_files: &[PathBuf], config: &Config, out_dir: &Path) {
    info!("Processing DMD dumps. This may take a minute or two.");

    let proc_names = match proc_names::load_proc_names(out_dir).await {
        Ok(proc_names) => proc_names,
        Err(error) => {
            warn!("{error:#}; dump files will keep their numeric names");
            HashMap::new()
        }
    };
    let rewriter = rewriter::rewriter_from(config.fix_stacks.as_deref());
    let options = DmdOptions {
        compress_logs: config.compress_dmd_logs,
        keep_raw_files: config.keep_individual_reports,
    };

    let outcomes = dmd::process_dmd_files(dmd_files, &proc_names, rewriter.as_ref(), &options).await;

    let failed: Vec<_> = outcomes
        .iter()
        .filter(|outcome| outcome.result.is_err())
        .collect();
    if failed.is_empty() {
        info!(
            "Done processing DMD dumps. Have a look in {}.",
            out_dir.display()
        );
    } else {
        warn!(
            "An error occurred while processing some DMD dumps. Not to worry! The raw \
             dumps are still there; run the stack fixer on them manually: {}",
            failed
                .iter()
                .map(|outcome| outcome.source.display().to_string())
                .join(", ")
        );
    }
}
