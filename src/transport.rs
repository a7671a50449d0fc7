use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::collect::proc_names::PROC_SNAPSHOT_FILENAME;
use crate::prelude::*;
use async_trait::async_trait;
use tokio::process::Command;

/// Directory the on-device dumper writes its reports to.
const DEVICE_DUMP_DIR: &str = "/data/local/tmp/memory-reports";

/// Fifo watched by the on-device dumper for collection triggers.
const DEVICE_TRIGGER_FIFO: &str = "/data/local/debug_info_trigger";

const DUMP_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DUMP_TIMEOUT: Duration = Duration::from_secs(600);

/// What to ask the device for in one collection round.
#[derive(Debug)]
pub struct PullRequest<'a> {
    /// Message written to the on-device trigger fifo.
    pub fifo_msg: &'a str,
    /// Prefixes of the files the collection is about. At least one such file
    /// must appear before the pull starts.
    pub outfiles_prefixes: &'a [&'a str],
    /// Prefixes of files pulled when present, without waiting for them.
    pub optional_outfiles_prefixes: &'a [&'a str],
    /// Remove pulled files from the device afterwards.
    pub remove_from_device: bool,
}

#[async_trait]
pub trait DeviceTransport {
    /// List the entries of a remote directory.
    async fn remote_ls(&self, path: &str) -> Result<Vec<String>>;

    /// Copy a remote file to a local path.
    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()>;

    /// Delete a remote file.
    async fn remove_file(&self, remote: &str) -> Result<()>;

    /// Trigger a collection round on the device and pull the produced files
    /// into `out_dir`, returning their basenames. Per-file pull failures are
    /// reported and skipped, never fatal to the round.
    async fn notify_and_pull_files(
        &self,
        request: &PullRequest<'_>,
        out_dir: &Path,
    ) -> Result<Vec<String>>;

    /// Capture the process-rank snapshot into `out_dir`.
    async fn pull_process_snapshot(&self, out_dir: &Path) -> Result<PathBuf>;
}

/// Reaches the device through the adb command line tool.
pub struct AdbTransport {
    adb_binary: String,
    serial: Option<String>,
}

impl AdbTransport {
    pub fn new(adb_binary: Option<&str>, serial: Option<&str>) -> Self {
        Self {
            adb_binary: adb_binary.unwrap_or("adb").to_string(),
            serial: serial.map(str::to_string),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.adb_binary);
        if let Some(serial) = &self.serial {
            command.arg("-s").arg(serial);
        }
        command.stdin(Stdio::null());
        command
    }

    async fn shell(&self, script: &str) -> Result<String> {
        trace!("{} shell {}", self.adb_binary, script);
        let output = self
            .command()
            .arg("shell")
            .arg(script)
            .output()
            .await
            .with_context(|| format!("Failed to run {}. Is it installed?", self.adb_binary))?;
        if !output.status.success() {
            bail!(
                "Remote command `{}` failed: {}",
                script,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Poll the dump directory until it contains at least one file with a
    /// required prefix and the listing has settled.
    async fn wait_for_dumps(&self, prefixes: &[&str]) -> Result<Vec<String>> {
        let deadline = tokio::time::Instant::now() + DUMP_TIMEOUT;
        let mut previous: Option<Vec<String>> = None;
        loop {
            tokio::time::sleep(DUMP_POLL_INTERVAL).await;
            let entries = self.remote_ls(DEVICE_DUMP_DIR).await.unwrap_or_default();
            let has_required = entries
                .iter()
                .any(|entry| prefixes.iter().any(|prefix| entry.starts_with(*prefix)));
            // The dumper writes one file per process; wait for the listing to
            // settle so a half-written round is not pulled.
            if has_required && previous.as_deref() == Some(entries.as_slice()) {
                return Ok(entries);
            }
            if tokio::time::Instant::now() >= deadline {
                bail!("Timed out waiting for memory reports to appear in {DEVICE_DUMP_DIR}");
            }
            previous = Some(entries);
        }
    }
}

#[async_trait]
impl DeviceTransport for AdbTransport {
    async fn remote_ls(&self, path: &str) -> Result<Vec<String>> {
        let stdout = self.shell(&format!("ls {path}")).await?;
        Ok(stdout.split_whitespace().map(str::to_string).collect())
    }

    async fn pull_file(&self, remote: &str, local: &Path) -> Result<()> {
        debug!("Pulling {} to {}", remote, local.display());
        let output = self
            .command()
            .arg("pull")
            .arg(remote)
            .arg(local)
            .output()
            .await?;
        if !output.status.success() {
            bail!(
                "Failed to pull {}: {}",
                remote,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }

    async fn remove_file(&self, remote: &str) -> Result<()> {
        self.shell(&format!("rm {remote}")).await?;
        Ok(())
    }

    async fn notify_and_pull_files(
        &self,
        request: &PullRequest<'_>,
        out_dir: &Path,
    ) -> Result<Vec<String>> {
        debug!("Requesting '{}' from the device", request.fifo_msg);
        self.shell(&format!(
            "echo -n '{}' > {}",
            request.fifo_msg, DEVICE_TRIGGER_FIFO
        ))
        .await
        .context("Failed to signal the on-device dumper. Is the device runtime up?")?;

        let entries = self.wait_for_dumps(request.outfiles_prefixes).await?;

        let mut pulled = Vec::new();
        for entry in entries {
            let wanted = request
                .outfiles_prefixes
                .iter()
                .chain(request.optional_outfiles_prefixes)
                .any(|prefix| entry.starts_with(*prefix));
            if !wanted {
                continue;
            }
            let remote = format!("{DEVICE_DUMP_DIR}/{entry}");
            if let Err(error) = self.pull_file(&remote, &out_dir.join(&entry)).await {
                warn!("Unable to retrieve {remote}: {error:#}");
                continue;
            }
            if request.remove_from_device {
                if let Err(error) = self.remove_file(&remote).await {
                    warn!("Unable to remove {remote} from the device: {error:#}");
                }
            }
            pulled.push(entry);
        }
        Ok(pulled)
    }

    async fn pull_process_snapshot(&self, out_dir: &Path) -> Result<PathBuf> {
        let snapshot = self
            .shell("procrank")
            .await
            .context("Failed to capture procrank on the device")?;
        let path = out_dir.join(PROC_SNAPSHOT_FILENAME);
        tokio::fs::write(&path, snapshot)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(path)
    }
}
