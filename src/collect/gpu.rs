use std::path::Path;

use crate::collect::proc_names;
use crate::prelude::*;
use crate::transport::DeviceTransport;

const KGSL_PROC_DIR: &str = "/d/kgsl/proc";

/// Pull the per-process GPU (kgsl) memory logs, naming each after the owning
/// process when its PID resolves.
pub async fn pull_gpu_memory_logs(transport: &dyn DeviceTransport, out_dir: &Path) -> Result<()> {
    let pids = match transport.remote_ls(&format!("{KGSL_PROC_DIR}/")).await {
        Ok(pids) => pids,
        Err(_) => {
            // Probably not a kgsl device.
            info!("GPU memory logs not available for this device.");
            return Ok(());
        }
    };

    let proc_names = match proc_names::load_proc_names(out_dir).await {
        Ok(proc_names) => proc_names,
        Err(error) => {
            warn!("{error:#}; GPU memory logs will keep their numeric names");
            Default::default()
        }
    };

    for pid in pids.iter().filter(|pid| !pid.is_empty()) {
        let name = pid
            .parse::<u32>()
            .ok()
            .and_then(|pid| proc_names.get(&pid))
            .cloned()
            .unwrap_or_else(|| pid.clone());
        let remote_file = format!("{KGSL_PROC_DIR}/{pid}/mem");
        let dest_file = out_dir.join(format!("kgsl-{name}-mem"));
        if let Err(error) = transport.pull_file(&remote_file, &dest_file).await {
            warn!("Unable to retrieve GPU memory log {remote_file}: {error:#}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collect::proc_names::PROC_SNAPSHOT_FILENAME;
    use crate::transport::PullRequest;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// A device with two kgsl-tracked processes, one of which fails to pull.
    struct FakeKgslDevice {
        pulled: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl DeviceTransport for FakeKgslDevice {
        async fn remote_ls(&self, _path: &str) -> Result<Vec<String>> {
            Ok(vec!["106".to_string(), "9999".to_string()])
        }

        async fn pull_file(&self, remote: &str, local: &Path) -> Result<()> {
            if remote.contains("9999") {
                bail!("remote object '{remote}' does not exist");
            }
            std::fs::write(local, b"gpumem")?;
            self.pulled.lock().unwrap().push(local.to_path_buf());
            Ok(())
        }

        async fn remove_file(&self, _remote: &str) -> Result<()> {
            unreachable!()
        }

        async fn notify_and_pull_files(
            &self,
            _request: &PullRequest<'_>,
            _out_dir: &Path,
        ) -> Result<Vec<String>> {
            unreachable!()
        }

        async fn pull_process_snapshot(&self, _out_dir: &Path) -> Result<PathBuf> {
            unreachable!()
        }
    }

    #[tokio::test]
    async fn test_gpu_logs_are_named_after_resolved_processes() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join(PROC_SNAPSHOT_FILENAME),
            "system 106 191312K\n",
        )
        .unwrap();
        let transport = FakeKgslDevice {
            pulled: Mutex::new(Vec::new()),
        };

        pull_gpu_memory_logs(&transport, dir.path()).await.unwrap();

        let pulled = transport.pulled.lock().unwrap();
        // The resolvable PID lands under its process name; the failing pull
        // is skipped without aborting the batch.
        assert_eq!(*pulled, vec![dir.path().join("kgsl-system-mem")]);
    }
}
