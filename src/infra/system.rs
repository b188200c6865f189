//! Host resource probes backed by `sysinfo`.

use std::path::Path;

use async_trait::async_trait;
use sysinfo::{Disks, System};

use crate::application::health::{ProbeError, SystemProbe};

const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Reads disk and memory figures on the blocking pool.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoProbe;

#[async_trait]
impl SystemProbe for SysinfoProbe {
    async fn disk_usage_percent(&self, path: &Path) -> Result<f64, ProbeError> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || disk_usage(&path))
            .await
            .map_err(|err| ProbeError::Failed(err.to_string()))?
    }

    async fn available_memory_mb(&self) -> Result<u64, ProbeError> {
        tokio::task::spawn_blocking(|| {
            let mut system = System::new();
            system.refresh_memory();
            system.available_memory() / BYTES_PER_MIB
        })
        .await
        .map_err(|err| ProbeError::Failed(err.to_string()))
    }
}

/// Usage of the disk whose mount point is the longest prefix of `path`.
fn disk_usage(path: &Path) -> Result<f64, ProbeError> {
    let disks = Disks::new_with_refreshed_list();
    let disk = disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .ok_or_else(|| ProbeError::UnknownPath(path.display().to_string()))?;

    usage_percent(disk.total_space(), disk.available_space())
        .ok_or_else(|| ProbeError::Failed(format!("disk at `{}` reports zero size", path.display())))
}

fn usage_percent(total: u64, available: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    let used = total.saturating_sub(available);
    Some(used as f64 / total as f64 * 100.0)
}
