use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;

/// A storage volume as reported by the host OS.
///
/// Snapshots are immutable: each discovery poll replaces the whole list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockDevice {
    pub uuid: String,
    pub name: String,
    pub label: String,
    /// Device node used to mount the volume (e.g. `/dev/sdb1`, `/dev/disk4s1`).
    pub path: PathBuf,
    pub mount_points: Vec<PathBuf>,
}

impl BlockDevice {
    pub fn is_mounted(&self) -> bool {
        !self.mount_points.is_empty()
    }

    /// Whether both describe the same device node. Volume UUIDs are not
    /// unique: UF2 bootloaders often report a fixed FAT serial.
    pub fn is_same_node(&self, other: &BlockDevice) -> bool {
        self.path == other.path
    }

    pub fn is_mounted_at(&self, mount_point: &Path) -> bool {
        self.mount_points.iter().any(|m| m == mount_point)
    }

    /// Short human readable description for lists and logs.
    pub fn display_name(&self) -> String {
        if self.label.is_empty() {
            self.name.clone()
        } else {
            format!("{} ({})", self.label, self.name)
        }
    }
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to run {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{command} failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("could not parse {what}: {detail}")]
    Parse { what: &'static str, detail: String },

    #[error("device enumeration failed: {0}")]
    Enumerate(#[source] std::io::Error),

    #[error("mount of {device} refused: {reason}")]
    MountRefused { device: String, reason: String },

    #[error("OS not supported yet")]
    Unsupported,

    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Per-OS access to block devices.
///
/// Implementations are shared between the discovery poller and mount tasks of
/// both halves, so every method may be called concurrently.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// List all currently attached block devices that carry a filesystem.
    async fn enumerate(&self) -> Result<Vec<BlockDevice>, ProviderError>;

    /// Mount the device if it is not mounted yet and return it with its mount
    /// points populated.
    async fn mount(&self, device: &BlockDevice) -> Result<BlockDevice, ProviderError>;
}
