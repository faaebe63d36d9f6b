//! Linux device provider.
//!
//! Devices come from udev's `block` subsystem, mount points from
//! `/proc/self/mounts`. Mounting goes through udisks2 so an unprivileged
//! desktop user can flash; when `udisksctl` is missing and we run as root the
//! volume is mounted directly under `mount_base`.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use async_trait::async_trait;
use nix::mount::{MsFlags, mount};
use nix::unistd::Uid;
use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::core::hardware::{BlockDevice, DeviceProvider, ProviderError};

const MOUNT_TABLE: &str = "/proc/self/mounts";

/// Bootloader volumes are FAT formatted.
const FALLBACK_FILESYSTEM: &str = "vfat";

static MOUNTED_AT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Mounted \S+ at (.+?)\.?\s*$").expect("valid regex"));

static ALREADY_MOUNTED_AT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"already mounted at [`'](.+?)['`]").expect("valid regex")
});

#[derive(Debug, Clone)]
pub struct LinuxProviderConfig {
    /// Directory for root-only direct mounts.
    pub mount_base: PathBuf,
}

impl Default for LinuxProviderConfig {
    fn default() -> Self {
        Self {
            mount_base: PathBuf::from("/run/zmk-flasher"),
        }
    }
}

pub struct LinuxProvider {
    config: LinuxProviderConfig,
}

impl LinuxProvider {
    pub fn new(config: LinuxProviderConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(LinuxProviderConfig::default())
    }
}

#[async_trait]
impl DeviceProvider for LinuxProvider {
    fn name(&self) -> &'static str {
        "linux"
    }

    async fn enumerate(&self) -> Result<Vec<BlockDevice>, ProviderError> {
        tokio::task::spawn_blocking(scan_block_devices).await?
    }

    async fn mount(&self, device: &BlockDevice) -> Result<BlockDevice, ProviderError> {
        if device.is_mounted() {
            return Ok(device.clone());
        }

        let mount_point = match udisksctl_mount(&device.path).await {
            Ok(mount_point) => mount_point,
            Err(ProviderError::Spawn { command, source }) if Uid::effective().is_root() => {
                warn!(command = %command, error = %source, "udisksctl unavailable, mounting directly");
                direct_mount(device, &self.config.mount_base).await?
            }
            Err(e) => return Err(e),
        };

        info!(device = %device.path.display(), mount_point = %mount_point.display(), "Mounted bootloader volume");

        let mut mounted = device.clone();
        mounted.mount_points = vec![mount_point];
        Ok(mounted)
    }
}

fn scan_block_devices() -> Result<Vec<BlockDevice>, ProviderError> {
    let table = std::fs::read_to_string(MOUNT_TABLE).map_err(ProviderError::Enumerate)?;
    let mounts = canonical_mount_table(parse_mount_table(&table));

    let mut enumerator = udev::Enumerator::new().map_err(ProviderError::Enumerate)?;
    enumerator
        .match_subsystem("block")
        .map_err(ProviderError::Enumerate)?;

    let mut devices = Vec::new();
    for dev in enumerator.scan_devices().map_err(ProviderError::Enumerate)? {
        let Some(node) = dev.devnode() else {
            continue;
        };
        // Only volumes with a filesystem can receive a bootloader image.
        let Some(uuid) = property(&dev, "ID_FS_UUID") else {
            continue;
        };

        devices.push(BlockDevice {
            uuid,
            name: dev.sysname().to_string_lossy().into_owned(),
            label: property(&dev, "ID_FS_LABEL").unwrap_or_default(),
            path: node.to_path_buf(),
            mount_points: mounts.get(node).cloned().unwrap_or_default(),
        });
    }

    devices.sort_by(|a, b| a.name.cmp(&b.name));
    debug!(count = devices.len(), "Scanned block devices");
    Ok(devices)
}

fn property(dev: &udev::Device, key: &str) -> Option<String> {
    dev.property_value(key)
        .map(|v| v.to_string_lossy().into_owned())
        .filter(|v| !v.is_empty())
}

/// Parse a `/proc/mounts` style table into source → mount points, keeping the
/// order in which mounts appear.
pub fn parse_mount_table(contents: &str) -> HashMap<PathBuf, Vec<PathBuf>> {
    let mut table: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();

    for line in contents.lines() {
        let mut fields = line.split_whitespace();
        let (Some(source), Some(target)) = (fields.next(), fields.next()) else {
            continue;
        };
        if !source.starts_with('/') {
            continue;
        }

        table
            .entry(PathBuf::from(unescape_mount_field(source)))
            .or_default()
            .push(PathBuf::from(unescape_mount_field(target)));
    }

    table
}

/// Resolve `/dev/disk/by-*` symlinks so sources match udev device nodes.
fn canonical_mount_table(
    table: HashMap<PathBuf, Vec<PathBuf>>,
) -> HashMap<PathBuf, Vec<PathBuf>> {
    let mut canonical: HashMap<PathBuf, Vec<PathBuf>> = HashMap::new();
    for (source, targets) in table {
        let source = std::fs::canonicalize(&source).unwrap_or(source);
        canonical.entry(source).or_default().extend(targets);
    }
    canonical
}

/// Decode the octal escapes (`\040` for space etc.) the kernel uses in mount
/// tables.
pub fn unescape_mount_field(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            if digits.iter().all(|b| (b'0'..=b'7').contains(b)) {
                let value = digits
                    .iter()
                    .fold(0u32, |acc, b| acc * 8 + u32::from(b - b'0'));
                if let Ok(value) = u8::try_from(value) {
                    out.push(value);
                    i += 4;
                    continue;
                }
            }
        }
        out.push(bytes[i]);
        i += 1;
    }

    String::from_utf8_lossy(&out).into_owned()
}

/// Extract the mount point from `udisksctl mount` output.
///
/// Handles both "Mounted /dev/sdb at /media/me/NICENANO" and the
/// `AlreadyMounted` error, which names the existing mount point.
pub fn parse_udisksctl_output(stdout: &str, stderr: &str) -> Option<PathBuf> {
    if let Some(caps) = stdout.lines().find_map(|line| MOUNTED_AT.captures(line.trim())) {
        return Some(PathBuf::from(&caps[1]));
    }

    ALREADY_MOUNTED_AT
        .captures(stderr)
        .map(|caps| PathBuf::from(&caps[1]))
}

async fn udisksctl_mount(node: &Path) -> Result<PathBuf, ProviderError> {
    let command = format!("udisksctl mount -b {}", node.display());
    debug!(command = %command, "Requesting mount");

    let output = Command::new("udisksctl")
        .arg("mount")
        .arg("--no-user-interaction")
        .arg("-b")
        .arg(node)
        .output()
        .await
        .map_err(|e| ProviderError::Spawn {
            command: command.clone(),
            source: e,
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    match parse_udisksctl_output(&stdout, &stderr) {
        Some(mount_point) => Ok(mount_point),
        None if output.status.success() => Err(ProviderError::Parse {
            what: "udisksctl output",
            detail: stdout.trim().to_string(),
        }),
        None => Err(ProviderError::Command {
            command,
            stderr: stderr.trim().to_string(),
        }),
    }
}

async fn direct_mount(device: &BlockDevice, mount_base: &Path) -> Result<PathBuf, ProviderError> {
    // Both halves usually carry the same label.
    let dir_name = if device.label.is_empty() {
        device.name.clone()
    } else {
        format!("{}-{}", device.label, device.name)
    };
    let target = mount_base.join(dir_name);
    let source = device.path.clone();

    let refused = |reason: String| ProviderError::MountRefused {
        device: source.display().to_string(),
        reason,
    };

    let mount_point = target.clone();
    let node = source.clone();
    tokio::task::spawn_blocking(move || {
        std::fs::create_dir_all(&mount_point).map_err(|e| e.to_string())?;
        mount(
            Some(node.as_path()),
            mount_point.as_path(),
            Some(FALLBACK_FILESYSTEM),
            MsFlags::MS_NOSUID | MsFlags::MS_NODEV,
            None::<&str>,
        )
        .map_err(|e| e.to_string())
    })
    .await?
    .map_err(refused)?;

    Ok(target)
}
