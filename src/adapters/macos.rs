//! macOS device provider backed by `diskutil`.

use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::core::hardware::{BlockDevice, DeviceProvider, ProviderError};

/// `diskutil info -all` separates disks with a line of asterisks.
const RECORD_SEPARATOR: &str = "**********";

pub struct MacosProvider;

#[async_trait]
impl DeviceProvider for MacosProvider {
    fn name(&self) -> &'static str {
        "macos"
    }

    async fn enumerate(&self) -> Result<Vec<BlockDevice>, ProviderError> {
        let stdout = diskutil(&["info", "-all"]).await?;
        let devices = parse_diskutil_info(&stdout);
        debug!(count = devices.len(), "Scanned disks");
        Ok(devices)
    }

    async fn mount(&self, device: &BlockDevice) -> Result<BlockDevice, ProviderError> {
        if device.is_mounted() {
            return Ok(device.clone());
        }

        let node = device.path.to_string_lossy().into_owned();
        diskutil(&["mount", &node])
            .await
            .map_err(|e| match e {
                ProviderError::Command { stderr, .. } => ProviderError::MountRefused {
                    device: node.clone(),
                    reason: stderr,
                },
                other => other,
            })?;

        let info = diskutil(&["info", &node]).await?;
        let mounted = parse_diskutil_info(&info)
            .into_iter()
            .find(|d| d.is_mounted())
            .ok_or_else(|| ProviderError::Parse {
                what: "diskutil info",
                detail: format!("no mount point reported for {}", node),
            })?;

        info!(device = %node, mount_point = %mounted.mount_points[0].display(), "Mounted bootloader volume");
        Ok(mounted)
    }
}

async fn diskutil(args: &[&str]) -> Result<String, ProviderError> {
    let command = format!("diskutil {}", args.join(" "));
    let output = Command::new("diskutil")
        .args(args)
        .output()
        .await
        .map_err(|e| ProviderError::Spawn {
            command: command.clone(),
            source: e,
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let stdout = String::from_utf8_lossy(&output.stdout);
        // diskutil prints some failures on stdout.
        let message = if stderr.trim().is_empty() { stdout } else { stderr };
        return Err(ProviderError::Command {
            command,
            stderr: message.trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `diskutil info` output (one or many records) into volumes.
///
/// Records without a filesystem or without any UUID are skipped.
pub fn parse_diskutil_info(output: &str) -> Vec<BlockDevice> {
    output
        .split(RECORD_SEPARATOR)
        .filter_map(parse_record)
        .collect()
}

fn parse_record(record: &str) -> Option<BlockDevice> {
    let field = |key: &str| -> Option<String> {
        record.lines().find_map(|line| {
            let (name, value) = line.split_once(':')?;
            (name.trim() == key)
                .then(|| value.trim().to_string())
                .filter(|v| !v.is_empty())
        })
    };

    field("File System Personality")?;
    let uuid = field("Volume UUID").or_else(|| field("Disk / Partition UUID"))?;
    let name = field("Device Identifier")?;
    let path = field("Device Node").unwrap_or_else(|| format!("/dev/{}", name));

    let mount_points = field("Mount Point")
        .filter(|m| m.starts_with('/'))
        .map(|m| vec![PathBuf::from(m)])
        .unwrap_or_default();

    Some(BlockDevice {
        uuid,
        label: field("Volume Name")
            .filter(|v| !v.starts_with("Not applicable"))
            .unwrap_or_default(),
        path: PathBuf::from(path),
        name,
        mount_points,
    })
}
