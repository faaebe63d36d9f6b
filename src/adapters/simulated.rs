use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::core::hardware::{BlockDevice, DeviceProvider, ProviderError};

#[derive(Debug, Default)]
struct SimulatedState {
    devices: Vec<BlockDevice>,
    next_index: usize,
    fail_next_enumeration: Option<String>,
    refuse_mounts: Option<String>,
}

fn lock(state: &Mutex<SimulatedState>) -> MutexGuard<'_, SimulatedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle used to plug, unplug and break simulated devices.
#[derive(Clone)]
pub struct Simulator {
    state: Arc<Mutex<SimulatedState>>,
}

impl Simulator {
    /// Attach an unmounted bootloader volume.
    pub fn add_device(&self, label: &str) -> BlockDevice {
        self.insert(label, Vec::new())
    }

    /// Attach a volume that is already mounted at `mount_point`.
    pub fn add_mounted_device(&self, label: &str, mount_point: &Path) -> BlockDevice {
        self.insert(label, vec![mount_point.to_path_buf()])
    }

    pub fn remove_device(&self, uuid: &str) {
        lock(&self.state).devices.retain(|d| d.uuid != uuid);
    }

    pub fn fail_next_enumeration(&self, message: &str) {
        lock(&self.state).fail_next_enumeration = Some(message.to_string());
    }

    /// Make every mount request fail with `reason` until cleared with `None`.
    pub fn refuse_mounts(&self, reason: Option<&str>) {
        lock(&self.state).refuse_mounts = reason.map(str::to_string);
    }

    fn insert(&self, label: &str, mount_points: Vec<PathBuf>) -> BlockDevice {
        let mut state = lock(&self.state);
        let name = format!("sim{}", state.next_index);
        state.next_index += 1;

        let device = BlockDevice {
            uuid: Uuid::now_v7().to_string(),
            path: PathBuf::from(format!("/dev/{}", name)),
            name,
            label: label.to_string(),
            mount_points,
        };
        state.devices.push(device.clone());
        device
    }
}

/// In-memory device provider for `--simulation` and tests.
///
/// Mounting creates a real directory under `mount_base` so copies made in
/// simulation land somewhere inspectable.
pub struct SimulatedProvider {
    state: Arc<Mutex<SimulatedState>>,
    mount_base: PathBuf,
}

impl SimulatedProvider {
    pub fn new(mount_base: PathBuf) -> (Self, Simulator) {
        let state = Arc::new(Mutex::new(SimulatedState::default()));

        (
            Self {
                state: state.clone(),
                mount_base,
            },
            Simulator { state },
        )
    }
}

#[async_trait]
impl DeviceProvider for SimulatedProvider {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn enumerate(&self) -> Result<Vec<BlockDevice>, ProviderError> {
        let mut state = lock(&self.state);
        if let Some(message) = state.fail_next_enumeration.take() {
            return Err(ProviderError::Enumerate(std::io::Error::other(message)));
        }
        Ok(state.devices.clone())
    }

    async fn mount(&self, device: &BlockDevice) -> Result<BlockDevice, ProviderError> {
        let refusal = lock(&self.state).refuse_mounts.clone();
        if let Some(reason) = refusal {
            return Err(ProviderError::MountRefused {
                device: device.path.display().to_string(),
                reason,
            });
        }

        let dir_name = if device.label.is_empty() {
            device.uuid.clone()
        } else {
            format!("{}-{}", device.label, device.name)
        };
        let mount_point = self.mount_base.join(dir_name);

        tokio::fs::create_dir_all(&mount_point)
            .await
            .map_err(|e| ProviderError::MountRefused {
                device: device.path.display().to_string(),
                reason: e.to_string(),
            })?;

        debug!(device = %device.path.display(), mount_point = %mount_point.display(), "(Simulator) Mounted");

        let mut state = lock(&self.state);
        let mounted = match state.devices.iter_mut().find(|d| d.is_same_node(device)) {
            Some(known) => {
                if !known.is_mounted_at(&mount_point) {
                    known.mount_points.push(mount_point);
                }
                known.clone()
            }
            None => {
                return Err(ProviderError::MountRefused {
                    device: device.path.display().to_string(),
                    reason: "device is no longer attached".to_string(),
                });
            }
        };

        Ok(mounted)
    }
}
