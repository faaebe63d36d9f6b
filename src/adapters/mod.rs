use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;
use crate::core::hardware::{DeviceProvider, ProviderError};

#[cfg(target_os = "linux")]
mod linux;
#[cfg(any(target_os = "macos", test))]
mod macos;
mod simulated;

#[cfg(target_os = "linux")]
pub use linux::{LinuxProvider, LinuxProviderConfig};
#[cfg(target_os = "macos")]
pub use macos::MacosProvider;
pub use simulated::{SimulatedProvider, Simulator};

/// Pick the device provider for this host, or the simulated one.
pub fn get_provider(config: &AppConfig) -> Result<Arc<dyn DeviceProvider>, ProviderError> {
    if config.simulation {
        let (provider, simulator) = SimulatedProvider::new(config.simulation_mount_base.clone());
        for label in &config.simulated_devices {
            simulator.add_device(label);
        }
        info!(
            devices = config.simulated_devices.len(),
            mount_base = %config.simulation_mount_base.display(),
            "Using simulated devices"
        );
        return Ok(Arc::new(provider));
    }

    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(LinuxProvider::new(LinuxProviderConfig {
            mount_base: config.mount_base.clone(),
        })))
    }

    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(MacosProvider))
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos")))]
    {
        Err(ProviderError::Unsupported)
    }
}
