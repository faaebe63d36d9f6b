use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::core::discovery::DEFAULT_POLL_INTERVAL;

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "zmk-flasher.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub poll_interval_ms: u64,
    pub simulation: bool,
    pub verbose: bool,
    pub json_logs: bool,
    pub log_file: Option<PathBuf>,
    /// Where volumes are mounted when running as root without udisks.
    pub mount_base: PathBuf,
    pub simulation_mount_base: PathBuf,
    /// Volume labels of the devices present at startup in simulation mode.
    pub simulated_devices: Vec<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            simulation: false,
            verbose: false,
            json_logs: false,
            log_file: None,
            mount_base: PathBuf::from("/run/zmk-flasher"),
            simulation_mount_base: std::env::temp_dir().join("zmk-flasher-sim"),
            simulated_devices: vec!["NICENANO".to_string(), "NICENANO".to_string()],
        }
    }
}

impl AppConfig {
    /// Layer defaults, the TOML file, `ZMK_FLASHER_*` variables and finally
    /// the command line overrides.
    pub fn new<T: Serialize>(cli_overrides: Option<&T>) -> Result<Self, figment::Error> {
        let file = Env::var("ZMK_FLASHER_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE));

        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(file))
            .merge(Env::prefixed("ZMK_FLASHER_").ignore(&["config"]));

        if let Some(overrides) = cli_overrides {
            figment = figment.merge(Serialized::defaults(overrides));
        }

        figment.extract()
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(50))
    }
}
