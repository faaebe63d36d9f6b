//! Polling device discovery.
//!
//! The poller calls [`DeviceProvider::enumerate`] on a fixed interval and only
//! posts an event when the set of devices or their mount points changed.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::events::AppEvent;
use super::hardware::{BlockDevice, DeviceProvider};
use crate::logging::LogThrottle;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

/// How often an unchanged poll is mentioned in debug logs.
const UNCHANGED_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Device node, volume UUID and mount points of every device, order ignored.
type Fingerprint = BTreeSet<(PathBuf, String, Vec<PathBuf>)>;

/// Remembers the last snapshot and decides whether a new one is a change.
#[derive(Debug, Default)]
pub struct DeviceDiscovery {
    previous: Option<Fingerprint>,
}

impl DeviceDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `snapshot` and return it if it differs from the previous one.
    ///
    /// Devices are compared by node, UUID and mount points only. The very first
    /// snapshot is always reported, even when empty.
    pub fn observe(&mut self, snapshot: Vec<BlockDevice>) -> Option<Vec<BlockDevice>> {
        let fingerprint: Fingerprint = snapshot
            .iter()
            .map(|d| (d.path.clone(), d.uuid.clone(), d.mount_points.clone()))
            .collect();

        if self.previous.as_ref() == Some(&fingerprint) {
            return None;
        }

        self.previous = Some(fingerprint);
        Some(snapshot)
    }

    /// Start polling `provider` every `period`.
    ///
    /// The first poll happens immediately. The task ends when `cancel` fires,
    /// when the event loop hangs up, or after posting a
    /// [`AppEvent::DiscoveryFailed`].
    pub fn spawn(
        mut self,
        provider: Arc<dyn DeviceProvider>,
        period: Duration,
        events: mpsc::Sender<AppEvent>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let throttle = LogThrottle::new(UNCHANGED_LOG_INTERVAL);

            info!(provider = provider.name(), period_ms = period.as_millis() as u64, "Device discovery started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let event = match provider.enumerate().await {
                    Ok(snapshot) => match self.observe(snapshot) {
                        Some(changed) => {
                            info!(devices = changed.len(), "Block devices changed");
                            AppEvent::DevicesChanged(changed)
                        }
                        None => {
                            if throttle.should_log() {
                                debug!("Block devices unchanged");
                            }
                            continue;
                        }
                    },
                    Err(e) => {
                        error!(error = %e, "Device enumeration failed");
                        let _ = events.send(AppEvent::DiscoveryFailed(e.to_string())).await;
                        break;
                    }
                };

                if events.send(event).await.is_err() {
                    break;
                }
            }

            debug!("Device discovery stopped");
        })
    }
}
