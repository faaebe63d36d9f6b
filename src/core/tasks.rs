use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use super::events::AppEvent;
use super::flash::flash_bootloader;
use super::hardware::DeviceProvider;
use super::workflow::Effect;

/// Runs workflow effects as background tasks.
///
/// Every task posts exactly one completion event. Tasks are never cancelled;
/// if the loop has already exited the send fails and the result is dropped.
#[derive(Clone)]
pub struct TaskRunner {
    provider: Arc<dyn DeviceProvider>,
    events: mpsc::Sender<AppEvent>,
}

impl TaskRunner {
    pub fn new(provider: Arc<dyn DeviceProvider>, events: mpsc::Sender<AppEvent>) -> Self {
        Self { provider, events }
    }

    pub fn spawn(&self, effect: Effect) {
        let events = self.events.clone();

        match effect {
            Effect::Mount { role, device } => {
                let provider = self.provider.clone();
                debug!(role = %role, device = %device.path.display(), "Spawning mount task");

                tokio::spawn(async move {
                    let result = provider.mount(&device).await.map_err(|e| e.to_string());
                    let _ = events.send(AppEvent::MountCompleted { role, result }).await;
                });
            }
            Effect::Copy(request) => {
                debug!(
                    role = %request.role,
                    destination = %request.destination.display(),
                    dry_run = request.dry_run,
                    "Spawning copy task"
                );

                tokio::spawn(async move {
                    let result = flash_bootloader(&request).await.map_err(|e| e.to_string());
                    let _ = events
                        .send(AppEvent::CopyCompleted {
                            role: request.role,
                            result,
                        })
                        .await;
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::SimulatedProvider;
    use crate::core::flash::{CopyOutcome, CopyRequest};
    use crate::core::workflow::KeyboardHalfRole;

    #[tokio::test]
    async fn test_mount_task_posts_one_event() {
        let temp = tempfile::tempdir().unwrap();
        let (provider, simulator) = SimulatedProvider::new(temp.path().to_path_buf());
        let device = simulator.add_device("NICENANO");
        let (tx, mut rx) = mpsc::channel(4);

        TaskRunner::new(Arc::new(provider), tx).spawn(Effect::Mount {
            role: KeyboardHalfRole::Peripheral,
            device,
        });

        match rx.recv().await.unwrap() {
            AppEvent::MountCompleted { role, result } => {
                assert_eq!(role, KeyboardHalfRole::Peripheral);
                assert!(result.unwrap().mount_points[0].starts_with(temp.path()));
            }
            other => panic!("expected MountCompleted, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_copy_task_reports_error_text() {
        let temp = tempfile::tempdir().unwrap();
        let (provider, _simulator) = SimulatedProvider::new(temp.path().to_path_buf());
        let (tx, mut rx) = mpsc::channel(4);
        let runner = TaskRunner::new(Arc::new(provider), tx);

        runner.spawn(Effect::Copy(CopyRequest {
            role: KeyboardHalfRole::Central,
            source: temp.path().join("missing.uf2"),
            destination: temp.path().join("out.uf2"),
            dry_run: false,
        }));
        runner.spawn(Effect::Copy(CopyRequest {
            role: KeyboardHalfRole::Peripheral,
            source: temp.path().join("missing.uf2"),
            destination: temp.path().join("out.uf2"),
            dry_run: true,
        }));
        drop(runner);

        let mut results = Vec::new();
        while let Some(event) = rx.recv().await {
            if let AppEvent::CopyCompleted { role, result } = event {
                results.push((role, result));
            }
        }
        results.sort_by_key(|(role, _)| *role == KeyboardHalfRole::Peripheral);

        assert!(matches!(&results[0], (KeyboardHalfRole::Central, Err(msg)) if msg.contains("missing.uf2")));
        assert_eq!(results[1], (KeyboardHalfRole::Peripheral, Ok(CopyOutcome::DryRun)));
    }
}
