//! Owns both half workflows and the input focus.

use std::path::PathBuf;

use tracing::{debug, error, info};

use super::events::{Action, AppEvent};
use super::hardware::BlockDevice;
use super::workflow::{Effect, HalfWorkflow, KeyboardHalfRole};

/// Everything the coordinator needs at startup, already validated.
#[derive(Debug, Clone)]
pub struct FlashPlan {
    pub central_source: PathBuf,
    pub peripheral_source: PathBuf,
    pub central_mount: Option<PathBuf>,
    pub peripheral_mount: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    Quit,
    Fatal(String),
}

pub struct Coordinator {
    central: HalfWorkflow,
    peripheral: HalfWorkflow,
    focus: KeyboardHalfRole,
    dry_run: bool,
    devices: Vec<BlockDevice>,
    exit: Option<ExitReason>,
}

impl Coordinator {
    pub fn new(plan: FlashPlan) -> Self {
        Self {
            central: HalfWorkflow::new(
                KeyboardHalfRole::Central,
                plan.central_source,
                plan.central_mount,
                plan.dry_run,
            ),
            peripheral: HalfWorkflow::new(
                KeyboardHalfRole::Peripheral,
                plan.peripheral_source,
                plan.peripheral_mount,
                plan.dry_run,
            ),
            focus: KeyboardHalfRole::Central,
            dry_run: plan.dry_run,
            devices: Vec::new(),
            exit: None,
        }
    }

    /// Process one event from the queue and return the effects to launch.
    pub fn handle(&mut self, event: AppEvent) -> Vec<Effect> {
        match event {
            AppEvent::Key(action) => self.on_action(action),
            AppEvent::DiscoveryFailed(message) => {
                error!(error = %message, "Device discovery failed");
                self.exit = Some(ExitReason::Fatal(message));
                Vec::new()
            }
            AppEvent::InputFailed(message) => {
                error!(error = %message, "Terminal input failed");
                self.exit = Some(ExitReason::Fatal(format!("terminal input failed: {}", message)));
                Vec::new()
            }
            event => {
                if let AppEvent::DevicesChanged(devices) = &event {
                    self.devices = devices.clone();
                }
                let mut effects = self.central.on_event(&event);
                effects.extend(self.peripheral.on_event(&event));
                effects
            }
        }
    }

    fn on_action(&mut self, action: Action) -> Vec<Effect> {
        match action {
            Action::Quit => {
                info!("Quit requested");
                self.exit = Some(ExitReason::Quit);
                Vec::new()
            }
            Action::ToggleFocus => {
                if self.can_toggle_focus() {
                    self.focus = self.focus.toggle();
                    debug!(focus = %self.focus, "Focus changed");
                } else {
                    debug!(focus = %self.focus, "Focus locked while an operation is in flight");
                }
                Vec::new()
            }
            Action::Advance => self.focused_mut().advance(),
            Action::SelectNext => {
                self.focused_mut().select_next();
                Vec::new()
            }
            Action::SelectPrevious => {
                self.focused_mut().select_previous();
                Vec::new()
            }
        }
    }

    fn focused_mut(&mut self) -> &mut HalfWorkflow {
        match self.focus {
            KeyboardHalfRole::Central => &mut self.central,
            KeyboardHalfRole::Peripheral => &mut self.peripheral,
        }
    }

    pub fn workflow(&self, role: KeyboardHalfRole) -> &HalfWorkflow {
        match role {
            KeyboardHalfRole::Central => &self.central,
            KeyboardHalfRole::Peripheral => &self.peripheral,
        }
    }

    pub fn focus(&self) -> KeyboardHalfRole {
        self.focus
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    /// Latest discovery snapshot.
    pub fn devices(&self) -> &[BlockDevice] {
        &self.devices
    }

    pub fn exit(&self) -> Option<&ExitReason> {
        self.exit.as_ref()
    }

    pub fn can_toggle_focus(&self) -> bool {
        self.central.is_unselectable_safe() && self.peripheral.is_unselectable_safe()
    }
}
