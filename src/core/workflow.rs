//! Per-half flashing state machine.
//!
//! A [`HalfWorkflow`] never performs I/O itself. Each operation computes the
//! next state with a pure step function and hands back the [`Effect`]s the
//! caller must launch; their results come back later as [`AppEvent`]s.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::events::AppEvent;
use super::flash::{CopyOutcome, CopyRequest};
use super::hardware::BlockDevice;

/// Name used when the source path has no file name component.
const FALLBACK_FILE_NAME: &str = "firmware.uf2";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyboardHalfRole {
    Central,
    Peripheral,
}

impl KeyboardHalfRole {
    pub fn toggle(self) -> Self {
        match self {
            Self::Central => Self::Peripheral,
            Self::Peripheral => Self::Central,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Central => "central",
            Self::Peripheral => "peripheral",
        }
    }

    /// Label shown in the UI. The central half is the left one.
    pub fn label(self) -> &'static str {
        match self {
            Self::Central => "Central (left)",
            Self::Peripheral => "Peripheral (right)",
        }
    }
}

impl fmt::Display for KeyboardHalfRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the next `advance` out of [`HalfWorkflowState::Failed`] re-attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Retry {
    Mount { device: BlockDevice },
    Copy { mount_point: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HalfWorkflowState {
    AwaitingDevice,
    AwaitingMount { device: BlockDevice },
    ReadyToCopy { mount_point: PathBuf },
    Copying { mount_point: PathBuf },
    Done,
    Failed { reason: String, retry: Retry },
}

impl HalfWorkflowState {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AwaitingDevice => "AwaitingDevice",
            Self::AwaitingMount { .. } => "AwaitingMount",
            Self::ReadyToCopy { .. } => "ReadyToCopy",
            Self::Copying { .. } => "Copying",
            Self::Done => "Done",
            Self::Failed { .. } => "Failed",
        }
    }

    /// Position in the forward progression. `Done` and `Failed` share the
    /// last rank.
    pub fn rank(&self) -> u8 {
        match self {
            Self::AwaitingDevice => 0,
            Self::AwaitingMount { .. } => 1,
            Self::ReadyToCopy { .. } => 2,
            Self::Copying { .. } => 3,
            Self::Done | Self::Failed { .. } => 4,
        }
    }

    /// The mount point the image will be (or was) copied to, when known.
    pub fn mount_point(&self) -> Option<&Path> {
        match self {
            Self::ReadyToCopy { mount_point } | Self::Copying { mount_point } => Some(mount_point),
            Self::Failed {
                retry: Retry::Copy { mount_point },
                ..
            } => Some(mount_point),
            _ => None,
        }
    }
}

/// Side effects requested by a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    Mount {
        role: KeyboardHalfRole,
        device: BlockDevice,
    },
    Copy(CopyRequest),
}

/// Candidate devices offered to the operator and the one under the cursor.
#[derive(Debug, Clone, Default)]
pub struct DeviceSelection {
    candidates: Vec<BlockDevice>,
    cursor: usize,
}

impl DeviceSelection {
    pub fn candidates(&self) -> &[BlockDevice] {
        &self.candidates
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn selected(&self) -> Option<&BlockDevice> {
        self.candidates.get(self.cursor)
    }

    /// Replace the candidates, keeping the cursor on the same device node when
    /// it is still attached.
    fn replace(&mut self, devices: &[BlockDevice]) {
        let previous = self.selected().map(|d| d.path.clone());
        self.candidates = devices.to_vec();
        self.cursor = previous
            .and_then(|path| self.candidates.iter().position(|d| d.path == path))
            .unwrap_or_else(|| self.cursor.min(self.candidates.len().saturating_sub(1)));
    }

    fn next(&mut self) {
        if !self.candidates.is_empty() {
            self.cursor = (self.cursor + 1) % self.candidates.len();
        }
    }

    fn previous(&mut self) {
        if !self.candidates.is_empty() {
            let len = self.candidates.len();
            self.cursor = (self.cursor + len - 1) % len;
        }
    }
}

enum Input<'a> {
    Advance,
    DevicesChanged(&'a [BlockDevice]),
    MountCompleted(&'a Result<BlockDevice, String>),
    CopyCompleted(&'a Result<CopyOutcome, String>),
}

type Transition = (HalfWorkflowState, Vec<Effect>);

/// Flashing workflow for one keyboard half.
#[derive(Debug, Clone)]
pub struct HalfWorkflow {
    role: KeyboardHalfRole,
    source: PathBuf,
    mount_override: Option<PathBuf>,
    dry_run: bool,
    state: HalfWorkflowState,
    selection: DeviceSelection,
}

impl HalfWorkflow {
    pub fn new(
        role: KeyboardHalfRole,
        source: impl Into<PathBuf>,
        mount_override: Option<PathBuf>,
        dry_run: bool,
    ) -> Self {
        Self {
            role,
            source: source.into(),
            mount_override,
            dry_run,
            state: HalfWorkflowState::AwaitingDevice,
            selection: DeviceSelection::default(),
        }
    }

    pub fn role(&self) -> KeyboardHalfRole {
        self.role
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn mount_override(&self) -> Option<&Path> {
        self.mount_override.as_deref()
    }

    pub fn dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn state(&self) -> &HalfWorkflowState {
        &self.state
    }

    pub fn selection(&self) -> &DeviceSelection {
        &self.selection
    }

    /// The discovered device mounted at the mount point override, if any.
    pub fn matched_device(&self) -> Option<&BlockDevice> {
        let mount_point = self.mount_override.as_deref()?;
        self.selection
            .candidates
            .iter()
            .find(|d| d.is_mounted_at(mount_point))
    }

    /// False while an operation that cannot be cancelled is outstanding.
    pub fn is_unselectable_safe(&self) -> bool {
        !matches!(
            self.state,
            HalfWorkflowState::Copying { .. } | HalfWorkflowState::AwaitingMount { .. }
        )
    }

    /// Whether the operator is currently picking a device for this half.
    pub fn accepts_selection(&self) -> bool {
        self.mount_override.is_none() && self.state == HalfWorkflowState::AwaitingDevice
    }

    pub fn select_next(&mut self) {
        if self.accepts_selection() {
            self.selection.next();
        }
    }

    pub fn select_previous(&mut self) {
        if self.accepts_selection() {
            self.selection.previous();
        }
    }

    /// Move the workflow forward on operator confirmation.
    pub fn advance(&mut self) -> Vec<Effect> {
        self.apply(Input::Advance)
    }

    /// Apply a background event. Events for the other half, key presses and
    /// discovery failures are ignored.
    pub fn on_event(&mut self, event: &AppEvent) -> Vec<Effect> {
        match event {
            AppEvent::DevicesChanged(devices) => {
                self.selection.replace(devices);
                self.apply(Input::DevicesChanged(devices))
            }
            AppEvent::MountCompleted { role, result } if *role == self.role => {
                self.apply(Input::MountCompleted(result))
            }
            AppEvent::CopyCompleted { role, result } if *role == self.role => {
                self.apply(Input::CopyCompleted(result))
            }
            _ => Vec::new(),
        }
    }

    fn apply(&mut self, input: Input<'_>) -> Vec<Effect> {
        let Some((next, effects)) = self.step(&input) else {
            if matches!(input, Input::Advance) {
                debug!(role = %self.role, state = self.state.name(), "Advance has no effect");
            }
            return Vec::new();
        };

        if let HalfWorkflowState::Failed { reason, .. } = &next {
            warn!(role = %self.role, from = self.state.name(), reason = %reason, "Half failed");
        } else {
            info!(
                role = %self.role,
                from = self.state.name(),
                to = next.name(),
                "State transition"
            );
        }

        self.state = next;
        effects
    }

    /// Pure transition function. `None` means the input does not apply to the
    /// current state.
    fn step(&self, input: &Input<'_>) -> Option<Transition> {
        use HalfWorkflowState as S;

        match (&self.state, input) {
            (S::AwaitingDevice, Input::Advance) => self.confirm_device(),
            (S::AwaitingMount { device }, Input::DevicesChanged(devices)) => {
                // Desktop environments often auto-mount before udisksctl answers.
                // Bootloaders share volume serials, so match on the node.
                let mounted = devices
                    .iter()
                    .find(|d| d.is_same_node(device) && d.is_mounted())?;
                Some(ready_to_copy(&mounted.mount_points[0]))
            }
            (S::AwaitingMount { device }, Input::MountCompleted(result)) => {
                Some(mount_finished(device, result))
            }
            (S::ReadyToCopy { mount_point }, Input::Advance) => Some(self.start_copy(mount_point)),
            (S::Copying { mount_point }, Input::CopyCompleted(result)) => Some(match result {
                Ok(_) => (S::Done, Vec::new()),
                Err(reason) => (
                    S::Failed {
                        reason: reason.clone(),
                        retry: Retry::Copy {
                            mount_point: mount_point.clone(),
                        },
                    },
                    Vec::new(),
                ),
            }),
            (S::Failed { retry, .. }, Input::Advance) => Some(match retry {
                Retry::Copy { mount_point } => ready_to_copy(mount_point),
                Retry::Mount { device } => self.request_mount(device),
            }),
            _ => None,
        }
    }

    fn confirm_device(&self) -> Option<Transition> {
        if let Some(mount_point) = &self.mount_override {
            return Some(ready_to_copy(mount_point));
        }

        let device = self.selection.selected()?;
        match device.mount_points.first() {
            Some(mount_point) => Some(ready_to_copy(mount_point)),
            None => Some(self.request_mount(device)),
        }
    }

    fn request_mount(&self, device: &BlockDevice) -> Transition {
        (
            HalfWorkflowState::AwaitingMount {
                device: device.clone(),
            },
            vec![Effect::Mount {
                role: self.role,
                device: device.clone(),
            }],
        )
    }

    fn start_copy(&self, mount_point: &Path) -> Transition {
        let file_name = self
            .source
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(FALLBACK_FILE_NAME));

        (
            HalfWorkflowState::Copying {
                mount_point: mount_point.to_path_buf(),
            },
            vec![Effect::Copy(CopyRequest {
                role: self.role,
                source: self.source.clone(),
                destination: mount_point.join(file_name),
                dry_run: self.dry_run,
            })],
        )
    }
}

fn ready_to_copy(mount_point: &Path) -> Transition {
    (
        HalfWorkflowState::ReadyToCopy {
            mount_point: mount_point.to_path_buf(),
        },
        Vec::new(),
    )
}

fn mount_finished(pending: &BlockDevice, result: &Result<BlockDevice, String>) -> Transition {
    let failed = |reason: String| HalfWorkflowState::Failed {
        reason,
        retry: Retry::Mount {
            device: pending.clone(),
        },
    };

    let next = match result {
        Ok(mounted) => match mounted.mount_points.first() {
            Some(mount_point) => HalfWorkflowState::ReadyToCopy {
                mount_point: mount_point.clone(),
            },
            None => failed(format!(
                "{} was mounted but reports no mount point",
                mounted.display_name()
            )),
        },
        Err(reason) => failed(reason.clone()),
    };

    (next, Vec::new())
}
