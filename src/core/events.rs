use super::flash::CopyOutcome;
use super::hardware::BlockDevice;
use super::workflow::KeyboardHalfRole;

/// Operator intents, decoded from key presses by the TUI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Quit,
    ToggleFocus,
    Advance,
    SelectPrevious,
    SelectNext,
}

/// Everything that can reach the event loop.
///
/// Background tasks post exactly one event each; the loop applies them in
/// arrival order.
#[derive(Debug, Clone)]
pub enum AppEvent {
    Key(Action),
    DevicesChanged(Vec<BlockDevice>),
    MountCompleted {
        role: KeyboardHalfRole,
        result: Result<BlockDevice, String>,
    },
    CopyCompleted {
        role: KeyboardHalfRole,
        result: Result<CopyOutcome, String>,
    },
    DiscoveryFailed(String),
    /// The terminal stopped delivering key events.
    InputFailed(String),
}
