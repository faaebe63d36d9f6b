pub mod coordinator;
pub mod discovery;
pub mod events;
pub mod flash;
pub mod hardware;
pub mod tasks;
pub mod workflow;

pub use coordinator::{Coordinator, ExitReason, FlashPlan};
pub use discovery::DeviceDiscovery;
pub use events::{Action, AppEvent};
pub use flash::{CopyError, CopyOutcome, CopyRequest, flash_bootloader};
pub use hardware::{BlockDevice, DeviceProvider, ProviderError};
pub use tasks::TaskRunner;
pub use workflow::{Effect, HalfWorkflow, HalfWorkflowState, KeyboardHalfRole, Retry};
