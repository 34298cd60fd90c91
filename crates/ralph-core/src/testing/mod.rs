//! Test doubles for the container engine and notification channels.

pub mod mock_runtime;
pub mod recording_notifier;

pub use mock_runtime::{MockContainer, MockRuntime};
pub use recording_notifier::RecordingNotifier;
