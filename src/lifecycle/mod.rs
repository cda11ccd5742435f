//! Model lifecycle
//!
//! Loading, unloading and progress reporting for the on-device model.

pub mod manager;
pub mod progress;
pub mod runtime;
pub mod state;

pub use manager::{LifecycleManager, LoadTask};
pub use progress::{ListenerError, ProgressBus, Subscription};
pub use state::{LifecyclePhase, LifecycleSnapshot, LifecycleState};
