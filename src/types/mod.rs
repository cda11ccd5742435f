//! Shared type definitions
//!
//! This module contains all shared data types used across the crate.

pub mod events;
pub mod message;
pub mod model;

pub use events::{ProgressEvent, ProgressKind};
pub use message::{ChatMessage, Role};
pub use model::{ModelDescriptor, ModelFileState, ModelListing, QualityTier, SpeedTier};
