// src/model/mod.rs
// Declares the modules within the model directory.

pub mod marketplace;
pub mod task;

// Re-export
pub use marketplace::{
    MarketplaceMetadata, PluginCategory, PluginDetail, PluginSummary, PluginVersion, Resilient,
};
pub use task::{SourceRef, Task, TaskId, TaskOutput, TaskPatch, TaskStatus};
