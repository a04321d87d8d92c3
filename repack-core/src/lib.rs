// repack-core/src/lib.rs
pub mod hub;
pub mod pipeline;
pub mod registry;
pub mod repackager;

pub use hub::{Frame, NotificationHub, Subscription};
pub use pipeline::engine::{EngineSummary, PipelineEngine};
pub use registry::TaskRegistry;
pub use repackager::{CommandPackageTool, PackageTool, ToolProgress};
