// repack-common/src/lib.rs
pub mod config;
pub mod error;
pub mod kv;
pub mod model;
pub mod pipeline;

// Re-export key types
pub use config::Config;
pub use error::{RepackError, Result};
pub use kv::{KvStore, MemoryStore};
pub use model::{SourceRef, Task, TaskId, TaskStatus};
