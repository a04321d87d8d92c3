// repack-core/src/pipeline/mod.rs
pub mod engine;
pub(crate) mod progress;
pub(crate) mod worker;
