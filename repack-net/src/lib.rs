// repack-net/src/lib.rs
pub mod http;
pub mod marketplace;
pub mod validation;

// Re-export the public surface used by repack-core and the CLI.
pub use http::{ArchiveFetcher, FetchedArchive, HttpFetcher};
pub use marketplace::breaker::{BreakerSnapshot, CircuitBreaker, CircuitState};
pub use marketplace::{
    HttpMarketplaceApi, HttpPageFetcher, MarketplaceApi, MarketplaceClient, PageFetcher,
    ResolvedDownload,
};
pub use validation::validate_source_url;
