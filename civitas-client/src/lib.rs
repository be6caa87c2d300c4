//! CIVITAS Client - Request Coordination
//!
//! Client-side front for dashboard data requests: in-flight deduplication,
//! a FIFO concurrency bound, per-attempt timeouts, retries with exponential
//! backoff and jitter, and a small expiring result cache.

pub mod backoff;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod transport;

pub use backoff::BackoffPolicy;
pub use config::{default_endpoint_timeouts, ClientConfig, EndpointTimeout};
pub use coordinator::{
    CoordinatorMetrics, CoordinatorSnapshot, LoadOptions, LoadResult, QueueStats,
    RequestCoordinator,
};
pub use error::{LoadError, TransportError};
pub use transport::{query_pairs, HttpTransport, Transport};
