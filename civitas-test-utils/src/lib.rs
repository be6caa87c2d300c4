//! CIVITAS Test Utilities
//!
//! Shared test infrastructure for the CIVITAS workspace:
//! - Scripted transport for the request coordinator
//! - Switchable failing cache store
//! - Aggregate source fixture with a query log
//! - Proptest generators for records and key parameters

pub mod generators;
pub mod source;
pub mod store;
pub mod transport;

pub use generators::{arb_date, arb_params, arb_record, arb_records};
pub use source::{record, sample_records, FixtureSource};
pub use store::FlakyStore;
pub use transport::{ScriptedTransport, Step};

// Re-export core types for convenience
pub use civitas_core::{CivitasError, CivitasResult, ComputeError, StorageError, SyncError};
