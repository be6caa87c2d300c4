//! Constants for CIVITAS
//!
//! Defaults shared by the cache, sync and client crates. Every value here can
//! be overridden through the matching `CIVITAS_*` environment variable.

// ============================================================================
// REQUEST COORDINATION
// ============================================================================

/// Maximum number of requests executing at the same time
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 6;

/// Per-attempt request timeout in milliseconds (60 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// Number of retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Base delay for exponential backoff in milliseconds
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 2_000;

/// Upper bound for a single backoff delay in milliseconds
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 30_000;

/// Jitter added on top of each backoff delay, as a fraction of that delay
pub const DEFAULT_RETRY_JITTER_RATIO: f64 = 0.5;

// ============================================================================
// CACHE STORE
// ============================================================================

/// Directory holding the LMDB cache environment
pub const DEFAULT_CACHE_PATH: &str = "./data/cache";

/// LMDB map size in megabytes
pub const DEFAULT_CACHE_MAX_SIZE_MB: usize = 256;

/// Capacity of the in-memory fast layer
pub const DEFAULT_HOT_CACHE_CAPACITY: usize = 512;

/// TTL for keys written by the cache builder (25 hours, outlives one daily cycle)
pub const DEFAULT_REBUILD_TTL_SECS: u64 = 90_000;

/// How often expired entries are swept from the durable store (10 minutes)
pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 600;

/// Version tag written into every persisted cache entry
pub const CACHE_FORMAT_VERSION: u16 = 1;

/// Version suffix used when building parameterized cache keys
pub const DEFAULT_KEY_VERSION: &str = "v1";

/// Number of hex characters kept from the parameter hash
pub const KEY_HASH_LEN: usize = 8;

// ============================================================================
// SYNC SCHEDULE
// ============================================================================

/// Daily wall-clock trigger for import + rebuild
pub const DEFAULT_SYNC_TIME: &str = "07:00";

/// Timezone the trigger time is interpreted in
pub const DEFAULT_SYNC_TIMEZONE: &str = "America/Sao_Paulo";

// ============================================================================
// CACHE BUILDER
// ============================================================================

/// Length of the top-N breakdowns in the summary
pub const TOP_N: usize = 10;

/// Number of daily buckets in `by-day`
pub const DAILY_WINDOW_DAYS: u32 = 30;

/// Number of monthly buckets in `by-month`
pub const MONTHLY_WINDOW_MONTHS: u32 = 12;

/// Label used for records with no value in a grouped field
pub const UNSET_GROUP_LABEL: &str = "Não informado";
