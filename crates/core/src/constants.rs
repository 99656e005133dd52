//! Constants used throughout the clinic core crate.

/// Logical table name holding appointment rows.
pub const APPOINTMENTS_TABLE: &str = "appointments";

/// Path prefix of the PostgREST API exposed by the row store.
pub const REST_API_PREFIX: &str = "rest/v1";

/// Default bound on a conversation connect attempt, in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Format of the `date` column.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Format of the `time` column (24-hour clock).
pub const TIME_FORMAT: &str = "%H:%M";
