/// User agent string for HTTP requests
pub const USER_AGENT: &str = concat!("hydromet-fetch/", env!("CARGO_PKG_VERSION"));

/// Open-Meteo API base URL
pub const OPEN_METEO_API_BASE: &str = "https://api.open-meteo.com/v1";

/// Daily variables requested from every Open-Meteo endpoint
pub const DAILY_VARIABLES: &str = "precipitation_sum,temperature_2m_max,temperature_2m_min";

/// Default HTTP request timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Longest forecast horizon Open-Meteo serves
pub const MAX_FORECAST_DAYS: u32 = 16;

/// Default forecast horizon
pub const DEFAULT_FORECAST_DAYS: u32 = 10;

/// Shortest accepted historical window, both ends inclusive
pub const MIN_HISTORY_DAYS: i64 = 10;

/// Timezone used for historical downloads unless overridden
pub const DEFAULT_HISTORY_TIMEZONE: &str = "America/Lima";

/// Prefix shared by every polling output file
pub const FORECAST_FILE_PREFIX: &str = "forecast_";

/// Timestamp layout embedded in output file names
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";
