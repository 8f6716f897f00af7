//! Compiled-in defaults shared by the settings layer and the dispatcher.

use camino::Utf8PathBuf;

/// URI scheme used for every probe locator.
pub const PROBE_SCHEME: &str = "probe";

/// Directory searched for probe executables when no override is present.
pub const DEFAULT_PROBE_DIR: &str = "/usr/libexec/probes";

/// Environment variable overriding [`DEFAULT_PROBE_DIR`].
pub const PROBE_DIR_ENV: &str = "OVAL_PROBE_DIR";

/// Environment variable through which a spawned probe learns which
/// callback commands the evaluator serves.
pub const PROBE_COMMANDS_ENV: &str = "OVAL_PROBE_COMMANDS";

/// Total number of connect/send/receive attempts made for one request.
pub const MAX_RETRY: u32 = 3;

/// Default upper bound on a single blocking receive, in seconds.
pub const DEFAULT_RECEIVE_TIMEOUT_SECS: u64 = 30;

/// Default ceiling for exponential back-off between attempts.
pub const DEFAULT_MAX_BACKOFF_MS: u64 = 1_000;

/// Time a closing probe is given to exit before it is killed.
pub const DEFAULT_CLOSE_GRACE_MS: u64 = 500;

/// Default probe directory as an owned path (used by serde defaults).
#[must_use]
pub fn default_probe_dir() -> Utf8PathBuf {
    Utf8PathBuf::from(DEFAULT_PROBE_DIR)
}

/// Default attempt budget (used by serde defaults).
#[must_use]
pub const fn default_max_attempts() -> u32 {
    MAX_RETRY
}

/// Default receive timeout (used by serde defaults).
#[must_use]
pub const fn default_receive_timeout_secs() -> Option<u64> {
    Some(DEFAULT_RECEIVE_TIMEOUT_SECS)
}

/// Default back-off ceiling (used by serde defaults).
#[must_use]
pub const fn default_max_backoff_ms() -> u64 {
    DEFAULT_MAX_BACKOFF_MS
}

/// Default close grace period (used by serde defaults).
#[must_use]
pub const fn default_close_grace_ms() -> u64 {
    DEFAULT_CLOSE_GRACE_MS
}
