//! Dispatcher configuration.
//!
//! [`ProbeSettings`] is plain serde data so a host can embed it in whatever
//! configuration file it already loads. The probe directory is the one value
//! with an environment override: [`PROBE_DIR_ENV`] is read every time a new
//! connection entry needs a locator, never for entries that already exist.

use std::env;
use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::defaults::{
    PROBE_DIR_ENV, PROBE_SCHEME, default_close_grace_ms, default_max_attempts,
    default_max_backoff_ms, default_probe_dir, default_receive_timeout_secs,
};

const SETTINGS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::settings");

/// Tunables for probe dispatch and the process transport.
///
/// # Example
///
/// ```
/// use oval_probes::ProbeSettings;
///
/// let settings: ProbeSettings = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
/// assert_eq!(settings.max_attempts(), 5);
/// assert_eq!(settings.probe_dir().as_str(), "/usr/libexec/probes");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    #[serde(default = "default_probe_dir")]
    probe_dir: Utf8PathBuf,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    max_backoff_ms: u64,
    #[serde(default = "default_receive_timeout_secs")]
    receive_timeout_secs: Option<u64>,
    #[serde(default = "default_close_grace_ms")]
    close_grace_ms: u64,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            probe_dir: default_probe_dir(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: 0,
            max_backoff_ms: default_max_backoff_ms(),
            receive_timeout_secs: default_receive_timeout_secs(),
            close_grace_ms: default_close_grace_ms(),
        }
    }
}

impl ProbeSettings {
    /// Replaces the configured probe directory.
    #[must_use]
    pub fn with_probe_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.probe_dir = dir.into();
        self
    }

    /// Replaces the attempt budget. A budget of zero is treated as one.
    #[must_use]
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Enables exponential back-off starting at `initial_ms`, capped at
    /// `max_ms`.
    #[must_use]
    pub const fn with_backoff(mut self, initial_ms: u64, max_ms: u64) -> Self {
        self.initial_backoff_ms = initial_ms;
        self.max_backoff_ms = max_ms;
        self
    }

    /// Replaces the receive timeout; `None` blocks indefinitely.
    #[must_use]
    pub const fn with_receive_timeout_secs(mut self, secs: Option<u64>) -> Self {
        self.receive_timeout_secs = secs;
        self
    }

    /// Replaces the close grace period.
    #[must_use]
    pub const fn with_close_grace_ms(mut self, grace_ms: u64) -> Self {
        self.close_grace_ms = grace_ms;
        self
    }

    /// Configured probe directory, ignoring the environment.
    #[must_use]
    pub fn probe_dir(&self) -> &Utf8Path {
        self.probe_dir.as_path()
    }

    /// Total attempts allowed for one request.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound on one blocking receive, if any.
    #[must_use]
    pub fn receive_timeout(&self) -> Option<Duration> {
        self.receive_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Time a closing probe is given before it is killed.
    #[must_use]
    pub const fn close_grace(&self) -> Duration {
        Duration::from_millis(self.close_grace_ms)
    }

    /// Delay to wait after the given failed attempt (1-based).
    #[must_use]
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        if self.initial_backoff_ms == 0 {
            return Duration::ZERO;
        }
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self
            .initial_backoff_ms
            .saturating_mul(1_u64 << shift)
            .min(self.max_backoff_ms);
        Duration::from_millis(delay)
    }

    /// Probe directory after applying the [`PROBE_DIR_ENV`] override.
    #[must_use]
    pub fn resolve_probe_dir(&self) -> Utf8PathBuf {
        self.probe_dir_with_override(env::var_os(PROBE_DIR_ENV))
    }

    /// Probe directory after applying an explicit override value.
    ///
    /// Empty and non-UTF-8 overrides are ignored.
    #[must_use]
    pub fn probe_dir_with_override(&self, value: Option<OsString>) -> Utf8PathBuf {
        match value.filter(|raw| !raw.is_empty()).map(OsString::into_string) {
            Some(Ok(dir)) => Utf8PathBuf::from(dir),
            Some(Err(raw)) => {
                warn!(
                    target: SETTINGS_TARGET,
                    variable = PROBE_DIR_ENV,
                    value = ?raw,
                    "ignoring non UTF-8 probe directory override"
                );
                self.probe_dir.clone()
            }
            None => self.probe_dir.clone(),
        }
    }

    /// Builds the locator for a worker, consulting the environment once.
    #[must_use]
    pub fn locator_for(&self, worker_name: &str) -> String {
        build_locator(&self.resolve_probe_dir(), worker_name)
    }
}

/// Formats `<scheme>://<probe-directory>/<worker>`.
///
/// # Example
///
/// ```
/// use camino::Utf8Path;
/// use oval_probes::settings::build_locator;
///
/// let locator = build_locator(Utf8Path::new("/usr/libexec/probes"), "probe_file");
/// assert_eq!(locator, "probe:///usr/libexec/probes/probe_file");
/// ```
#[must_use]
pub fn build_locator(probe_dir: &Utf8Path, worker_name: &str) -> String {
    let dir = probe_dir.as_str().trim_end_matches('/');
    format!("{PROBE_SCHEME}://{dir}/{worker_name}")
}
