//! Bridge configuration.
//!
//! The configuration is read from a TOML file whose tables mirror the
//! structs below. Every field has a default, so an empty file (or no file
//! at all) yields a usable configuration apart from the remote database URL.
//!
//! ```toml
//! [link]
//! baud_rate = 9600
//! connect_settle_delay_ms = 2000
//! max_connect_attempts = 5
//!
//! [discovery]
//! glob_patterns = ["/dev/ttyACM*"]
//!
//! [schedule]
//! poll_period_secs = 30
//!
//! [remote]
//! database_url = "https://example-default-rtdb.firebaseio.com"
//! ```

use crate::constants::*;
use crate::error::{Error, Result};
use crate::types::ScheduleRecord;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeConfig {
    pub link: LinkConfig,
    pub discovery: DiscoveryConfig,
    pub schedule: ScheduleConfig,
    pub remote: RemoteConfig,
    pub dry_run: DryRunConfig,
}

impl BridgeConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    /// Returns `Error::ConfigParse` for malformed TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Read and parse a configuration file.
    ///
    /// # Errors
    /// Returns `Error::Io` if the file cannot be read and
    /// `Error::ConfigParse` if it is not a valid configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Check that the values describe a runnable bridge.
    ///
    /// `require_remote` is false for dry runs, which never contact the
    /// remote store.
    ///
    /// # Errors
    /// Returns the first offending key.
    pub fn validate(&self, require_remote: bool) -> Result<()> {
        self.link.validate()?;

        if self.schedule.poll_period_secs == 0 {
            return Err(Error::InvalidConfig {
                key: "schedule.poll_period_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.discovery.port.is_none()
            && self.discovery.usb_ids.is_empty()
            && self.discovery.glob_patterns.is_empty()
        {
            return Err(Error::Config(
                "discovery needs a port, a usb id or a glob pattern".to_string(),
            ));
        }

        if require_remote {
            match self.remote.database_url.as_deref() {
                None => return Err(Error::MissingConfig("remote.database_url")),
                Some(url) if !(url.starts_with("https://") || url.starts_with("http://")) => {
                    return Err(Error::InvalidConfig {
                        key: "remote.database_url",
                        reason: format!("expected an http(s) URL, got {url:?}"),
                    });
                }
                Some(_) => {}
            }
            if self.remote.stream_idle_timeout_ms == 0 {
                return Err(Error::InvalidConfig {
                    key: "remote.stream_idle_timeout_ms",
                    reason: "must be greater than zero".to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Serial link parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LinkConfig {
    /// Bit rate of the link.
    pub baud_rate: u32,

    /// Wait after opening before the link is declared healthy.
    pub connect_settle_delay_ms: u64,

    /// First reconnect delay.
    pub backoff_base_ms: u64,

    /// Largest reconnect delay.
    pub backoff_cap_ms: u64,

    /// Open attempts before terminal failure.
    pub max_connect_attempts: u32,

    /// Consecutive write failures before the link is declared dead.
    pub write_failure_threshold: u32,

    /// Driver-level write timeout.
    pub write_timeout_ms: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUD_RATE,
            connect_settle_delay_ms: DEFAULT_CONNECT_SETTLE_DELAY_MS,
            backoff_base_ms: DEFAULT_BACKOFF_BASE_MS,
            backoff_cap_ms: DEFAULT_BACKOFF_CAP_MS,
            max_connect_attempts: DEFAULT_MAX_CONNECT_ATTEMPTS,
            write_failure_threshold: DEFAULT_WRITE_FAILURE_THRESHOLD,
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
        }
    }
}

impl LinkConfig {
    #[must_use]
    pub fn connect_settle_delay(&self) -> Duration {
        Duration::from_millis(self.connect_settle_delay_ms)
    }

    #[must_use]
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    #[must_use]
    pub fn backoff_cap(&self) -> Duration {
        Duration::from_millis(self.backoff_cap_ms)
    }

    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    /// # Errors
    /// Returns `Error::InvalidConfig` naming the first bad field.
    pub fn validate(&self) -> Result<()> {
        let positive = |key: &'static str, value: u64| {
            if value == 0 {
                Err(Error::InvalidConfig {
                    key,
                    reason: "must be greater than zero".to_string(),
                })
            } else {
                Ok(())
            }
        };

        positive("link.baud_rate", u64::from(self.baud_rate))?;
        positive("link.max_connect_attempts", u64::from(self.max_connect_attempts))?;
        positive(
            "link.write_failure_threshold",
            u64::from(self.write_failure_threshold),
        )?;
        positive("link.write_timeout_ms", self.write_timeout_ms)?;

        if self.backoff_cap_ms < self.backoff_base_ms {
            return Err(Error::InvalidConfig {
                key: "link.backoff_cap_ms",
                reason: format!(
                    "cap {}ms is below base {}ms",
                    self.backoff_cap_ms, self.backoff_base_ms
                ),
            });
        }

        Ok(())
    }
}

/// USB vendor/product signature of an acceptable peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UsbId {
    pub vid: u16,

    /// `None` accepts any product from the vendor.
    #[serde(default)]
    pub pid: Option<u16>,
}

impl UsbId {
    #[must_use]
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid.is_none_or(|expected| expected == pid)
    }
}

/// How the peripheral's port is found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DiscoveryConfig {
    /// Explicit port; disables enumeration when set.
    pub port: Option<String>,

    /// USB signatures tried first.
    pub usb_ids: Vec<UsbId>,

    /// Filesystem patterns tried when no USB signature matches.
    pub glob_patterns: Vec<String>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            port: None,
            usb_ids: vec![
                UsbId {
                    vid: ARDUINO_VID,
                    pid: None,
                },
                UsbId {
                    vid: CH340_VID,
                    pid: Some(CH340_PID),
                },
            ],
            glob_patterns: DEFAULT_GLOB_PATTERNS.iter().map(|p| (*p).to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleConfig {
    /// Seconds between schedule evaluations.
    pub poll_period_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            poll_period_secs: DEFAULT_POLL_PERIOD_SECS,
        }
    }
}

impl ScheduleConfig {
    #[must_use]
    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }
}

/// Remote store location and credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteConfig {
    pub database_url: Option<String>,
    pub user_path: String,
    pub command_path: String,
    pub schedule_path: String,

    /// Database secret or ID token. Usually supplied through the
    /// environment rather than the file.
    #[serde(skip_serializing)]
    pub auth_token: Option<String>,

    pub request_timeout_ms: u64,

    /// Reconnect the command stream after this long without any bytes.
    pub stream_idle_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            user_path: DEFAULT_USER_PATH.to_string(),
            command_path: DEFAULT_COMMAND_PATH.to_string(),
            schedule_path: DEFAULT_SCHEDULE_PATH.to_string(),
            auth_token: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            stream_idle_timeout_ms: DEFAULT_STREAM_IDLE_TIMEOUT_MS,
        }
    }
}

impl RemoteConfig {
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    #[must_use]
    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms)
    }
}

// Keeps the token out of logs.
impl std::fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("database_url", &self.database_url)
            .field("user_path", &self.user_path)
            .field("command_path", &self.command_path)
            .field("schedule_path", &self.schedule_path)
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("request_timeout_ms", &self.request_timeout_ms)
            .field("stream_idle_timeout_ms", &self.stream_idle_timeout_ms)
            .finish()
    }
}

/// Settings used only with `--dry-run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DryRunConfig {
    /// Schedule served by the in-memory store.
    pub schedule: ScheduleRecord,
}
