//! Default values for the bridge.
//!
//! These constants back the `Default` implementations in [`crate::config`]
//! and are the values the appliance firmware was built against. Changing
//! the wire constants breaks compatibility with deployed peripherals.
//!
//! # Usage
//!
//! ```
//! use petpal_core::constants::*;
//! use std::time::Duration;
//!
//! assert_eq!(DEFAULT_BAUD_RATE, 9600);
//! let settle = Duration::from_millis(DEFAULT_CONNECT_SETTLE_DELAY_MS);
//! assert_eq!(settle.as_secs(), 2);
//! ```

// ============================================================================
// Wire Format
// ============================================================================

/// Terminator appended to every command token sent to the peripheral.
pub const WIRE_TERMINATOR: u8 = b'\n';

/// Value written to the remote command slot after a request is consumed.
pub const CLEARED_COMMAND: &str = "";

// ============================================================================
// Serial Link
// ============================================================================

/// Bit rate the appliance firmware opens its UART with.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Grace period after opening the port.
///
/// Opening the port toggles DTR, which resets most Arduino-class boards;
/// the bootloader needs roughly two seconds before the sketch reads input.
pub const DEFAULT_CONNECT_SETTLE_DELAY_MS: u64 = 2000;

/// First reconnect delay. Attempt `k` waits `base * 2^k`.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 500;

/// Upper bound for any single reconnect delay.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// Open attempts before the connection manager declares terminal failure.
pub const DEFAULT_MAX_CONNECT_ATTEMPTS: u32 = 5;

/// Consecutive write failures before the link is declared dead.
pub const DEFAULT_WRITE_FAILURE_THRESHOLD: u32 = 3;

/// Blocking write timeout handed to the serial driver.
pub const DEFAULT_WRITE_TIMEOUT_MS: u64 = 1000;

// ============================================================================
// Discovery
// ============================================================================

/// USB vendor id of genuine Arduino boards.
pub const ARDUINO_VID: u16 = 0x2341;

/// USB vendor id of the WCH CH340 USB-serial bridge used on most clones.
pub const CH340_VID: u16 = 0x1a86;

/// USB product id of the CH340.
pub const CH340_PID: u16 = 0x7523;

/// Device node patterns tried when USB enumeration finds nothing.
pub const DEFAULT_GLOB_PATTERNS: &[&str] = &["/dev/ttyACM*", "/dev/ttyUSB*"];

// ============================================================================
// Scheduling
// ============================================================================

/// Seconds between schedule evaluations.
///
/// Shorter than one clock minute on purpose; the trigger ledger absorbs the
/// repeated samples of the same minute.
pub const DEFAULT_POLL_PERIOD_SECS: u64 = 30;

// ============================================================================
// Remote Store
// ============================================================================

/// Root under which the appliance's records live.
pub const DEFAULT_USER_PATH: &str = "users/default";

/// Single-slot command field, relative to the user path.
pub const DEFAULT_COMMAND_PATH: &str = "commands/motor_command";

/// Schedule record, relative to the user path.
pub const DEFAULT_SCHEDULE_PATH: &str = "scheduling";

/// Timeout applied to one-shot REST requests.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Longest silence tolerated on the command stream before it is
/// re-established. The database sends a keep-alive about every 30 seconds.
pub const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 65_000;

/// Environment variable holding the database secret or ID token.
pub const AUTH_TOKEN_ENV: &str = "PETPAL_AUTH_TOKEN";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_defaults_are_ordered() {
        assert!(DEFAULT_BACKOFF_BASE_MS > 0);
        assert!(DEFAULT_BACKOFF_CAP_MS >= DEFAULT_BACKOFF_BASE_MS);
    }

    #[test]
    fn test_poll_period_below_one_minute() {
        assert!(DEFAULT_POLL_PERIOD_SECS < 60);
    }

    #[test]
    fn test_glob_patterns_are_device_nodes() {
        for pattern in DEFAULT_GLOB_PATTERNS {
            assert!(pattern.starts_with("/dev/"));
        }
    }
}
