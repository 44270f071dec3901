//! Common types shared across the link layer.

use std::fmt;
use std::time::Duration;

/// Transport endpoint of the peripheral, e.g. `/dev/ttyACM0` or `COM3`.
///
/// Produced by a [`PortResolver`](crate::resolver::PortResolver) and
/// consumed by the connection manager. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeripheralAddress {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PeripheralAddress {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Outcome of a successful open or reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Endpoint the link was opened on.
    pub address: PeripheralAddress,

    /// Attempts used, including the successful one.
    pub attempts: u32,
}

/// Serial port seen during enumeration.
///
/// Used for diagnostics (`petpal ports`); the resolvers work on the same
/// enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredPort {
    pub name: String,
    pub vid: Option<u16>,
    pub pid: Option<u16>,
    pub product: Option<String>,
}

impl fmt::Display for DiscoveredPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.vid, self.pid) {
            (Some(vid), Some(pid)) => write!(f, "{} [{vid:04x}:{pid:04x}]", self.name)?,
            _ => write!(f, "{}", self.name)?,
        }
        if let Some(product) = &self.product {
            write!(f, " {product}")?;
        }
        Ok(())
    }
}

/// Exponential reconnect delay: attempt `k` waits `base * 2^k`, capped.
///
/// # Examples
///
/// ```
/// use petpal_hardware::Backoff;
/// use std::time::Duration;
///
/// let backoff = Backoff::new(Duration::from_millis(500), Duration::from_secs(3));
/// assert_eq!(backoff.delay(0), Duration::from_millis(500));
/// assert_eq!(backoff.delay(2), Duration::from_secs(2));
/// assert_eq!(backoff.delay(3), Duration::from_secs(3));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    base: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base: Duration, cap: Duration) -> Self {
        Self { base, cap }
    }

    /// Delay before retry number `attempt` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        1u32.checked_shl(attempt)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |delay| delay.min(self.cap))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_address_display() {
        let address = PeripheralAddress::from("/dev/ttyACM0");
        assert_eq!(address.to_string(), "/dev/ttyACM0");
        assert_eq!(address.as_str(), "/dev/ttyACM0");
    }

    #[test]
    fn test_discovered_port_display() {
        let port = DiscoveredPort {
            name: "/dev/ttyACM0".to_string(),
            vid: Some(0x2341),
            pid: Some(0x0043),
            product: Some("Arduino Uno".to_string()),
        };
        assert_eq!(port.to_string(), "/dev/ttyACM0 [2341:0043] Arduino Uno");
    }

    #[test]
    fn test_backoff_sequence() {
        let backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(1000));
        let delays: Vec<u64> = (0..6).map(|k| backoff.delay(k).as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1000, 1000]);
    }

    #[test]
    fn test_backoff_huge_attempt_is_capped() {
        let backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(backoff.delay(31), Duration::from_secs(30));
        assert_eq!(backoff.delay(32), Duration::from_secs(30));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(30));
    }

    proptest! {
        #[test]
        fn prop_backoff_monotonic_and_capped(base_ms in 1u64..5_000, extra_ms in 0u64..60_000, k in 0u32..64) {
            let backoff = Backoff::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(base_ms + extra_ms),
            );
            prop_assert!(backoff.delay(k) <= backoff.delay(k + 1));
            prop_assert!(backoff.delay(k) <= Duration::from_millis(base_ms + extra_ms));
            prop_assert!(backoff.delay(k) >= Duration::from_millis(base_ms));
        }
    }
}
