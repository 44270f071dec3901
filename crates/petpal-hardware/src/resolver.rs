//! Peripheral port discovery.
//!
//! A [`PortResolver`] answers one question: which endpoint should the link
//! be opened on right now. It is queried again on every connection attempt,
//! so a board that re-enumerates under a new name after a reset is found.
//!
//! Three strategies are provided and can be chained with
//! [`AnyPortResolver::Chain`]:
//!
//! - [`FixedPortResolver`]: a configured path, no enumeration
//! - [`UsbPortResolver`]: USB serial ports matching a vendor/product signature
//! - [`GlobPortResolver`]: device nodes matching filesystem patterns
//!
//! ```no_run
//! use petpal_core::DiscoveryConfig;
//! use petpal_hardware::resolver::{AnyPortResolver, PortResolver};
//!
//! let resolver = AnyPortResolver::from_config(&DiscoveryConfig::default());
//! match resolver.resolve() {
//!     Ok(address) => println!("peripheral at {address}"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

use petpal_core::{DiscoveryConfig, UsbId};
use serialport::SerialPortType;
use tracing::{debug, trace, warn};

use crate::error::{LinkError, Result};
#[cfg(any(test, feature = "mock"))]
use crate::mock::MockResolver;
use crate::types::{DiscoveredPort, PeripheralAddress};

/// Finds the transport endpoint of the peripheral.
///
/// Implementations have no side effects beyond the query. An empty
/// candidate set is reported as [`LinkError::Discovery`]; the caller decides
/// whether that is fatal.
pub trait PortResolver: Send + Sync {
    /// Return the first matching endpoint.
    fn resolve(&self) -> Result<PeripheralAddress>;

    /// Human-readable summary of what is searched, for logs and errors.
    fn describe(&self) -> String;
}

/// Always returns the configured address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPortResolver {
    address: PeripheralAddress,
}

impl FixedPortResolver {
    pub fn new(address: impl Into<PeripheralAddress>) -> Self {
        Self {
            address: address.into(),
        }
    }
}

impl PortResolver for FixedPortResolver {
    fn resolve(&self) -> Result<PeripheralAddress> {
        Ok(self.address.clone())
    }

    fn describe(&self) -> String {
        format!("fixed {}", self.address)
    }
}

/// Minimal view of an enumerated USB serial port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbCandidate {
    pub port_name: String,
    pub vid: u16,
    pub pid: u16,
}

/// Matches USB serial ports by vendor/product id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsbPortResolver {
    ids: Vec<UsbId>,
}

impl UsbPortResolver {
    pub fn new(ids: Vec<UsbId>) -> Self {
        Self { ids }
    }

    /// Pick the first candidate, by port name, matching any signature.
    ///
    /// Sorting makes the choice stable when several boards are attached.
    pub fn select(&self, candidates: impl IntoIterator<Item = UsbCandidate>) -> Option<UsbCandidate> {
        let mut matching: Vec<UsbCandidate> = candidates
            .into_iter()
            .filter(|c| self.ids.iter().any(|id| id.matches(c.vid, c.pid)))
            .collect();
        matching.sort_by(|a, b| a.port_name.cmp(&b.port_name));
        matching.into_iter().next()
    }
}

impl PortResolver for UsbPortResolver {
    fn resolve(&self) -> Result<PeripheralAddress> {
        let ports = serialport::available_ports().map_err(|e| {
            warn!("Serial port enumeration failed: {}", e);
            LinkError::discovery(format!("{} (enumeration failed: {e})", self.describe()))
        })?;

        let candidates = ports.into_iter().filter_map(|port| match port.port_type {
            SerialPortType::UsbPort(info) => Some(UsbCandidate {
                port_name: port.port_name,
                vid: info.vid,
                pid: info.pid,
            }),
            _ => None,
        });

        match self.select(candidates) {
            Some(candidate) => {
                debug!(
                    port = %candidate.port_name,
                    vid = candidate.vid,
                    pid = candidate.pid,
                    "USB peripheral found"
                );
                Ok(PeripheralAddress::new(candidate.port_name))
            }
            None => Err(LinkError::discovery(self.describe())),
        }
    }

    fn describe(&self) -> String {
        let ids: Vec<String> = self
            .ids
            .iter()
            .map(|id| match id.pid {
                Some(pid) => format!("{:04x}:{pid:04x}", id.vid),
                None => format!("{:04x}:*", id.vid),
            })
            .collect();
        format!("usb [{}]", ids.join(", "))
    }
}

/// Matches device nodes against filesystem patterns, in pattern order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPortResolver {
    patterns: Vec<String>,
}

impl GlobPortResolver {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }
}

impl PortResolver for GlobPortResolver {
    fn resolve(&self) -> Result<PeripheralAddress> {
        for pattern in &self.patterns {
            let paths = glob::glob(pattern).map_err(|e| LinkError::InvalidPattern {
                pattern: pattern.clone(),
                message: e.to_string(),
            })?;

            // glob yields paths in alphabetical order
            let first = paths
                .filter_map(|entry| match entry {
                    Ok(path) => Some(path),
                    Err(e) => {
                        trace!("Skipping unreadable glob entry: {}", e);
                        None
                    }
                })
                .next();

            if let Some(path) = first {
                debug!(pattern = %pattern, path = %path.display(), "Device node found");
                return Ok(PeripheralAddress::new(path.to_string_lossy().into_owned()));
            }
        }

        Err(LinkError::discovery(self.describe()))
    }

    fn describe(&self) -> String {
        format!("glob [{}]", self.patterns.join(", "))
    }
}

/// Enum wrapper for resolver dispatch.
///
/// Mirrors the configuration: an explicit port wins, otherwise USB
/// signatures are tried before glob patterns.
#[derive(Debug)]
#[non_exhaustive]
pub enum AnyPortResolver {
    Fixed(FixedPortResolver),
    Usb(UsbPortResolver),
    Glob(GlobPortResolver),
    /// Try each resolver in order; the first address wins.
    Chain(Vec<AnyPortResolver>),
    /// Scripted resolver for development and testing.
    #[cfg(any(test, feature = "mock"))]
    Mock(MockResolver),
}

impl AnyPortResolver {
    /// Build the resolver described by the discovery configuration.
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        if let Some(port) = &config.port {
            return Self::Fixed(FixedPortResolver::new(port.as_str()));
        }

        let mut chain = Vec::new();
        if !config.usb_ids.is_empty() {
            chain.push(Self::Usb(UsbPortResolver::new(config.usb_ids.clone())));
        }
        if !config.glob_patterns.is_empty() {
            chain.push(Self::Glob(GlobPortResolver::new(config.glob_patterns.clone())));
        }
        Self::Chain(chain)
    }
}

impl PortResolver for AnyPortResolver {
    fn resolve(&self) -> Result<PeripheralAddress> {
        match self {
            Self::Fixed(resolver) => resolver.resolve(),
            Self::Usb(resolver) => resolver.resolve(),
            Self::Glob(resolver) => resolver.resolve(),
            #[cfg(any(test, feature = "mock"))]
            Self::Mock(resolver) => resolver.resolve(),
            Self::Chain(resolvers) => {
                for resolver in resolvers {
                    match resolver.resolve() {
                        Ok(address) => return Ok(address),
                        Err(LinkError::Discovery { .. }) => continue,
                        Err(e) => warn!("Resolver {} failed: {}", resolver.describe(), e),
                    }
                }
                Err(LinkError::discovery(self.describe()))
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Fixed(resolver) => resolver.describe(),
            Self::Usb(resolver) => resolver.describe(),
            Self::Glob(resolver) => resolver.describe(),
            #[cfg(any(test, feature = "mock"))]
            Self::Mock(resolver) => resolver.describe(),
            Self::Chain(resolvers) => resolvers
                .iter()
                .map(PortResolver::describe)
                .collect::<Vec<_>>()
                .join(", then "),
        }
    }
}

/// Enumerate every serial port the OS reports.
///
/// # Errors
/// Returns `LinkError::Discovery` when enumeration itself fails.
pub fn list_ports() -> Result<Vec<DiscoveredPort>> {
    let ports = serialport::available_ports()
        .map_err(|e| LinkError::discovery(format!("enumeration failed: {e}")))?;

    let mut discovered: Vec<DiscoveredPort> = ports
        .into_iter()
        .map(|port| match port.port_type {
            SerialPortType::UsbPort(info) => DiscoveredPort {
                name: port.port_name,
                vid: Some(info.vid),
                pid: Some(info.pid),
                product: info.product,
            },
            _ => DiscoveredPort {
                name: port.port_name,
                vid: None,
                pid: None,
                product: None,
            },
        })
        .collect();
    discovered.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(discovered)
}
