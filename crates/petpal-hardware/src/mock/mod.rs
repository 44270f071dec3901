//! Mock link implementations for testing and development.
//!
//! These types behave like a resolver, opener and link, but are controlled
//! programmatically so lifecycle and failure paths can be exercised without
//! a board attached.

pub mod link;
pub mod resolver;

// Re-export commonly used types
pub use link::{MockLink, MockLinkHandle, MockOpener};
pub use resolver::MockResolver;
