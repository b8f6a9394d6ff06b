//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - A scripted API transport
//! - Facade and database fixtures
//! - Custom assertion macros

pub mod assertions;
pub mod fixtures;
pub mod transport;

// Re-export commonly used utilities
pub use fixtures::*;
pub use transport::*;
