//! Common test utilities and helpers
//!
//! This module provides shared utilities for all tests including:
//! - Directory and session fixtures
//! - An in-memory `PortalApi`
//! - A scripted transport connector and a recording publisher
//! - Custom assertion macros

pub mod fake_api;

pub use assertions::*;
pub use fake_api::*;
pub use fixtures::*;
pub use transport::*;
