//! Shared utilities for tenantops integration tests.

pub mod harness;

pub use harness::*;
