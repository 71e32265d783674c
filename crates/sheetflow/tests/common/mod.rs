//! Shared test utilities for sheetflow integration tests.
//!
//! This module provides:
//! - `TestHarness` wiring queues, dispatcher and query service over temp dirs
//! - Fixture builders for CSV text and minimal `.xlsx` workbooks

pub mod fixtures;
pub mod harness;

pub use fixtures::*;
pub use harness::TestHarness;
