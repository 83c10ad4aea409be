//! Shared test utilities for mixtape integration tests.
//!
//! This module provides:
//! - `TestHarness` with a temp work directory, a scripted resolver and a fake
//!   transcoder
//! - `ConfigBuilder` for creating test configurations programmatically
//! - Helpers for inspecting produced archives

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
