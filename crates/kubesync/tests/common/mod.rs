//! Shared test utilities for kubesync integration tests.
//!
//! This module provides:
//! - `SyncHarness` for running a sync manager against temp directories
//! - `KubeconfigBuilder` for writing kubeconfig documents programmatically

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::SyncHarness;
