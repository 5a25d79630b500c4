//! Testing utilities for `EventVault` registry backends
//!
//! The [`contract`] module holds behavioural scenarios every
//! [`eventvault::EventRegistry`] and [`eventvault::ReadModelRegistry`]
//! implementation must satisfy, plus macros that expand them into
//! `#[tokio::test]` functions for a given backend:
//!
//! ```rust,ignore
//! use eventvault_testing::contract::event_registry_contract_tests;
//!
//! event_registry_contract_tests! {
//!     suite = in_memory,
//!     make_registry = || async { eventvault_memory::InMemoryEventRegistry::new() },
//! }
//! ```
//!
//! Each generated test calls [`init_tracing`] first, so `RUST_LOG` controls
//! the output of the backend under test. Keep `#[traced_test]` tests out of
//! binaries that expand these macros; both install a global subscriber.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod contract;

/// Installs a test-friendly `tracing` subscriber honouring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
