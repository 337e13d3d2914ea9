//! # Test Suite for the Sunmoon Tide Binary
//!
//! End-to-end scenarios that cut across modules (prediction determinism,
//! signed manifests, corrupted tiles, cache eviction) plus the command line.
//! Module-level unit tests live next to their code.

mod cli_tests;
