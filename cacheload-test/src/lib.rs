//! Test utilities for the cacheload load generator.
//!
//! This crate provides an in-process HTTP target emulating the cache endpoints that cacheload
//! drives. See the modules for all available utilities.

pub mod server;
pub mod tracing;
