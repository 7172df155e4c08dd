//! Common observability utilities.
//!
//! This module provides the tools used for tracing and logging throughout the
//! bootstrapper.
//!
pub mod logging;
