//! Common utilities for the XP-Pen tablet driver
//!
//! This crate provides shared functionality for the driver crates,
//! including error handling, logging setup, and the async channel bridge
//! between the Tokio runtime and the USB worker thread.

pub mod channel;
pub mod error;
pub mod logging;
pub mod test_utils;

pub use channel::{
    DetachReason, DriverBridge, DriverEvent, DriverWorker, SessionSummary, WorkerCommand,
    create_driver_bridge,
};
pub use error::{Error, Result};
pub use logging::setup_logging;
