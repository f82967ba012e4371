//! XP-Pen tablet driver
//!
//! Binds XP-Pen pen tablets over libusb, keeps one interrupt transfer in
//! flight per tablet and publishes decoded pen frames to an input backend.
//!
//! The core pieces are transport-agnostic: a [`usb::TransferLoop`] drives any
//! [`usb::Transport`] and publishes to any [`input::InputSink`], which is how
//! the tests exercise it with the doubles in [`testing`].

pub mod config;
pub mod error;
pub mod input;
pub mod testing;
pub mod usb;

pub use error::{DriverError, Result};
