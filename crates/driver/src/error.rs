//! Driver error types

use crate::input::InputError;
use crate::usb::session::DeviceKey;
use crate::usb::transfer_loop::LoopState;
use crate::usb::transport::SubmitError;
use thiserror::Error;

/// Errors surfaced to the input stack and the bus layer
#[derive(Debug, Error)]
pub enum DriverError {
    /// First submission failed; the input handle cannot be opened
    #[error("Device cannot be opened: {0}")]
    OpenFailed(#[source] SubmitError),

    /// Operation not allowed in the current transfer loop state
    #[error("Transfer loop is {state}, expected idle")]
    InvalidState { state: LoopState },

    #[error("Device {0} already has a session")]
    AlreadyAttached(DeviceKey),

    #[error("No session for device {0}")]
    UnknownDevice(DeviceKey),

    #[error("No interrupt IN endpoint on device {0}")]
    NoInterruptEndpoint(DeviceKey),

    #[error(transparent)]
    Input(#[from] InputError),

    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),
}

pub type Result<T> = std::result::Result<T, DriverError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DriverError::OpenFailed(SubmitError::NoDevice);
        assert!(err.to_string().contains("cannot be opened"));

        let err = DriverError::InvalidState {
            state: LoopState::Running,
        };
        assert_eq!(err.to_string(), "Transfer loop is running, expected idle");

        let err = DriverError::AlreadyAttached(DeviceKey { bus: 1, address: 4 });
        assert!(err.to_string().contains("1-4"));
    }
}
