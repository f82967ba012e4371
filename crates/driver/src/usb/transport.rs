//! Interrupt transfer transport seam
//!
//! A [`Transfer`] owns the report buffer. Submitting moves it into the
//! transport; the completion hands it back. While a transfer is in flight the
//! session holds no reference to the buffer at all, so it cannot be freed or
//! reused until the transport gives it back.

use protocol::PACKET_LEN;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Completion status of a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferStatus {
    /// Not yet submitted, or in flight
    Pending,
    /// Data received
    Completed,
    /// Cancelled at our request
    Cancelled,
    /// Endpoint or connection was reset
    ConnectionReset,
    /// Device is gone or the transport was shut down
    Shutdown,
    /// Endpoint stalled
    Stall,
    /// Device sent more data than requested
    Overflow,
    /// Transfer timed out
    Timeout,
    /// Any other I/O failure
    Io(String),
}

impl TransferStatus {
    /// Statuses that end the transfer loop without being an error
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferStatus::Cancelled | TransferStatus::ConnectionReset | TransferStatus::Shutdown
        )
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferStatus::Pending => write!(f, "pending"),
            TransferStatus::Completed => write!(f, "completed"),
            TransferStatus::Cancelled => write!(f, "cancelled"),
            TransferStatus::ConnectionReset => write!(f, "connection reset"),
            TransferStatus::Shutdown => write!(f, "shutdown"),
            TransferStatus::Stall => write!(f, "stall"),
            TransferStatus::Overflow => write!(f, "overflow"),
            TransferStatus::Timeout => write!(f, "timeout"),
            TransferStatus::Io(message) => write!(f, "i/o error: {}", message),
        }
    }
}

/// Interrupt-IN endpoint the tablet reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterruptEndpoint {
    /// Endpoint address (IN endpoints have bit 7 set, e.g. 0x81)
    pub address: u8,
    /// Polling interval from the endpoint descriptor (bInterval)
    pub interval: u8,
}

impl InterruptEndpoint {
    pub fn is_in(&self) -> bool {
        (self.address & 0x80) != 0
    }
}

/// One interrupt-IN transfer and the buffer it reads into
pub struct Transfer {
    endpoint: InterruptEndpoint,
    buffer: Box<[u8; PACKET_LEN]>,
    actual_length: usize,
    status: TransferStatus,
}

impl Transfer {
    /// Allocate the transfer and its report buffer
    pub fn new(endpoint: InterruptEndpoint) -> Self {
        Self {
            endpoint,
            buffer: Box::new([0u8; PACKET_LEN]),
            actual_length: 0,
            status: TransferStatus::Pending,
        }
    }

    pub fn endpoint(&self) -> InterruptEndpoint {
        self.endpoint
    }

    pub fn status(&self) -> &TransferStatus {
        &self.status
    }

    pub fn actual_length(&self) -> usize {
        self.actual_length
    }

    /// Bytes received by the last completion
    pub fn data(&self) -> &[u8] {
        &self.buffer[..self.actual_length.min(PACKET_LEN)]
    }

    /// Whole buffer for the transport to read into
    pub fn buffer_mut(&mut self) -> &mut [u8; PACKET_LEN] {
        &mut self.buffer
    }

    /// Record the outcome before handing the transfer back
    pub fn complete(&mut self, status: TransferStatus, actual_length: usize) {
        self.status = status;
        self.actual_length = actual_length.min(PACKET_LEN);
    }

    /// Reset bookkeeping ahead of (re)submission
    pub(crate) fn reset(&mut self) {
        self.status = TransferStatus::Pending;
        self.actual_length = 0;
    }
}

impl fmt::Debug for Transfer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transfer")
            .field("endpoint", &self.endpoint)
            .field("status", &self.status)
            .field("actual_length", &self.actual_length)
            .finish()
    }
}

/// Completion callback; may run on any thread
pub type Completion = Arc<dyn Fn(Transfer) + Send + Sync>;

/// Why a submission was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("Device is no longer present")]
    NoDevice,

    #[error("A transfer is already in flight")]
    Busy,

    #[error("Transport has been shut down")]
    ShutDown,

    #[error("USB error: {0}")]
    Usb(String),
}

/// A refused submission hands the transfer back to the caller
#[derive(Debug)]
pub struct SubmitFailure {
    pub error: SubmitError,
    pub transfer: Transfer,
}

/// Transfer submission and cancellation primitives for one device
///
/// Implementations must never run the completion synchronously from inside
/// `submit` or `cancel`; the caller may hold its own lock across them.
pub trait Transport: Send + Sync {
    /// Queue the transfer; `complete` runs exactly once when it finishes
    fn submit(&self, transfer: Transfer, complete: Completion) -> Result<(), SubmitFailure>;

    /// Request cancellation of the in-flight transfer, if any
    ///
    /// Returns immediately; the transfer completes later with
    /// [`TransferStatus::Cancelled`] (or whatever status it already reached).
    fn cancel(&self);

    /// Release the underlying device; further submissions fail
    fn shutdown(&self) {}
}
