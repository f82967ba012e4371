//! Async channel bridge between Tokio runtime and USB worker thread

use async_channel::{Receiver, Sender, bounded};

/// Commands from Tokio runtime to the USB worker thread
#[derive(Debug)]
pub enum WorkerCommand {
    /// List all live tablet sessions
    ListSessions {
        /// Channel to send response back
        response: tokio::sync::oneshot::Sender<Vec<SessionSummary>>,
    },

    /// Tear down every session and stop the worker
    Shutdown,
}

/// Why a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetachReason {
    /// Device was unplugged
    Unplugged,
    /// Transfer loop could not resubmit and stopped reporting
    TransferFailed,
    /// Driver is shutting down
    Shutdown,
}

/// Snapshot of one live session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub bus: u8,
    pub address: u8,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Diagnostic device path (`usb-<bus>-<ports>/input0`)
    pub phys: String,
    /// Transfer loop state name
    pub state: String,
    /// Frames committed to the input sink so far
    pub frames_published: u64,
}

/// Events from the USB worker thread
#[derive(Debug, Clone)]
pub enum DriverEvent {
    /// A tablet was matched and its input device registered
    TabletAttached {
        bus: u8,
        address: u8,
        phys: String,
    },

    /// A tablet session was torn down
    TabletDetached {
        bus: u8,
        address: u8,
        reason: DetachReason,
    },

    /// A matched device could not be brought up
    AttachFailed {
        bus: u8,
        address: u8,
        error: String,
    },
}

/// Handle for Tokio runtime (async)
#[derive(Clone)]
pub struct DriverBridge {
    cmd_tx: Sender<WorkerCommand>,
    event_rx: Receiver<DriverEvent>,
}

impl DriverBridge {
    /// Send a command to the USB worker thread
    pub async fn send_command(&self, cmd: WorkerCommand) -> crate::Result<()> {
        self.cmd_tx
            .send(cmd)
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Receive an event from the USB worker thread
    pub async fn recv_event(&self) -> crate::Result<DriverEvent> {
        self.event_rx
            .recv()
            .await
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Handle for USB worker thread (blocking)
pub struct DriverWorker {
    pub(crate) cmd_rx: Receiver<WorkerCommand>,
    /// Event sender (public for the hot-plug and session code to clone)
    pub event_tx: Sender<DriverEvent>,
}

impl DriverWorker {
    /// Receive a command from Tokio runtime (blocking)
    pub fn recv_command(&self) -> crate::Result<WorkerCommand> {
        self.cmd_rx
            .recv_blocking()
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }

    /// Try to receive a command without blocking
    pub fn try_recv_command(&self) -> Option<WorkerCommand> {
        self.cmd_rx.try_recv().ok()
    }

    /// Send an event to Tokio runtime without blocking
    ///
    /// Events are informational; a full or closed channel drops the event.
    pub fn send_event(&self, event: DriverEvent) -> crate::Result<()> {
        self.event_tx
            .try_send(event)
            .map_err(|e| crate::Error::Channel(e.to_string()))
    }
}

/// Create the channel bridge between Tokio and the USB worker thread
///
/// Returns (DriverBridge for Tokio, DriverWorker for USB thread)
pub fn create_driver_bridge() -> (DriverBridge, DriverWorker) {
    let (cmd_tx, cmd_rx) = bounded(64);
    let (event_tx, event_rx) = bounded(256);

    (
        DriverBridge { cmd_tx, event_rx },
        DriverWorker { cmd_rx, event_tx },
    )
}
