//! USB subsystem
//!
//! - [`transport`]: the submit/cancel seam and the owned [`Transfer`]
//! - [`transfer_loop`]: the self-resubmitting interrupt loop per device
//! - [`session`] and [`manager`]: per-device sessions and their registry
//! - [`device`]: libusb-backed transport
//! - [`worker`]: the dedicated thread owning the libusb context
//!
//! libusb work runs on the worker and poll threads so that the Tokio
//! runtime never blocks on USB I/O.

pub mod device;
pub mod filter;
pub mod manager;
pub mod session;
pub mod transfer_loop;
pub mod transport;
pub mod worker;

pub use device::RusbTransport;
pub use filter::DeviceFilter;
pub use manager::{AttachRequest, ManagerConfig, SessionManager};
pub use session::{DeviceIdentity, DeviceKey, DeviceSession};
pub use transfer_loop::{LoopState, LoopStatsSnapshot, SessionNotice, TransferLoop};
pub use transport::{
    Completion, InterruptEndpoint, SubmitError, SubmitFailure, Transfer, TransferStatus, Transport,
};
pub use worker::{DriverWorkerThread, WorkerConfig, list_tablets, spawn_driver_worker};
