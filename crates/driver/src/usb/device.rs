//! libusb-backed transport
//!
//! rusb only offers synchronous interrupt reads, so each device gets a poll
//! thread that performs the read for the transfer currently submitted and
//! runs the completion when it finishes. Reads use a short timeout so that
//! cancellation and shutdown are noticed promptly.

use crate::error::{DriverError, Result};
use crate::usb::session::{DeviceIdentity, DeviceKey};
use crate::usb::transport::{
    Completion, InterruptEndpoint, SubmitError, SubmitFailure, Transfer, TransferStatus, Transport,
};
use rusb::{Context, Device, DeviceHandle, Direction, TransferType, UsbContext};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default read timeout per poll
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

/// Read the bus identity of a device
pub fn device_identity<T: UsbContext>(device: &Device<T>) -> Result<DeviceIdentity> {
    let descriptor = device.device_descriptor()?;
    let port_path = device.port_numbers().unwrap_or_else(|e| {
        debug!("Could not read port numbers: {}", e);
        Vec::new()
    });

    Ok(DeviceIdentity {
        key: DeviceKey {
            bus: device.bus_number(),
            address: device.address(),
        },
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        port_path,
    })
}

/// Find the first interrupt IN endpoint of the active configuration
///
/// Returns the interface number it belongs to along with the endpoint.
pub fn find_interrupt_endpoint<T: UsbContext>(
    device: &Device<T>,
) -> Result<Option<(u8, InterruptEndpoint)>> {
    let config = device.active_config_descriptor()?;

    for interface in config.interfaces() {
        for descriptor in interface.descriptors() {
            for endpoint in descriptor.endpoint_descriptors() {
                if endpoint.direction() == Direction::In
                    && endpoint.transfer_type() == TransferType::Interrupt
                {
                    return Ok(Some((
                        interface.number(),
                        InterruptEndpoint {
                            address: endpoint.address(),
                            interval: endpoint.interval(),
                        },
                    )));
                }
            }
        }
    }

    Ok(None)
}

/// What a failed read means for the transfer
enum ReadOutcome {
    /// Nothing arrived yet; poll again
    Retry,
    /// The transfer is finished with this status
    Done(TransferStatus),
}

fn classify_error(error: rusb::Error) -> ReadOutcome {
    match error {
        rusb::Error::Timeout | rusb::Error::Interrupted => ReadOutcome::Retry,
        rusb::Error::NoDevice | rusb::Error::NotFound => ReadOutcome::Done(TransferStatus::Shutdown),
        rusb::Error::Pipe => ReadOutcome::Done(TransferStatus::Stall),
        rusb::Error::Overflow => ReadOutcome::Done(TransferStatus::Overflow),
        other => ReadOutcome::Done(TransferStatus::Io(other.to_string())),
    }
}

#[derive(Default)]
struct PollState {
    pending: Option<(Transfer, Completion)>,
    /// The poll thread owns a transfer and is reading into it
    in_flight: bool,
    cancel: bool,
    closed: bool,
}

struct PollShared {
    state: Mutex<PollState>,
    wake: Condvar,
}

impl PollShared {
    fn lock(&self) -> MutexGuard<'_, PollState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hand a finished transfer back
    fn finish(&self, mut transfer: Transfer, complete: Completion, status: TransferStatus, len: usize) {
        {
            let mut state = self.lock();
            state.in_flight = false;
            state.cancel = false;
        }
        transfer.complete(status, len);
        complete(transfer);
    }
}

/// Claimed device handle plus its poll thread
pub struct RusbTransport {
    key: DeviceKey,
    handle: Arc<DeviceHandle<Context>>,
    interface: u8,
    kernel_driver_detached: bool,
    endpoint: InterruptEndpoint,
    shared: Arc<PollShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: ThreadId,
}

impl RusbTransport {
    /// Open the device, claim `interface` and start the poll thread
    ///
    /// An active kernel driver on the interface is detached first and
    /// reattached on shutdown.
    pub fn open(
        device: &Device<Context>,
        interface: u8,
        endpoint: InterruptEndpoint,
        poll_timeout: Duration,
    ) -> Result<Self> {
        let key = DeviceKey {
            bus: device.bus_number(),
            address: device.address(),
        };
        let handle = device.open().inspect_err(|e| {
            warn!("Failed to open device {}: {}", key, e);
        })?;

        let kernel_driver_detached = match handle.kernel_driver_active(interface) {
            Ok(true) => {
                debug!("Detaching kernel driver from interface {} on {}", interface, key);
                match handle.detach_kernel_driver(interface) {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(
                            "Failed to detach kernel driver from interface {}: {}",
                            interface, e
                        );
                        false
                    }
                }
            }
            Ok(false) => false,
            Err(e) => {
                debug!(
                    "Could not check kernel driver status for interface {}: {}",
                    interface, e
                );
                false
            }
        };

        if let Err(e) = handle.claim_interface(interface) {
            warn!("Failed to claim interface {} on {}: {}", interface, key, e);
            if kernel_driver_detached {
                let _ = handle.attach_kernel_driver(interface);
            }
            return Err(DriverError::Usb(e));
        }
        debug!("Claimed interface {} on {}", interface, key);

        let handle = Arc::new(handle);
        let shared = Arc::new(PollShared {
            state: Mutex::new(PollState::default()),
            wake: Condvar::new(),
        });

        let thread = {
            let handle = Arc::clone(&handle);
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("xppen-poll-{}-{}", key.bus, key.address))
                .spawn(move || poll_loop(key, handle, shared, endpoint, poll_timeout))
        };
        let thread = match thread {
            Ok(thread) => thread,
            Err(e) => {
                warn!("Failed to spawn poll thread for {}: {}", key, e);
                let _ = handle.release_interface(interface);
                if kernel_driver_detached {
                    let _ = handle.attach_kernel_driver(interface);
                }
                return Err(DriverError::Usb(rusb::Error::Other));
            }
        };
        let thread_id = thread.thread().id();

        Ok(Self {
            key,
            handle,
            interface,
            kernel_driver_detached,
            endpoint,
            shared,
            thread: Mutex::new(Some(thread)),
            thread_id,
        })
    }

    pub fn key(&self) -> DeviceKey {
        self.key
    }

    pub fn endpoint(&self) -> InterruptEndpoint {
        self.endpoint
    }

    fn release(&self) {
        if let Err(e) = self.handle.release_interface(self.interface) {
            debug!("Failed to release interface {}: {}", self.interface, e);
        }
        if self.kernel_driver_detached {
            match self.handle.attach_kernel_driver(self.interface) {
                Ok(()) => debug!(
                    "Reattached kernel driver to interface {} on {}",
                    self.interface, self.key
                ),
                Err(e) => debug!(
                    "Could not reattach kernel driver to interface {}: {}",
                    self.interface, e
                ),
            }
        }
    }
}

impl Transport for RusbTransport {
    fn submit(&self, transfer: Transfer, complete: Completion) -> std::result::Result<(), SubmitFailure> {
        let mut state = self.shared.lock();
        let refused = if state.closed {
            Some(SubmitError::ShutDown)
        } else if state.pending.is_some() || state.in_flight {
            Some(SubmitError::Busy)
        } else {
            None
        };
        if let Some(error) = refused {
            return Err(SubmitFailure { error, transfer });
        }

        state.pending = Some((transfer, complete));
        self.shared.wake.notify_all();
        Ok(())
    }

    fn cancel(&self) {
        let mut state = self.shared.lock();
        if state.pending.is_some() || state.in_flight {
            state.cancel = true;
            self.shared.wake.notify_all();
        }
    }

    fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.cancel = true;
            self.shared.wake.notify_all();
        }

        let thread = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(thread) = thread {
            if std::thread::current().id() == self.thread_id {
                debug!("Shutdown of {} from its own poll thread, not joining", self.key);
            } else if thread.join().is_err() {
                warn!("Poll thread for {} panicked", self.key);
            }
        }

        let pending = self.shared.lock().pending.take();
        if let Some((mut transfer, complete)) = pending {
            transfer.complete(TransferStatus::Shutdown, 0);
            complete(transfer);
        }

        self.release();
        debug!("Transport for {} shut down", self.key);
    }
}

impl Drop for RusbTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn poll_loop(
    key: DeviceKey,
    handle: Arc<DeviceHandle<Context>>,
    shared: Arc<PollShared>,
    endpoint: InterruptEndpoint,
    poll_timeout: Duration,
) {
    debug!("Poll thread for {} started", key);

    loop {
        let (mut transfer, complete) = {
            let mut state = shared.lock();
            loop {
                if state.closed {
                    debug!("Poll thread for {} stopped", key);
                    return;
                }
                if let Some(pending) = state.pending.take() {
                    state.in_flight = true;
                    break pending;
                }
                state = shared
                    .wake
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
            }
        };

        let (status, len) = loop {
            {
                let state = shared.lock();
                if state.closed {
                    break (TransferStatus::Shutdown, 0);
                }
                if state.cancel {
                    break (TransferStatus::Cancelled, 0);
                }
            }

            match handle.read_interrupt(endpoint.address, transfer.buffer_mut(), poll_timeout) {
                Ok(len) => {
                    trace!("{}: read {} bytes", key, len);
                    break (TransferStatus::Completed, len);
                }
                Err(e) => match classify_error(e) {
                    ReadOutcome::Retry => continue,
                    ReadOutcome::Done(status) => break (status, 0),
                },
            }
        };

        shared.finish(transfer, complete, status, len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_of(error: rusb::Error) -> Option<TransferStatus> {
        match classify_error(error) {
            ReadOutcome::Retry => None,
            ReadOutcome::Done(status) => Some(status),
        }
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(status_of(rusb::Error::Timeout), None);
        assert_eq!(status_of(rusb::Error::Interrupted), None);
        assert_eq!(
            status_of(rusb::Error::NoDevice),
            Some(TransferStatus::Shutdown)
        );
        assert_eq!(status_of(rusb::Error::Pipe), Some(TransferStatus::Stall));
        assert_eq!(
            status_of(rusb::Error::Overflow),
            Some(TransferStatus::Overflow)
        );
        assert!(matches!(
            status_of(rusb::Error::Io),
            Some(TransferStatus::Io(_))
        ));
    }

    #[test]
    fn test_device_shutdown_is_terminal() {
        let status = status_of(rusb::Error::NoDevice).unwrap();
        assert!(status.is_terminal());

        let status = status_of(rusb::Error::Pipe).unwrap();
        assert!(!status.is_terminal());
    }
}
