//! Per-device session
//!
//! A [`DeviceSession`] ties together the bus identity of one tablet, its
//! registered input device and its transfer loop. Opening and closing the
//! input handle start and stop the loop; [`DeviceSession::teardown`] releases
//! everything in reverse order of acquisition.

use crate::error::Result;
use crate::input::{InputRegistry, InputSink};
use crate::usb::transfer_loop::{LoopState, LoopStatsSnapshot, TransferLoop};
use crate::usb::transport::Transport;
use common::SessionSummary;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Bus-level identity of an attached device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceKey {
    pub bus: u8,
    pub address: u8,
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.bus, self.address)
    }
}

/// What the bus layer knows about a device at attach time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub key: DeviceKey,
    pub vendor_id: u16,
    pub product_id: u16,
    /// Hub port chain, e.g. `[1, 4]`; empty when the device hangs off the root
    pub port_path: Vec<u8>,
}

impl DeviceIdentity {
    /// Physical path reported to the input stack
    ///
    /// `usb-<bus>-<ports>/input0`, with the bus zero-padded to three digits and
    /// the port chain joined by dots, e.g. `usb-001-1.4/input0`.
    pub fn phys(&self) -> String {
        let ports = if self.port_path.is_empty() {
            self.key.address.to_string()
        } else {
            self.port_path
                .iter()
                .map(u8::to_string)
                .collect::<Vec<_>>()
                .join(".")
        };
        format!("usb-{:03}-{}/input0", self.key.bus, ports)
    }
}

/// One attached tablet
pub struct DeviceSession {
    identity: DeviceIdentity,
    phys: String,
    sink: Arc<dyn InputSink>,
    transport: Arc<dyn Transport>,
    transfer_loop: TransferLoop,
}

impl DeviceSession {
    pub(crate) fn new(
        identity: DeviceIdentity,
        phys: String,
        sink: Arc<dyn InputSink>,
        transport: Arc<dyn Transport>,
        transfer_loop: TransferLoop,
    ) -> Self {
        Self {
            identity,
            phys,
            sink,
            transport,
            transfer_loop,
        }
    }

    pub fn key(&self) -> DeviceKey {
        self.identity.key
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn phys(&self) -> &str {
        &self.phys
    }

    pub fn state(&self) -> LoopState {
        self.transfer_loop.state()
    }

    pub fn stats(&self) -> LoopStatsSnapshot {
        self.transfer_loop.stats()
    }

    pub fn generation(&self) -> u64 {
        self.transfer_loop.generation()
    }

    /// Input handle opened: start streaming reports
    pub fn open(&self) -> Result<()> {
        self.transfer_loop.start()?;
        info!("Opened input for tablet {} ({})", self.key(), self.phys);
        Ok(())
    }

    /// Input handle closed: stop streaming and wait for the transfer to return
    pub fn close(&self) {
        self.transfer_loop.stop();
        debug!("Closed input for tablet {}", self.key());
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            bus: self.identity.key.bus,
            address: self.identity.key.address,
            vendor_id: self.identity.vendor_id,
            product_id: self.identity.product_id,
            phys: self.phys.clone(),
            state: self.state().to_string(),
            frames_published: self.stats().frames_published,
        }
    }

    /// Release every resource the session holds
    ///
    /// Order: stop the loop, unregister the input device, shut the transport
    /// down, then drop the transfer and its buffer along with the record.
    pub fn teardown(self, registry: &dyn InputRegistry) {
        let key = self.key();

        self.transfer_loop.stop();
        debug!("{}: transfer loop stopped", key);

        registry.unregister(&self.sink);
        debug!("{}: input device unregistered", key);

        self.transport.shutdown();
        debug!("{}: transport shut down", key);

        // Dropping the loop releases the parked transfer and its buffer
        drop(self.transfer_loop);
        debug!("{}: transfer released", key);

        info!("Tablet {} ({}) removed", key, self.phys);
    }
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("identity", &self.identity)
            .field("phys", &self.phys)
            .field("state", &self.state())
            .finish()
    }
}
