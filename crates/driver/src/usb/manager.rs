//! Session manager
//!
//! Owns every live [`DeviceSession`], keyed by bus position. Attach builds a
//! session in acquisition order (transfer, input device, transfer loop) and
//! unwinds in reverse on failure; detach tears it down and is idempotent.
//! This module knows nothing about libusb; the bus worker hands it a ready
//! [`Transport`] per device.

use crate::error::{DriverError, Result};
use crate::input::{InputRegistry, tablet_capabilities};
use crate::usb::session::{DeviceIdentity, DeviceKey, DeviceSession};
use crate::usb::transfer_loop::{LoopState, LoopStatsSnapshot, SessionNotice, TransferLoop};
use crate::usb::transport::{InterruptEndpoint, Transfer, Transport};
use async_channel::{Receiver, Sender, unbounded};
use common::SessionSummary;
use protocol::{UsbId, format_for_product};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default input device name
pub const DEFAULT_DEVICE_NAME: &str = "XP-Pen G540 Pen Tablet";

/// Session manager settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Name the input device is registered under
    pub device_name: String,
    /// Start the transfer loop as soon as the input device is registered
    pub open_on_attach: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            device_name: DEFAULT_DEVICE_NAME.to_string(),
            open_on_attach: true,
        }
    }
}

/// A matched device, ready for a session
pub struct AttachRequest {
    pub identity: DeviceIdentity,
    pub endpoint: InterruptEndpoint,
    pub transport: Arc<dyn Transport>,
}

/// Registry of live tablet sessions
pub struct SessionManager {
    sessions: HashMap<DeviceKey, DeviceSession>,
    registry: Arc<dyn InputRegistry>,
    config: ManagerConfig,
    notice_tx: Sender<SessionNotice>,
    notice_rx: Receiver<SessionNotice>,
}

impl SessionManager {
    pub fn new(registry: Arc<dyn InputRegistry>, config: ManagerConfig) -> Self {
        // Unbounded: completions must never block on a full queue
        let (notice_tx, notice_rx) = unbounded();

        Self {
            sessions: HashMap::new(),
            registry,
            config,
            notice_tx,
            notice_rx,
        }
    }

    /// Create a session for a newly matched device
    ///
    /// On failure every resource acquired so far is released, the transport
    /// is shut down and no session is left behind.
    pub fn attach(&mut self, request: AttachRequest) -> Result<DeviceKey> {
        let AttachRequest {
            identity,
            endpoint,
            transport,
        } = request;
        let key = identity.key;

        if self.sessions.contains_key(&key) {
            warn!("Ignoring duplicate attach for tablet {}", key);
            return Err(DriverError::AlreadyAttached(key));
        }

        if !endpoint.is_in() {
            warn!(
                "Endpoint {:#04x} on {} is not an IN endpoint",
                endpoint.address, key
            );
            transport.shutdown();
            return Err(DriverError::NoInterruptEndpoint(key));
        }

        let transfer = Transfer::new(endpoint);
        debug!("{}: allocated transfer for endpoint {:#04x}", key, endpoint.address);

        let phys = identity.phys();
        let capabilities = tablet_capabilities(
            &self.config.device_name,
            &phys,
            UsbId {
                vendor_id: identity.vendor_id,
                product_id: identity.product_id,
            },
        );

        let sink = match self.registry.register(&capabilities) {
            Ok(sink) => sink,
            Err(e) => {
                warn!("{}: input registration failed: {}", key, e);
                drop(transfer);
                debug!("{}: transfer released", key);
                transport.shutdown();
                debug!("{}: transport shut down", key);
                return Err(e.into());
            }
        };

        let transfer_loop = TransferLoop::new(
            key,
            transfer,
            Arc::clone(&transport),
            Arc::clone(&sink),
            format_for_product(identity.product_id),
            Some(self.notice_tx.clone()),
        );
        let session = DeviceSession::new(identity, phys, sink, transport, transfer_loop);

        if self.config.open_on_attach
            && let Err(e) = session.open()
        {
            warn!("{}: failed to open input: {}", key, e);
            session.teardown(self.registry.as_ref());
            return Err(e);
        }

        info!(
            "Tablet {} attached as \"{}\" ({})",
            key,
            self.config.device_name,
            session.phys()
        );
        self.sessions.insert(key, session);
        Ok(key)
    }

    /// Tear down the session for `key`
    ///
    /// Returns `false` if there was no session; detaching twice, or before
    /// any attach, is not an error.
    pub fn detach(&mut self, key: DeviceKey) -> bool {
        match self.sessions.remove(&key) {
            Some(session) => {
                debug!("Detaching tablet {} ({})", key, session.state());
                session.teardown(self.registry.as_ref());
                true
            }
            None => {
                debug!("Detach for {} without a session, ignoring", key);
                false
            }
        }
    }

    /// Tear down every session, returning the keys that were removed
    pub fn detach_all(&mut self) -> Vec<DeviceKey> {
        let mut keys: Vec<DeviceKey> = self.sessions.keys().copied().collect();
        keys.sort();
        for key in &keys {
            self.detach(*key);
        }
        keys
    }

    /// Input handle opened for `key`
    pub fn open(&self, key: DeviceKey) -> Result<()> {
        self.session(key)?.open()
    }

    /// Input handle closed for `key`; blocks until the transfer is back
    pub fn close(&self, key: DeviceKey) -> Result<()> {
        self.session(key)?.close();
        Ok(())
    }

    /// React to a notice from a transfer loop
    ///
    /// A failed resubmission means the device stopped reporting; the session
    /// is torn down as if the device had been unplugged. A notice from an
    /// earlier run is ignored once the handle has been reopened. Returns the
    /// key of the detached session, if any.
    pub fn handle_notice(&mut self, notice: SessionNotice) -> Option<DeviceKey> {
        match notice {
            SessionNotice::TransferFailed {
                key,
                generation,
                error,
            } => {
                let session = self.sessions.get(&key)?;
                if session.generation() != generation || session.state() != LoopState::Idle {
                    debug!(
                        "Ignoring stale transfer failure for {} from run {}",
                        key, generation
                    );
                    return None;
                }
                error!("Tablet {} stopped reporting: {}", key, error);
                self.detach(key).then_some(key)
            }
        }
    }

    /// Handle every queued notice without blocking
    pub fn process_notices(&mut self) -> Vec<DeviceKey> {
        let mut detached = Vec::new();
        while let Ok(notice) = self.notice_rx.try_recv() {
            detached.extend(self.handle_notice(notice));
        }
        detached
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, key: DeviceKey) -> bool {
        self.sessions.contains_key(&key)
    }

    pub fn state(&self, key: DeviceKey) -> Option<LoopState> {
        self.sessions.get(&key).map(DeviceSession::state)
    }

    pub fn stats(&self, key: DeviceKey) -> Option<LoopStatsSnapshot> {
        self.sessions.get(&key).map(DeviceSession::stats)
    }

    /// Summaries of all live sessions, ordered by bus position
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let mut keys: Vec<&DeviceKey> = self.sessions.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| self.sessions[key].summary())
            .collect()
    }

    fn session(&self, key: DeviceKey) -> Result<&DeviceSession> {
        self.sessions
            .get(&key)
            .ok_or(DriverError::UnknownDevice(key))
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if !self.sessions.is_empty() {
            info!("Releasing {} tablet session(s)", self.sessions.len());
            self.detach_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ManualTransport, RecordingRegistry};

    fn identity(address: u8) -> DeviceIdentity {
        DeviceIdentity {
            key: DeviceKey { bus: 1, address },
            vendor_id: protocol::XPPEN_VENDOR_ID,
            product_id: protocol::G540_PRODUCT_ID,
            port_path: vec![address],
        }
    }

    fn request(address: u8, transport: &Arc<ManualTransport>) -> AttachRequest {
        AttachRequest {
            identity: identity(address),
            endpoint: InterruptEndpoint {
                address: 0x81,
                interval: 2,
            },
            transport: transport.clone(),
        }
    }

    fn manager(registry: &Arc<RecordingRegistry>, open_on_attach: bool) -> SessionManager {
        SessionManager::new(
            registry.clone(),
            ManagerConfig {
                device_name: "test tablet".to_string(),
                open_on_attach,
            },
        )
    }

    #[test]
    fn test_attach_registers_capabilities() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, false);

        let key = manager.attach(request(4, &transport)).unwrap();

        assert_eq!(key, DeviceKey { bus: 1, address: 4 });
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.state(key), Some(LoopState::Idle));
        assert_eq!(transport.submissions(), 0);

        let registered = registry.registered();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].name, "test tablet");
        assert_eq!(registered[0].phys, "usb-001-4/input0");
        assert_eq!(registered[0].id, UsbId::G540);
    }

    #[test]
    fn test_open_on_attach_starts_loop() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);

        let key = manager.attach(request(4, &transport)).unwrap();

        assert_eq!(manager.state(key), Some(LoopState::Running));
        assert_eq!(transport.submissions(), 1);
    }

    #[test]
    fn test_duplicate_attach_rejected() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, false);

        manager.attach(request(4, &transport)).unwrap();
        let err = manager.attach(request(4, &transport)).unwrap_err();

        assert!(matches!(err, DriverError::AlreadyAttached(_)));
        assert_eq!(manager.session_count(), 1);
        assert_eq!(registry.registered().len(), 1);
    }

    #[test]
    fn test_out_endpoint_rejected() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, false);

        let mut req = request(4, &transport);
        req.endpoint.address = 0x02;

        assert!(matches!(
            manager.attach(req),
            Err(DriverError::NoInterruptEndpoint(_))
        ));
        assert_eq!(manager.session_count(), 0);
        assert!(registry.registered().is_empty());
        assert_eq!(transport.shutdowns(), 1);
    }

    #[test]
    fn test_open_close_unknown_device() {
        let registry = Arc::new(RecordingRegistry::new());
        let manager = manager(&registry, false);
        let key = DeviceKey { bus: 2, address: 9 };

        assert!(matches!(manager.open(key), Err(DriverError::UnknownDevice(_))));
        assert!(matches!(manager.close(key), Err(DriverError::UnknownDevice(_))));
        assert!(manager.stats(key).is_none());
    }

    #[test]
    fn test_summaries_sorted() {
        let registry = Arc::new(RecordingRegistry::new());
        let mut manager = manager(&registry, false);

        manager
            .attach(request(9, &Arc::new(ManualTransport::new())))
            .unwrap();
        manager
            .attach(request(3, &Arc::new(ManualTransport::new())))
            .unwrap();

        let summaries = manager.summaries();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].address, 3);
        assert_eq!(summaries[1].address, 9);
        assert_eq!(summaries[0].state, "idle");
    }

    #[test]
    fn test_drop_detaches_sessions() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);

        manager.attach(request(4, &transport)).unwrap();
        drop(manager);

        assert_eq!(registry.unregistered(), 1);
        assert_eq!(transport.shutdowns(), 1);
        assert!(!transport.has_pending());
    }
}
