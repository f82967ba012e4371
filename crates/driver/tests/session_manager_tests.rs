//! Integration tests for the session manager
//!
//! Attach/detach choreography against recording doubles: acquisition and
//! release order, failure unwinding and fatal transfer errors.

use common::test_utils::pen_report;
use driver::DriverError;
use driver::input::{Axis, InputSink, Key};
use driver::testing::{Journal, ManualTransport, RecordingRegistry, SinkCall};
use driver::usb::{
    AttachRequest, DeviceIdentity, DeviceKey, InterruptEndpoint, LoopState, ManagerConfig,
    SessionManager, SubmitError, TransferStatus,
};
use std::sync::{Arc, Mutex};

const KEY: DeviceKey = DeviceKey { bus: 1, address: 4 };

fn request(transport: &Arc<ManualTransport>) -> AttachRequest {
    AttachRequest {
        identity: DeviceIdentity {
            key: KEY,
            vendor_id: protocol::XPPEN_VENDOR_ID,
            product_id: protocol::G540_PRODUCT_ID,
            port_path: vec![1, 4],
        },
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
            open_on_attach,
            ..ManagerConfig::default()
        },
    )
}

fn journal() -> Journal {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(journal: &Journal) -> Vec<&'static str> {
    journal.lock().unwrap().clone()
}

mod attach {
    use super::*;

    #[test]
    fn test_attach_declares_tablet_capabilities() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, false);

        manager.attach(request(&transport)).unwrap();

        let caps = &registry.registered()[0];
        assert_eq!(caps.phys, "usb-001-1.4/input0");
        assert!(caps.has_key(Key::ToolPen));
        assert!(caps.has_key(Key::Left));
        assert!(caps.has_key(Key::Button0));
        assert!(caps.has_key(Key::Button1));
        assert_eq!(caps.axis(Axis::X).map(|a| a.max), Some(0x7fff));
        assert_eq!(caps.axis(Axis::Y).map(|a| a.max), Some(0x7fff));
        assert_eq!(caps.axis(Axis::Pressure).map(|a| a.max), Some(0x07ff));
    }

    #[test]
    fn test_registration_failure_unwinds() {
        let log = journal();
        let registry = Arc::new(RecordingRegistry::with_journal(log.clone()));
        let transport = Arc::new(ManualTransport::with_journal(log.clone()));
        registry.set_fail_register(true);
        let mut manager = manager(&registry, true);

        let err = manager.attach(request(&transport)).unwrap_err();

        assert!(matches!(err, DriverError::Input(_)));
        assert_eq!(manager.session_count(), 0);
        assert!(!manager.contains(KEY));
        assert_eq!(transport.submissions(), 0);
        assert_eq!(entries(&log), vec!["shutdown"]);

        // A later attach for the same device starts from scratch
        registry.set_fail_register(false);
        let transport = Arc::new(ManualTransport::new());
        manager.attach(request(&transport)).unwrap();
        assert_eq!(manager.session_count(), 1);
    }

    #[test]
    fn test_open_failure_on_attach_unwinds() {
        let log = journal();
        let registry = Arc::new(RecordingRegistry::with_journal(log.clone()));
        let transport = Arc::new(ManualTransport::with_journal(log.clone()));
        transport.fail_next_submit(SubmitError::NoDevice);
        let mut manager = manager(&registry, true);

        let err = manager.attach(request(&transport)).unwrap_err();

        assert!(matches!(err, DriverError::OpenFailed(SubmitError::NoDevice)));
        assert_eq!(manager.session_count(), 0);
        assert_eq!(registry.unregistered(), 1);
        assert_eq!(entries(&log), vec!["register", "close", "unregister", "shutdown"]);
    }
}

mod detach {
    use super::*;

    #[test]
    fn test_detach_before_attach_is_noop() {
        let registry = Arc::new(RecordingRegistry::new());
        let mut manager = manager(&registry, true);

        assert!(!manager.detach(KEY));
        assert_eq!(registry.unregistered(), 0);
    }

    #[test]
    fn test_double_detach_is_noop() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);

        manager.attach(request(&transport)).unwrap();
        assert!(manager.detach(KEY));
        assert!(!manager.detach(KEY));

        assert_eq!(registry.unregistered(), 1);
        assert_eq!(transport.shutdowns(), 1);
    }

    #[test]
    fn test_teardown_order() {
        let log = journal();
        let registry = Arc::new(RecordingRegistry::with_journal(log.clone()));
        let transport = Arc::new(ManualTransport::with_journal(log.clone()));
        let mut manager = manager(&registry, true);

        manager.attach(request(&transport)).unwrap();
        assert_eq!(manager.state(KEY), Some(LoopState::Running));
        assert!(manager.detach(KEY));

        assert_eq!(
            entries(&log),
            vec!["register", "submit", "cancel", "close", "unregister", "shutdown"]
        );
        assert!(!transport.has_pending());
    }

    #[test]
    fn test_detach_closes_input_device() {
        let log = journal();
        let registry = Arc::new(RecordingRegistry::with_journal(log.clone()));
        let transport = Arc::new(ManualTransport::with_journal(log.clone()));
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        // A reference that outlives the session
        let sink = registry.sinks()[0].clone();
        assert!(manager.detach(KEY));

        assert!(sink.is_closed());
        assert!(sink.sync().is_err());
        let log = entries(&log);
        let closed = log.iter().position(|e| *e == "close").unwrap();
        let shut_down = log.iter().position(|e| *e == "shutdown").unwrap();
        assert!(closed < shut_down);
    }

    #[test]
    fn test_detach_idle_session_skips_cancel() {
        let log = journal();
        let registry = Arc::new(RecordingRegistry::with_journal(log.clone()));
        let transport = Arc::new(ManualTransport::with_journal(log.clone()));
        let mut manager = manager(&registry, false);

        manager.attach(request(&transport)).unwrap();
        assert!(manager.detach(KEY));

        assert_eq!(entries(&log), vec!["register", "close", "unregister", "shutdown"]);
    }

    #[test]
    fn test_detach_all() {
        let registry = Arc::new(RecordingRegistry::new());
        let mut manager = manager(&registry, true);

        for address in [2, 5, 3] {
            let mut req = request(&Arc::new(ManualTransport::new()));
            req.identity.key = DeviceKey { bus: 1, address };
            manager.attach(req).unwrap();
        }

        let removed = manager.detach_all();
        assert_eq!(
            removed,
            vec![
                DeviceKey { bus: 1, address: 2 },
                DeviceKey { bus: 1, address: 3 },
                DeviceKey { bus: 1, address: 5 },
            ]
        );
        assert_eq!(manager.session_count(), 0);
        assert_eq!(registry.unregistered(), 3);
    }
}

mod input_handle {
    use super::*;

    #[test]
    fn test_open_close_cycle() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, false);
        manager.attach(request(&transport)).unwrap();

        manager.open(KEY).unwrap();
        assert_eq!(manager.state(KEY), Some(LoopState::Running));
        assert!(matches!(
            manager.open(KEY),
            Err(DriverError::InvalidState { .. })
        ));

        assert!(transport.complete_with_data(&pen_report(10, 20, 30, 0x02)));
        let sink = &registry.sinks()[0];
        assert_eq!(sink.frames(), 1);
        assert!(sink.calls().contains(&SinkCall::Key(Key::Button0, true)));

        manager.close(KEY).unwrap();
        assert_eq!(manager.state(KEY), Some(LoopState::Idle));
        manager.close(KEY).unwrap();

        manager.open(KEY).unwrap();
        assert_eq!(manager.stats(KEY).map(|s| s.frames_published), Some(1));
        assert_eq!(transport.submissions(), 3);
    }

    #[test]
    fn test_summary_reflects_session() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        assert!(transport.complete_with_data(&pen_report(1, 2, 3, 0)));

        let summaries = manager.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].phys, "usb-001-1.4/input0");
        assert_eq!(summaries[0].state, "running");
        assert_eq!(summaries[0].frames_published, 1);
    }
}

mod notices {
    use super::*;

    #[test]
    fn test_resubmit_failure_detaches_session() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        transport.fail_next_submit(SubmitError::NoDevice);
        assert!(transport.complete_with_status(TransferStatus::Stall));
        assert_eq!(manager.state(KEY), Some(LoopState::Idle));

        assert_eq!(manager.process_notices(), vec![KEY]);
        assert_eq!(manager.session_count(), 0);
        assert_eq!(registry.unregistered(), 1);
        assert_eq!(transport.shutdowns(), 1);

        // Nothing left to handle
        assert!(manager.process_notices().is_empty());
    }

    #[test]
    fn test_failure_notice_ignored_after_reopen() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        transport.fail_next_submit(SubmitError::NoDevice);
        assert!(transport.complete_with_status(TransferStatus::Stall));
        assert_eq!(manager.state(KEY), Some(LoopState::Idle));

        // Reopened before the worker got round to the notice
        manager.open(KEY).unwrap();
        assert_eq!(manager.state(KEY), Some(LoopState::Running));

        assert!(manager.process_notices().is_empty());
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.state(KEY), Some(LoopState::Running));
        assert_eq!(registry.unregistered(), 0);
        assert_eq!(transport.shutdowns(), 0);

        // The reopened run still streams
        assert!(transport.complete_with_data(&pen_report(5, 6, 7, 0)));
        assert_eq!(registry.sinks()[0].frames(), 1);
    }

    #[test]
    fn test_failure_notice_ignored_after_reopen_and_close() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        transport.fail_next_submit(SubmitError::NoDevice);
        assert!(transport.complete_with_status(TransferStatus::Stall));
        manager.open(KEY).unwrap();
        manager.close(KEY).unwrap();

        // Idle again, but from a later run
        assert!(manager.process_notices().is_empty());
        assert!(manager.contains(KEY));
    }

    #[test]
    fn test_failure_notice_for_detached_device() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        transport.fail_next_submit(SubmitError::NoDevice);
        assert!(transport.complete_with_status(TransferStatus::Stall));
        assert!(manager.detach(KEY));

        assert!(manager.process_notices().is_empty());
        assert_eq!(registry.unregistered(), 1);
    }

    #[test]
    fn test_terminal_status_sends_no_notice() {
        let registry = Arc::new(RecordingRegistry::new());
        let transport = Arc::new(ManualTransport::new());
        let mut manager = manager(&registry, true);
        manager.attach(request(&transport)).unwrap();

        assert!(transport.complete_with_status(TransferStatus::Shutdown));

        assert!(manager.process_notices().is_empty());
        assert_eq!(manager.session_count(), 1);
        assert_eq!(manager.state(KEY), Some(LoopState::Idle));
    }
}
