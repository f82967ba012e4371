//! In-memory transport and input doubles
//!
//! [`ManualTransport`] holds the in-flight transfer until a test fires its
//! completion, from the test thread or any other. [`RecordingRegistry`] and
//! [`RecordingSink`] record every call so frames can be asserted exactly.
//! Lifecycle calls can be logged in order to a shared [`Journal`].

use crate::input::{Axis, InputCapabilities, InputError, InputRegistry, InputSink, Key};
use crate::usb::transport::{
    Completion, SubmitError, SubmitFailure, Transfer, TransferStatus, Transport,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Shared, ordered log of lifecycle calls across doubles
pub type Journal = Arc<Mutex<Vec<&'static str>>>;

fn record(journal: &Option<Journal>, entry: &'static str) {
    if let Some(journal) = journal {
        journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
    }
}

struct ManualState {
    pending: Option<(Transfer, Completion)>,
    fail_next: Option<SubmitError>,
    fail_all: Option<SubmitError>,
    complete_on_cancel: bool,
    shut_down: bool,
    submissions: usize,
    cancellations: usize,
    shutdowns: usize,
}

impl Default for ManualState {
    fn default() -> Self {
        Self {
            pending: None,
            fail_next: None,
            fail_all: None,
            complete_on_cancel: true,
            shut_down: false,
            submissions: 0,
            cancellations: 0,
            shutdowns: 0,
        }
    }
}

/// Transport whose completions are fired by hand
#[derive(Default)]
pub struct ManualTransport {
    state: Mutex<ManualState>,
    journal: Option<Journal>,
}

impl ManualTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `submit`, `cancel` and `shutdown` in `journal`
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Mutex::default(),
            journal: Some(journal),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Refuse the next submission with `error`
    pub fn fail_next_submit(&self, error: SubmitError) {
        self.lock().fail_next = Some(error);
    }

    /// Refuse every submission with `error` until cleared
    pub fn fail_all_submits(&self, error: Option<SubmitError>) {
        self.lock().fail_all = error;
    }

    /// Complete the pending transfer as `Cancelled` from a helper thread
    /// whenever `cancel` is called (the default)
    pub fn set_complete_on_cancel(&self, enabled: bool) {
        self.lock().complete_on_cancel = enabled;
    }

    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    pub fn cancellations(&self) -> usize {
        self.lock().cancellations
    }

    pub fn shutdowns(&self) -> usize {
        self.lock().shutdowns
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Deliver `data` to the pending transfer
    ///
    /// Returns `false` when nothing was in flight.
    pub fn complete_with_data(&self, data: &[u8]) -> bool {
        self.fire(|transfer| {
            let buffer = transfer.buffer_mut();
            let len = data.len().min(buffer.len());
            buffer[..len].copy_from_slice(&data[..len]);
            transfer.complete(TransferStatus::Completed, len);
        })
    }

    /// Complete the pending transfer with `status` and no data
    pub fn complete_with_status(&self, status: TransferStatus) -> bool {
        self.fire(|transfer| transfer.complete(status, 0))
    }

    fn fire(&self, fill: impl FnOnce(&mut Transfer)) -> bool {
        // The lock must be released before the completion runs, it may resubmit
        let Some((mut transfer, complete)) = self.lock().pending.take() else {
            return false;
        };
        fill(&mut transfer);
        complete(transfer);
        true
    }
}

impl Transport for ManualTransport {
    fn submit(&self, transfer: Transfer, complete: Completion) -> Result<(), SubmitFailure> {
        let mut state = self.lock();
        let refused = if state.shut_down {
            Some(SubmitError::ShutDown)
        } else if let Some(error) = state.fail_next.take() {
            Some(error)
        } else if let Some(error) = state.fail_all.clone() {
            Some(error)
        } else if state.pending.is_some() {
            Some(SubmitError::Busy)
        } else {
            None
        };
        if let Some(error) = refused {
            return Err(SubmitFailure { error, transfer });
        }

        state.pending = Some((transfer, complete));
        state.submissions += 1;
        drop(state);
        record(&self.journal, "submit");
        Ok(())
    }

    fn cancel(&self) {
        let mut state = self.lock();
        state.cancellations += 1;
        let pending = if state.complete_on_cancel {
            state.pending.take()
        } else {
            None
        };
        drop(state);
        record(&self.journal, "cancel");

        if let Some((mut transfer, complete)) = pending {
            std::thread::spawn(move || {
                transfer.complete(TransferStatus::Cancelled, 0);
                complete(transfer);
            });
        }
    }

    fn shutdown(&self) {
        let mut state = self.lock();
        state.shut_down = true;
        state.shutdowns += 1;
        drop(state);
        record(&self.journal, "shutdown");
    }
}

/// One call received by a [`RecordingSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkCall {
    Abs(Axis, i32),
    Key(Key, bool),
    Sync,
}

/// Input sink that records every call
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<SinkCall>>,
    fail_writes: Mutex<bool>,
    closed: AtomicBool,
    journal: Option<Journal>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `close` in `journal`
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            journal: Some(journal),
            ..Self::default()
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of committed frames
    pub fn frames(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| **call == SinkCall::Sync)
            .count()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        *self.fail_writes.lock().unwrap_or_else(PoisonError::into_inner) = fail;
    }

    fn push(&self, call: SinkCall) -> Result<(), InputError> {
        if self.is_closed() {
            return Err(InputError::Write("device closed".to_string()));
        }
        if *self.fail_writes.lock().unwrap_or_else(PoisonError::into_inner) {
            return Err(InputError::Write("sink rejects writes".to_string()));
        }
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        Ok(())
    }
}

impl InputSink for RecordingSink {
    fn report_abs(&self, axis: Axis, value: i32) -> Result<(), InputError> {
        self.push(SinkCall::Abs(axis, value))
    }

    fn report_key(&self, key: Key, pressed: bool) -> Result<(), InputError> {
        self.push(SinkCall::Key(key, pressed))
    }

    fn sync(&self) -> Result<(), InputError> {
        self.push(SinkCall::Sync)
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            record(&self.journal, "close");
        }
    }
}

#[derive(Debug, Default)]
struct RegistryState {
    registered: Vec<InputCapabilities>,
    sinks: Vec<Arc<RecordingSink>>,
    unregistered: usize,
    fail_register: bool,
}

/// Registry handing out [`RecordingSink`]s
#[derive(Debug, Default)]
pub struct RecordingRegistry {
    state: Mutex<RegistryState>,
    journal: Option<Journal>,
}

impl RecordingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `register` and `unregister` in `journal`, and `close` for
    /// every sink handed out
    pub fn with_journal(journal: Journal) -> Self {
        Self {
            state: Mutex::default(),
            journal: Some(journal),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.lock().fail_register = fail;
    }

    /// Capabilities of every successful registration, in order
    pub fn registered(&self) -> Vec<InputCapabilities> {
        self.lock().registered.clone()
    }

    /// Sinks handed out so far, in order
    pub fn sinks(&self) -> Vec<Arc<RecordingSink>> {
        self.lock().sinks.clone()
    }

    pub fn unregistered(&self) -> usize {
        self.lock().unregistered
    }
}

impl InputRegistry for RecordingRegistry {
    fn register(&self, capabilities: &InputCapabilities) -> Result<Arc<dyn InputSink>, InputError> {
        let mut state = self.lock();
        if state.fail_register {
            return Err(InputError::Register("registration refused".to_string()));
        }
        let sink = Arc::new(match &self.journal {
            Some(journal) => RecordingSink::with_journal(Arc::clone(journal)),
            None => RecordingSink::new(),
        });
        state.registered.push(capabilities.clone());
        state.sinks.push(Arc::clone(&sink));
        drop(state);
        record(&self.journal, "register");
        Ok(sink)
    }

    fn unregister(&self, sink: &Arc<dyn InputSink>) {
        sink.close();
        self.lock().unregistered += 1;
        record(&self.journal, "unregister");
    }
}
