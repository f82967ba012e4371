//! Self-resubmitting interrupt transfer loop
//!
//! Keeps exactly one transfer in flight while the input handle is open.
//! Every successful completion is decoded, published to the input sink and
//! resubmitted. The completion runs on the transport's thread, concurrently
//! with [`TransferLoop::start`] and [`TransferLoop::stop`]; all three take the
//! same lock for their check-act-update sequences.
//!
//! ```text
//!            start() ok                stop()
//!   Idle ──────────────────► Running ─────────► Stopping
//!    ▲                          │                  │
//!    │  terminal status or      │                  │ next completion
//!    │  resubmit failure        │                  │ (data dropped)
//!    └──────────────────────────┴──────────────────┘
//! ```
//!
//! [`TransferLoop::stop`] returns only once the loop is back in `Idle`, at
//! which point the transfer (and its buffer) is parked in the loop again and
//! no completion can touch it.

use crate::error::{DriverError, Result};
use crate::input::{Axis, InputError, InputSink, Key};
use crate::usb::session::DeviceKey;
use crate::usb::transport::{Completion, SubmitError, Transfer, TransferStatus, Transport};
use async_channel::Sender;
use protocol::{PACKET_LEN, PenEvent, PenState, ProtocolError, RawPacket, ReportFormat, decode_bytes};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// How long `stop()` waits before logging that cancellation is slow
const STOP_WARN_INTERVAL: Duration = Duration::from_secs(2);

/// Transfer loop state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    /// No transfer submitted
    Idle,
    /// One transfer submitted or completing
    Running,
    /// Cancellation requested; the next completion is not resubmitted
    Stopping,
}

impl fmt::Display for LoopState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoopState::Idle => write!(f, "idle"),
            LoopState::Running => write!(f, "running"),
            LoopState::Stopping => write!(f, "stopping"),
        }
    }
}

/// Sent to the session manager when a loop stops on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionNotice {
    /// Resubmission failed; the device has silently stopped reporting
    ///
    /// `generation` identifies the run of the loop that failed, so a notice
    /// drained after the handle was reopened can be told apart.
    TransferFailed {
        key: DeviceKey,
        generation: u64,
        error: SubmitError,
    },
}

#[derive(Debug, Default)]
struct LoopStats {
    completions: AtomicU64,
    frames_published: AtomicU64,
    unrecognized_reports: AtomicU64,
    malformed_reports: AtomicU64,
    transient_errors: AtomicU64,
    resubmit_failures: AtomicU64,
    sink_errors: AtomicU64,
}

/// Point-in-time copy of a loop's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoopStatsSnapshot {
    pub completions: u64,
    pub frames_published: u64,
    pub unrecognized_reports: u64,
    pub malformed_reports: u64,
    pub transient_errors: u64,
    pub resubmit_failures: u64,
    pub sink_errors: u64,
}

impl LoopStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LoopStatsSnapshot {
        LoopStatsSnapshot {
            completions: self.completions.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            unrecognized_reports: self.unrecognized_reports.load(Ordering::Relaxed),
            malformed_reports: self.malformed_reports.load(Ordering::Relaxed),
            transient_errors: self.transient_errors.load(Ordering::Relaxed),
            resubmit_failures: self.resubmit_failures.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

struct LoopInner {
    state: LoopState,
    /// The transfer while it is not in flight
    parked: Option<Transfer>,
    /// Bumped by every successful `start()`
    generation: u64,
}

struct LoopShared {
    key: DeviceKey,
    inner: Mutex<LoopInner>,
    idle: Condvar,
    transport: Arc<dyn Transport>,
    sink: Arc<dyn InputSink>,
    format: &'static dyn ReportFormat,
    notices: Option<Sender<SessionNotice>>,
    stats: LoopStats,
}

/// Submit/resubmit/cancel protocol for one device
pub struct TransferLoop {
    shared: Arc<LoopShared>,
}

impl TransferLoop {
    pub fn new(
        key: DeviceKey,
        transfer: Transfer,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn InputSink>,
        format: &'static dyn ReportFormat,
        notices: Option<Sender<SessionNotice>>,
    ) -> Self {
        Self {
            shared: Arc::new(LoopShared {
                key,
                inner: Mutex::new(LoopInner {
                    state: LoopState::Idle,
                    parked: Some(transfer),
                    generation: 0,
                }),
                idle: Condvar::new(),
                transport,
                sink,
                format,
                notices,
                stats: LoopStats::default(),
            }),
        }
    }

    /// Submit the first transfer
    ///
    /// Allowed only from `Idle`. On submission failure the loop stays `Idle`
    /// and [`DriverError::OpenFailed`] is returned.
    pub fn start(&self) -> Result<()> {
        let mut inner = self.shared.lock();
        if inner.state != LoopState::Idle {
            return Err(DriverError::InvalidState { state: inner.state });
        }
        let Some(mut transfer) = inner.parked.take() else {
            error!("Transfer loop for {} is idle without a transfer", self.shared.key);
            return Err(DriverError::InvalidState { state: inner.state });
        };

        transfer.reset();
        match self
            .shared
            .transport
            .submit(transfer, LoopShared::completion(&self.shared))
        {
            Ok(()) => {
                inner.state = LoopState::Running;
                inner.generation += 1;
                debug!(
                    "Transfer loop for {} started (run {})",
                    self.shared.key, inner.generation
                );
                Ok(())
            }
            Err(failure) => {
                inner.parked = Some(failure.transfer);
                warn!(
                    "Initial submit for {} failed: {}",
                    self.shared.key, failure.error
                );
                Err(DriverError::OpenFailed(failure.error))
            }
        }
    }

    /// Cancel the in-flight transfer and wait until the loop is `Idle`
    ///
    /// No-op from `Idle`. From `Stopping` it waits for the same quiescence.
    /// Must not be called from a completion callback.
    pub fn stop(&self) {
        let mut inner = self.shared.lock();
        match inner.state {
            LoopState::Idle => return,
            LoopState::Running => {
                inner.state = LoopState::Stopping;
                self.shared.transport.cancel();
                debug!("Cancellation requested for {}", self.shared.key);
            }
            LoopState::Stopping => {}
        }

        while inner.state != LoopState::Idle {
            let (guard, timeout) = self
                .shared
                .idle
                .wait_timeout(inner, STOP_WARN_INTERVAL)
                .unwrap_or_else(PoisonError::into_inner);
            inner = guard;
            if timeout.timed_out() && inner.state != LoopState::Idle {
                warn!(
                    "Still waiting for transfer on {} to be cancelled",
                    self.shared.key
                );
            }
        }
        debug!("Transfer loop for {} stopped", self.shared.key);
    }

    pub fn state(&self) -> LoopState {
        self.shared.lock().state
    }

    /// Whether the buffer is parked in the loop (not in flight)
    pub fn has_parked_transfer(&self) -> bool {
        self.shared.lock().parked.is_some()
    }

    pub fn stats(&self) -> LoopStatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Number of successful starts so far
    pub fn generation(&self) -> u64 {
        self.shared.lock().generation
    }

    pub fn key(&self) -> DeviceKey {
        self.shared.key
    }
}

impl Drop for TransferLoop {
    fn drop(&mut self) {
        // The transfer must be back before the buffer can be released
        self.stop();
    }
}

impl LoopShared {
    fn lock(&self) -> MutexGuard<'_, LoopInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn completion(shared: &Arc<LoopShared>) -> Completion {
        let shared = Arc::clone(shared);
        Arc::new(move |transfer| shared.on_complete(transfer))
    }

    fn park(&self, inner: &mut LoopInner, transfer: Transfer) {
        inner.parked = Some(transfer);
        inner.state = LoopState::Idle;
        self.idle.notify_all();
    }

    fn on_complete(self: &Arc<Self>, mut transfer: Transfer) {
        let mut inner = self.lock();
        LoopStats::bump(&self.stats.completions);
        let status = transfer.status().clone();

        match inner.state {
            LoopState::Running => {}
            LoopState::Stopping => {
                debug!(
                    "Completion ({}) for {} after stop request, not resubmitting",
                    status, self.key
                );
                self.park(&mut inner, transfer);
                return;
            }
            LoopState::Idle => {
                warn!("Unexpected completion ({}) for idle loop {}", status, self.key);
                self.park(&mut inner, transfer);
                return;
            }
        }

        match status {
            TransferStatus::Completed => self.handle_report(transfer.data()),
            status if status.is_terminal() => {
                debug!("Transfer for {} shutting down with status: {}", self.key, status);
                self.park(&mut inner, transfer);
                return;
            }
            status => {
                LoopStats::bump(&self.stats.transient_errors);
                warn!("Transfer for {} failed with status: {}, resubmitting", self.key, status);
            }
        }

        transfer.reset();
        if let Err(failure) = self.transport.submit(transfer, Self::completion(self)) {
            LoopStats::bump(&self.stats.resubmit_failures);
            error!("Resubmit for {} failed: {}", self.key, failure.error);
            self.park(&mut inner, failure.transfer);
            self.notify(SessionNotice::TransferFailed {
                key: self.key,
                generation: inner.generation,
                error: failure.error,
            });
        }
    }

    fn notify(&self, notice: SessionNotice) {
        if let Some(notices) = &self.notices
            && let Err(e) = notices.try_send(notice)
        {
            warn!("Failed to deliver session notice: {}", e);
        }
    }

    fn handle_report(&self, data: &[u8]) {
        match decode_report(self.format, data) {
            Ok(PenEvent::PositionPressure(state)) => {
                trace!("{}: {:?}", self.key, state);
                self.publish(&state);
            }
            Ok(PenEvent::Unrecognized { tag }) => {
                LoopStats::bump(&self.stats.unrecognized_reports);
                warn!("{}: received unknown report ({:#04x})", self.key, tag);
            }
            Err(e) => {
                LoopStats::bump(&self.stats.malformed_reports);
                warn!("{}: dropping malformed report: {}", self.key, e);
            }
        }
    }

    /// One position/pressure update, three button updates, then a frame commit
    fn publish(&self, state: &PenState) {
        let sink = &self.sink;
        let result: std::result::Result<(), InputError> = (|| {
            sink.report_abs(Axis::X, i32::from(state.x))?;
            sink.report_abs(Axis::Y, i32::from(state.y))?;
            sink.report_abs(Axis::Pressure, i32::from(state.pressure))?;
            sink.report_key(Key::Left, state.primary_button)?;
            sink.report_key(Key::Button0, state.aux0)?;
            sink.report_key(Key::Button1, state.aux1)?;
            sink.sync()
        })();

        match result {
            Ok(()) => LoopStats::bump(&self.stats.frames_published),
            Err(e) => {
                LoopStats::bump(&self.stats.sink_errors);
                warn!("{}: input sink rejected frame: {}", self.key, e);
            }
        }
    }
}

/// Decode whatever the transport delivered
///
/// Full reports go through the product's format; short reports fall back
/// to the defensive slice decoder, which never reads past the data.
fn decode_report(
    format: &dyn ReportFormat,
    data: &[u8],
) -> std::result::Result<PenEvent, ProtocolError> {
    match data.get(..PACKET_LEN) {
        Some(report) => Ok(format.decode(&RawPacket::from_bytes(report)?)),
        None => decode_bytes(data),
    }
}
