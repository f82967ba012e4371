//! Device writer thread
//!
//! Backends whose device handle has to stay on one thread (uinput) run it on
//! a dedicated writer thread. Sinks only enqueue events, so publishing from a
//! transfer completion never blocks on the kernel. Closing the sink flushes
//! the queue, releases the device and joins the thread.

use super::{Axis, InputError, InputSink, Key};
use async_channel::{Receiver, Sender, TrySendError, bounded};
use std::sync::{Mutex, PoisonError};
use std::thread::JoinHandle;
use tracing::{debug, warn};

/// Events queued per device before frames are dropped
pub const EVENT_QUEUE_DEPTH: usize = 256;

/// One update as it reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Abs(Axis, i32),
    Key(Key, bool),
    Sync,
}

/// Owns a device handle on the writer thread
///
/// Dropping the writer releases the device.
pub trait EventWriter {
    fn write(&mut self, event: DeviceEvent) -> Result<(), InputError>;
}

fn run_writer<W: EventWriter>(mut writer: W, rx: Receiver<DeviceEvent>, phys: &str) {
    // Ends once the channel is closed and drained
    while let Ok(event) = rx.recv_blocking() {
        if let Err(e) = writer.write(event) {
            warn!("{}: {}", phys, e);
        }
    }
    drop(writer);
    debug!("{}: input writer stopped", phys);
}

/// Input sink feeding an [`EventWriter`] on its own thread
pub struct WriterSink {
    phys: String,
    tx: Sender<DeviceEvent>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WriterSink {
    /// Start the writer thread and create the device on it
    ///
    /// Returns once `create` has finished; its error is passed through.
    pub fn spawn<W, F>(phys: &str, create: F) -> Result<Self, InputError>
    where
        W: EventWriter,
        F: FnOnce() -> Result<W, InputError> + Send + 'static,
    {
        let (tx, rx) = bounded(EVENT_QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std::sync::mpsc::channel();
        let thread_phys = phys.to_string();

        let handle = std::thread::Builder::new()
            .name("input-writer".to_string())
            .spawn(move || match create() {
                Ok(writer) => {
                    let _ = ready_tx.send(Ok(()));
                    run_writer(writer, rx, &thread_phys);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| InputError::Register(format!("spawn writer thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .map_err(|_| InputError::Register("writer thread exited".to_string()))
            .and_then(|created| created);
        if let Err(e) = ready {
            let _ = handle.join();
            return Err(e);
        }

        Ok(Self {
            phys: phys.to_string(),
            tx,
            thread: Mutex::new(Some(handle)),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    fn push(&self, event: DeviceEvent) -> Result<(), InputError> {
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(InputError::Write("event queue full".to_string())),
            Err(TrySendError::Closed(_)) => Err(InputError::Write("device closed".to_string())),
        }
    }
}

impl InputSink for WriterSink {
    fn report_abs(&self, axis: Axis, value: i32) -> Result<(), InputError> {
        self.push(DeviceEvent::Abs(axis, value))
    }

    fn report_key(&self, key: Key, pressed: bool) -> Result<(), InputError> {
        self.push(DeviceEvent::Key(key, pressed))
    }

    fn sync(&self) -> Result<(), InputError> {
        self.push(DeviceEvent::Sync)
    }

    /// Write what is queued, release the device and join the writer thread
    fn close(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            return;
        };

        self.tx.close();
        if handle.join().is_err() {
            warn!("{}: input writer panicked", self.phys);
        }
    }
}

impl Drop for WriterSink {
    fn drop(&mut self) {
        self.close();
    }
}
