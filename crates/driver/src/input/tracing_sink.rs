//! Log-only input backend
//!
//! Used when no virtual input device can be created. Each committed frame
//! is emitted as a single `debug` event, so the driver can be exercised
//! without uinput permissions.

use super::{Axis, InputCapabilities, InputError, InputRegistry, InputSink, Key};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

#[derive(Debug, Default, Clone, Copy)]
struct PendingFrame {
    x: Option<i32>,
    y: Option<i32>,
    pressure: Option<i32>,
    left: Option<bool>,
    button0: Option<bool>,
    button1: Option<bool>,
    tool_pen: Option<bool>,
}

/// Input sink that writes committed frames to the log
pub struct TracingSink {
    name: String,
    phys: String,
    pending: Mutex<PendingFrame>,
    frames: AtomicU64,
}

impl TracingSink {
    pub fn new(capabilities: &InputCapabilities) -> Self {
        Self {
            name: capabilities.name.clone(),
            phys: capabilities.phys.clone(),
            pending: Mutex::new(PendingFrame::default()),
            frames: AtomicU64::new(0),
        }
    }

    /// Frames committed so far
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}

impl InputSink for TracingSink {
    fn report_abs(&self, axis: Axis, value: i32) -> Result<(), InputError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match axis {
            Axis::X => pending.x = Some(value),
            Axis::Y => pending.y = Some(value),
            Axis::Pressure => pending.pressure = Some(value),
        }
        Ok(())
    }

    fn report_key(&self, key: Key, pressed: bool) -> Result<(), InputError> {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        match key {
            Key::ToolPen => pending.tool_pen = Some(pressed),
            Key::Left => pending.left = Some(pressed),
            Key::Button0 => pending.button0 = Some(pressed),
            Key::Button1 => pending.button1 = Some(pressed),
        }
        Ok(())
    }

    fn sync(&self) -> Result<(), InputError> {
        let frame = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let seq = self.frames.fetch_add(1, Ordering::Relaxed);
        debug!(
            phys = %self.phys,
            seq,
            x = ?frame.x,
            y = ?frame.y,
            pressure = ?frame.pressure,
            left = ?frame.left,
            button0 = ?frame.button0,
            button1 = ?frame.button1,
            tool_pen = ?frame.tool_pen,
            "{}: frame",
            self.name
        );
        Ok(())
    }
}

/// Registry handing out [`TracingSink`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRegistry;

impl InputRegistry for TracingRegistry {
    fn register(&self, capabilities: &InputCapabilities) -> Result<Arc<dyn InputSink>, InputError> {
        info!(
            "Registered input device \"{}\" at {} ({} keys, {} axes)",
            capabilities.name,
            capabilities.phys,
            capabilities.keys.len(),
            capabilities.axes.len()
        );
        Ok(Arc::new(TracingSink::new(capabilities)))
    }

    fn unregister(&self, sink: &Arc<dyn InputSink>) {
        sink.close();
        info!("Unregistered input device");
    }
}
