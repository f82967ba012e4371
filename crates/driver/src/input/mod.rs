//! Input sink seam
//!
//! Decoded pen state is published to an input stack through [`InputSink`].
//! Capabilities are declared once through [`InputRegistry::register`] and
//! never change for the lifetime of the sink.

pub mod tracing_sink;
#[cfg(all(feature = "uinput", target_os = "linux"))]
pub mod uinput;
pub mod writer;

use protocol::{MAX_ABS_X, MAX_ABS_Y, MAX_PRESSURE, UsbId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

pub use tracing_sink::{TracingRegistry, TracingSink};
#[cfg(all(feature = "uinput", target_os = "linux"))]
pub use uinput::UinputRegistry;

/// Absolute axes the tablet reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Axis {
    X,
    Y,
    Pressure,
}

/// Keys and buttons the tablet reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Key {
    /// Pen tool in proximity
    ToolPen,
    /// Primary button (pen tip)
    Left,
    /// First auxiliary button
    Button0,
    /// Second auxiliary button
    Button1,
}

/// Auxiliary buttons reported on every tablet
pub const EXTRA_BUTTONS: [Key; 2] = [Key::Button0, Key::Button1];

/// Range declaration for one absolute axis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbsAxisInfo {
    pub axis: Axis,
    pub min: i32,
    pub max: i32,
    pub fuzz: i32,
    pub flat: i32,
}

/// Everything the input stack needs to know to register the device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputCapabilities {
    pub name: String,
    pub phys: String,
    pub id: UsbId,
    pub keys: Vec<Key>,
    pub axes: Vec<AbsAxisInfo>,
}

impl InputCapabilities {
    pub fn axis(&self, axis: Axis) -> Option<&AbsAxisInfo> {
        self.axes.iter().find(|info| info.axis == axis)
    }

    pub fn has_key(&self, key: Key) -> bool {
        self.keys.contains(&key)
    }
}

/// Capabilities of the pen tablet: pen tool, primary button, the extra
/// buttons, X/Y position and pressure
pub fn tablet_capabilities(name: &str, phys: &str, id: UsbId) -> InputCapabilities {
    let mut keys = vec![Key::ToolPen, Key::Left];
    keys.extend_from_slice(&EXTRA_BUTTONS);

    InputCapabilities {
        name: name.to_string(),
        phys: phys.to_string(),
        id,
        keys,
        axes: vec![
            AbsAxisInfo {
                axis: Axis::X,
                min: 0,
                max: i32::from(MAX_ABS_X),
                fuzz: 4,
                flat: 0,
            },
            AbsAxisInfo {
                axis: Axis::Y,
                min: 0,
                max: i32::from(MAX_ABS_Y),
                fuzz: 4,
                flat: 0,
            },
            AbsAxisInfo {
                axis: Axis::Pressure,
                min: 0,
                max: i32::from(MAX_PRESSURE),
                fuzz: 0,
                flat: 0,
            },
        ],
    }
}

/// Input stack errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("Failed to register input device: {0}")]
    Register(String),

    #[error("Failed to write input event: {0}")]
    Write(String),

    #[error("Unsupported input backend: {0}")]
    Unsupported(String),
}

/// Receives per-field updates and frame commits for one device
///
/// Updates become visible to consumers atomically on [`InputSink::sync`].
pub trait InputSink: Send + Sync {
    fn report_abs(&self, axis: Axis, value: i32) -> Result<(), InputError>;

    fn report_key(&self, key: Key, pressed: bool) -> Result<(), InputError>;

    /// Commit the pending updates as one frame
    fn sync(&self) -> Result<(), InputError>;

    /// Release the device; later writes fail
    ///
    /// Called by [`InputRegistry::unregister`]. Must be idempotent.
    fn close(&self) {}
}

/// Creates and destroys input devices
pub trait InputRegistry: Send + Sync {
    fn register(&self, capabilities: &InputCapabilities) -> Result<Arc<dyn InputSink>, InputError>;

    /// Destroy the device behind `sink`
    ///
    /// Returns once the device is gone, even if other references to the sink
    /// are still alive.
    fn unregister(&self, sink: &Arc<dyn InputSink>);
}

/// Where decoded frames go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputBackend {
    /// Log frames only
    #[default]
    Tracing,
    /// Virtual evdev device through uinput
    Uinput,
}

impl fmt::Display for InputBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputBackend::Tracing => write!(f, "tracing"),
            InputBackend::Uinput => write!(f, "uinput"),
        }
    }
}

/// Build the registry for `backend`
pub fn registry_for_backend(backend: InputBackend) -> Result<Arc<dyn InputRegistry>, InputError> {
    match backend {
        InputBackend::Tracing => Ok(Arc::new(TracingRegistry)),
        #[cfg(all(feature = "uinput", target_os = "linux"))]
        InputBackend::Uinput => Ok(Arc::new(UinputRegistry)),
        #[cfg(not(all(feature = "uinput", target_os = "linux")))]
        InputBackend::Uinput => Err(InputError::Unsupported(
            "uinput (built without the `uinput` feature)".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tablet_capabilities() {
        let caps = tablet_capabilities("xp-pen", "usb-001-1/input0", UsbId::G540);

        assert!(caps.has_key(Key::ToolPen));
        assert!(caps.has_key(Key::Left));
        assert!(caps.has_key(Key::Button0));
        assert!(caps.has_key(Key::Button1));
        assert_eq!(caps.keys.len(), 4);

        let x = caps.axis(Axis::X).unwrap();
        assert_eq!((x.min, x.max, x.fuzz), (0, 0x7fff, 4));
        let y = caps.axis(Axis::Y).unwrap();
        assert_eq!((y.min, y.max, y.fuzz), (0, 0x7fff, 4));
        let pressure = caps.axis(Axis::Pressure).unwrap();
        assert_eq!((pressure.min, pressure.max, pressure.fuzz), (0, 0x07ff, 0));
    }

    #[test]
    fn test_capabilities_are_deterministic() {
        let a = tablet_capabilities("a", "p", UsbId::G540);
        let b = tablet_capabilities("a", "p", UsbId::G540);
        assert_eq!(a, b);
    }

    #[test]
    fn test_backend_serde_names() {
        assert_eq!(InputBackend::default(), InputBackend::Tracing);
        assert_eq!(InputBackend::Uinput.to_string(), "uinput");
        assert!(registry_for_backend(InputBackend::Tracing).is_ok());
    }

    #[cfg(not(feature = "uinput"))]
    #[test]
    fn test_uinput_backend_unavailable() {
        assert!(matches!(
            registry_for_backend(InputBackend::Uinput),
            Err(InputError::Unsupported(_))
        ));
    }
}
