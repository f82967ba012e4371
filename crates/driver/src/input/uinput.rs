//! uinput backend (Linux, `uinput` feature)
//!
//! Each registered tablet gets a virtual evdev device, created and written
//! on the device's [`WriterSink`] thread.

use super::writer::{DeviceEvent, EventWriter, WriterSink};
use super::{AbsAxisInfo, Axis, InputCapabilities, InputError, InputRegistry, InputSink, Key};
use evdev_rs::enums::{EV_ABS, EV_KEY, EV_SYN, EventCode, EventType, InputProp};
use evdev_rs::{AbsInfo, DeviceWrapper, EnableCodeData, InputEvent, TimeVal, UInputDevice, UninitDevice};
use std::sync::Arc;
use tracing::info;

/// Linux `BUS_USB`
const BUS_USB: u16 = 0x03;

fn axis_code(axis: Axis) -> EventCode {
    match axis {
        Axis::X => EventCode::EV_ABS(EV_ABS::ABS_X),
        Axis::Y => EventCode::EV_ABS(EV_ABS::ABS_Y),
        Axis::Pressure => EventCode::EV_ABS(EV_ABS::ABS_PRESSURE),
    }
}

fn key_code(key: Key) -> EventCode {
    match key {
        Key::ToolPen => EventCode::EV_KEY(EV_KEY::BTN_TOOL_PEN),
        Key::Left => EventCode::EV_KEY(EV_KEY::BTN_LEFT),
        Key::Button0 => EventCode::EV_KEY(EV_KEY::BTN_0),
        Key::Button1 => EventCode::EV_KEY(EV_KEY::BTN_1),
    }
}

fn abs_info(info: &AbsAxisInfo) -> AbsInfo {
    AbsInfo {
        value: 0,
        minimum: info.min,
        maximum: info.max,
        fuzz: info.fuzz,
        flat: info.flat,
        resolution: 0,
    }
}

fn create_device(capabilities: &InputCapabilities) -> Result<UInputDevice, InputError> {
    let ud = UninitDevice::new()
        .ok_or_else(|| InputError::Register("libevdev allocation failed".to_string()))?;
    ud.set_name(&capabilities.name);
    ud.set_phys(&capabilities.phys);
    ud.set_bustype(BUS_USB);
    ud.set_vendor_id(capabilities.id.vendor_id);
    ud.set_product_id(capabilities.id.product_id);

    ud.enable_event_type(&EventType::EV_SYN)
        .map_err(|e| InputError::Register(format!("enable EV_SYN: {}", e)))?;
    ud.enable_event_type(&EventType::EV_KEY)
        .map_err(|e| InputError::Register(format!("enable EV_KEY: {}", e)))?;
    ud.enable_event_type(&EventType::EV_ABS)
        .map_err(|e| InputError::Register(format!("enable EV_ABS: {}", e)))?;
    ud.enable_property(&InputProp::INPUT_PROP_POINTER)
        .map_err(|e| InputError::Register(format!("enable INPUT_PROP_POINTER: {}", e)))?;

    for key in &capabilities.keys {
        ud.enable_event_code(&key_code(*key), None)
            .map_err(|e| InputError::Register(format!("enable {:?}: {}", key, e)))?;
    }
    for info in &capabilities.axes {
        ud.enable_event_code(
            &axis_code(info.axis),
            Some(EnableCodeData::AbsInfo(abs_info(info))),
        )
        .map_err(|e| InputError::Register(format!("enable {:?}: {}", info.axis, e)))?;
    }

    UInputDevice::create_from_device(&ud)
        .map_err(|e| InputError::Register(format!("create uinput device: {}", e)))
}

/// Writes events to one uinput device; dropping it destroys the device
struct UinputWriter {
    device: UInputDevice,
    time: TimeVal,
}

impl UinputWriter {
    fn create(capabilities: &InputCapabilities) -> Result<Self, InputError> {
        Ok(Self {
            device: create_device(capabilities)?,
            time: TimeVal::new(0, 0),
        })
    }
}

impl EventWriter for UinputWriter {
    fn write(&mut self, event: DeviceEvent) -> Result<(), InputError> {
        let (code, value) = match event {
            DeviceEvent::Abs(axis, value) => (axis_code(axis), value),
            DeviceEvent::Key(key, pressed) => (key_code(key), i32::from(pressed)),
            DeviceEvent::Sync => (EventCode::EV_SYN(EV_SYN::SYN_REPORT), 0),
        };
        self.device
            .write_event(&InputEvent::new(&self.time, &code, value))
            .map_err(|e| InputError::Write(format!("uinput write: {}", e)))
    }
}

/// Registry creating one uinput device per tablet
#[derive(Debug, Default, Clone, Copy)]
pub struct UinputRegistry;

impl InputRegistry for UinputRegistry {
    fn register(&self, capabilities: &InputCapabilities) -> Result<Arc<dyn InputSink>, InputError> {
        let caps = capabilities.clone();
        let sink = WriterSink::spawn(&capabilities.phys, move || UinputWriter::create(&caps))?;

        info!(
            "Registered uinput device \"{}\" at {}",
            capabilities.name, capabilities.phys
        );
        Ok(Arc::new(sink))
    }

    fn unregister(&self, sink: &Arc<dyn InputSink>) {
        sink.close();
        info!("Unregistered uinput device");
    }
}
