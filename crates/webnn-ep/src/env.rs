use std::env;
use std::sync::OnceLock;

use crate::options::{DevicePreference, PowerPreference};

static WEBNN_EP_DEVICE: OnceLock<Option<DevicePreference>> = OnceLock::new();
static WEBNN_EP_POWER: OnceLock<Option<PowerPreference>> = OnceLock::new();

fn read_var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value),
        _ => None,
    }
}

pub(crate) fn device_override() -> Option<DevicePreference> {
    *WEBNN_EP_DEVICE.get_or_init(|| {
        let value = read_var("WEBNN_EP_DEVICE")?;
        let parsed = DevicePreference::parse(&value);
        if parsed.is_none() {
            log::warn!("ignoring unrecognised WEBNN_EP_DEVICE value '{value}'");
        }
        parsed
    })
}

pub(crate) fn power_override() -> Option<PowerPreference> {
    *WEBNN_EP_POWER.get_or_init(|| {
        let value = read_var("WEBNN_EP_POWER")?;
        let parsed = PowerPreference::parse(&value);
        if parsed.is_none() {
            log::warn!("ignoring unrecognised WEBNN_EP_POWER value '{value}'");
        }
        parsed
    })
}
