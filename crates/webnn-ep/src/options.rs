use serde::{Deserialize, Serialize};

use crate::env;

pub const DEVICE_FLAG_USE_NONE: u32 = 0x000;
pub const DEVICE_FLAG_USE_GPU: u32 = 0x001;
pub const DEVICE_FLAG_USE_CPU: u32 = 0x002;

pub const POWER_FLAG_USE_NONE: u32 = 0x000;
pub const POWER_FLAG_USE_HIGH_PERFORMANCE: u32 = 0x001;
pub const POWER_FLAG_USE_LOW_POWER: u32 = 0x002;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DevicePreference {
    #[default]
    Default,
    Gpu,
    Cpu,
}

impl DevicePreference {
    /// Only an exact flag word selects a device; anything else falls back to `Default`.
    pub fn from_flags(flags: u32) -> Self {
        match flags {
            DEVICE_FLAG_USE_GPU => DevicePreference::Gpu,
            DEVICE_FLAG_USE_CPU => DevicePreference::Cpu,
            _ => DevicePreference::Default,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "default" => Some(DevicePreference::Default),
            "gpu" => Some(DevicePreference::Gpu),
            "cpu" => Some(DevicePreference::Cpu),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerPreference {
    #[default]
    Default,
    HighPerformance,
    LowPower,
}

impl PowerPreference {
    pub fn from_flags(flags: u32) -> Self {
        match flags {
            POWER_FLAG_USE_HIGH_PERFORMANCE => PowerPreference::HighPerformance,
            POWER_FLAG_USE_LOW_POWER => PowerPreference::LowPower,
            _ => PowerPreference::Default,
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace(&['-', '_'][..], "").as_str() {
            "default" => Some(PowerPreference::Default),
            "highperformance" | "high" => Some(PowerPreference::HighPerformance),
            "lowpower" | "low" => Some(PowerPreference::LowPower),
            _ => None,
        }
    }
}

/// Device class used by support checks (float16 is GPU-only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Cpu,
    Gpu,
}

/// Preferences forwarded to backend context creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextOptions {
    #[serde(default)]
    pub device_preference: DevicePreference,
    #[serde(default)]
    pub power_preference: PowerPreference,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderOptions {
    #[serde(flatten)]
    pub context: ContextOptions,
}

impl ProviderOptions {
    pub fn from_flags(device_flags: u32, power_flags: u32) -> Self {
        Self {
            context: ContextOptions {
                device_preference: DevicePreference::from_flags(device_flags),
                power_preference: PowerPreference::from_flags(power_flags),
            },
        }
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Applies `WEBNN_EP_DEVICE` / `WEBNN_EP_POWER` when they are set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(device) = env::device_override() {
            self.context.device_preference = device;
        }
        if let Some(power) = env::power_override() {
            self.context.power_preference = power;
        }
        self
    }

    pub fn context_options(&self) -> ContextOptions {
        self.context
    }

    /// Only an explicit GPU preference enables GPU-only data types.
    pub fn device_type(&self) -> DeviceType {
        match self.context.device_preference {
            DevicePreference::Gpu => DeviceType::Gpu,
            DevicePreference::Cpu | DevicePreference::Default => DeviceType::Cpu,
        }
    }
}
