use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::gradient::GradientSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RelayState {
    On,
    Off,
}

impl RelayState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WaterLevel {
    /// Water level is adequate.
    Ok,
    /// Water level is too low.
    Low,
}

impl WaterLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "OK",
            Self::Low => "LOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AutomationMode {
    Auto,
    Manual,
    Disabled,
}

impl AutomationMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "AUTO",
            Self::Manual => "MANUAL",
            Self::Disabled => "DISABLED",
        }
    }
}

/// The closed set of background animation slots. One task per name; a
/// restart under the same name replaces the previous run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationName {
    Sunrise,
    Sunset,
    GradientShift,
    GradientPulse,
    GradientRainbow,
}

impl AnimationName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sunrise => "sunrise",
            Self::Sunset => "sunset",
            Self::GradientShift => "gradient_shift",
            Self::GradientPulse => "gradient_pulse",
            Self::GradientRainbow => "gradient_rainbow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedMode {
    Off,
    Rgb,
    Hsv,
    GradientStatic,
    GradientAnimated,
    Sunrise,
    Sunset,
}

impl LedMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Rgb => "rgb",
            Self::Hsv => "hsv",
            Self::GradientStatic => "gradient_static",
            Self::GradientAnimated => "gradient_animated",
            Self::Sunrise => "sunrise",
            Self::Sunset => "sunset",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    pub id: String,
    pub name: String,
    #[serde(rename = "gpioPin")]
    pub gpio_pin: u8,
    #[serde(rename = "activeLow")]
    pub active_low: bool,
    pub state: RelayState,
    #[serde(rename = "defaultState")]
    pub default_state: RelayState,
    #[serde(rename = "maxOnTime")]
    pub max_on_time_s: u64,
    #[serde(rename = "autoShutoffEnabled")]
    pub auto_shutoff_enabled: bool,
    #[serde(rename = "timeRemaining", skip_serializing_if = "Option::is_none")]
    pub time_remaining_s: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WaterLevelInfo {
    #[serde(rename = "gpioPin")]
    pub gpio_pin: u8,
    #[serde(rename = "activeHigh")]
    pub active_high: bool,
    #[serde(rename = "currentLevel")]
    pub current_level: WaterLevel,
    #[serde(rename = "lastChange")]
    pub last_change: DateTime<Utc>,
    #[serde(rename = "gpioState")]
    pub gpio_state: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    TurnOn,
    TurnOff,
}

#[derive(Debug, Clone, Serialize)]
pub struct PumpStatus {
    pub mode: AutomationMode,
    #[serde(rename = "waterLevel")]
    pub water_level: WaterLevel,
    #[serde(rename = "pumpState")]
    pub pump_state: RelayState,
    #[serde(rename = "pumpRelayId")]
    pub pump_relay_id: String,
    #[serde(rename = "onInterval")]
    pub on_interval_s: u64,
    #[serde(rename = "offInterval")]
    pub off_interval_s: u64,
    #[serde(rename = "maxRuntime")]
    pub max_runtime_s: u64,
    #[serde(rename = "cycleCount")]
    pub cycle_count: u64,
    #[serde(rename = "totalRuntime")]
    pub total_runtime_s: f32,
    #[serde(rename = "automationActive")]
    pub automation_active: bool,
    #[serde(rename = "currentRuntime", skip_serializing_if = "Option::is_none")]
    pub current_runtime_s: Option<f32>,
    #[serde(rename = "runtimeRemaining", skip_serializing_if = "Option::is_none")]
    pub runtime_remaining_s: Option<f32>,
    #[serde(rename = "nextAction")]
    pub next_action: NextAction,
    #[serde(rename = "nextActionIn")]
    pub next_action_in_s: f32,
}

/// Last-known-good LED snapshot read by the HTTP/MQTT reporting layer.
#[derive(Debug, Clone, Serialize)]
pub struct LedStatePayload {
    pub mode: LedMode,
    pub rgb: (u8, u8, u8),
    pub brightness: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gradient: Option<GradientSpec>,
    #[serde(rename = "activeAnimation")]
    pub active_animation: Option<AnimationName>,
    #[serde(rename = "lastUpdated")]
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn enums_serialize_as_wire_strings() {
        assert_eq!(serde_json::to_string(&RelayState::On).unwrap(), "\"ON\"");
        assert_eq!(serde_json::to_string(&WaterLevel::Low).unwrap(), "\"LOW\"");
        assert_eq!(
            serde_json::to_string(&AutomationMode::Disabled).unwrap(),
            "\"DISABLED\""
        );
        assert_eq!(
            serde_json::to_string(&AnimationName::GradientPulse).unwrap(),
            "\"gradient_pulse\""
        );
    }

    #[test]
    fn automation_mode_parses_from_command_payloads() {
        let mode: AutomationMode = serde_json::from_str("\"MANUAL\"").unwrap();
        assert_eq!(mode, AutomationMode::Manual);
        assert!(serde_json::from_str::<AutomationMode>("\"PAUSED\"").is_err());
    }
}
