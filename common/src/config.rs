use serde::{Deserialize, Serialize};

use crate::types::RelayState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedConfig {
    pub count: usize,
    pub gpio_pin: u8,
    pub freq_hz: u32,
    pub dma: u8,
    pub channel: u8,
    pub gamma: f32,
    pub fps: u32,
}

impl Default for LedConfig {
    fn default() -> Self {
        Self {
            count: 30,
            gpio_pin: 18,
            freq_hz: 800_000,
            dma: 10,
            channel: 0,
            gamma: 2.2,
            fps: 25,
        }
    }
}

impl LedConfig {
    pub fn sanitize(&mut self) {
        self.count = self.count.max(1);
        self.fps = self.fps.clamp(1, 120);
        self.gamma = self.gamma.clamp(1.0, 4.0);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    pub id: String,
    pub name: String,
    pub gpio_pin: u8,
    #[serde(default = "default_true")]
    pub active_low: bool,
    #[serde(default = "default_relay_state")]
    pub default_state: RelayState,
    /// Maximum ON time in seconds; 0 disables the auto-shutoff.
    #[serde(default)]
    pub max_on_time_s: u64,
}

fn default_true() -> bool {
    true
}

fn default_relay_state() -> RelayState {
    RelayState::Off
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaterLevelConfig {
    pub gpio_pin: u8,
    pub active_high: bool,
    pub debounce_ms: u64,
    pub poll_ms: u64,
}

impl Default for WaterLevelConfig {
    fn default() -> Self {
        Self {
            gpio_pin: 17,
            active_high: true,
            debounce_ms: 500,
            poll_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumpConfig {
    pub relay_id: String,
    pub on_interval_s: u64,
    pub off_interval_s: u64,
    /// Continuous-ON ceiling before the safety shutoff disables automation.
    pub max_runtime_s: u64,
    pub loop_interval_ms: u64,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            relay_id: "pump".to_string(),
            on_interval_s: 30,
            off_interval_s: 30,
            max_runtime_s: 300,
            loop_interval_ms: 1_000,
        }
    }
}

impl PumpConfig {
    pub fn sanitize(&mut self) {
        self.on_interval_s = self.on_interval_s.max(1);
        self.off_interval_s = self.off_interval_s.max(1);
        self.max_runtime_s = self.max_runtime_s.max(self.on_interval_s);
        self.loop_interval_ms = self.loop_interval_ms.clamp(100, 10_000);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemperatureUnit {
    Celsius,
    Fahrenheit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemperatureConfig {
    pub enabled: bool,
    /// Explicit sensor ids; empty list enables auto-discovery.
    pub sensor_ids: Vec<String>,
    pub update_interval_s: u64,
    pub w1_base_dir: String,
    pub unit: TemperatureUnit,
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sensor_ids: Vec::new(),
            update_interval_s: 60,
            w1_base_dir: "/sys/bus/w1/devices/".to_string(),
            unit: TemperatureUnit::Celsius,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "hydrosense".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub led: LedConfig,
    pub relays: Vec<RelayConfig>,
    pub water_level: WaterLevelConfig,
    pub pump: PumpConfig,
    pub temperature: TemperatureConfig,
    pub mqtt: MqttConfig,
    pub http_port: u16,
    pub relay_watchdog_interval_s: u64,
    pub relay_watchdog_enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            led: LedConfig::default(),
            relays: vec![RelayConfig {
                id: "pump".to_string(),
                name: "Refill pump".to_string(),
                gpio_pin: 26,
                active_low: true,
                default_state: RelayState::Off,
                max_on_time_s: 600,
            }],
            water_level: WaterLevelConfig::default(),
            pump: PumpConfig::default(),
            temperature: TemperatureConfig::default(),
            mqtt: MqttConfig::default(),
            http_port: 8080,
            relay_watchdog_interval_s: 10,
            relay_watchdog_enabled: true,
        }
    }
}

impl RuntimeConfig {
    pub fn sanitize(&mut self) {
        self.led.sanitize();
        self.pump.sanitize();
        self.water_level.debounce_ms = self.water_level.debounce_ms.max(50);
        self.water_level.poll_ms = self.water_level.poll_ms.clamp(20, 1_000);
        self.relay_watchdog_interval_s = self.relay_watchdog_interval_s.clamp(1, 300);
        if self.http_port == 0 {
            self.http_port = 8080;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sanitize_repairs_out_of_range_values() {
        let mut config = RuntimeConfig::default();
        config.led.count = 0;
        config.led.fps = 500;
        config.pump.on_interval_s = 0;
        config.pump.max_runtime_s = 0;
        config.water_level.poll_ms = 5;
        config.http_port = 0;

        config.sanitize();

        assert_eq!(config.led.count, 1);
        assert_eq!(config.led.fps, 120);
        assert_eq!(config.pump.on_interval_s, 1);
        assert!(config.pump.max_runtime_s >= config.pump.on_interval_s);
        assert_eq!(config.water_level.poll_ms, 20);
        assert_eq!(config.http_port, 8080);
    }

    #[test]
    fn default_config_round_trips_through_json() {
        let config = RuntimeConfig::default();
        let raw = serde_json::to_string_pretty(&config).unwrap();
        let parsed: RuntimeConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.relays.len(), 1);
        assert_eq!(parsed.relays[0].id, "pump");
        assert_eq!(parsed.pump.relay_id, "pump");
    }
}
