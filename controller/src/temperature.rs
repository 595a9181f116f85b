//! DS18B20 temperature probes over the kernel's 1-Wire sysfs interface.
//!
//! Each probe appears as `<base_dir>/28-xxxxxxxxxxxx/w1_slave`, a two-line
//! file: a CRC status line ending in `YES` and a payload line carrying
//! `t=<millidegrees C>`.

use std::{
    collections::HashMap,
    fs,
    path::PathBuf,
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{task::JoinHandle, time::sleep};
use tracing::{debug, info, warn};

use hydrosense_common::TemperatureConfig;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemperatureReading {
    pub sensor_id: String,
    pub celsius: f32,
    pub fahrenheit: f32,
    pub timestamp: DateTime<Utc>,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TemperatureReading {
    fn invalid(sensor_id: &str, error: String) -> Self {
        Self {
            sensor_id: sensor_id.to_string(),
            celsius: 0.0,
            fahrenheit: 0.0,
            timestamp: Utc::now(),
            valid: false,
            error: Some(error),
        }
    }
}

/// Parse the contents of a `w1_slave` file.
pub fn parse_w1_slave(sensor_id: &str, contents: &str) -> TemperatureReading {
    let lines: Vec<&str> = contents.lines().collect();
    if lines.len() < 2 || !lines[0].trim_end().ends_with("YES") {
        return TemperatureReading::invalid(sensor_id, "CRC validation failed".to_string());
    }

    let Some(pos) = lines[1].find("t=") else {
        return TemperatureReading::invalid(sensor_id, "temperature data not found".to_string());
    };
    let raw = lines[1][pos + 2..].trim();
    let Ok(millidegrees) = raw.parse::<f32>() else {
        return TemperatureReading::invalid(
            sensor_id,
            format!("unparseable temperature value: {raw}"),
        );
    };

    let celsius = millidegrees / 1000.0;
    TemperatureReading {
        sensor_id: sensor_id.to_string(),
        celsius,
        fahrenheit: celsius * 9.0 / 5.0 + 32.0,
        timestamp: Utc::now(),
        valid: true,
        error: None,
    }
}

/// Holds the configured (or discovered) probe ids and the most recent
/// reading from each.
pub struct TemperatureManager {
    base_dir: PathBuf,
    update_interval: Duration,
    sensors: Mutex<Vec<String>>,
    readings: Mutex<HashMap<String, TemperatureReading>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl TemperatureManager {
    pub fn new(config: &TemperatureConfig) -> Arc<Self> {
        let manager = Arc::new(Self {
            base_dir: PathBuf::from(&config.w1_base_dir),
            update_interval: Duration::from_secs(config.update_interval_s.max(1)),
            sensors: Mutex::new(Vec::new()),
            readings: Mutex::new(HashMap::new()),
            task: Mutex::new(None),
        });

        if config.sensor_ids.is_empty() {
            manager.refresh_sensors();
        } else {
            *manager.lock_sensors() = config.sensor_ids.clone();
            info!("configured temperature sensors: {:?}", config.sensor_ids);
        }
        manager
    }

    fn lock_sensors(&self) -> std::sync::MutexGuard<'_, Vec<String>> {
        self.sensors.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Scan the 1-Wire directory for DS18B20 family devices (`28-` prefix).
    pub fn refresh_sensors(&self) -> Vec<String> {
        let mut discovered = Vec::new();
        match fs::read_dir(&self.base_dir) {
            Ok(entries) => {
                for entry in entries.flatten() {
                    let name = entry.file_name().to_string_lossy().into_owned();
                    if name.starts_with("28-") {
                        discovered.push(name);
                    }
                }
            }
            Err(err) => {
                warn!(
                    "cannot scan 1-Wire directory {}: {err}",
                    self.base_dir.display()
                );
            }
        }
        discovered.sort();

        if discovered.is_empty() {
            warn!("no DS18B20 sensors discovered, check wiring and 1-Wire overlay");
        } else {
            info!("discovered {} DS18B20 sensors: {discovered:?}", discovered.len());
        }
        *self.lock_sensors() = discovered.clone();
        discovered
    }

    pub fn sensor_ids(&self) -> Vec<String> {
        self.lock_sensors().clone()
    }

    pub fn read_sensor(&self, sensor_id: &str) -> TemperatureReading {
        let path = self.base_dir.join(sensor_id).join("w1_slave");
        match fs::read_to_string(&path) {
            Ok(contents) => parse_w1_slave(sensor_id, &contents),
            Err(err) => TemperatureReading::invalid(sensor_id, format!("sensor disconnected: {err}")),
        }
    }

    pub fn read_all(&self) -> HashMap<String, TemperatureReading> {
        let ids = self.sensor_ids();
        let mut readings = HashMap::new();
        for id in ids {
            let reading = self.read_sensor(&id);
            if reading.valid {
                debug!("sensor {id}: {:.2}C", reading.celsius);
            } else {
                warn!(
                    "sensor {id} read failed: {}",
                    reading.error.as_deref().unwrap_or("unknown")
                );
            }
            readings.insert(id, reading);
        }
        readings
    }

    /// Most recent reading per sensor, as gathered by the refresh loop.
    pub fn latest(&self) -> Vec<TemperatureReading> {
        let readings = self.readings.lock().unwrap_or_else(|p| p.into_inner());
        let mut list: Vec<TemperatureReading> = readings.values().cloned().collect();
        list.sort_by(|a, b| a.sensor_id.cmp(&b.sensor_id));
        list
    }

    pub fn start(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!(
                "temperature refresh loop started ({}s interval)",
                manager.update_interval.as_secs()
            );
            loop {
                let readings = manager.read_all();
                *manager.readings.lock().unwrap_or_else(|p| p.into_inner()) = readings;
                sleep(manager.update_interval).await;
            }
        });
        let mut slot = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    pub fn shutdown(&self) {
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    #[test]
    fn parses_a_valid_reading() {
        let reading = parse_w1_slave("28-0000", GOOD);
        assert!(reading.valid);
        assert!((reading.celsius - 23.125).abs() < 1e-4);
        assert!((reading.fahrenheit - 73.625).abs() < 1e-3);
        assert!(reading.error.is_none());
    }

    #[test]
    fn rejects_crc_failure() {
        let contents = "72 01 4b 46 7f ff 0e 10 57 : crc=57 NO\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";
        let reading = parse_w1_slave("s", contents);
        assert!(!reading.valid);
        assert_eq!(reading.error.as_deref(), Some("CRC validation failed"));
    }

    #[test]
    fn rejects_missing_payload() {
        let contents = "header YES\nno temperature here\n";
        let reading = parse_w1_slave("s", contents);
        assert!(!reading.valid);
    }

    #[test]
    fn handles_negative_temperatures() {
        let contents = "aa YES\nbb t=-1250\n";
        let reading = parse_w1_slave("s", contents);
        assert!(reading.valid);
        assert!((reading.celsius - -1.25).abs() < 1e-4);
        assert!((reading.fahrenheit - 29.75).abs() < 1e-3);
    }

    #[test]
    fn single_line_file_is_invalid() {
        let reading = parse_w1_slave("s", "just one line YES");
        assert!(!reading.valid);
    }

    #[tokio::test]
    async fn discovers_and_reads_sensors_from_a_directory() {
        let dir = std::env::temp_dir().join(format!("w1-test-{}", std::process::id()));
        let sensor_dir = dir.join("28-0316a4f331ff");
        fs::create_dir_all(&sensor_dir).unwrap();
        fs::write(sensor_dir.join("w1_slave"), GOOD).unwrap();
        // Non-DS18B20 devices are skipped.
        fs::create_dir_all(dir.join("w1_bus_master1")).unwrap();

        let config = TemperatureConfig {
            enabled: true,
            sensor_ids: Vec::new(),
            update_interval_s: 60,
            w1_base_dir: dir.to_string_lossy().into_owned(),
            unit: hydrosense_common::TemperatureUnit::Celsius,
        };
        let manager = TemperatureManager::new(&config);
        assert_eq!(manager.sensor_ids(), vec!["28-0316a4f331ff".to_string()]);

        let readings = manager.read_all();
        assert!(readings["28-0316a4f331ff"].valid);

        let missing = manager.read_sensor("28-dead");
        assert!(!missing.valid);

        fs::remove_dir_all(&dir).unwrap();
    }
}
