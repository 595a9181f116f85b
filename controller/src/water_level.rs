//! Debounced water level sensing. A background poll loop watches the raw
//! pin and only accepts a reading once it has been stable for the full
//! debounce window.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{error, info};

use hydrosense_common::{WaterLevel, WaterLevelConfig, WaterLevelInfo};

use crate::hw::{HwError, InputPin};

/// Invoked once per confirmed level transition. May fire during
/// construction, before the caller's own setup has completed.
pub type LevelCallback = Box<dyn Fn(WaterLevel, WaterLevelInfo) + Send + Sync>;

struct MonitorInner {
    level: WaterLevel,
    last_change: DateTime<Utc>,
}

pub struct WaterLevelMonitor {
    config: WaterLevelConfig,
    pin: Mutex<Box<dyn InputPin>>,
    inner: Mutex<MonitorInner>,
    callback: Option<LevelCallback>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl WaterLevelMonitor {
    /// The initial reading is taken immediately, so the callback can fire
    /// before `new` returns.
    pub fn new(
        config: WaterLevelConfig,
        pin: Box<dyn InputPin>,
        callback: Option<LevelCallback>,
    ) -> Arc<Self> {
        let monitor = Arc::new(Self {
            config,
            pin: Mutex::new(pin),
            inner: Mutex::new(MonitorInner {
                level: WaterLevel::Ok,
                last_change: Utc::now(),
            }),
            callback,
            task: Mutex::new(None),
        });
        monitor.update_level();
        info!(
            "water level sensor on GPIO {} (active_high={}, debounce={}ms, initial={})",
            monitor.config.gpio_pin,
            monitor.config.active_high,
            monitor.config.debounce_ms,
            monitor.get_level().as_str()
        );
        monitor
    }

    fn read_raw(&self) -> Result<bool, HwError> {
        self.pin.lock().unwrap_or_else(|p| p.into_inner()).read()
    }

    fn level_from_raw(&self, raw: bool) -> WaterLevel {
        if raw == self.config.active_high {
            WaterLevel::Low
        } else {
            WaterLevel::Ok
        }
    }

    /// Accept the current raw reading as debounced truth. Fires the
    /// callback only when the computed level actually changed.
    fn update_level(&self) -> Option<WaterLevel> {
        let raw = match self.read_raw() {
            Ok(raw) => raw,
            Err(err) => {
                error!("water level pin read failed: {err}");
                return None;
            }
        };
        let new_level = self.level_from_raw(raw);

        let info = {
            let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
            if new_level == inner.level {
                return None;
            }
            let old = inner.level;
            inner.level = new_level;
            inner.last_change = Utc::now();
            info!(
                "water level changed: {} -> {} (raw={raw})",
                old.as_str(),
                new_level.as_str()
            );
            WaterLevelInfo {
                gpio_pin: self.config.gpio_pin,
                active_high: self.config.active_high,
                current_level: new_level,
                last_change: inner.last_change,
                gpio_state: raw,
            }
        };

        // Lock released before the callback so it may read us back.
        if let Some(callback) = &self.callback {
            callback(new_level, info);
        }
        Some(new_level)
    }

    pub fn start(self: &Arc<Self>) {
        let monitor = Arc::clone(self);
        let handle = tokio::spawn(async move {
            info!("water level monitoring loop started");
            let poll = Duration::from_millis(monitor.config.poll_ms);
            let debounce = Duration::from_millis(monitor.config.debounce_ms);
            let mut stable_raw = monitor.read_raw().unwrap_or(false);
            let mut stable_since = Instant::now();

            loop {
                sleep(poll).await;
                let raw = match monitor.read_raw() {
                    Ok(raw) => raw,
                    Err(err) => {
                        error!("water level pin read failed: {err}");
                        continue;
                    }
                };
                if raw != stable_raw {
                    stable_raw = raw;
                    stable_since = Instant::now();
                } else if stable_since.elapsed() >= debounce {
                    monitor.update_level();
                    stable_since = Instant::now();
                }
            }
        });
        let mut slot = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    pub fn get_level(&self) -> WaterLevel {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).level
    }

    pub fn get_info(&self) -> WaterLevelInfo {
        let raw = self.read_raw().unwrap_or(false);
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        WaterLevelInfo {
            gpio_pin: self.config.gpio_pin,
            active_high: self.config.active_high,
            current_level: inner.level,
            last_change: inner.last_change,
            gpio_state: raw,
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
        info!("water level monitoring stopped");
    }
}
