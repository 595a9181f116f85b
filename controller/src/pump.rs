//! Pump automation: a periodic control loop that reads the water level
//! monitor and drives the pump relay through an ON/OFF duty cycle,
//! bounded by a max-runtime safety limit.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};
use std::time::Duration;

use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{error, info, warn};

use hydrosense_common::{
    AutomationMode, NextAction, PumpConfig, PumpStatus, RelayState, WaterLevel,
};

use crate::{relay::RelayController, water_level::WaterLevelMonitor};

#[derive(Debug, Error)]
pub enum PumpError {
    #[error("pump relay not found: {0}")]
    UnknownRelay(String),
}

struct PumpState {
    mode: AutomationMode,
    /// Start of the current continuous ON dwell. Cleared on every OFF
    /// transition, so the max-runtime window bounds each dwell rather
    /// than a whole low-water episode.
    running_since: Option<Instant>,
    total_runtime_s: f32,
    cycle_count: u64,
    last_action: Instant,
}

pub struct PumpAutomation {
    relays: Arc<RelayController>,
    water: Arc<WaterLevelMonitor>,
    config: PumpConfig,
    state: Mutex<PumpState>,
    active: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PumpAutomation {
    pub fn new(
        relays: Arc<RelayController>,
        water: Arc<WaterLevelMonitor>,
        config: PumpConfig,
    ) -> Result<Arc<Self>, PumpError> {
        if !relays.contains(&config.relay_id) {
            return Err(PumpError::UnknownRelay(config.relay_id.clone()));
        }
        info!(
            "pump automation initialized (relay={}, on={}s, off={}s, max_runtime={}s)",
            config.relay_id, config.on_interval_s, config.off_interval_s, config.max_runtime_s
        );
        Ok(Arc::new(Self {
            relays,
            water,
            config,
            state: Mutex::new(PumpState {
                mode: AutomationMode::Auto,
                running_since: None,
                total_runtime_s: 0.0,
                cycle_count: 0,
                last_action: Instant::now(),
            }),
            active: AtomicBool::new(false),
            task: Mutex::new(None),
        }))
    }

    pub fn start(self: &Arc<Self>) {
        if self.active.swap(true, Ordering::SeqCst) {
            warn!("pump automation already running");
            return;
        }
        let pump = Arc::clone(self);
        let interval = Duration::from_millis(self.config.loop_interval_ms);
        let handle = tokio::spawn(async move {
            info!("pump automation loop started");
            loop {
                pump.tick();
                sleep(interval).await;
            }
        });
        let mut slot = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    pub fn stop(&self) {
        info!("stopping pump automation");
        self.active.store(false, Ordering::SeqCst);
        if let Some(handle) = self
            .task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        if let Err(err) = self.relays.turn_off(&self.config.relay_id) {
            error!("failed to turn pump off during automation stop: {err}");
        }
    }

    fn pump_state(&self) -> RelayState {
        // The relay id was validated at construction.
        self.relays
            .get_state(&self.config.relay_id)
            .unwrap_or(RelayState::Off)
    }

    fn force_pump_off(&self) {
        if let Err(err) = self.relays.turn_off(&self.config.relay_id) {
            error!("failed to turn pump off: {err}");
        }
    }

    pub fn set_mode(&self, mode: AutomationMode) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let old = state.mode;
        state.mode = mode;
        info!("automation mode changed: {} -> {}", old.as_str(), mode.as_str());

        // Leaving automatic control always releases the pump in a safe
        // (OFF) state; AUTO resumes on the next loop tick.
        match mode {
            AutomationMode::Disabled | AutomationMode::Manual => {
                self.force_pump_off();
                state.running_since = None;
            }
            AutomationMode::Auto => {}
        }
    }

    fn tick(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        match state.mode {
            AutomationMode::Disabled => {
                if self.pump_state() == RelayState::On {
                    self.force_pump_off();
                    state.running_since = None;
                }
            }
            AutomationMode::Manual => {}
            AutomationMode::Auto => match self.water.get_level() {
                WaterLevel::Ok => {
                    if self.pump_state() == RelayState::On {
                        info!("water level OK, turning pump OFF");
                        self.force_pump_off();
                        state.running_since = None;
                    }
                }
                WaterLevel::Low => self.handle_low_water(&mut state),
            },
        }
    }

    fn handle_low_water(&self, state: &mut PumpState) {
        // Safety limit first, before any duty-cycle decision.
        if let Some(since) = state.running_since {
            let elapsed = since.elapsed();
            if elapsed.as_secs() >= self.config.max_runtime_s {
                error!(
                    "SAFETY: pump exceeded max runtime ({}s), forcing OFF and disabling automation",
                    self.config.max_runtime_s
                );
                self.force_pump_off();
                state.mode = AutomationMode::Disabled;
                state.running_since = None;
                return;
            }
        }

        let since_action = state.last_action.elapsed().as_secs_f32();
        match self.pump_state() {
            RelayState::Off => {
                if since_action >= self.config.off_interval_s as f32 {
                    info!(
                        "water level LOW, turning pump ON for {}s (cycle #{})",
                        self.config.on_interval_s,
                        state.cycle_count + 1
                    );
                    if let Err(err) = self.relays.turn_on(&self.config.relay_id) {
                        error!("failed to turn pump on: {err}");
                        return;
                    }
                    state.last_action = Instant::now();
                    state.cycle_count += 1;
                    if state.running_since.is_none() {
                        state.running_since = Some(Instant::now());
                    }
                }
            }
            RelayState::On => {
                if since_action >= self.config.on_interval_s as f32 {
                    info!(
                        "pump ON interval complete, turning OFF for {}s",
                        self.config.off_interval_s
                    );
                    self.force_pump_off();
                    state.last_action = Instant::now();
                    if state.running_since.take().is_some() {
                        state.total_runtime_s += since_action;
                    }
                }
            }
        }
    }

    pub fn get_status(&self) -> PumpStatus {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let pump_state = self.pump_state();
        let water_level = self.water.get_level();

        let (current_runtime_s, runtime_remaining_s) = match state.running_since {
            Some(since) => {
                let elapsed = since.elapsed().as_secs_f32();
                (
                    Some(elapsed),
                    Some((self.config.max_runtime_s as f32 - elapsed).max(0.0)),
                )
            }
            None => (None, None),
        };

        let since_action = state.last_action.elapsed().as_secs_f32();
        let (next_action, next_action_in_s) = if pump_state == RelayState::On {
            (
                NextAction::TurnOff,
                (self.config.on_interval_s as f32 - since_action).max(0.0),
            )
        } else {
            (
                NextAction::TurnOn,
                (self.config.off_interval_s as f32 - since_action).max(0.0),
            )
        };

        PumpStatus {
            mode: state.mode,
            water_level,
            pump_state,
            pump_relay_id: self.config.relay_id.clone(),
            on_interval_s: self.config.on_interval_s,
            off_interval_s: self.config.off_interval_s,
            max_runtime_s: self.config.max_runtime_s,
            cycle_count: state.cycle_count,
            total_runtime_s: state.total_runtime_s,
            automation_active: self.active.load(Ordering::SeqCst),
            current_runtime_s,
            runtime_remaining_s,
            next_action,
            next_action_in_s,
        }
    }

    pub fn reset_statistics(&self) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.total_runtime_s = 0.0;
        state.cycle_count = 0;
        info!("pump automation statistics reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{MockInputPin, MockOutputPin, MockPinHandle};
    use hydrosense_common::{RelayConfig, WaterLevelConfig};

    fn relay_controller() -> (Arc<RelayController>, MockPinHandle) {
        let (pin, handle) = MockOutputPin::new(true);
        let config = RelayConfig {
            id: "pump".to_string(),
            name: "Pump".to_string(),
            gpio_pin: 26,
            active_low: true,
            default_state: RelayState::Off,
            max_on_time_s: 0,
        };
        (
            Arc::new(RelayController::new(vec![(config, Box::new(pin))]).unwrap()),
            handle,
        )
    }

    fn water_monitor(initially_low: bool) -> (Arc<WaterLevelMonitor>, MockPinHandle) {
        let (pin, handle) = MockInputPin::new(initially_low);
        let config = WaterLevelConfig {
            gpio_pin: 17,
            active_high: true,
            debounce_ms: 500,
            poll_ms: 100,
        };
        (WaterLevelMonitor::new(config, Box::new(pin), None), handle)
    }

    fn pump_config(on: u64, off: u64, max: u64) -> PumpConfig {
        PumpConfig {
            relay_id: "pump".to_string(),
            on_interval_s: on,
            off_interval_s: off,
            max_runtime_s: max,
            loop_interval_ms: 1000,
        }
    }

    #[tokio::test]
    async fn construction_fails_fast_on_unknown_relay() {
        let (relays, _pin) = relay_controller();
        let (water, _sensor) = water_monitor(false);
        let mut config = pump_config(1, 1, 60);
        config.relay_id = "heater".to_string();

        let result = PumpAutomation::new(relays, water, config);
        assert!(matches!(result, Err(PumpError::UnknownRelay(id)) if id == "heater"));
    }

    #[tokio::test(start_paused = true)]
    async fn duty_cycle_follows_water_level() {
        let (relays, _pin) = relay_controller();
        let (water, sensor) = water_monitor(true);
        water.start();
        assert_eq!(water.get_level(), WaterLevel::Low);

        let pump = PumpAutomation::new(Arc::clone(&relays), water, pump_config(1, 1, 60)).unwrap();
        pump.start();

        sleep(Duration::from_millis(1500)).await;
        assert_eq!(relays.get_state("pump").unwrap(), RelayState::On);

        // Water recovers; after debounce the loop shuts the pump down.
        sensor.set_level(false);
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(relays.get_state("pump").unwrap(), RelayState::Off);

        pump.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn duty_cycle_alternates_and_accumulates_statistics() {
        let (relays, _pin) = relay_controller();
        let (water, _sensor) = water_monitor(true);

        let pump = PumpAutomation::new(Arc::clone(&relays), water, pump_config(1, 1, 60)).unwrap();
        pump.start();

        sleep(Duration::from_millis(5500)).await;
        let status = pump.get_status();
        assert!(status.cycle_count >= 2, "cycles: {}", status.cycle_count);
        assert!(status.total_runtime_s > 0.0);

        pump.reset_statistics();
        let status = pump.get_status();
        assert_eq!(status.cycle_count, 0);
        assert_eq!(status.total_runtime_s, 0.0);

        pump.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn max_runtime_disables_automation() {
        let (relays, _pin) = relay_controller();
        let (water, _sensor) = water_monitor(true);

        // off_interval 0 turns the pump on at the first tick and
        // on_interval 30 keeps it running into the safety limit.
        let pump = PumpAutomation::new(Arc::clone(&relays), water, pump_config(30, 0, 3)).unwrap();
        pump.start();

        sleep(Duration::from_millis(4500)).await;
        let status = pump.get_status();
        assert_eq!(status.mode, AutomationMode::Disabled);
        assert_eq!(status.pump_state, RelayState::Off);
        assert!(status.current_runtime_s.is_none());

        pump.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn manual_mode_leaves_the_pump_alone() {
        let (relays, _pin) = relay_controller();
        let (water, _sensor) = water_monitor(true);

        let pump = PumpAutomation::new(Arc::clone(&relays), water, pump_config(1, 1, 60)).unwrap();
        pump.set_mode(AutomationMode::Manual);
        pump.start();

        // Operator turns the pump on by hand.
        relays.turn_on("pump").unwrap();
        sleep(Duration::from_secs(5)).await;
        assert_eq!(relays.get_state("pump").unwrap(), RelayState::On);

        pump.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn disabling_forces_the_pump_off() {
        let (relays, _pin) = relay_controller();
        let (water, _sensor) = water_monitor(true);

        let pump = PumpAutomation::new(Arc::clone(&relays), water, pump_config(1, 1, 60)).unwrap();
        pump.start();
        sleep(Duration::from_millis(1500)).await;
        assert_eq!(relays.get_state("pump").unwrap(), RelayState::On);

        pump.set_mode(AutomationMode::Disabled);
        assert_eq!(relays.get_state("pump").unwrap(), RelayState::Off);
        let status = pump.get_status();
        assert_eq!(status.mode, AutomationMode::Disabled);

        pump.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn status_reports_the_next_action() {
        let (relays, _pin) = relay_controller();
        let (water, _sensor) = water_monitor(false);

        let pump = PumpAutomation::new(relays, water, pump_config(10, 20, 60)).unwrap();
        let status = pump.get_status();
        assert_eq!(status.next_action, NextAction::TurnOn);
        assert!(status.next_action_in_s <= 20.0);
        assert!(!status.automation_active);
    }
}
