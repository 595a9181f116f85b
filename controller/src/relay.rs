//! Relay control with per-relay auto-shutoff timers and a periodic
//! watchdog that reconciles pin state and catches missed shutoffs.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use thiserror::Error;
use tokio::{
    task::JoinHandle,
    time::{sleep, Instant},
};
use tracing::{error, info, warn};

use hydrosense_common::{RelayConfig, RelayInfo, RelayState};

use crate::hw::{HwError, OutputPin};

const SHUTOFF_WARNING_S: u64 = 5;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay not found: {0}")]
    NotFound(String),
    #[error(transparent)]
    Hw(#[from] HwError),
}

struct RelayRuntime {
    state: RelayState,
    turned_on_at: Option<Instant>,
    deadline: Option<Instant>,
    /// Bumped on every state change so a stale shutoff timer from an
    /// earlier ON period can never fire against the current one.
    generation: u64,
    shutoff: Option<JoinHandle<()>>,
}

pub struct Relay {
    config: RelayConfig,
    pin: Mutex<Box<dyn OutputPin>>,
    runtime: Mutex<RelayRuntime>,
}

impl Relay {
    fn new(config: RelayConfig, mut pin: Box<dyn OutputPin>) -> Result<Self, RelayError> {
        let state = config.default_state;
        pin.write(pin_level(state, config.active_low))
            .map_err(RelayError::Hw)?;
        Ok(Self {
            config,
            pin: Mutex::new(pin),
            runtime: Mutex::new(RelayRuntime {
                state,
                turned_on_at: None,
                deadline: None,
                generation: 0,
                shutoff: None,
            }),
        })
    }

    fn write_pin(&self, state: RelayState) -> Result<(), HwError> {
        let mut pin = self.pin.lock().unwrap_or_else(|p| p.into_inner());
        pin.write(pin_level(state, self.config.active_low))
    }

    pub fn state(&self) -> RelayState {
        self.lock_runtime().state
    }

    pub fn info(&self) -> RelayInfo {
        let runtime = self.lock_runtime();
        let time_remaining_s = runtime
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()).as_secs_f32());
        RelayInfo {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            gpio_pin: self.config.gpio_pin,
            active_low: self.config.active_low,
            state: runtime.state,
            default_state: self.config.default_state,
            max_on_time_s: self.config.max_on_time_s,
            auto_shutoff_enabled: self.config.max_on_time_s > 0,
            time_remaining_s,
        }
    }

    fn lock_runtime(&self) -> std::sync::MutexGuard<'_, RelayRuntime> {
        self.runtime.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Turn the relay on. Returns true if the state actually changed.
    fn turn_on(self: &Arc<Self>) -> Result<bool, RelayError> {
        let mut runtime = self.lock_runtime();
        if runtime.state == RelayState::On {
            return Ok(false);
        }
        self.write_pin(RelayState::On)?;
        runtime.state = RelayState::On;
        runtime.generation += 1;
        runtime.turned_on_at = Some(Instant::now());
        if self.config.max_on_time_s > 0 {
            let max = Duration::from_secs(self.config.max_on_time_s);
            runtime.deadline = Some(Instant::now() + max);
            runtime.shutoff = Some(self.spawn_shutoff(runtime.generation, max));
        }
        info!("relay {} turned ON", self.config.id);
        Ok(true)
    }

    /// Turn the relay off. Returns true if the state actually changed.
    fn turn_off(&self) -> Result<bool, RelayError> {
        let mut runtime = self.lock_runtime();
        if runtime.state == RelayState::Off {
            return Ok(false);
        }
        self.write_pin(RelayState::Off)?;
        runtime.state = RelayState::Off;
        runtime.generation += 1;
        runtime.turned_on_at = None;
        runtime.deadline = None;
        if let Some(handle) = runtime.shutoff.take() {
            handle.abort();
        }
        info!("relay {} turned OFF", self.config.id);
        Ok(true)
    }

    fn spawn_shutoff(self: &Arc<Self>, generation: u64, max: Duration) -> JoinHandle<()> {
        let relay = Arc::clone(self);
        tokio::spawn(async move {
            if max.as_secs() > SHUTOFF_WARNING_S {
                sleep(max - Duration::from_secs(SHUTOFF_WARNING_S)).await;
                if relay.lock_runtime().generation != generation {
                    return;
                }
                warn!(
                    "relay {} reaches max on time in {SHUTOFF_WARNING_S}s",
                    relay.config.id
                );
                sleep(Duration::from_secs(SHUTOFF_WARNING_S)).await;
            } else {
                sleep(max).await;
            }
            relay.expire(generation);
        })
    }

    /// Shutoff timer fired: force off if this ON period is still current.
    fn expire(&self, generation: u64) {
        let mut runtime = self.lock_runtime();
        if runtime.generation != generation || runtime.state != RelayState::On {
            return;
        }
        warn!(
            "relay {} exceeded max on time ({}s), forcing OFF",
            self.config.id, self.config.max_on_time_s
        );
        if let Err(err) = self.write_pin(RelayState::Off) {
            error!("relay {} shutoff pin write failed: {err}", self.config.id);
        }
        runtime.state = RelayState::Off;
        runtime.generation += 1;
        runtime.turned_on_at = None;
        runtime.deadline = None;
        runtime.shutoff = None;
    }

    /// Watchdog pass: force off past-deadline relays, then re-assert the
    /// pin when the hardware disagrees with the tracked state.
    fn reconcile(&self) {
        let mut runtime = self.lock_runtime();

        if runtime.state == RelayState::On {
            if let Some(deadline) = runtime.deadline {
                if Instant::now() >= deadline {
                    warn!(
                        "watchdog: relay {} past its shutoff deadline, forcing OFF",
                        self.config.id
                    );
                    if let Err(err) = self.write_pin(RelayState::Off) {
                        error!("relay {} watchdog pin write failed: {err}", self.config.id);
                        return;
                    }
                    runtime.state = RelayState::Off;
                    runtime.generation += 1;
                    runtime.turned_on_at = None;
                    runtime.deadline = None;
                    if let Some(handle) = runtime.shutoff.take() {
                        handle.abort();
                    }
                    return;
                }
            }
        }

        let expected = pin_level(runtime.state, self.config.active_low);
        let actual = {
            let pin = self.pin.lock().unwrap_or_else(|p| p.into_inner());
            match pin.read() {
                Ok(level) => level,
                Err(err) => {
                    error!("relay {} pin read failed: {err}", self.config.id);
                    return;
                }
            }
        };
        if actual != expected {
            warn!(
                "watchdog: relay {} pin mismatch (expected {expected}, found {actual}), re-asserting",
                self.config.id
            );
            if let Err(err) = self.write_pin(runtime.state) {
                error!("relay {} pin re-assert failed: {err}", self.config.id);
            }
        }
    }
}

fn pin_level(state: RelayState, active_low: bool) -> bool {
    (state == RelayState::On) != active_low
}

/// All configured relays, addressed by id.
pub struct RelayController {
    relays: HashMap<String, Arc<Relay>>,
    watchdog: Mutex<Option<JoinHandle<()>>>,
}

impl RelayController {
    pub fn new(
        relays: Vec<(RelayConfig, Box<dyn OutputPin>)>,
    ) -> Result<Self, RelayError> {
        let mut map = HashMap::new();
        for (config, pin) in relays {
            let id = config.id.clone();
            map.insert(id, Arc::new(Relay::new(config, pin)?));
        }
        Ok(Self {
            relays: map,
            watchdog: Mutex::new(None),
        })
    }

    pub fn contains(&self, id: &str) -> bool {
        self.relays.contains_key(id)
    }

    fn get(&self, id: &str) -> Result<&Arc<Relay>, RelayError> {
        self.relays
            .get(id)
            .ok_or_else(|| RelayError::NotFound(id.to_string()))
    }

    pub fn turn_on(&self, id: &str) -> Result<bool, RelayError> {
        self.get(id)?.turn_on()
    }

    pub fn turn_off(&self, id: &str) -> Result<bool, RelayError> {
        self.get(id)?.turn_off()
    }

    pub fn toggle(&self, id: &str) -> Result<RelayState, RelayError> {
        let relay = self.get(id)?;
        match relay.state() {
            RelayState::On => {
                relay.turn_off()?;
                Ok(RelayState::Off)
            }
            RelayState::Off => {
                relay.turn_on()?;
                Ok(RelayState::On)
            }
        }
    }

    pub fn set_state(&self, id: &str, state: RelayState) -> Result<bool, RelayError> {
        match state {
            RelayState::On => self.turn_on(id),
            RelayState::Off => self.turn_off(id),
        }
    }

    pub fn get_state(&self, id: &str) -> Result<RelayState, RelayError> {
        Ok(self.get(id)?.state())
    }

    pub fn get_info(&self, id: &str) -> Result<RelayInfo, RelayError> {
        Ok(self.get(id)?.info())
    }

    pub fn get_all_info(&self) -> Vec<RelayInfo> {
        let mut infos: Vec<RelayInfo> = self.relays.values().map(|r| r.info()).collect();
        infos.sort_by(|a, b| a.id.cmp(&b.id));
        infos
    }

    /// One watchdog pass over every relay.
    pub fn sweep(&self) {
        for relay in self.relays.values() {
            relay.reconcile();
        }
    }

    pub fn spawn_watchdog(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        info!("relay watchdog running every {interval:?}");
        tokio::spawn(async move {
            loop {
                sleep(interval).await;
                controller.sweep();
            }
        })
    }

    pub fn store_watchdog(&self, handle: JoinHandle<()>) {
        let mut slot = self.watchdog.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(old) = slot.replace(handle) {
            old.abort();
        }
    }

    /// Shutdown path: every relay off, timers and watchdog stopped.
    pub fn cleanup(&self) {
        if let Some(handle) = self
            .watchdog
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
        {
            handle.abort();
        }
        for relay in self.relays.values() {
            if let Err(err) = relay.turn_off() {
                error!("relay {} cleanup failed: {err}", relay.config.id);
            }
        }
    }

    #[cfg(test)]
    fn kill_shutoff_timers(&self) {
        for relay in self.relays.values() {
            if let Some(handle) = relay.lock_runtime().shutoff.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{MockOutputPin, MockPinHandle};

    fn config(id: &str, max_on_time_s: u64) -> RelayConfig {
        RelayConfig {
            id: id.to_string(),
            name: format!("{id} relay"),
            gpio_pin: 26,
            active_low: true,
            default_state: RelayState::Off,
            max_on_time_s,
        }
    }

    fn controller(max_on_time_s: u64) -> (RelayController, MockPinHandle) {
        let (pin, handle) = MockOutputPin::new(true);
        let ctl = RelayController::new(vec![(config("pump", max_on_time_s), Box::new(pin))])
            .unwrap();
        (ctl, handle)
    }

    #[tokio::test]
    async fn turn_on_and_off_report_changes() {
        let (ctl, pin) = controller(0);

        assert!(ctl.turn_on("pump").unwrap());
        assert!(!ctl.turn_on("pump").unwrap());
        // Active-low: ON drives the pin low.
        assert!(!pin.level());

        assert!(ctl.turn_off("pump").unwrap());
        assert!(!ctl.turn_off("pump").unwrap());
        assert!(pin.level());
    }

    #[tokio::test]
    async fn toggle_returns_new_state() {
        let (ctl, _pin) = controller(0);
        assert_eq!(ctl.toggle("pump").unwrap(), RelayState::On);
        assert_eq!(ctl.toggle("pump").unwrap(), RelayState::Off);
    }

    #[tokio::test]
    async fn pin_write_fault_leaves_state_unchanged() {
        let (ctl, pin) = controller(0);
        pin.fail_io(true);

        assert!(matches!(ctl.turn_on("pump"), Err(RelayError::Hw(_))));
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::Off);

        pin.fail_io(false);
        assert!(ctl.turn_on("pump").unwrap());
    }

    #[tokio::test]
    async fn watchdog_skips_reconciliation_on_a_read_fault() {
        let (ctl, pin) = controller(0);
        ctl.turn_on("pump").unwrap();

        pin.fail_io(true);
        ctl.sweep();
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::On);

        // Once the pin reads again, a flipped level is re-asserted.
        pin.fail_io(false);
        pin.set_level(true);
        ctl.sweep();
        assert!(!pin.level());
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::On);
    }

    #[tokio::test]
    async fn unknown_relay_is_a_distinct_error() {
        let (ctl, _pin) = controller(0);
        assert!(matches!(
            ctl.turn_on("heater"),
            Err(RelayError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_shutoff_forces_relay_off() {
        let (ctl, pin) = controller(2);
        ctl.turn_on("pump").unwrap();

        sleep(Duration::from_millis(2500)).await;

        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::Off);
        assert!(pin.level());
    }

    #[tokio::test(start_paused = true)]
    async fn shutoff_timer_survives_a_warning_window() {
        let (ctl, _pin) = controller(10);
        ctl.turn_on("pump").unwrap();

        sleep(Duration::from_millis(9500)).await;
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::On);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_timer_does_not_kill_a_later_on_period() {
        let (ctl, _pin) = controller(3);
        ctl.turn_on("pump").unwrap();
        sleep(Duration::from_secs(1)).await;

        ctl.turn_off("pump").unwrap();
        ctl.turn_on("pump").unwrap();

        // The first timer would have fired at t=3s.
        sleep(Duration::from_millis(2500)).await;
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::On);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::Off);
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_catches_a_lost_shutoff_timer() {
        let (ctl, pin) = controller(2);
        ctl.turn_on("pump").unwrap();
        ctl.kill_shutoff_timers();

        tokio::time::advance(Duration::from_secs(3)).await;
        ctl.sweep();

        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::Off);
        assert!(pin.level());
    }

    #[tokio::test]
    async fn watchdog_reasserts_externally_flipped_pin() {
        let (ctl, pin) = controller(0);
        ctl.turn_on("pump").unwrap();

        // Something outside the daemon flips the pin high (relay OFF).
        pin.set_level(true);
        ctl.sweep();
        assert!(!pin.level(), "pin should be driven back to the ON level");
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::On);
    }

    #[tokio::test]
    async fn cleanup_turns_everything_off() {
        let (ctl, pin) = controller(0);
        ctl.turn_on("pump").unwrap();
        ctl.cleanup();
        assert_eq!(ctl.get_state("pump").unwrap(), RelayState::Off);
        assert!(pin.level());
    }

    #[tokio::test]
    async fn default_state_is_applied_at_construction() {
        let (pin, handle) = MockOutputPin::new(false);
        let mut cfg = config("light", 0);
        cfg.default_state = RelayState::Off;
        let ctl = RelayController::new(vec![(cfg, Box::new(pin))]).unwrap();
        // Active-low OFF means the pin is driven high.
        assert!(handle.level());
        assert_eq!(ctl.get_state("light").unwrap(), RelayState::Off);
    }
}
