//! Background animation tasks and the runner that enforces the
//! one-task-per-name, replace-on-restart lifecycle.
//!
//! Every animation holds the LED device's animation slot for its entire
//! run and polls its cancellation token once per frame, so cancellation
//! latency is bounded by one frame period.

use std::{
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::{
    sync::{Mutex, Notify},
    task::JoinHandle,
    time::{sleep, timeout, Instant},
};
use tracing::{error, info, warn};

use hydrosense_common::{
    hsv_to_rgb, lerp, render_gradient, smoothstep, AnimationKind, AnimationName, Direction,
    GradientSpec, Season, SmoothNoise, SunProfile,
};

use crate::led::LedDevice;

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Cooperative cancellation flag, polled once per animation frame and able
/// to interrupt an in-progress frame sleep.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    pub async fn cancelled(&self) {
        loop {
            if self.is_cancelled() {
                return;
            }
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Sleep one frame period, waking early on cancellation. Returns false if
/// the token fired during the wait.
async fn wait_frame(period: Duration, cancel: &CancelToken) -> bool {
    tokio::select! {
        () = sleep(period) => true,
        () = cancel.cancelled() => false,
    }
}

struct AnimationHandle {
    cancel: CancelToken,
    task: JoinHandle<()>,
    generation: u64,
}

/// Named set of cancellable background animation tasks.
#[derive(Clone)]
pub struct AnimationRunner {
    animations: Arc<Mutex<HashMap<AnimationName, AnimationHandle>>>,
    join_timeout: Duration,
    generation: Arc<AtomicU64>,
}

impl Default for AnimationRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl AnimationRunner {
    pub fn new() -> Self {
        Self::with_join_timeout(DEFAULT_JOIN_TIMEOUT)
    }

    pub fn with_join_timeout(join_timeout: Duration) -> Self {
        Self {
            animations: Arc::new(Mutex::new(HashMap::new())),
            join_timeout,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Launch an animation under `name`, first cancelling and joining any
    /// task already running under that name. A join timeout is logged and
    /// tolerated: the stale task keeps its cancel signal and the LED
    /// animation slot still serializes any pixel writes it has left.
    pub async fn start<F, Fut>(&self, name: AnimationName, animation: F)
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let previous = { self.animations.lock().await.remove(&name) };
        if let Some(handle) = previous {
            info!("cancelling existing animation: {}", name.as_str());
            handle.cancel.cancel();
            if timeout(self.join_timeout, handle.task).await.is_err() {
                warn!(
                    "animation {} did not stop within {:?}, starting replacement anyway",
                    name.as_str(),
                    self.join_timeout
                );
            }
        }

        let cancel = CancelToken::new();
        let future = animation(cancel.clone());
        let animations = Arc::clone(&self.animations);
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        // Hold the map lock across spawn+insert so the wrapper's final
        // removal cannot run before the handle exists.
        let mut map = self.animations.lock().await;
        let task = tokio::spawn(async move {
            info!("animation task started: {}", name.as_str());
            match future.await {
                Ok(()) => info!("animation task completed: {}", name.as_str()),
                Err(err) => error!("animation task failed: {}: {err:#}", name.as_str()),
            }
            // A stale task that outlived its replace-join timeout must not
            // evict the replacement registered under the same name.
            let mut map = animations.lock().await;
            if map.get(&name).is_some_and(|h| h.generation == generation) {
                map.remove(&name);
            }
        });
        map.insert(
            name,
            AnimationHandle {
                cancel,
                task,
                generation,
            },
        );
    }

    /// Cancel and join one animation, if it is running.
    pub async fn stop(&self, name: AnimationName) {
        let handle = { self.animations.lock().await.remove(&name) };
        if let Some(handle) = handle {
            handle.cancel.cancel();
            if timeout(self.join_timeout, handle.task).await.is_err() {
                warn!(
                    "animation {} did not stop within {:?}",
                    name.as_str(),
                    self.join_timeout
                );
            }
        }
    }

    /// Cancel everything, then join each task with the bounded timeout.
    pub async fn stop_all(&self) {
        let handles: Vec<(AnimationName, AnimationHandle)> =
            { self.animations.lock().await.drain().collect() };
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (name, handle) in handles {
            if timeout(self.join_timeout, handle.task).await.is_err() {
                warn!(
                    "animation {} did not stop within {:?}",
                    name.as_str(),
                    self.join_timeout
                );
            }
        }
    }

    /// Names with a live handle right now.
    pub async fn active(&self) -> Vec<AnimationName> {
        self.animations.lock().await.keys().copied().collect()
    }
}

/// Cloudy sunrise: hue/saturation ramp along the season profile while
/// brightness climbs from a near-zero floor to the season maximum.
pub async fn cloudy_sunrise(
    leds: LedDevice,
    duration_s: u64,
    season: Season,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    info!(
        "starting cloudy_sunrise: duration={duration_s}s, season={}",
        season.as_str()
    );
    run_sun_cycle(leds, duration_s, season, true, fps, cancel).await
}

/// Cloudy sunset: the sunrise ramp in reverse, brightness high to floor.
pub async fn cloudy_sunset(
    leds: LedDevice,
    duration_s: u64,
    season: Season,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    info!(
        "starting cloudy_sunset: duration={duration_s}s, season={}",
        season.as_str()
    );
    run_sun_cycle(leds, duration_s, season, false, fps, cancel).await
}

async fn run_sun_cycle(
    leds: LedDevice,
    duration_s: u64,
    season: Season,
    rising: bool,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let profile = season.profile();
    let ramp: SunProfile = if rising {
        profile.sunrise
    } else {
        profile.sunset
    };
    let mut noise = SmoothNoise::new(profile.cloud_intensity);

    let _slot = leds.acquire_animation_slot().await;

    let steps = duration_s.max(1) * u64::from(fps.max(1));
    let dt = 1.0 / fps.max(1) as f32;
    let frame_period = Duration::from_secs_f32(dt);

    for i in 0..=steps {
        if cancel.is_cancelled() {
            info!("sun cycle cancelled");
            return Ok(());
        }

        let t = smoothstep(i as f32 / steps as f32);
        let h = lerp(ramp.h_start, ramp.h_end, t);
        let s = lerp(ramp.s_start, ramp.s_end, t);

        let base_v = if rising {
            lerp(0.01, profile.max_v, t)
        } else {
            lerp(profile.max_v, 0.01, t)
        };

        // Clouds are suppressed when very dark; the eye is sensitive there.
        let v = if base_v < 0.15 {
            base_v
        } else {
            base_v + noise.step(dt)
        };
        let v = v.clamp(0.01, profile.max_v);

        leds.set_hsv(h, s, v)?;

        if !wait_frame(frame_period, &cancel).await {
            info!("sun cycle cancelled");
            return Ok(());
        }
    }

    Ok(())
}

/// Animated gradient dispatch. `duration_s = 0` runs until cancelled.
pub async fn animate_gradient(
    leds: LedDevice,
    spec: GradientSpec,
    duration_s: u64,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    info!(
        "starting gradient animation: type={:?}, duration={duration_s}s, speed={}",
        spec.animation, spec.speed
    );

    match spec.animation {
        Some(AnimationKind::Shift) => animate_shift(leds, spec, duration_s, fps, cancel).await,
        Some(AnimationKind::Pulse) => animate_pulse(leds, spec, duration_s, fps, cancel).await,
        Some(AnimationKind::Rainbow) => animate_rainbow(leds, spec, duration_s, fps, cancel).await,
        None => {
            warn!("gradient spec has no animation type");
            Ok(())
        }
    }
}

async fn animate_shift(
    leds: LedDevice,
    spec: GradientSpec,
    duration_s: u64,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let _slot = leds.acquire_animation_slot().await;
    let frame_period = Duration::from_secs_f32(1.0 / fps.max(1) as f32);
    let start = Instant::now();
    let mut frame: u64 = 0;

    loop {
        if cancel.is_cancelled() || expired(start, duration_s) {
            info!("gradient shift finished");
            return Ok(());
        }

        let mut offset = (frame as f32 * spec.speed * 0.01).rem_euclid(1.0);
        if spec.direction == Direction::Backward {
            offset = 1.0 - offset;
        }

        let colors = render_gradient(&spec.stops, leds.count(), offset)?;
        leds.set_brightness(spec.brightness);
        leds.set_pixel_array(&colors)?;

        if !wait_frame(frame_period, &cancel).await {
            info!("gradient shift cancelled");
            return Ok(());
        }
        frame += 1;
    }
}

async fn animate_pulse(
    leds: LedDevice,
    spec: GradientSpec,
    duration_s: u64,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    // The color buffer is rendered once; only brightness moves per frame.
    // A spec change mid-run is picked up at the next restart, not live.
    let colors = render_gradient(&spec.stops, leds.count(), 0.0)?;

    let _slot = leds.acquire_animation_slot().await;
    let frame_period = Duration::from_secs_f32(1.0 / fps.max(1) as f32);
    let start = Instant::now();
    let mut frame: u64 = 0;

    loop {
        if cancel.is_cancelled() || expired(start, duration_s) {
            info!("gradient pulse finished");
            return Ok(());
        }

        let t = frame as f32 * spec.speed * 0.05;
        let multiplier = 0.3 + 0.7 * (t.sin() * 0.5 + 0.5);

        leds.set_brightness(spec.brightness * multiplier);
        leds.set_pixel_array(&colors)?;

        if !wait_frame(frame_period, &cancel).await {
            info!("gradient pulse cancelled");
            return Ok(());
        }
        frame += 1;
    }
}

async fn animate_rainbow(
    leds: LedDevice,
    spec: GradientSpec,
    duration_s: u64,
    fps: u32,
    cancel: CancelToken,
) -> anyhow::Result<()> {
    let _slot = leds.acquire_animation_slot().await;
    let frame_period = Duration::from_secs_f32(1.0 / fps.max(1) as f32);
    let start = Instant::now();
    let count = leds.count();
    let mut frame: u64 = 0;

    loop {
        if cancel.is_cancelled() || expired(start, duration_s) {
            info!("gradient rainbow finished");
            return Ok(());
        }

        let hue_offset = (frame as f32 * spec.speed * 0.01).rem_euclid(1.0);
        let mut colors = Vec::with_capacity(count);
        for i in 0..count {
            let mut hue = (i as f32 / count as f32 + hue_offset).rem_euclid(1.0);
            if spec.direction == Direction::Backward {
                hue = 1.0 - hue;
            }
            colors.push(hsv_to_rgb(hue * 360.0, 1.0, 1.0));
        }

        leds.set_brightness(spec.brightness);
        leds.set_pixel_array(&colors)?;

        if !wait_frame(frame_period, &cancel).await {
            info!("gradient rainbow cancelled");
            return Ok(());
        }
        frame += 1;
    }
}

fn expired(start: Instant, duration_s: u64) -> bool {
    duration_s > 0 && start.elapsed() >= Duration::from_secs(duration_s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::MockStrip;
    use hydrosense_common::ColorStop;
    use std::sync::atomic::AtomicU64;

    fn shift_spec() -> GradientSpec {
        GradientSpec {
            stops: vec![
                ColorStop::new(0.0, 255, 0, 0).unwrap(),
                ColorStop::new(1.0, 0, 0, 255).unwrap(),
            ],
            brightness: 1.0,
            animation: Some(AnimationKind::Shift),
            speed: 1.0,
            direction: Direction::Forward,
        }
    }

    async fn settle(runner: &AnimationRunner) {
        for _ in 0..200 {
            if runner.active().await.is_empty() {
                return;
            }
            sleep(Duration::from_millis(10)).await;
        }
        panic!("runner did not settle");
    }

    #[tokio::test(start_paused = true)]
    async fn restart_replaces_and_cancels_previous_task() {
        let runner = AnimationRunner::new();
        let first_saw_cancel = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&first_saw_cancel);
        runner
            .start(AnimationName::GradientShift, move |cancel| async move {
                loop {
                    if cancel.is_cancelled() {
                        flag.store(true, Ordering::SeqCst);
                        return Ok(());
                    }
                    sleep(Duration::from_millis(10)).await;
                }
            })
            .await;

        runner
            .start(AnimationName::GradientShift, |cancel| async move {
                while !cancel.is_cancelled() {
                    sleep(Duration::from_millis(10)).await;
                }
                Ok(())
            })
            .await;

        // The replacement join is synchronous, so the old task must have
        // observed its cancel signal by now.
        assert!(first_saw_cancel.load(Ordering::SeqCst));
        assert_eq!(runner.active().await, vec![AnimationName::GradientShift]);

        runner.stop(AnimationName::GradientShift).await;
        settle(&runner).await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_stale_task_does_not_evict_its_replacement() {
        let runner = AnimationRunner::with_join_timeout(Duration::from_millis(100));
        let replacement_cancelled = Arc::new(AtomicBool::new(false));

        // Ignores its cancel signal long enough to outlive the join
        // timeout, then finishes on its own.
        runner
            .start(AnimationName::GradientShift, |_cancel| async move {
                sleep(Duration::from_millis(500)).await;
                Ok(())
            })
            .await;

        let flag = Arc::clone(&replacement_cancelled);
        runner
            .start(AnimationName::GradientShift, move |cancel| async move {
                while !cancel.is_cancelled() {
                    sleep(Duration::from_millis(10)).await;
                }
                flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .await;

        // Let the stale task finish; its wrapper must leave the
        // replacement's handle in place.
        sleep(Duration::from_millis(600)).await;
        assert_eq!(runner.active().await, vec![AnimationName::GradientShift]);

        // The replacement is still reachable under its name.
        runner.stop(AnimationName::GradientShift).await;
        assert!(replacement_cancelled.load(Ordering::SeqCst));
        assert!(runner.active().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn different_names_run_concurrently() {
        let runner = AnimationRunner::new();
        let completions = Arc::new(AtomicU64::new(0));

        for name in [AnimationName::Sunrise, AnimationName::GradientPulse] {
            let completions = Arc::clone(&completions);
            runner
                .start(name, move |_cancel| async move {
                    sleep(Duration::from_millis(50)).await;
                    completions.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })
                .await;
        }

        assert_eq!(runner.active().await.len(), 2);
        settle(&runner).await;
        assert_eq!(completions.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_animation_is_removed_without_retry() {
        let runner = AnimationRunner::new();
        let attempts = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&attempts);
        runner
            .start(AnimationName::Sunset, move |_cancel| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                anyhow::bail!("pixel write exploded")
            })
            .await;

        settle(&runner).await;
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn animation_slot_excludes_second_effect() {
        let (strip, _handle) = MockStrip::new(8);
        let leds = LedDevice::new(Box::new(strip), 1.0);

        let runner = AnimationRunner::new();
        let leds_for_anim = leds.clone();
        runner
            .start(AnimationName::GradientShift, move |cancel| {
                animate_gradient(leds_for_anim, shift_spec(), 0, 25, cancel)
            })
            .await;
        // Give the task a frame to claim the slot.
        sleep(Duration::from_millis(100)).await;

        let contended = timeout(Duration::from_millis(200), leds.acquire_animation_slot()).await;
        assert!(contended.is_err(), "slot should be held by the animation");

        runner.stop(AnimationName::GradientShift).await;
        let freed = timeout(Duration::from_millis(200), leds.acquire_animation_slot()).await;
        assert!(freed.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn sun_cycle_runs_all_frames_and_lands_on_profile_end() {
        let (strip, handle) = MockStrip::new(4);
        let leds = LedDevice::new(Box::new(strip), 1.0);

        cloudy_sunrise(leds, 2, Season::Summer, 5, CancelToken::new())
            .await
            .unwrap();

        // steps + 1 frames at duration=2s, fps=5.
        assert_eq!(handle.show_count(), 11);
        let (r, g, b) = handle.shown()[0];
        assert!(r > 0 || g > 0 || b > 0, "strip should end lit");
    }

    #[tokio::test(start_paused = true)]
    async fn hardware_fault_terminates_animation() {
        let (strip, handle) = MockStrip::new(4);
        let leds = LedDevice::new(Box::new(strip), 1.0);
        handle.fail_pixel_writes(true);

        let result =
            animate_gradient(leds, shift_spec(), 0, 25, CancelToken::new()).await;
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_duration_pulse_restores_nothing_it_should_not() {
        let (strip, handle) = MockStrip::new(4);
        let leds = LedDevice::new(Box::new(strip), 1.0);

        let mut spec = shift_spec();
        spec.animation = Some(AnimationKind::Pulse);
        spec.brightness = 0.8;

        animate_gradient(leds.clone(), spec, 1, 10, CancelToken::new())
            .await
            .unwrap();

        assert!(handle.show_count() >= 2);
        // Brightness ends inside the pulse modulation envelope.
        let brightness = leds.brightness();
        assert!(brightness >= 0.3 * 0.8 - 1e-4 && brightness <= 0.8 + 1e-4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_an_unbounded_animation() {
        let (strip, _handle) = MockStrip::new(4);
        let leds = LedDevice::new(Box::new(strip), 1.0);

        let cancel = CancelToken::new();
        let task = tokio::spawn(animate_gradient(
            leds,
            shift_spec(),
            0,
            25,
            cancel.clone(),
        ));

        sleep(Duration::from_millis(100)).await;
        cancel.cancel();
        let result = timeout(Duration::from_secs(1), task).await;
        assert!(result.is_ok(), "cancelled animation should return promptly");
    }
}
