//! Centralized LED state tracking for status reporting and MQTT
//! synchronization.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use hydrosense_common::{AnimationName, GradientSpec, LedMode, LedStatePayload};

struct StateInner {
    mode: LedMode,
    rgb: (u8, u8, u8),
    brightness: f32,
    gradient: Option<GradientSpec>,
    active_animation: Option<AnimationName>,
    last_updated: DateTime<Utc>,
}

/// Last-known LED state, updated by every command path and read by the
/// status endpoint and the MQTT publish loop.
pub struct DeviceState {
    inner: Mutex<StateInner>,
}

impl Default for DeviceState {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(StateInner {
                mode: LedMode::Off,
                rgb: (0, 0, 0),
                brightness: 1.0,
                gradient: None,
                active_animation: None,
                last_updated: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StateInner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn set_off(&self) {
        let mut inner = self.lock();
        inner.mode = LedMode::Off;
        inner.active_animation = None;
        inner.last_updated = Utc::now();
    }

    pub fn set_rgb(&self, mode: LedMode, rgb: (u8, u8, u8)) {
        let mut inner = self.lock();
        inner.mode = mode;
        inner.rgb = rgb;
        inner.gradient = None;
        inner.active_animation = None;
        inner.last_updated = Utc::now();
    }

    pub fn set_brightness(&self, brightness: f32) {
        let mut inner = self.lock();
        inner.brightness = brightness.clamp(0.0, 1.0);
        inner.last_updated = Utc::now();
    }

    pub fn set_gradient(&self, gradient: GradientSpec, animation: Option<AnimationName>) {
        let mut inner = self.lock();
        inner.mode = if animation.is_some() {
            LedMode::GradientAnimated
        } else {
            LedMode::GradientStatic
        };
        inner.brightness = gradient.brightness;
        inner.gradient = Some(gradient);
        inner.active_animation = animation;
        inner.last_updated = Utc::now();
    }

    pub fn set_animation(&self, mode: LedMode, animation: AnimationName) {
        let mut inner = self.lock();
        inner.mode = mode;
        inner.gradient = None;
        inner.active_animation = Some(animation);
        inner.last_updated = Utc::now();
    }

    pub fn snapshot(&self) -> LedStatePayload {
        let inner = self.lock();
        LedStatePayload {
            mode: inner.mode,
            rgb: inner.rgb,
            brightness: inner.brightness,
            gradient: inner.gradient.clone(),
            active_animation: inner.active_animation,
            last_updated: inner.last_updated,
        }
    }

    /// Home Assistant MQTT Light schema payload.
    pub fn to_mqtt_payload(&self) -> Value {
        let inner = self.lock();
        if inner.mode == LedMode::Off {
            return json!({ "state": "OFF" });
        }
        json!({
            "state": "ON",
            "brightness": (inner.brightness * 255.0) as u8,
            "color": {
                "r": inner.rgb.0,
                "g": inner.rgb.1,
                "b": inner.rgb.2,
            },
            "color_mode": "rgb",
            "effect": inner
                .active_animation
                .map_or("none", |a| a.as_str()),
        })
    }
}
