use std::{
    collections::HashMap,
    io::ErrorKind,
    net::SocketAddr,
    path::PathBuf,
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::{
    extract::{Path as AxumPath, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use serde::{Deserialize, Serialize};
use tokio::{net::TcpListener, sync::Mutex};
use tracing::{error, info, warn};

use hydrosense_common::{
    default_presets, hsv_to_rgb, render_gradient, validate_gradient_config, AnimationKind,
    AnimationName, AutomationMode, ColorStop, GradientPreset, GradientSpec, LedMode, RelayState,
    RuntimeConfig, Season, TOPIC_AVAILABILITY, TOPIC_CMD_LED_BRIGHTNESS, TOPIC_CMD_LED_POWER,
    TOPIC_CMD_LED_PRESET, TOPIC_CMD_PUMP_MODE, TOPIC_LED_STATE, TOPIC_PUMP_STATE,
    TOPIC_RELAY_STATE, TOPIC_TEMPERATURE_STATE, TOPIC_WATER_LEVEL_STATE,
};

use crate::{
    animation::{animate_gradient, cloudy_sunrise, cloudy_sunset, AnimationRunner},
    hw::{MockInputPin, MockOutputPin, MockStrip},
    led::LedDevice,
    pump::PumpAutomation,
    relay::{RelayController, RelayError},
    state::DeviceState,
    temperature::TemperatureManager,
    water_level::WaterLevelMonitor,
};

#[derive(Clone)]
struct AppState {
    config: Arc<RuntimeConfig>,
    leds: LedDevice,
    runner: AnimationRunner,
    relays: Arc<RelayController>,
    water: Arc<WaterLevelMonitor>,
    pump: Arc<PumpAutomation>,
    temperature: Option<Arc<TemperatureManager>>,
    device_state: Arc<DeviceState>,
    presets: Arc<Mutex<HashMap<String, GradientPreset>>>,
    mqtt: Option<AsyncClient>,
    store: AppStore,
}

#[derive(Clone)]
struct AppStore {
    runtime_path: Arc<PathBuf>,
    presets_path: Arc<PathBuf>,
    lock: Arc<Mutex<()>>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct RgbRequest {
    r: u8,
    g: u8,
    b: u8,
    #[serde(default = "default_brightness")]
    brightness: f32,
}

#[derive(Debug, Deserialize)]
struct HsvRequest {
    h: f32,
    #[serde(default = "default_full")]
    s: f32,
    #[serde(default = "default_full")]
    v: f32,
    #[serde(default = "default_brightness")]
    brightness: f32,
}

#[derive(Debug, Deserialize)]
struct BrightnessRequest {
    brightness: f32,
}

#[derive(Debug, Deserialize)]
struct GradientStaticRequest {
    stops: Vec<ColorStop>,
    #[serde(default = "default_brightness")]
    brightness: f32,
}

#[derive(Debug, Deserialize)]
struct GradientAnimatedRequest {
    #[serde(flatten)]
    spec: GradientSpec,
    /// Seconds; 0 runs until replaced or cancelled.
    #[serde(default)]
    duration: u64,
}

#[derive(Debug, Deserialize)]
struct SunCycleRequest {
    #[serde(default = "default_season")]
    season: Season,
    #[serde(default = "default_sun_duration")]
    duration: u64,
}

#[derive(Debug, Deserialize)]
struct RelayStateRequest {
    state: RelayState,
}

#[derive(Debug, Deserialize)]
struct AutomationModeRequest {
    mode: AutomationMode,
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    led: hydrosense_common::LedStatePayload,
    relays: Vec<hydrosense_common::RelayInfo>,
    #[serde(rename = "waterLevel")]
    water_level: hydrosense_common::WaterLevelInfo,
    pump: hydrosense_common::PumpStatus,
    temperatures: Vec<crate::temperature::TemperatureReading>,
    #[serde(rename = "activeAnimations")]
    active_animations: Vec<AnimationName>,
}

fn default_brightness() -> f32 {
    1.0
}

fn default_full() -> f32 {
    1.0
}

fn default_season() -> Season {
    Season::Spring
}

fn default_sun_duration() -> u64 {
    1_800
}

const MAX_MQTT_PAYLOAD_BYTES: usize = 4 * 1024;
const STATE_PUBLISH_INTERVAL: Duration = Duration::from_secs(10);

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = AppStore::new();
    let mut config = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!("failed to load runtime config from store: {err:#}");
        RuntimeConfig::default()
    });
    config.sanitize();

    let presets = store.load_presets().await.unwrap_or_else(|err| {
        warn!("failed to load gradient presets from store: {err:#}");
        builtin_preset_map()
    });

    let (strip, _strip_handle) = MockStrip::new(config.led.count);
    let leds = LedDevice::new(Box::new(strip), config.led.gamma);

    let mut relay_pins = Vec::new();
    for relay in &config.relays {
        let (pin, _handle) = MockOutputPin::new(relay.active_low);
        relay_pins.push((relay.clone(), Box::new(pin) as Box<dyn crate::hw::OutputPin>));
    }
    let relays = Arc::new(
        RelayController::new(relay_pins).context("failed to initialize relay controller")?,
    );

    let (water_pin, _water_handle) = MockInputPin::new(false);
    let water = WaterLevelMonitor::new(
        config.water_level.clone(),
        Box::new(water_pin),
        Some(Box::new(|level, _info| {
            info!("water level transition confirmed: {}", level.as_str());
        })),
    );
    water.start();

    let pump = PumpAutomation::new(Arc::clone(&relays), Arc::clone(&water), config.pump.clone())
        .context("failed to initialize pump automation")?;
    pump.start();

    if config.relay_watchdog_enabled {
        let handle =
            relays.spawn_watchdog(Duration::from_secs(config.relay_watchdog_interval_s));
        relays.store_watchdog(handle);
    }

    let temperature = if config.temperature.enabled {
        let manager = TemperatureManager::new(&config.temperature);
        manager.start();
        Some(manager)
    } else {
        None
    };

    let mqtt = if config.mqtt.enabled {
        let host = std::env::var("MQTT_HOST").unwrap_or(config.mqtt.host.clone());
        let port = std::env::var("MQTT_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(config.mqtt.port);
        let mut options = MqttOptions::new(config.mqtt.client_id.clone(), host, port);
        let user = std::env::var("MQTT_USER").unwrap_or(config.mqtt.username.clone());
        let pass = std::env::var("MQTT_PASS").unwrap_or(config.mqtt.password.clone());
        if !user.is_empty() {
            options.set_credentials(user, pass);
        }
        Some(AsyncClient::new(options, 64))
    } else {
        None
    };

    let app_state = AppState {
        config: Arc::new(config),
        leds,
        runner: AnimationRunner::new(),
        relays,
        water,
        pump,
        temperature,
        device_state: Arc::new(DeviceState::new()),
        presets: Arc::new(Mutex::new(presets)),
        mqtt: mqtt.as_ref().map(|(client, _)| client.clone()),
        store,
    };

    if let Some((client, eventloop)) = mqtt {
        subscribe_topics(&client).await?;
        spawn_mqtt_loop(app_state.clone(), eventloop);
        spawn_state_publish_loop(app_state.clone());
    }

    let app = Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/led/rgb", post(handle_led_rgb))
        .route("/api/led/hsv", post(handle_led_hsv))
        .route("/api/led/brightness", post(handle_led_brightness))
        .route("/api/led/off", post(handle_led_off))
        .route("/api/led/sunrise", post(handle_sunrise))
        .route("/api/led/sunset", post(handle_sunset))
        .route("/api/gradient/static", post(handle_gradient_static))
        .route("/api/gradient/animated", post(handle_gradient_animated))
        .route("/api/gradient/presets", get(handle_list_presets))
        .route("/api/gradient/preset/save", post(handle_save_preset))
        .route(
            "/api/gradient/preset/{name}",
            get(handle_get_preset).delete(handle_delete_preset),
        )
        .route("/api/gradient/preset/{name}/apply", post(handle_apply_preset))
        .route("/api/relay", get(handle_get_relays))
        .route("/api/relay/{id}", get(handle_get_relay).post(handle_set_relay))
        .route("/api/relay/{id}/on", post(handle_relay_on))
        .route("/api/relay/{id}/off", post(handle_relay_off))
        .route("/api/relay/{id}/toggle", post(handle_relay_toggle))
        .route("/api/water-level", get(handle_get_water_level))
        .route("/api/pump-automation", get(handle_get_pump_status))
        .route("/api/pump-automation/mode", post(handle_set_pump_mode))
        .route(
            "/api/pump-automation/reset-stats",
            post(handle_reset_pump_stats),
        )
        .route("/api/temperature", get(handle_get_temperatures))
        .route(
            "/api/temperature/sensors/discover",
            get(handle_discover_sensors),
        )
        .route("/api/temperature/sensors/list", get(handle_list_sensors))
        .route("/api/temperature/{sensor_id}", get(handle_get_temperature))
        .with_state(app_state.clone());

    let port = std::env::var("HYDROSENSE_HTTP_PORT")
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(app_state.config.http_port);
    let addr: SocketAddr = format!("0.0.0.0:{port}")
        .parse()
        .context("invalid listen address")?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind controller server at {addr}"))?;

    info!("controller listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown(&app_state).await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("failed to listen for shutdown signal: {err}");
    }
}

async fn shutdown(state: &AppState) {
    info!("shutting down");
    state.runner.stop_all().await;
    if let Err(err) = state.leds.off() {
        warn!("failed to blank strip during shutdown: {err}");
    }
    state.pump.stop();
    state.water.shutdown();
    if let Some(temperature) = &state.temperature {
        temperature.shutdown();
    }
    state.relays.cleanup();
    if let Some(mqtt) = &state.mqtt {
        let _ = mqtt
            .publish(TOPIC_AVAILABILITY, QoS::AtLeastOnce, true, "offline")
            .await;
    }
    info!("shutdown complete");
}

async fn subscribe_topics(mqtt: &AsyncClient) -> anyhow::Result<()> {
    let topics = [
        TOPIC_CMD_LED_POWER,
        TOPIC_CMD_LED_BRIGHTNESS,
        TOPIC_CMD_LED_PRESET,
        TOPIC_CMD_PUMP_MODE,
    ];
    for topic in topics {
        mqtt.subscribe(topic, QoS::AtMostOnce).await?;
    }
    Ok(())
}

fn spawn_mqtt_loop(app_state: AppState, mut eventloop: rumqttc::EventLoop) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    if let Err(err) =
                        handle_mqtt_message(&app_state, message.topic, message.payload.to_vec())
                            .await
                    {
                        warn!("mqtt message handling error: {err:#}");
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    if let Some(mqtt) = &app_state.mqtt {
                        let _ = mqtt
                            .publish(TOPIC_AVAILABILITY, QoS::AtLeastOnce, true, "online")
                            .await;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}

fn spawn_state_publish_loop(app_state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATE_PUBLISH_INTERVAL);
        loop {
            interval.tick().await;
            let Some(mqtt) = &app_state.mqtt else { return };

            let publishes = [
                (
                    TOPIC_LED_STATE,
                    serde_json::to_vec(&app_state.device_state.to_mqtt_payload()),
                ),
                (
                    TOPIC_RELAY_STATE,
                    serde_json::to_vec(&app_state.relays.get_all_info()),
                ),
                (
                    TOPIC_WATER_LEVEL_STATE,
                    serde_json::to_vec(&app_state.water.get_info()),
                ),
                (
                    TOPIC_PUMP_STATE,
                    serde_json::to_vec(&app_state.pump.get_status()),
                ),
            ];
            for (topic, payload) in publishes {
                match payload {
                    Ok(body) => {
                        if let Err(err) = mqtt.publish(topic, QoS::AtLeastOnce, true, body).await {
                            warn!("state publish failed on {topic}: {err}");
                        }
                    }
                    Err(err) => warn!("state serialization failed for {topic}: {err}"),
                }
            }

            if let Some(temperature) = &app_state.temperature {
                match serde_json::to_vec(&temperature.latest()) {
                    Ok(body) => {
                        if let Err(err) = mqtt
                            .publish(TOPIC_TEMPERATURE_STATE, QoS::AtLeastOnce, true, body)
                            .await
                        {
                            warn!("temperature state publish failed: {err}");
                        }
                    }
                    Err(err) => warn!("temperature state serialization failed: {err}"),
                }
            }
        }
    });
}

async fn handle_mqtt_message(
    app_state: &AppState,
    topic: String,
    payload: Vec<u8>,
) -> anyhow::Result<()> {
    if payload.len() > MAX_MQTT_PAYLOAD_BYTES {
        warn!(
            "dropping oversized MQTT payload on topic {} ({} bytes)",
            topic,
            payload.len()
        );
        return Ok(());
    }

    let message = String::from_utf8(payload).context("non utf8 mqtt payload")?;

    match topic.as_str() {
        TOPIC_CMD_LED_POWER => {
            let lower = message.trim().to_ascii_lowercase();
            if lower == "on" {
                let snapshot = app_state.device_state.snapshot();
                let (r, g, b) = snapshot.rgb;
                app_state.runner.stop_all().await;
                app_state.leds.set_brightness(snapshot.brightness);
                app_state.leds.set_rgb(r, g, b)?;
                app_state.device_state.set_rgb(LedMode::Rgb, (r, g, b));
            } else if lower == "off" {
                app_state.runner.stop_all().await;
                app_state.leds.off()?;
                app_state.device_state.set_off();
            }
        }
        TOPIC_CMD_LED_BRIGHTNESS => {
            // Home Assistant publishes 0-255.
            if let Ok(raw) = message.trim().parse::<u16>() {
                let brightness = (raw.min(255) as f32) / 255.0;
                app_state.leds.set_brightness(brightness);
                app_state.device_state.set_brightness(brightness);
            }
        }
        TOPIC_CMD_LED_PRESET => {
            let name = message.trim().to_string();
            let preset = { app_state.presets.lock().await.get(&name).cloned() };
            match preset {
                Some(preset) => apply_preset(app_state, &preset).await?,
                None => warn!("mqtt preset command for unknown preset: {name}"),
            }
        }
        TOPIC_CMD_PUMP_MODE => {
            match parse_automation_mode(message.trim()) {
                Some(mode) => app_state.pump.set_mode(mode),
                None => warn!("mqtt pump mode command with invalid mode: {message}"),
            }
        }
        _ => {}
    }

    Ok(())
}

fn parse_automation_mode(value: &str) -> Option<AutomationMode> {
    match value.to_ascii_uppercase().as_str() {
        "AUTO" => Some(AutomationMode::Auto),
        "MANUAL" => Some(AutomationMode::Manual),
        "DISABLED" => Some(AutomationMode::Disabled),
        _ => None,
    }
}

fn animation_name_for(kind: AnimationKind) -> AnimationName {
    match kind {
        AnimationKind::Shift => AnimationName::GradientShift,
        AnimationKind::Pulse => AnimationName::GradientPulse,
        AnimationKind::Rainbow => AnimationName::GradientRainbow,
    }
}

/// Push a preset to the strip: animated presets start a background task,
/// static ones render once.
async fn apply_preset(state: &AppState, preset: &GradientPreset) -> anyhow::Result<()> {
    let spec = preset.config.clone();
    info!("applying gradient preset: {}", preset.name);

    match spec.animation {
        Some(kind) => {
            let name = animation_name_for(kind);
            let leds = state.leds.clone();
            let fps = state.config.led.fps;
            let task_spec = spec.clone();
            state
                .runner
                .start(name, move |cancel| {
                    animate_gradient(leds, task_spec, 0, fps, cancel)
                })
                .await;
            state.device_state.set_gradient(spec, Some(name));
        }
        None => {
            let colors = render_gradient(&spec.stops, state.leds.count(), 0.0)?;
            state.runner.stop_all().await;
            state.leds.set_brightness(spec.brightness);
            state.leds.set_pixel_array(&colors)?;
            state.device_state.set_gradient(spec, None);
        }
    }
    Ok(())
}

fn builtin_preset_map() -> HashMap<String, GradientPreset> {
    default_presets()
        .into_iter()
        .map(|preset| (preset.name.clone(), preset))
        .collect()
}

fn is_builtin_preset(name: &str) -> bool {
    default_presets().iter().any(|preset| preset.name == name)
}

fn validate_preset_name(name: &str) -> Result<(), &'static str> {
    if name.is_empty() || name.len() > 50 {
        return Err("preset name must be 1-50 characters");
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err("invalid preset name");
    }
    Ok(())
}

async fn handle_get_status(State(state): State<AppState>) -> impl IntoResponse {
    let temperatures = state
        .temperature
        .as_ref()
        .map(|manager| manager.latest())
        .unwrap_or_default();

    Json(StatusResponse {
        led: state.device_state.snapshot(),
        relays: state.relays.get_all_info(),
        water_level: state.water.get_info(),
        pump: state.pump.get_status(),
        temperatures,
        active_animations: state.runner.active().await,
    })
}

async fn handle_led_rgb(
    State(state): State<AppState>,
    Json(req): Json<RgbRequest>,
) -> impl IntoResponse {
    if !(0.0..=1.0).contains(&req.brightness) {
        return error_response(StatusCode::BAD_REQUEST, "brightness must be 0.0-1.0");
    }

    state.runner.stop_all().await;
    state.leds.set_brightness(req.brightness);
    if let Err(err) = state.leds.set_rgb(req.r, req.g, req.b) {
        return hw_error_response(err);
    }
    state.device_state.set_rgb(LedMode::Rgb, (req.r, req.g, req.b));
    state.device_state.set_brightness(req.brightness);
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_led_hsv(
    State(state): State<AppState>,
    Json(req): Json<HsvRequest>,
) -> impl IntoResponse {
    if !req.h.is_finite() || !(0.0..=360.0).contains(&req.h) {
        return error_response(StatusCode::BAD_REQUEST, "hue must be 0-360");
    }
    if !(0.0..=1.0).contains(&req.s) || !(0.0..=1.0).contains(&req.v) {
        return error_response(StatusCode::BAD_REQUEST, "saturation and value must be 0.0-1.0");
    }
    if !(0.0..=1.0).contains(&req.brightness) {
        return error_response(StatusCode::BAD_REQUEST, "brightness must be 0.0-1.0");
    }

    state.runner.stop_all().await;
    state.leds.set_brightness(req.brightness);
    if let Err(err) = state.leds.set_hsv(req.h, req.s, req.v) {
        return hw_error_response(err);
    }
    state
        .device_state
        .set_rgb(LedMode::Hsv, hsv_to_rgb(req.h, req.s, req.v));
    state.device_state.set_brightness(req.brightness);
    Json(state.device_state.snapshot()).into_response()
}

/// Adjusts the global multiplier without disturbing a running animation.
async fn handle_led_brightness(
    State(state): State<AppState>,
    Json(req): Json<BrightnessRequest>,
) -> impl IntoResponse {
    if !(0.0..=1.0).contains(&req.brightness) {
        return error_response(StatusCode::BAD_REQUEST, "brightness must be 0.0-1.0");
    }
    state.leds.set_brightness(req.brightness);
    state.device_state.set_brightness(req.brightness);
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_led_off(State(state): State<AppState>) -> impl IntoResponse {
    state.runner.stop_all().await;
    if let Err(err) = state.leds.off() {
        return hw_error_response(err);
    }
    state.device_state.set_off();
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_gradient_static(
    State(state): State<AppState>,
    Json(req): Json<GradientStaticRequest>,
) -> impl IntoResponse {
    let spec = GradientSpec {
        stops: req.stops,
        brightness: req.brightness,
        animation: None,
        speed: 1.0,
        direction: Default::default(),
    };
    if let Err(err) = validate_gradient_config(&spec) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let colors = match render_gradient(&spec.stops, state.leds.count(), 0.0) {
        Ok(colors) => colors,
        Err(err) => return error_response(StatusCode::BAD_REQUEST, &err.to_string()),
    };

    state.runner.stop_all().await;
    state.leds.set_brightness(spec.brightness);
    if let Err(err) = state.leds.set_pixel_array(&colors) {
        return hw_error_response(err);
    }
    state.device_state.set_gradient(spec, None);
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_gradient_animated(
    State(state): State<AppState>,
    Json(req): Json<GradientAnimatedRequest>,
) -> impl IntoResponse {
    if let Err(err) = validate_gradient_config(&req.spec) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }
    let Some(kind) = req.spec.animation else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "animation type required (shift, pulse, rainbow)",
        );
    };

    let name = animation_name_for(kind);
    let leds = state.leds.clone();
    let fps = state.config.led.fps;
    let duration = req.duration;
    let task_spec = req.spec.clone();
    state
        .runner
        .start(name, move |cancel| {
            animate_gradient(leds, task_spec, duration, fps, cancel)
        })
        .await;

    state.device_state.set_gradient(req.spec, Some(name));
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_sunrise(
    State(state): State<AppState>,
    Json(req): Json<SunCycleRequest>,
) -> impl IntoResponse {
    if req.duration == 0 {
        return error_response(StatusCode::BAD_REQUEST, "duration must be positive");
    }

    let leds = state.leds.clone();
    let fps = state.config.led.fps;
    state
        .runner
        .start(AnimationName::Sunrise, move |cancel| {
            cloudy_sunrise(leds, req.duration, req.season, fps, cancel)
        })
        .await;
    state
        .device_state
        .set_animation(LedMode::Sunrise, AnimationName::Sunrise);
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_sunset(
    State(state): State<AppState>,
    Json(req): Json<SunCycleRequest>,
) -> impl IntoResponse {
    if req.duration == 0 {
        return error_response(StatusCode::BAD_REQUEST, "duration must be positive");
    }

    let leds = state.leds.clone();
    let fps = state.config.led.fps;
    state
        .runner
        .start(AnimationName::Sunset, move |cancel| {
            cloudy_sunset(leds, req.duration, req.season, fps, cancel)
        })
        .await;
    state
        .device_state
        .set_animation(LedMode::Sunset, AnimationName::Sunset);
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_list_presets(State(state): State<AppState>) -> impl IntoResponse {
    let presets = state.presets.lock().await;
    let mut list: Vec<GradientPreset> = presets.values().cloned().collect();
    list.sort_by(|a, b| a.name.cmp(&b.name));
    Json(list)
}

async fn handle_get_preset(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    match state.presets.lock().await.get(&name) {
        Some(preset) => Json(preset.clone()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, &format!("preset not found: {name}")),
    }
}

async fn handle_save_preset(
    State(state): State<AppState>,
    Json(preset): Json<GradientPreset>,
) -> impl IntoResponse {
    if let Err(message) = validate_preset_name(&preset.name) {
        return error_response(StatusCode::BAD_REQUEST, message);
    }
    if is_builtin_preset(&preset.name) {
        return error_response(
            StatusCode::BAD_REQUEST,
            "built-in presets cannot be overwritten",
        );
    }
    if let Err(err) = validate_gradient_config(&preset.config) {
        return error_response(StatusCode::BAD_REQUEST, &err.to_string());
    }

    let snapshot = {
        let mut presets = state.presets.lock().await;
        presets.insert(preset.name.clone(), preset.clone());
        presets.clone()
    };
    if let Err(err) = state.store.save_presets(&snapshot).await {
        warn!("failed to persist presets: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist presets",
        );
    }
    info!("saved gradient preset: {}", preset.name);
    Json(preset).into_response()
}

async fn handle_delete_preset(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    if is_builtin_preset(&name) {
        return error_response(StatusCode::BAD_REQUEST, "built-in presets cannot be deleted");
    }

    let snapshot = {
        let mut presets = state.presets.lock().await;
        if presets.remove(&name).is_none() {
            return error_response(StatusCode::NOT_FOUND, &format!("preset not found: {name}"));
        }
        presets.clone()
    };
    if let Err(err) = state.store.save_presets(&snapshot).await {
        warn!("failed to persist presets: {err:#}");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to persist presets",
        );
    }
    info!("deleted gradient preset: {name}");
    StatusCode::NO_CONTENT.into_response()
}

async fn handle_apply_preset(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> impl IntoResponse {
    let preset = { state.presets.lock().await.get(&name).cloned() };
    let Some(preset) = preset else {
        return error_response(StatusCode::NOT_FOUND, &format!("preset not found: {name}"));
    };
    if let Err(err) = apply_preset(&state, &preset).await {
        warn!("failed to apply preset {name}: {err:#}");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, "failed to apply preset");
    }
    Json(state.device_state.snapshot()).into_response()
}

async fn handle_get_relays(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.relays.get_all_info())
}

async fn handle_get_relay(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    match state.relays.get_info(&id) {
        Ok(info) => Json(info).into_response(),
        Err(err) => relay_error_response(err),
    }
}

async fn handle_relay_on(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    match state.relays.turn_on(&id) {
        Ok(_) => relay_info_response(&state, &id),
        Err(err) => relay_error_response(err),
    }
}

async fn handle_relay_off(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    match state.relays.turn_off(&id) {
        Ok(_) => relay_info_response(&state, &id),
        Err(err) => relay_error_response(err),
    }
}

async fn handle_relay_toggle(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> impl IntoResponse {
    match state.relays.toggle(&id) {
        Ok(_) => relay_info_response(&state, &id),
        Err(err) => relay_error_response(err),
    }
}

async fn handle_set_relay(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Json(req): Json<RelayStateRequest>,
) -> impl IntoResponse {
    match state.relays.set_state(&id, req.state) {
        Ok(_) => relay_info_response(&state, &id),
        Err(err) => relay_error_response(err),
    }
}

fn relay_info_response(state: &AppState, id: &str) -> axum::response::Response {
    match state.relays.get_info(id) {
        Ok(info) => Json(info).into_response(),
        Err(err) => relay_error_response(err),
    }
}

fn relay_error_response(err: RelayError) -> axum::response::Response {
    match err {
        RelayError::NotFound(id) => {
            error_response(StatusCode::NOT_FOUND, &format!("relay not found: {id}"))
        }
        RelayError::Hw(err) => {
            error!("relay hardware error: {err}");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "relay hardware error")
        }
    }
}

async fn handle_get_water_level(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.water.get_info())
}

async fn handle_get_pump_status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.pump.get_status())
}

async fn handle_set_pump_mode(
    State(state): State<AppState>,
    Json(req): Json<AutomationModeRequest>,
) -> impl IntoResponse {
    state.pump.set_mode(req.mode);
    Json(state.pump.get_status())
}

async fn handle_reset_pump_stats(State(state): State<AppState>) -> impl IntoResponse {
    state.pump.reset_statistics();
    Json(state.pump.get_status())
}

async fn handle_get_temperatures(State(state): State<AppState>) -> impl IntoResponse {
    match &state.temperature {
        Some(manager) => Json(manager.read_all()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "temperature monitoring disabled"),
    }
}

async fn handle_get_temperature(
    State(state): State<AppState>,
    AxumPath(sensor_id): AxumPath<String>,
) -> impl IntoResponse {
    let Some(manager) = &state.temperature else {
        return error_response(StatusCode::NOT_FOUND, "temperature monitoring disabled");
    };
    if !manager.sensor_ids().contains(&sensor_id) {
        return error_response(
            StatusCode::NOT_FOUND,
            &format!("sensor not configured: {sensor_id}"),
        );
    }
    Json(manager.read_sensor(&sensor_id)).into_response()
}

async fn handle_discover_sensors(State(state): State<AppState>) -> impl IntoResponse {
    match &state.temperature {
        Some(manager) => Json(manager.refresh_sensors()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "temperature monitoring disabled"),
    }
}

async fn handle_list_sensors(State(state): State<AppState>) -> impl IntoResponse {
    match &state.temperature {
        Some(manager) => Json(manager.sensor_ids()).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "temperature monitoring disabled"),
    }
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

fn hw_error_response(err: crate::hw::HwError) -> axum::response::Response {
    error!("LED hardware error: {err}");
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "LED hardware error")
}

impl AppStore {
    fn new() -> Self {
        let data_dir = std::env::var("HYDROSENSE_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.hydrosense"));

        Self {
            runtime_path: Arc::new(data_dir.join("runtime.json")),
            presets_path: Arc::new(data_dir.join("presets.json")),
            lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.runtime_path.as_ref()).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }

    async fn load_presets(&self) -> anyhow::Result<HashMap<String, GradientPreset>> {
        let _guard = self.lock.lock().await;
        match tokio::fs::read(self.presets_path.as_ref()).await {
            Ok(raw) => {
                let saved: HashMap<String, GradientPreset> = serde_json::from_slice(&raw)?;
                // Built-ins always win over anything stored under their name.
                let mut merged = saved;
                for preset in default_presets() {
                    merged.insert(preset.name.clone(), preset);
                }
                Ok(merged)
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(builtin_preset_map()),
            Err(err) => Err(err.into()),
        }
    }

    async fn save_presets(&self, presets: &HashMap<String, GradientPreset>) -> anyhow::Result<()> {
        let _guard = self.lock.lock().await;
        let path = self.presets_path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(presets)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}
