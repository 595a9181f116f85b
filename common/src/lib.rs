pub mod color;
pub mod config;
pub mod gradient;
pub mod presets;
pub mod seasons;
pub mod topics;
pub mod types;

pub use color::{build_gamma_table, hsv_to_rgb, lerp, smoothstep, SmoothNoise};
pub use config::{
    LedConfig, MqttConfig, PumpConfig, RelayConfig, RuntimeConfig, TemperatureConfig,
    TemperatureUnit, WaterLevelConfig,
};
pub use gradient::{
    render_gradient, validate_gradient_config, AnimationKind, ColorStop, Direction, GradientError,
    GradientSpec,
};
pub use presets::{default_presets, GradientPreset};
pub use seasons::{Season, SeasonProfile, SunProfile};
pub use topics::*;
pub use types::{
    AnimationName, AutomationMode, LedMode, LedStatePayload, NextAction, PumpStatus, RelayInfo,
    RelayState, WaterLevel, WaterLevelInfo,
};
