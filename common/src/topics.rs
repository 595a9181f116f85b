pub const TOPIC_AVAILABILITY: &str = "hydrosense/availability";

pub const TOPIC_LED_STATE: &str = "hydrosense/led/state";
pub const TOPIC_RELAY_STATE: &str = "hydrosense/relays/state";
pub const TOPIC_WATER_LEVEL_STATE: &str = "hydrosense/water_level/state";
pub const TOPIC_PUMP_STATE: &str = "hydrosense/pump_automation/state";
pub const TOPIC_TEMPERATURE_STATE: &str = "hydrosense/temperature/state";

pub const TOPIC_CMD_LED_POWER: &str = "hydrosense/cmnd/led/power";
pub const TOPIC_CMD_LED_BRIGHTNESS: &str = "hydrosense/cmnd/led/brightness";
pub const TOPIC_CMD_LED_PRESET: &str = "hydrosense/cmnd/led/preset";
pub const TOPIC_CMD_PUMP_MODE: &str = "hydrosense/cmnd/pump_automation/mode";
