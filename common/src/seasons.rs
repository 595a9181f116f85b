//! Season-specific color temperature and brightness profiles for the
//! sunrise/sunset simulations.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Autumn,
}

impl Season {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Winter => "winter",
            Self::Spring => "spring",
            Self::Summer => "summer",
            Self::Autumn => "autumn",
        }
    }
}

/// Hue/saturation ramp for one half of the day.
#[derive(Debug, Clone, Copy)]
pub struct SunProfile {
    pub h_start: f32,
    pub h_end: f32,
    pub s_start: f32,
    pub s_end: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct SeasonProfile {
    pub sunrise: SunProfile,
    pub sunset: SunProfile,
    pub max_v: f32,
    pub cloud_intensity: f32,
}

impl Season {
    pub fn profile(self) -> SeasonProfile {
        match self {
            Self::Winter => SeasonProfile {
                sunrise: SunProfile {
                    h_start: 10.0,
                    h_end: 45.0,
                    s_start: 1.0,
                    s_end: 0.25,
                },
                sunset: SunProfile {
                    h_start: 45.0,
                    h_end: 10.0,
                    s_start: 0.25,
                    s_end: 1.0,
                },
                max_v: 0.8,
                cloud_intensity: 0.02,
            },
            Self::Spring => SeasonProfile {
                sunrise: SunProfile {
                    h_start: 15.0,
                    h_end: 55.0,
                    s_start: 1.0,
                    s_end: 0.2,
                },
                sunset: SunProfile {
                    h_start: 55.0,
                    h_end: 15.0,
                    s_start: 0.2,
                    s_end: 1.0,
                },
                max_v: 1.0,
                cloud_intensity: 0.03,
            },
            Self::Summer => SeasonProfile {
                sunrise: SunProfile {
                    h_start: 20.0,
                    h_end: 60.0,
                    s_start: 0.9,
                    s_end: 0.15,
                },
                sunset: SunProfile {
                    h_start: 60.0,
                    h_end: 20.0,
                    s_start: 0.15,
                    s_end: 0.9,
                },
                max_v: 1.0,
                cloud_intensity: 0.04,
            },
            Self::Autumn => SeasonProfile {
                sunrise: SunProfile {
                    h_start: 12.0,
                    h_end: 50.0,
                    s_start: 1.0,
                    s_end: 0.3,
                },
                sunset: SunProfile {
                    h_start: 50.0,
                    h_end: 12.0,
                    s_start: 0.3,
                    s_end: 1.0,
                },
                max_v: 0.9,
                cloud_intensity: 0.03,
            },
        }
    }
}
