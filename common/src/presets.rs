//! Built-in gradient preset catalog.
//!
//! Presets merge with a user-editable JSON file in the data dir; the
//! built-ins below act as the baseline that always exists.

use serde::{Deserialize, Serialize};

use crate::gradient::{AnimationKind, ColorStop, Direction, GradientSpec};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientPreset {
    pub name: String,
    pub config: GradientSpec,
    #[serde(default)]
    pub description: String,
}

fn stop(position: f32, r: u8, g: u8, b: u8) -> ColorStop {
    ColorStop { position, r, g, b }
}

fn preset(
    name: &str,
    description: &str,
    stops: Vec<ColorStop>,
    brightness: f32,
    animation: Option<AnimationKind>,
    speed: f32,
) -> GradientPreset {
    GradientPreset {
        name: name.to_string(),
        description: description.to_string(),
        config: GradientSpec {
            stops,
            brightness,
            animation,
            speed,
            direction: Direction::Forward,
        },
    }
}

pub fn default_presets() -> Vec<GradientPreset> {
    vec![
        preset(
            "sunset",
            "Warm sunset colors from orange to deep purple",
            vec![
                stop(0.0, 255, 94, 77),
                stop(0.3, 255, 140, 0),
                stop(0.6, 255, 69, 0),
                stop(1.0, 75, 0, 130),
            ],
            0.9,
            None,
            1.0,
        ),
        preset(
            "ocean",
            "Deep ocean blues and teals",
            vec![
                stop(0.0, 0, 105, 148),
                stop(0.5, 0, 191, 255),
                stop(1.0, 64, 224, 208),
            ],
            0.8,
            None,
            1.0,
        ),
        preset(
            "rainbow",
            "Full spectrum rainbow (animated)",
            vec![
                stop(0.0, 255, 0, 0),
                stop(0.2, 255, 165, 0),
                stop(0.4, 255, 255, 0),
                stop(0.6, 0, 255, 0),
                stop(0.8, 0, 0, 255),
                stop(1.0, 138, 43, 226),
            ],
            1.0,
            Some(AnimationKind::Rainbow),
            1.0,
        ),
        preset(
            "fire",
            "Hot fire colors from yellow to deep red",
            vec![
                stop(0.0, 255, 255, 0),
                stop(0.4, 255, 140, 0),
                stop(0.7, 255, 69, 0),
                stop(1.0, 139, 0, 0),
            ],
            0.95,
            None,
            1.0,
        ),
        preset(
            "forest",
            "Natural forest greens",
            vec![
                stop(0.0, 34, 139, 34),
                stop(0.5, 0, 128, 0),
                stop(1.0, 107, 142, 35),
            ],
            0.85,
            None,
            1.0,
        ),
        preset(
            "aurora",
            "Northern lights effect (animated pulse)",
            vec![
                stop(0.0, 0, 255, 127),
                stop(0.5, 138, 43, 226),
                stop(1.0, 0, 191, 255),
            ],
            0.9,
            Some(AnimationKind::Pulse),
            0.8,
        ),
        preset(
            "amazonian",
            "Amazon river - warm amber and brown tones for blackwater biotope",
            vec![
                stop(0.0, 139, 90, 43),
                stop(0.4, 184, 134, 11),
                stop(0.7, 205, 133, 63),
                stop(1.0, 160, 82, 45),
            ],
            0.7,
            None,
            1.0,
        ),
        preset(
            "asian_river",
            "Asian river - green and jade tones for planted biotope",
            vec![
                stop(0.0, 0, 100, 0),
                stop(0.3, 46, 139, 87),
                stop(0.7, 60, 179, 113),
                stop(1.0, 34, 139, 34),
            ],
            0.75,
            None,
            1.0,
        ),
        preset(
            "african_lake",
            "African Lake - bright blues and yellows for cichlid biotope",
            vec![
                stop(0.0, 30, 144, 255),
                stop(0.3, 0, 191, 255),
                stop(0.6, 255, 215, 0),
                stop(1.0, 255, 140, 0),
            ],
            0.85,
            None,
            1.0,
        ),
        preset(
            "reef",
            "Reef aquarium - blue and purple coral colors for marine biotope",
            vec![
                stop(0.0, 65, 105, 225),
                stop(0.4, 138, 43, 226),
                stop(0.7, 147, 112, 219),
                stop(1.0, 0, 206, 209),
            ],
            0.8,
            None,
            1.0,
        ),
        preset(
            "moonlight",
            "Night mode - soft moonlight with deep blue and purple tones",
            vec![
                stop(0.0, 25, 25, 112),
                stop(0.3, 65, 105, 225),
                stop(0.6, 123, 104, 238),
                stop(1.0, 72, 61, 139),
            ],
            0.15,
            None,
            1.0,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gradient::validate_gradient_config;

    #[test]
    fn every_builtin_preset_validates() {
        let presets = default_presets();
        assert_eq!(presets.len(), 11);
        for preset in &presets {
            validate_gradient_config(&preset.config)
                .unwrap_or_else(|err| panic!("preset {} invalid: {err}", preset.name));
        }
    }

    #[test]
    fn animated_builtins_carry_their_animation() {
        let presets = default_presets();
        let rainbow = presets.iter().find(|p| p.name == "rainbow").unwrap();
        assert_eq!(rainbow.config.animation, Some(AnimationKind::Rainbow));
        let aurora = presets.iter().find(|p| p.name == "aurora").unwrap();
        assert_eq!(aurora.config.animation, Some(AnimationKind::Pulse));
        assert_eq!(aurora.config.speed, 0.8);
    }
}
