//! Gradient rendering engine for the LED strip.
//!
//! Static gradients are rendered once; animated gradients (shift, pulse,
//! rainbow) re-render per frame in the controller's animation tasks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum GradientError {
    #[error("at least 2 color stops required")]
    TooFewStops,
    #[error("color stop position {0} outside 0.0-1.0")]
    PositionOutOfRange(f32),
    #[error("color stops must be in ascending position order")]
    UnsortedStops,
    #[error("duplicate color stop position {0}")]
    DuplicatePosition(f32),
    #[error("brightness {0} outside 0.0-1.0")]
    InvalidBrightness(f32),
    #[error("animation speed {0} must be positive")]
    InvalidSpeed(f32),
}

/// Single color stop along the normalized 0-1 strip axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColorStop {
    pub position: f32,
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorStop {
    pub fn new(position: f32, r: u8, g: u8, b: u8) -> Result<Self, GradientError> {
        if !(0.0..=1.0).contains(&position) {
            return Err(GradientError::PositionOutOfRange(position));
        }
        Ok(Self { position, r, g, b })
    }

    pub fn rgb(&self) -> (u8, u8, u8) {
        (self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnimationKind {
    Shift,
    Pulse,
    Rainbow,
}

impl AnimationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shift => "shift",
            Self::Pulse => "pulse",
            Self::Rainbow => "rainbow",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Forward,
    Backward,
}

/// Complete gradient configuration, as submitted over HTTP/MQTT or loaded
/// from a preset. A running animation never sees mid-flight edits; a new
/// spec replaces the old one through a fresh animation start.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientSpec {
    pub stops: Vec<ColorStop>,
    #[serde(default = "default_brightness")]
    pub brightness: f32,
    #[serde(default)]
    pub animation: Option<AnimationKind>,
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default)]
    pub direction: Direction,
}

fn default_brightness() -> f32 {
    1.0
}

fn default_speed() -> f32 {
    1.0
}

/// Render a gradient to a pixel array with linear interpolation.
///
/// `offset` shifts the sample position for animations; positions wrap into
/// `[0, 1)` only when the offset is non-zero. At offset zero a `t` that
/// creeps past 1.0 through float rounding must keep sampling the last stop
/// pair instead of wrapping back to the first.
pub fn render_gradient(
    stops: &[ColorStop],
    pixel_count: usize,
    offset: f32,
) -> Result<Vec<(u8, u8, u8)>, GradientError> {
    if stops.len() < 2 {
        return Err(GradientError::TooFewStops);
    }

    if pixel_count == 0 {
        return Ok(Vec::new());
    }

    let mut sorted: Vec<ColorStop> = stops.to_vec();
    sorted.sort_by(|a, b| a.position.total_cmp(&b.position));

    if pixel_count == 1 {
        return Ok(vec![sorted[0].rgb()]);
    }

    let mut colors = Vec::with_capacity(pixel_count);

    for i in 0..pixel_count {
        let mut t = i as f32 / (pixel_count - 1) as f32 + offset;
        if offset != 0.0 {
            t = t.rem_euclid(1.0);
        }

        // First adjacent pair bracketing t wins; falls back to the outer
        // stops when t lies outside every pair.
        let mut left = sorted[0];
        let mut right = sorted[sorted.len() - 1];
        for pair in sorted.windows(2) {
            if pair[0].position <= t && t <= pair[1].position {
                left = pair[0];
                right = pair[1];
                break;
            }
        }

        let factor = if right.position == left.position {
            0.0
        } else {
            (t - left.position) / (right.position - left.position)
        };

        let channel = |a: u8, b: u8| -> u8 {
            let value = f32::from(a) + (f32::from(b) - f32::from(a)) * factor;
            value.clamp(0.0, 255.0) as u8
        };

        colors.push((
            channel(left.r, right.r),
            channel(left.g, right.g),
            channel(left.b, right.b),
        ));
    }

    Ok(colors)
}

/// Validate a full gradient spec beyond the per-field bounds enforced at
/// construction: stop count, position range, strict ascending order.
pub fn validate_gradient_config(spec: &GradientSpec) -> Result<(), GradientError> {
    if spec.stops.len() < 2 {
        return Err(GradientError::TooFewStops);
    }

    for stop in &spec.stops {
        if !(0.0..=1.0).contains(&stop.position) {
            return Err(GradientError::PositionOutOfRange(stop.position));
        }
    }

    for pair in spec.stops.windows(2) {
        if pair[0].position == pair[1].position {
            return Err(GradientError::DuplicatePosition(pair[0].position));
        }
        if pair[0].position > pair[1].position {
            return Err(GradientError::UnsortedStops);
        }
    }

    if !(0.0..=1.0).contains(&spec.brightness) {
        return Err(GradientError::InvalidBrightness(spec.brightness));
    }

    if spec.speed <= 0.0 {
        return Err(GradientError::InvalidSpeed(spec.speed));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn red_blue() -> Vec<ColorStop> {
        vec![
            ColorStop::new(0.0, 255, 0, 0).unwrap(),
            ColorStop::new(1.0, 0, 0, 255).unwrap(),
        ]
    }

    #[test]
    fn two_stop_gradient_endpoints_and_midpoint() {
        let colors = render_gradient(&red_blue(), 5, 0.0).unwrap();

        assert_eq!(colors.len(), 5);
        assert_eq!(colors[0], (255, 0, 0));
        assert_eq!(colors[4], (0, 0, 255));

        let (r, _, b) = colors[2];
        assert!(r > 0 && r < 255);
        assert!(b > 0 && b < 255);
    }

    #[test]
    fn single_pixel_returns_first_sorted_stop() {
        for offset in [0.0, 0.25, 0.9] {
            let colors = render_gradient(&red_blue(), 1, offset).unwrap();
            assert_eq!(colors, vec![(255, 0, 0)]);
        }
    }

    #[test]
    fn zero_pixels_returns_empty() {
        assert_eq!(render_gradient(&red_blue(), 0, 0.0).unwrap(), Vec::new());
    }

    #[test]
    fn fewer_than_two_stops_is_rejected() {
        let one = vec![ColorStop::new(0.0, 255, 0, 0).unwrap()];
        assert_eq!(
            render_gradient(&one, 5, 0.0),
            Err(GradientError::TooFewStops)
        );
        assert_eq!(render_gradient(&[], 5, 0.0), Err(GradientError::TooFewStops));
    }

    #[test]
    fn unsorted_stops_render_identically_to_sorted() {
        let sorted = vec![
            ColorStop::new(0.0, 255, 0, 0).unwrap(),
            ColorStop::new(0.5, 0, 255, 0).unwrap(),
            ColorStop::new(1.0, 0, 0, 255).unwrap(),
        ];
        let shuffled = vec![sorted[2], sorted[0], sorted[1]];

        assert_eq!(
            render_gradient(&sorted, 20, 0.0).unwrap(),
            render_gradient(&shuffled, 20, 0.0).unwrap()
        );
    }

    #[test]
    fn offset_wraps_positions() {
        let colors = render_gradient(&red_blue(), 5, 0.5).unwrap();
        // t = 1.0 + 0.5 wraps to 0.5, matching the first pixel's t.
        assert_eq!(colors[4], colors[0]);
        // t = 0.5 + 0.5 wraps to 0.0.
        assert_eq!(colors[2], (255, 0, 0));
    }

    #[test]
    fn stop_position_is_validated() {
        assert_eq!(
            ColorStop::new(1.2, 0, 0, 0),
            Err(GradientError::PositionOutOfRange(1.2))
        );
        assert!(ColorStop::new(0.0, 0, 0, 0).is_ok());
    }

    #[test]
    fn validate_accepts_well_formed_spec() {
        let spec = GradientSpec {
            stops: red_blue(),
            brightness: 0.8,
            animation: Some(AnimationKind::Shift),
            speed: 1.5,
            direction: Direction::Forward,
        };
        assert_eq!(validate_gradient_config(&spec), Ok(()));
    }

    #[test]
    fn validate_rejects_descending_and_duplicate_positions() {
        let mut spec = GradientSpec {
            stops: vec![
                ColorStop::new(0.5, 0, 0, 0).unwrap(),
                ColorStop::new(0.2, 0, 0, 0).unwrap(),
            ],
            brightness: 1.0,
            animation: None,
            speed: 1.0,
            direction: Direction::Forward,
        };
        assert_eq!(
            validate_gradient_config(&spec),
            Err(GradientError::UnsortedStops)
        );

        spec.stops = vec![
            ColorStop::new(0.5, 0, 0, 0).unwrap(),
            ColorStop::new(0.5, 1, 1, 1).unwrap(),
        ];
        assert_eq!(
            validate_gradient_config(&spec),
            Err(GradientError::DuplicatePosition(0.5))
        );
    }

    #[test]
    fn validate_rejects_bad_brightness_and_speed() {
        let mut spec = GradientSpec {
            stops: red_blue(),
            brightness: 1.4,
            animation: None,
            speed: 1.0,
            direction: Direction::Forward,
        };
        assert_eq!(
            validate_gradient_config(&spec),
            Err(GradientError::InvalidBrightness(1.4))
        );

        spec.brightness = 1.0;
        spec.speed = 0.0;
        assert_eq!(
            validate_gradient_config(&spec),
            Err(GradientError::InvalidSpeed(0.0))
        );
    }

    #[test]
    fn spec_deserializes_with_defaults() {
        let spec: GradientSpec = serde_json::from_str(
            r#"{"stops":[{"position":0.0,"r":255,"g":0,"b":0},{"position":1.0,"r":0,"g":0,"b":255}]}"#,
        )
        .unwrap();

        assert_eq!(spec.brightness, 1.0);
        assert_eq!(spec.speed, 1.0);
        assert_eq!(spec.animation, None);
        assert_eq!(spec.direction, Direction::Forward);
    }
}
