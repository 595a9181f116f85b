//! Math helpers for smooth, non-flickering light behavior.

/// Smooth ease-in / ease-out curve. Callers clamp `t` to `[0, 1]` first.
pub fn smoothstep(t: f32) -> f32 {
    t * t * (3.0 - 2.0 * t)
}

/// Linear interpolation. Extrapolates for `t` outside `[0, 1]`.
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Very low-frequency noise generator, used to simulate slow cloud
/// movement without flicker. Deterministic for a fixed `dt` sequence.
#[derive(Debug, Clone)]
pub struct SmoothNoise {
    intensity: f32,
    phase: f32,
}

impl SmoothNoise {
    pub fn new(intensity: f32) -> Self {
        Self {
            intensity,
            phase: 0.0,
        }
    }

    pub fn step(&mut self, dt: f32) -> f32 {
        // Extremely slow phase evolution
        self.phase += dt * 0.05;
        self.phase.sin() * self.intensity
    }
}

/// Generate the gamma correction lookup table for a strip.
pub fn build_gamma_table(gamma: f32) -> [u8; 256] {
    let mut table = [0u8; 256];
    for (i, entry) in table.iter_mut().enumerate() {
        *entry = ((i as f32 / 255.0).powf(gamma) * 255.0 + 0.5) as u8;
    }
    table
}

/// HSV to RGB. Hue in degrees (wrapped mod 360), saturation and value
/// clamped to `[0, 1]`.
pub fn hsv_to_rgb(h: f32, s: f32, v: f32) -> (u8, u8, u8) {
    let h = h.rem_euclid(360.0) / 60.0;
    let s = s.clamp(0.0, 1.0);
    let v = v.clamp(0.0, 1.0);

    let sector = h.floor() as u8 % 6;
    let f = h - h.floor();
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    let (r, g, b) = match sector {
        0 => (v, t, p),
        1 => (q, v, p),
        2 => (p, v, t),
        3 => (p, q, v),
        4 => (t, p, v),
        _ => (v, p, q),
    };

    ((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8)
}
