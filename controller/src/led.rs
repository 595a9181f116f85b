//! LED strip device: global brightness, gamma correction, and the
//! animation slot that serializes time-based effects.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::OwnedMutexGuard;
use tracing::info;

use hydrosense_common::{build_gamma_table, hsv_to_rgb};

use crate::hw::{pack_color, HwError, PixelStrip};

struct LedInner {
    strip: Box<dyn PixelStrip>,
    brightness: f32,
    gamma: [u8; 256],
}

/// Handle to the physical strip. Cheap to clone; all clones share the
/// hardware-access lock and the animation slot.
///
/// Two locks, two jobs: the hardware lock serializes individual writes to
/// the device handle, while the animation slot is held by one long-running
/// effect at a time for its entire duration. One-shot commands (`set_rgb`,
/// `off`, ...) only touch the hardware lock, so they interleave with an
/// in-progress animation's frames and take effect immediately.
#[derive(Clone)]
pub struct LedDevice {
    inner: Arc<Mutex<LedInner>>,
    animation_slot: Arc<tokio::sync::Mutex<()>>,
    count: usize,
}

impl LedDevice {
    pub fn new(strip: Box<dyn PixelStrip>, gamma: f32) -> Self {
        let count = strip.num_pixels();
        info!("LED strip initialized: count={count}, gamma={gamma}");
        Self {
            inner: Arc::new(Mutex::new(LedInner {
                strip,
                brightness: 1.0,
                gamma: build_gamma_table(gamma),
            })),
            animation_slot: Arc::new(tokio::sync::Mutex::new(())),
            count,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Block until this task owns the single animation slot. The returned
    /// guard must live as long as the animation does.
    pub async fn acquire_animation_slot(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.animation_slot).lock_owned().await
    }

    fn lock(&self) -> MutexGuard<'_, LedInner> {
        // Recover the inner state if a writer panicked mid-frame.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_brightness(&self, level: f32) {
        let mut inner = self.lock();
        inner.brightness = level.clamp(0.0, 1.0);
    }

    pub fn brightness(&self) -> f32 {
        self.lock().brightness
    }

    fn apply_pipeline(inner: &LedInner, r: u8, g: u8, b: u8) -> u32 {
        let scale = |c: u8| inner.gamma[(f32::from(c) * inner.brightness) as usize];
        pack_color(scale(r), scale(g), scale(b))
    }

    pub fn set_rgb(&self, r: u8, g: u8, b: u8) -> Result<(), HwError> {
        let mut inner = self.lock();
        let color = Self::apply_pipeline(&inner, r, g, b);
        for i in 0..inner.strip.num_pixels() {
            inner.strip.set_pixel(i, color)?;
        }
        inner.strip.show()
    }

    /// Hue in degrees (wrapped), saturation/value clamped to `[0, 1]`.
    pub fn set_hsv(&self, h: f32, s: f32, v: f32) -> Result<(), HwError> {
        let (r, g, b) = hsv_to_rgb(h, s, v);
        self.set_rgb(r, g, b)
    }

    /// Per-pixel colors for gradient rendering. Extra entries beyond the
    /// strip length are silently dropped.
    pub fn set_pixel_array(&self, colors: &[(u8, u8, u8)]) -> Result<(), HwError> {
        let mut inner = self.lock();
        let count = inner.strip.num_pixels();
        for (i, &(r, g, b)) in colors.iter().enumerate() {
            if i >= count {
                break;
            }
            let color = Self::apply_pipeline(&inner, r, g, b);
            inner.strip.set_pixel(i, color)?;
        }
        inner.strip.show()
    }

    /// Single-pixel write; out-of-range indexes are silently ignored.
    pub fn set_pixel(&self, index: usize, r: u8, g: u8, b: u8) -> Result<(), HwError> {
        let mut inner = self.lock();
        if index >= inner.strip.num_pixels() {
            return Ok(());
        }
        let color = Self::apply_pipeline(&inner, r, g, b);
        inner.strip.set_pixel(index, color)?;
        inner.strip.show()
    }

    /// Blank the strip, bypassing the brightness/gamma pipeline.
    pub fn off(&self) -> Result<(), HwError> {
        let mut inner = self.lock();
        for i in 0..inner.strip.num_pixels() {
            inner.strip.set_pixel(i, 0)?;
        }
        inner.strip.show()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hw::{MockStrip, MockStripHandle};

    fn device(count: usize, gamma: f32) -> (LedDevice, MockStripHandle) {
        let (strip, handle) = MockStrip::new(count);
        (LedDevice::new(Box::new(strip), gamma), handle)
    }

    #[test]
    fn brightness_is_clamped() {
        let (leds, _) = device(4, 1.0);

        leds.set_brightness(1.7);
        assert_eq!(leds.brightness(), 1.0);

        leds.set_brightness(-0.3);
        assert_eq!(leds.brightness(), 0.0);

        leds.set_brightness(0.42);
        assert_eq!(leds.brightness(), 0.42);
    }

    #[test]
    fn set_rgb_fills_the_whole_strip() {
        let (leds, handle) = device(3, 1.0);
        leds.set_rgb(255, 128, 0).unwrap();
        assert_eq!(
            handle.shown(),
            vec![(255, 128, 0), (255, 128, 0), (255, 128, 0)]
        );
    }

    #[test]
    fn brightness_scales_before_gamma() {
        let (leds, handle) = device(1, 1.0);
        leds.set_brightness(0.5);
        leds.set_rgb(255, 0, 0).unwrap();
        // gamma 1.0 is identity, so only the brightness scale applies.
        assert_eq!(handle.shown()[0].0, 127);
    }

    #[test]
    fn pixel_array_truncates_silently() {
        let (leds, handle) = device(2, 1.0);
        leds.set_pixel_array(&[(1, 1, 1), (2, 2, 2), (3, 3, 3), (4, 4, 4)])
            .unwrap();
        assert_eq!(handle.shown(), vec![(1, 1, 1), (2, 2, 2)]);
    }

    #[test]
    fn out_of_range_pixel_is_ignored() {
        let (leds, handle) = device(2, 1.0);
        leds.set_pixel(5, 9, 9, 9).unwrap();
        assert_eq!(handle.show_count(), 0);
        assert_eq!(handle.shown(), vec![(0, 0, 0), (0, 0, 0)]);
    }

    #[test]
    fn off_blanks_regardless_of_brightness() {
        let (leds, handle) = device(2, 2.2);
        leds.set_rgb(255, 255, 255).unwrap();
        leds.off().unwrap();
        assert_eq!(handle.shown(), vec![(0, 0, 0), (0, 0, 0)]);
    }

    #[test]
    fn hsv_red_maps_to_full_red() {
        let (leds, handle) = device(1, 1.0);
        leds.set_hsv(360.0, 1.0, 1.0).unwrap();
        assert_eq!(handle.shown()[0], (255, 0, 0));
    }

    #[test]
    fn hardware_fault_propagates() {
        let (leds, handle) = device(2, 1.0);
        handle.fail_pixel_writes(true);
        assert!(leds.set_rgb(1, 2, 3).is_err());
    }
}
