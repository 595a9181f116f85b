//! Hardware seam: the driver traits the rest of the controller talks to,
//! plus in-memory mock implementations.
//!
//! Real deployments plug a DMA-driven WS281x strip and sysfs/character
//! GPIO pins in behind these traits; the host falls back to the mocks when
//! no hardware is present, and every concurrency test runs against them.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("pixel write failed: {0}")]
    PixelWrite(String),
    #[error("gpio write failed: {0}")]
    GpioWrite(String),
    #[error("gpio read failed: {0}")]
    GpioRead(String),
}

/// Pack an RGB triple into the 0xRRGGBB word the strip driver expects.
pub fn pack_color(r: u8, g: u8, b: u8) -> u32 {
    (u32::from(r) << 16) | (u32::from(g) << 8) | u32::from(b)
}

pub fn unpack_color(color: u32) -> (u8, u8, u8) {
    ((color >> 16) as u8, (color >> 8) as u8, color as u8)
}

/// Addressable LED pixel buffer. Writes stage into an internal buffer;
/// `show` pushes the buffer to the physical strip.
pub trait PixelStrip: Send {
    fn num_pixels(&self) -> usize;
    fn set_pixel(&mut self, index: usize, color: u32) -> Result<(), HwError>;
    fn show(&mut self) -> Result<(), HwError>;
}

pub trait OutputPin: Send {
    fn write(&mut self, high: bool) -> Result<(), HwError>;
    /// Read back the driven level, for watchdog reconciliation.
    fn read(&self) -> Result<bool, HwError>;
}

pub trait InputPin: Send {
    fn read(&self) -> Result<bool, HwError>;
}

#[derive(Debug, Default)]
struct MockStripState {
    staged: Vec<u32>,
    shown: Vec<u32>,
    show_count: u64,
    fail_pixel_writes: bool,
}

/// Inspection/fault-injection handle shared with a [`MockStrip`].
#[derive(Debug, Clone)]
pub struct MockStripHandle {
    state: Arc<Mutex<MockStripState>>,
}

impl MockStripHandle {
    /// The buffer as of the last `show`.
    pub fn shown(&self) -> Vec<(u8, u8, u8)> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        state.shown.iter().map(|&c| unpack_color(c)).collect()
    }

    pub fn show_count(&self) -> u64 {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).show_count
    }

    pub fn fail_pixel_writes(&self, fail: bool) {
        self.state.lock().unwrap_or_else(|p| p.into_inner()).fail_pixel_writes = fail;
    }
}

pub struct MockStrip {
    count: usize,
    state: Arc<Mutex<MockStripState>>,
}

impl MockStrip {
    pub fn new(count: usize) -> (Self, MockStripHandle) {
        let state = Arc::new(Mutex::new(MockStripState {
            staged: vec![0; count],
            shown: vec![0; count],
            show_count: 0,
            fail_pixel_writes: false,
        }));
        let handle = MockStripHandle {
            state: Arc::clone(&state),
        };
        (Self { count, state }, handle)
    }
}

impl PixelStrip for MockStrip {
    fn num_pixels(&self) -> usize {
        self.count
    }

    fn set_pixel(&mut self, index: usize, color: u32) -> Result<(), HwError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.fail_pixel_writes {
            return Err(HwError::PixelWrite("injected fault".to_string()));
        }
        if index < state.staged.len() {
            state.staged[index] = color;
        }
        Ok(())
    }

    fn show(&mut self) -> Result<(), HwError> {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if state.fail_pixel_writes {
            return Err(HwError::PixelWrite("injected fault".to_string()));
        }
        let staged = state.staged.clone();
        state.shown = staged;
        state.show_count += 1;
        Ok(())
    }
}

/// Digital pin whose level a test (or a simulated glitch) can flip from
/// outside, exercising the watchdog's self-healing path, and whose I/O can
/// be failed on demand.
#[derive(Debug, Clone)]
pub struct MockPinHandle {
    level: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl MockPinHandle {
    pub fn level(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }

    pub fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }

    pub fn fail_io(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

pub struct MockOutputPin {
    level: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl MockOutputPin {
    pub fn new(initial_high: bool) -> (Self, MockPinHandle) {
        let level = Arc::new(AtomicBool::new(initial_high));
        let fail = Arc::new(AtomicBool::new(false));
        let handle = MockPinHandle {
            level: Arc::clone(&level),
            fail: Arc::clone(&fail),
        };
        (Self { level, fail }, handle)
    }
}

impl OutputPin for MockOutputPin {
    fn write(&mut self, high: bool) -> Result<(), HwError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HwError::GpioWrite("injected fault".to_string()));
        }
        self.level.store(high, Ordering::SeqCst);
        Ok(())
    }

    fn read(&self) -> Result<bool, HwError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HwError::GpioRead("injected fault".to_string()));
        }
        Ok(self.level.load(Ordering::SeqCst))
    }
}

pub struct MockInputPin {
    level: Arc<AtomicBool>,
    fail: Arc<AtomicBool>,
}

impl MockInputPin {
    pub fn new(initial_high: bool) -> (Self, MockPinHandle) {
        let level = Arc::new(AtomicBool::new(initial_high));
        let fail = Arc::new(AtomicBool::new(false));
        let handle = MockPinHandle {
            level: Arc::clone(&level),
            fail: Arc::clone(&fail),
        };
        (Self { level, fail }, handle)
    }
}

impl InputPin for MockInputPin {
    fn read(&self) -> Result<bool, HwError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(HwError::GpioRead("injected fault".to_string()));
        }
        Ok(self.level.load(Ordering::SeqCst))
    }
}
