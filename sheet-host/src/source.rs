//! Synthetic screen source.
//!
//! Renders a static gradient with a bar that sweeps one step to the right
//! on every grab, so both the diff and continuous paths see real changes
//! without a display server.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use tracing::debug;

use sheet_core::error::SheetError;
use sheet_core::stream::capture::{CaptureConstraints, CaptureStream, MediaTrack, ScreenCaptureSource};
use sheet_core::stream::types::{Frame, ScreenSize};

const BAR_WIDTH: u32 = 32;
const BAR_STEP: u32 = 8;

pub struct TestPatternSource {
    size: ScreenSize,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: ScreenSize::new(width.max(1), height.max(1)),
        }
    }
}

impl ScreenCaptureSource for TestPatternSource {
    fn acquire(&self, constraints: &CaptureConstraints) -> Result<Arc<dyn CaptureStream>, SheetError> {
        debug!(size = ?self.size, audio = constraints.audio, "test pattern acquired");
        Ok(Arc::new(TestPatternStream {
            size: self.size,
            audio: constraints.audio,
            tick: AtomicU32::new(0),
            released: AtomicBool::new(false),
        }))
    }
}

pub struct TestPatternStream {
    size: ScreenSize,
    audio: bool,
    tick: AtomicU32,
    released: AtomicBool,
}

impl TestPatternStream {
    fn render(&self, tick: u32) -> Frame {
        let ScreenSize { width, height } = self.size;
        let mut frame = Frame::filled(width, height, 0);
        let bar = (tick * BAR_STEP) % width;
        for y in 0..height {
            for x in 0..width {
                let px = frame.pixel_mut(x, y);
                if x >= bar && x < bar + BAR_WIDTH {
                    px.copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
                } else {
                    px[0] = (x * 255 / width) as u8;
                    px[1] = (y * 255 / height) as u8;
                    px[2] = 0x40;
                    px[3] = 0xFF;
                }
            }
        }
        frame
    }
}

impl CaptureStream for TestPatternStream {
    fn size(&self) -> ScreenSize {
        self.size
    }

    fn grab(&self) -> Result<Frame, SheetError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(SheetError::CaptureUnavailable("test pattern released".into()));
        }
        let tick = self.tick.fetch_add(1, Ordering::Relaxed);
        Ok(self.render(tick))
    }

    fn tracks(&self) -> Vec<MediaTrack> {
        let mut tracks = vec![MediaTrack::video("test-pattern")];
        if self.audio {
            tracks.push(MediaTrack::audio("test-tone"));
        }
        tracks
    }

    fn release(&self) {
        if !self.released.swap(true, Ordering::SeqCst) {
            debug!("test pattern released");
        }
    }
}
