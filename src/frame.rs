use anyhow::{bail, Result};
use serde::Deserialize;

/// Raw interleaved BGR pixel buffer, row-major, as delivered by a capture
/// device. Transient: produced once per capture call and consumed immediately
/// by the preprocessor.
#[derive(Debug, Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl Frame {
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            bail!(
                "frame buffer has {} bytes, expected {} for {}x{} BGR",
                data.len(),
                expected,
                width,
                height
            );
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved BGR bytes, `width * height * 3` of them.
    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Driver-side queue depth. 1 means freshest-frame delivery: stale frames
    /// are dropped rather than queued.
    #[serde(default = "default_buffer_depth")]
    pub buffer_depth: u32,
}

fn default_buffer_depth() -> u32 {
    1
}

impl CaptureSettings {
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!(
                "capture resolution must be positive, got {}x{}",
                self.width,
                self.height
            );
        }
        if self.fps == 0 {
            bail!("capture fps must be > 0");
        }
        if self.buffer_depth == 0 {
            bail!("capture buffer_depth must be >= 1");
        }
        Ok(())
    }
}

/// Produces frames until the stream ends. `Ok(None)` is the normal
/// end-of-stream sentinel, never an error.
pub trait FrameSource {
    fn capture(&mut self) -> Result<Option<Frame>>;
}

/// Deterministic gradient source used when no capture hardware is attached.
/// Honors the configured resolution; delivery is always freshest-frame
/// regardless of `buffer_depth` since nothing is ever queued.
pub struct SyntheticSource {
    settings: CaptureSettings,
    remaining: Option<u64>,
    tick: u64,
}

impl SyntheticSource {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            remaining: None,
            tick: 0,
        }
    }

    /// Limit the stream to `frames` captures, then signal end-of-stream.
    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl FrameSource for SyntheticSource {
    fn capture(&mut self) -> Result<Option<Frame>> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return Ok(None);
            }
            *remaining -= 1;
        }

        let width = self.settings.width;
        let height = self.settings.height;
        let mut data = Vec::with_capacity(width as usize * height as usize * 3);
        let shift = self.tick as u32;
        for y in 0..height {
            for x in 0..width {
                let b = ((x + shift) % 256) as u8;
                let g = ((y + shift) % 256) as u8;
                let r = ((x + y) % 256) as u8;
                data.push(b);
                data.push(g);
                data.push(r);
            }
        }
        self.tick += 1;
        Ok(Some(Frame::new(width, height, data)?))
    }
}
