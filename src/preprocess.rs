use std::rc::Rc;

use anyhow::Result;

use crate::device::{Device, MemoryLayout, Tensor};
use crate::frame::Frame;
use crate::trace::{region, Color, Profiler};

/// Turns a raw captured frame into a device-resident input tensor:
/// BGR → RGB, interleaved → planar, batch dimension added, cast to f32,
/// uploaded to the device. A `target_layout` of channels-last repacks the
/// upload to the striding the variant's kernels prefer.
///
/// Pure function of its input; holds no state besides the device handle.
pub struct Preprocessor {
    device: Rc<dyn Device>,
}

impl Preprocessor {
    pub fn new(device: Rc<dyn Device>) -> Self {
        Self { device }
    }

    pub fn transform(
        &self,
        frame: &Frame,
        target_layout: Option<MemoryLayout>,
        profiler: &dyn Profiler,
    ) -> Result<Tensor> {
        let _region = region(profiler, "preprocess", Color::Purple);

        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let pixels = width * height;
        let layout = target_layout.unwrap_or(MemoryLayout::Contiguous);

        let bgr = frame.data();
        let mut data = vec![0.0f32; pixels * 3];
        match layout {
            MemoryLayout::Contiguous => {
                // Planar RGB: channel plane c at [c * pixels..].
                for (i, px) in bgr.chunks_exact(3).enumerate() {
                    data[i] = px[2] as f32;
                    data[pixels + i] = px[1] as f32;
                    data[2 * pixels + i] = px[0] as f32;
                }
            }
            MemoryLayout::ChannelsLast => {
                for (i, px) in bgr.chunks_exact(3).enumerate() {
                    data[i * 3] = px[2] as f32;
                    data[i * 3 + 1] = px[1] as f32;
                    data[i * 3 + 2] = px[0] as f32;
                }
            }
        }

        self.device.upload(data, &[1, 3, height, width], layout)
    }
}
