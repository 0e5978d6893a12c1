use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{bail, Result};

use crate::device::{Device, DeviceBuffer, MemoryLayout, Tensor};
use crate::plan::{ModelSpec, OptimizationConfig};

/// Handle to the base network. The architecture is defined by an external
/// model zoo; the harness only needs enough to hand the compiler a private
/// copy per variant.
#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub num_classes: usize,
}

impl Model {
    pub fn from_spec(spec: &ModelSpec) -> Self {
        Self {
            name: spec.name.clone(),
            num_classes: spec.num_classes,
        }
    }
}

/// Ready-to-run compiled model. Dropping the artifact releases the device
/// memory it holds.
pub trait CompiledArtifact {
    /// One forward pass. The output tensor is owned by the caller and is
    /// not retained by the artifact.
    fn forward(&self, input: &Tensor) -> Result<Tensor>;
}

/// Seam to the external compilation pipeline.
pub trait ModelCompiler {
    /// Drop residual compilation state so repeated builds of the same
    /// logical variant do not accumulate duplicate artifacts.
    fn reset_cache(&self);

    fn compile(&self, model: &Model, config: &OptimizationConfig) -> Result<Box<dyn CompiledArtifact>>;
}

/// Reference backend: interprets a linear probe over per-channel means on
/// the device's host view. Stands in for the real compiler collaborator so
/// the harness runs end-to-end without one. Optimization flags steer
/// scheduling (fused accumulation, static-shape replay), not results.
pub struct InterpCompiler {
    device: Rc<dyn Device>,
    cache: RefCell<Vec<String>>,
}

impl InterpCompiler {
    pub fn new(device: Rc<dyn Device>) -> Self {
        Self {
            device,
            cache: RefCell::new(Vec::new()),
        }
    }

    /// Signatures compiled since the last cache reset.
    pub fn cached_signatures(&self) -> Vec<String> {
        self.cache.borrow().clone()
    }
}

impl ModelCompiler for InterpCompiler {
    fn reset_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    fn compile(&self, model: &Model, config: &OptimizationConfig) -> Result<Box<dyn CompiledArtifact>> {
        let signature = format!("{}:{}", model.name, config.enabled_flags().join("+"));
        if config.verbose {
            eprintln!("compile: {signature} starting");
        }

        // Deterministic probe weights, one row per class over 3 channels.
        let mut weights = Vec::with_capacity(model.num_classes * 3);
        for class in 0..model.num_classes {
            for channel in 0..3 {
                let seed = (class * 3 + channel) % 13;
                weights.push(seed as f32 * 0.25 - 1.5);
            }
        }
        let weights = self.device.alloc(weights)?;

        if config.verbose {
            eprintln!("compile: {signature} done (fused={})", config.fuse_operators);
        }
        self.cache.borrow_mut().push(signature);

        Ok(Box::new(InterpArtifact {
            device: Rc::clone(&self.device),
            weights,
            num_classes: model.num_classes,
            fused: config.fuse_operators,
            replay_shape: config.static_graph_replay.then(|| RefCell::new(None)),
        }))
    }
}

struct InterpArtifact {
    device: Rc<dyn Device>,
    weights: Box<dyn DeviceBuffer>,
    num_classes: usize,
    fused: bool,
    /// Present when built for static-graph replay: the input shape is
    /// recorded on the first call and every later call must match it.
    replay_shape: Option<RefCell<Option<Vec<usize>>>>,
}

impl CompiledArtifact for InterpArtifact {
    fn forward(&self, input: &Tensor) -> Result<Tensor> {
        if let Some(recorded) = &self.replay_shape {
            let mut recorded = recorded.borrow_mut();
            match recorded.as_ref() {
                None => *recorded = Some(input.shape().to_vec()),
                Some(shape) if shape.as_slice() != input.shape() => bail!(
                    "static-graph replay captured shape {:?}, got {:?}",
                    shape,
                    input.shape()
                ),
                Some(_) => {}
            }
        }

        let &[batch, channels, height, width] = input.shape() else {
            bail!("expected batch-first 4-d input, got shape {:?}", input.shape());
        };
        if batch != 1 || channels != 3 {
            bail!("expected [1, 3, h, w] input, got {:?}", input.shape());
        }

        let Some(data) = input.as_host_slice() else {
            bail!("interpreter backend needs a host view of the input tensor");
        };
        let Some(weights) = self.weights.as_host_slice() else {
            bail!("interpreter backend needs a host view of its weights");
        };

        let pixels = height * width;
        let sums = channel_sums(data, input.layout(), pixels);

        let mut logits = vec![0.0f32; self.num_classes];
        if self.fused {
            // Fused path: mean normalization folded into the weight multiply.
            let scale = 1.0 / pixels as f32;
            for (class, logit) in logits.iter_mut().enumerate() {
                let row = &weights[class * 3..class * 3 + 3];
                *logit = (0..3).map(|c| sums[c] * (row[c] * scale)).sum();
            }
        } else {
            let means = sums.map(|sum| sum / pixels as f32);
            for (class, logit) in logits.iter_mut().enumerate() {
                let row = &weights[class * 3..class * 3 + 3];
                *logit = (0..3).map(|c| means[c] * row[c]).sum();
            }
        }

        self.device.upload(
            logits,
            &[1, self.num_classes],
            MemoryLayout::Contiguous,
        )
    }
}

fn channel_sums(data: &[f32], layout: MemoryLayout, pixels: usize) -> [f32; 3] {
    let mut sums = [0.0f32; 3];
    match layout {
        MemoryLayout::Contiguous => {
            for channel in 0..3 {
                let plane = &data[channel * pixels..(channel + 1) * pixels];
                sums[channel] = plane.iter().sum();
            }
        }
        MemoryLayout::ChannelsLast => {
            for pixel in data.chunks_exact(3) {
                sums[0] += pixel[0];
                sums[1] += pixel[1];
                sums[2] += pixel[2];
            }
        }
    }
    sums
}
