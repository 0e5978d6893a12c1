use std::cell::Cell;
use std::rc::Rc;

use anyhow::{bail, Result};
use serde::Deserialize;

/// Element order of a device tensor's backing buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryLayout {
    /// Planar NCHW, the model's default striding.
    Contiguous,
    /// Interleaved NHWC, preferred by some compiled kernels.
    ChannelsLast,
}

/// Opaque handle to device-resident storage. Dropping the buffer releases
/// the device allocation.
pub trait DeviceBuffer {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host view of the data, when the device keeps one. Accelerator
    /// backends that hold memory off-host return `None`.
    fn as_host_slice(&self) -> Option<&[f32]>;
}

/// Device-resident f32 array, batch-first. Owned exclusively by the call
/// that produced it until consumed; not retained across iterations.
pub struct Tensor {
    shape: Vec<usize>,
    layout: MemoryLayout,
    buf: Box<dyn DeviceBuffer>,
}

impl Tensor {
    pub fn new(shape: Vec<usize>, layout: MemoryLayout, buf: Box<dyn DeviceBuffer>) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        if buf.len() != expected {
            bail!(
                "tensor buffer has {} elements, shape {:?} needs {}",
                buf.len(),
                shape,
                expected
            );
        }
        Ok(Self { shape, layout, buf })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn layout(&self) -> MemoryLayout {
        self.layout
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_host_slice(&self) -> Option<&[f32]> {
        self.buf.as_host_slice()
    }
}

/// Accelerator seam. The device executes asynchronously relative to the
/// host; `synchronize` blocks until all submitted work has completed.
pub trait Device {
    fn name(&self) -> &str;

    /// Move host data onto the device as a tensor.
    fn upload(&self, data: Vec<f32>, shape: &[usize], layout: MemoryLayout) -> Result<Tensor>;

    /// Allocate a raw device buffer (weights, scratch space).
    fn alloc(&self, data: Vec<f32>) -> Result<Box<dyn DeviceBuffer>>;

    /// Block the host until outstanding device work completes.
    fn synchronize(&self) -> Result<()>;

    /// Bytes currently allocated on the device. Used to bound peak memory
    /// across a multi-variant run.
    fn allocated_bytes(&self) -> usize;
}

/// Reference device backed by host memory. Work completes synchronously, so
/// `synchronize` only records that it was asked to block.
pub struct HostDevice {
    allocated: Rc<Cell<usize>>,
    sync_calls: Cell<usize>,
}

impl HostDevice {
    pub fn new() -> Self {
        Self {
            allocated: Rc::new(Cell::new(0)),
            sync_calls: Cell::new(0),
        }
    }

    /// How many times the host blocked on the device.
    pub fn sync_calls(&self) -> usize {
        self.sync_calls.get()
    }
}

impl Default for HostDevice {
    fn default() -> Self {
        Self::new()
    }
}

struct HostBuffer {
    data: Vec<f32>,
    allocated: Rc<Cell<usize>>,
}

impl HostBuffer {
    fn size_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<f32>()
    }
}

impl DeviceBuffer for HostBuffer {
    fn len(&self) -> usize {
        self.data.len()
    }

    fn as_host_slice(&self) -> Option<&[f32]> {
        Some(&self.data)
    }
}

impl Drop for HostBuffer {
    fn drop(&mut self) {
        let freed = self.size_bytes();
        self.allocated.set(self.allocated.get().saturating_sub(freed));
    }
}

impl Device for HostDevice {
    fn name(&self) -> &str {
        "host"
    }

    fn upload(&self, data: Vec<f32>, shape: &[usize], layout: MemoryLayout) -> Result<Tensor> {
        let buf = self.alloc(data)?;
        Tensor::new(shape.to_vec(), layout, buf)
    }

    fn alloc(&self, data: Vec<f32>) -> Result<Box<dyn DeviceBuffer>> {
        let buf = HostBuffer {
            data,
            allocated: Rc::clone(&self.allocated),
        };
        self.allocated.set(self.allocated.get() + buf.size_bytes());
        Ok(Box::new(buf))
    }

    fn synchronize(&self) -> Result<()> {
        self.sync_calls.set(self.sync_calls.get() + 1);
        Ok(())
    }

    fn allocated_bytes(&self) -> usize {
        self.allocated.get()
    }
}
