//! Execution queue for the emulated devices

use super::device::CpuDevice;
use crate::error::Result;
use crate::runtime::{Device, Queue};

/// Queue on an emulated device
///
/// Work runs synchronously on the calling thread, so `sync` has nothing to wait for.
#[derive(Clone, Debug)]
pub struct CpuQueue {
    pub(crate) device: CpuDevice,
    index: usize,
}

impl CpuQueue {
    pub(crate) fn new(device: CpuDevice, index: usize) -> Self {
        Self { device, index }
    }

    /// Queue index within its device
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Queue for CpuQueue {
    fn device_index(&self) -> usize {
        self.device.id()
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }
}
