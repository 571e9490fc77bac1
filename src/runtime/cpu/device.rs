//! Emulated accelerator device

use crate::runtime::Device;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Per-device counters
#[derive(Debug, Default)]
pub struct DeviceStats {
    allocated: AtomicUsize,
    host_to_device: AtomicUsize,
    device_to_host: AtomicUsize,
    kernel_launches: AtomicUsize,
}

impl DeviceStats {
    /// Live bytes allocated on the device
    pub fn allocated_bytes(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Total bytes copied host to device
    pub fn host_to_device_bytes(&self) -> usize {
        self.host_to_device.load(Ordering::Relaxed)
    }

    /// Total bytes copied device to host
    pub fn device_to_host_bytes(&self) -> usize {
        self.device_to_host.load(Ordering::Relaxed)
    }

    /// Batched kernel launches (one per batch, not per tile)
    pub fn kernel_launches(&self) -> usize {
        self.kernel_launches.load(Ordering::Relaxed)
    }

    pub(crate) fn record_alloc(&self, bytes: usize) {
        self.allocated.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_free(&self, bytes: usize) {
        self.allocated.fetch_sub(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_h2d(&self, bytes: usize) {
        self.host_to_device.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_d2h(&self, bytes: usize) {
        self.device_to_host.fetch_add(bytes, Ordering::Relaxed);
    }

    pub(crate) fn record_launch(&self) {
        self.kernel_launches.fetch_add(1, Ordering::Relaxed);
    }
}

/// An accelerator emulated in host memory
#[derive(Clone, Debug)]
pub struct CpuDevice {
    id: usize,
    stats: Arc<DeviceStats>,
}

static DEVICES: Mutex<Vec<CpuDevice>> = Mutex::new(Vec::new());

impl CpuDevice {
    /// Handle for emulated device `id`; handles for the same id share counters
    pub fn new(id: usize) -> Self {
        let mut devices = DEVICES.lock();
        while devices.len() <= id {
            let next = devices.len();
            devices.push(CpuDevice {
                id: next,
                stats: Arc::new(DeviceStats::default()),
            });
        }
        devices[id].clone()
    }

    /// Counters for this device
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }
}

impl Device for CpuDevice {
    fn id(&self) -> usize {
        self.id
    }

    fn name(&self) -> String {
        format!("cpu-emulated:{}", self.id)
    }
}
