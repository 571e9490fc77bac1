//! CPU runtime with emulated accelerators
//!
//! Accelerators are modeled as separate host allocations reached only through
//! [`crate::runtime::Runtime`] copies and batched kernels. Matrices that
//! target `Devices` run every device code path of the library against this
//! runtime, so data movement and batching are testable without GPUs.

mod batch;
mod device;
mod queue;
mod runtime;

pub use device::{CpuDevice, DeviceStats};
pub use queue::CpuQueue;
pub use runtime::CpuRuntime;
