//! Device runtime backends
//!
//! This module defines the [`Runtime`] trait a matrix uses for accelerator
//! memory and batched kernels, and the reference [`cpu::CpuRuntime`].
//!
//! # Architecture
//!
//! ```text
//! Runtime (backend identity, static dispatch)
//! ├── Device (identifies one accelerator)
//! ├── Queue (ordered device work, sync point)
//! └── batched kernels (geset, gescale, gemm, herk, transpose, swap)
//!
//! Allocator (per location, byte tracking and limits)
//! ```

mod allocator;
pub mod cpu;
mod traits;

pub(crate) use allocator::{host_allocate, host_deallocate};
pub use allocator::{ALIGNMENT, Allocator, TrackingAllocator};
pub use traits::{Device, Queue, Runtime};
