//! Runtime traits for device backend abstraction

pub mod device;
pub mod queue;
pub mod runtime;

pub use device::Device;
pub use queue::Queue;
pub use runtime::Runtime;
