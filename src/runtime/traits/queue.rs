//! Trait for device execution queues

/// An ordered stream of device work
///
/// Kernels and copies enqueued on one queue execute in order. Results are
/// only guaranteed visible to other queues and to the host after
/// [`Queue::sync`] returns, so every task that launches device work syncs
/// its queue before finishing.
pub trait Queue: Send + Sync {
    /// Device this queue submits to
    fn device_index(&self) -> usize;

    /// Block until all enqueued work has completed
    fn sync(&self) -> crate::error::Result<()>;
}
