//! Accelerator identity

/// One accelerator attached to a rank
///
/// Device ids are dense, `0..num_devices`, and match `Location::Device(id)`.
pub trait Device: Clone + Send + Sync + 'static {
    /// Index of this device among the node's accelerators
    fn id(&self) -> usize;

    /// Display name used in logs
    fn name(&self) -> String {
        format!("device:{}", self.id())
    }
}
