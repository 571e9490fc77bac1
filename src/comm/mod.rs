//! Message passing between ranks
//!
//! The [`Communicator`] trait is the process-group runtime the rest of the
//! crate is written against: tagged point-to-point messages, rank and size
//! queries and a barrier. [`LocalCluster`] implements it for ranks running as
//! threads of one process.

mod collective;
mod local;
mod pattern;

pub use collective::{tagged_gatherv, tagged_scatterv};
pub use local::{LocalCluster, LocalComm};
pub use pattern::{cube_bcast_pattern, cube_reduce_pattern, CommPattern};

use crate::error::Result;

/// Tagged point-to-point messaging within a fixed group of ranks
///
/// Messages between one (source, destination, tag) triple are delivered in
/// the order they were sent. `send` may return before the message is received;
/// `recv` blocks until a matching message arrives.
pub trait Communicator: Send + Sync {
    /// This process's rank
    fn rank(&self) -> usize;

    /// Number of ranks
    fn size(&self) -> usize;

    /// Send `data` to `dst` with `tag`
    fn send(&self, dst: usize, tag: i32, data: Vec<u8>) -> Result<()>;

    /// Receive the next message from `src` with `tag`
    fn recv(&self, src: usize, tag: i32) -> Result<Vec<u8>>;

    /// Block until every rank has entered the barrier
    fn barrier(&self) -> Result<()>;
}

/// Decode a message payload into elements
pub(crate) fn decode_pod<T: bytemuck::Pod>(bytes: &[u8]) -> Result<Vec<T>> {
    let size = std::mem::size_of::<T>();
    if size == 0 || bytes.len() % size != 0 {
        return Err(crate::error::Error::comm(format!(
            "payload of {} bytes is not a whole number of {}-byte elements",
            bytes.len(),
            size
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / size];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}
