//! Root collectives with variable counts, built from tagged point-to-point messages
//!
//! Unlike a communicator-wide collective these only use the given tag, so
//! several can be in flight between the same ranks alongside tile traffic.

use super::{decode_pod, Communicator};
use crate::error::{Error, Result};
use bytemuck::Pod;
use tracing::debug;

fn check_layout(
    comm: &dyn Communicator,
    counts: &[usize],
    displs: &[usize],
    len: usize,
) -> Result<()> {
    if counts.len() != comm.size() || displs.len() != comm.size() {
        return Err(Error::invalid_argument(
            "counts",
            format!("need one count and displacement per rank ({})", comm.size()),
        ));
    }
    for (r, (&c, &d)) in counts.iter().zip(displs).enumerate() {
        if d + c > len {
            return Err(Error::invalid_argument(
                "displs",
                format!("block for rank {} ends at {} past buffer of {}", r, d + c, len),
            ));
        }
    }
    Ok(())
}

/// Gather a variable-length block from every rank into `recvbuf` at `root`
///
/// At the root, rank r's block lands at `recvbuf[displs[r]..displs[r] + counts[r]]`.
/// Other ranks ignore `recvbuf`, `counts` and `displs`.
#[allow(clippy::too_many_arguments)]
pub fn tagged_gatherv<T: Pod>(
    comm: &dyn Communicator,
    sendbuf: &[T],
    recvbuf: &mut [T],
    counts: &[usize],
    displs: &[usize],
    root: usize,
    tag: i32,
) -> Result<()> {
    let rank = comm.rank();
    if rank != root {
        return comm.send(root, tag, bytemuck::cast_slice(sendbuf).to_vec());
    }
    check_layout(comm, counts, displs, recvbuf.len())?;
    debug!(root, tag, ranks = comm.size(), "gatherv");
    for src in 0..comm.size() {
        let block = &mut recvbuf[displs[src]..displs[src] + counts[src]];
        if src == root {
            if sendbuf.len() != counts[src] {
                return Err(Error::shape_mismatch((counts[src], 1), (sendbuf.len(), 1)));
            }
            block.copy_from_slice(sendbuf);
            continue;
        }
        let data: Vec<T> = decode_pod(&comm.recv(src, tag)?)?;
        if data.len() != counts[src] {
            return Err(Error::shape_mismatch((counts[src], 1), (data.len(), 1)));
        }
        block.copy_from_slice(&data);
    }
    Ok(())
}

/// Scatter variable-length blocks of `sendbuf` from `root` into each rank's `recvbuf`
///
/// Rank r receives `sendbuf[displs[r]..displs[r] + counts[r]]`; its `recvbuf`
/// must have exactly that length.
#[allow(clippy::too_many_arguments)]
pub fn tagged_scatterv<T: Pod>(
    comm: &dyn Communicator,
    sendbuf: &[T],
    counts: &[usize],
    displs: &[usize],
    recvbuf: &mut [T],
    root: usize,
    tag: i32,
) -> Result<()> {
    let rank = comm.rank();
    if rank != root {
        let data: Vec<T> = decode_pod(&comm.recv(root, tag)?)?;
        if data.len() != recvbuf.len() {
            return Err(Error::shape_mismatch((recvbuf.len(), 1), (data.len(), 1)));
        }
        recvbuf.copy_from_slice(&data);
        return Ok(());
    }
    check_layout(comm, counts, displs, sendbuf.len())?;
    debug!(root, tag, ranks = comm.size(), "scatterv");
    for dst in 0..comm.size() {
        let block = &sendbuf[displs[dst]..displs[dst] + counts[dst]];
        if dst == root {
            if recvbuf.len() != block.len() {
                return Err(Error::shape_mismatch((block.len(), 1), (recvbuf.len(), 1)));
            }
            recvbuf.copy_from_slice(block);
        } else {
            comm.send(dst, tag, bytemuck::cast_slice(block).to_vec())?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;

    #[test]
    fn test_gatherv_then_scatterv() {
        let out = LocalCluster::run(3, |comm| {
            let rank = comm.rank();
            let mine: Vec<f64> = (0..=rank).map(|k| (10 * rank + k) as f64).collect();
            let counts = [1, 2, 3];
            let displs = [0, 1, 3];
            let mut gathered = vec![0.0; if rank == 1 { 6 } else { 0 }];
            tagged_gatherv(&*comm, &mine, &mut gathered, &counts, &displs, 1, 11).unwrap();

            let mut back = vec![0.0; rank + 1];
            tagged_scatterv(&*comm, &gathered, &counts, &displs, &mut back, 1, 12).unwrap();
            (gathered, back == mine)
        });
        assert_eq!(out[1].0, vec![0.0, 10.0, 11.0, 20.0, 21.0, 22.0]);
        assert!(out.iter().all(|(_, same)| *same));
    }
}
