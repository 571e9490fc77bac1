//! Tile messaging: point-to-point transfer, broadcast lists and reduce lists

use super::Matrix;
use crate::comm::{cube_bcast_pattern, cube_reduce_pattern, decode_pod};
use crate::dtype::{DType, Scalar};
use crate::error::{Error, Result};
use crate::internal::Target;
use crate::runtime::Runtime;
use crate::tile::{kernels, Layout, LayoutConvert, Location, Tile, TileKind};
use bytemuck::{Pod, Zeroable};
use std::collections::BTreeSet;
use tracing::debug;

/// Radix of the hypercube used by [`Matrix::list_bcast`] and [`Matrix::list_reduce`]
pub const DEFAULT_RADIX: usize = 2;

/// Source tile (i, j) and the views that need a copy of it
pub type BcastList<T, R> = Vec<(usize, usize, Vec<Matrix<T, R>>)>;

/// Destination tile (i, j) and the views whose ranks hold partial sums of it
pub type ReduceList<T, R> = Vec<(usize, usize, Vec<Matrix<T, R>>)>;

/// Prefix of every tile message
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
struct TileHeader {
    dtype: u32,
    layout: u32,
    mb: u64,
    nb: u64,
}

const HEADER_BYTES: usize = std::mem::size_of::<TileHeader>();

/// Participants sorted ascending, and the positions of the root and this rank
struct Participants {
    ranks: Vec<usize>,
    root_index: usize,
    index: usize,
}

impl Participants {
    fn new(ranks: BTreeSet<usize>, root: usize, me: usize) -> Option<Self> {
        let ranks: Vec<usize> = ranks.into_iter().collect();
        let root_index = ranks.iter().position(|&r| r == root)?;
        let index = ranks.iter().position(|&r| r == me)?;
        Some(Self {
            ranks,
            root_index,
            index,
        })
    }

    fn size(&self) -> usize {
        self.ranks.len()
    }

    /// This rank, shifted so the root is 0
    fn relative(&self) -> usize {
        (self.index + self.size() - self.root_index) % self.size()
    }

    /// Real rank of a relative rank
    fn real(&self, relative: usize) -> usize {
        self.ranks[(relative + self.root_index) % self.size()]
    }
}

impl<T: Scalar, R: Runtime> Matrix<T, R> {
    fn storage_dims(&self, i: usize, j: usize) -> (usize, usize) {
        let (gi, gj) = self.global(i, j);
        (self.storage.dist.tile_mb(gi), self.storage.dist.tile_nb(gj))
    }

    fn encode_tile(&self, i: usize, j: usize) -> Result<Vec<u8>> {
        let tile = self.tile_get_for_reading(i, j, Location::Host, LayoutConvert::None)?;
        let (mb, nb) = self.storage_dims(i, j);
        let header = TileHeader {
            dtype: T::DTYPE as u32,
            layout: tile.layout() as u32,
            mb: mb as u64,
            nb: nb as u64,
        };
        let packed = tile.pack(tile.layout());
        let mut bytes = Vec::with_capacity(HEADER_BYTES + packed.len() * std::mem::size_of::<T>());
        bytes.extend_from_slice(bytemuck::bytes_of(&header));
        bytes.extend_from_slice(bytemuck::cast_slice(&packed));
        Ok(bytes)
    }

    /// Receive a tile message and check it against the storage shape of (i, j)
    fn decode_tile(&self, i: usize, j: usize, bytes: &[u8]) -> Result<(Layout, Vec<T>)> {
        if bytes.len() < HEADER_BYTES {
            return Err(Error::comm(format!("tile message of {} bytes has no header", bytes.len())));
        }
        let header: TileHeader = bytemuck::pod_read_unaligned(&bytes[..HEADER_BYTES]);
        let dtype = u8::try_from(header.dtype)
            .ok()
            .and_then(DType::from_u8)
            .ok_or_else(|| Error::comm(format!("unknown dtype tag {}", header.dtype)))?;
        if dtype != T::DTYPE {
            return Err(Error::DTypeMismatch {
                expected: T::DTYPE,
                got: dtype,
            });
        }
        let expected = self.storage_dims(i, j);
        let got = (header.mb as usize, header.nb as usize);
        if got != expected {
            return Err(Error::shape_mismatch(expected, got));
        }
        let layout = u8::try_from(header.layout)
            .ok()
            .and_then(Layout::from_u8)
            .ok_or_else(|| Error::comm(format!("unknown layout tag {}", header.layout)))?;
        let data: Vec<T> = decode_pod(&bytes[HEADER_BYTES..])?;
        if data.len() != expected.0 * expected.1 {
            return Err(Error::comm(format!(
                "tile ({}, {}) payload has {} elements, expected {}",
                i,
                j,
                data.len(),
                expected.0 * expected.1
            )));
        }
        Ok((layout, data))
    }

    /// Send tile (i, j) to rank `dst`
    ///
    /// The host copy is brought up to date first. The payload is the stored
    /// elements packed in the tile's current layout, behind a header carrying
    /// element type, layout and storage shape.
    pub fn tile_send(&self, i: usize, j: usize, dst: usize, tag: i32) -> Result<()> {
        let bytes = self.encode_tile(i, j)?;
        debug!(i, j, src = self.mpi_rank(), dst, tag, bytes = bytes.len(), "tile send");
        self.storage.comm.send(dst, tag, bytes)
    }

    /// Receive tile (i, j) from rank `src` into a host instance in `layout`
    ///
    /// A tile with no host instance gets a workspace one. An existing host
    /// instance must already be in `layout`. The received data becomes the
    /// Modified copy.
    pub fn tile_recv(
        &self,
        i: usize,
        j: usize,
        src: usize,
        layout: Layout,
        tag: i32,
    ) -> Result<()> {
        let bytes = self.storage.comm.recv(src, tag)?;
        let (sent_layout, data) = self.decode_tile(i, j, &bytes)?;
        let (gi, gj) = self.global(i, j);
        let node = self.storage.node_or_insert(gi, gj);
        let mut node = node.lock();
        let tile = match node.instance(Location::Host) {
            Some(inst) => {
                if inst.tile.layout() != layout {
                    return Err(Error::LayoutMismatch {
                        expected: layout,
                        got: inst.tile.layout(),
                    });
                }
                inst.tile
            }
            None => {
                let tile = self.alloc_instance(
                    Location::Host,
                    node.mb(),
                    node.nb(),
                    layout,
                    TileKind::Workspace,
                )?;
                node.insert(tile, crate::coherence::Mosi::Invalid, self.storage.tick());
                tile
            }
        };
        tile.unpack(&data, sent_layout)?;
        node.set_modified(Location::Host);
        debug!(i, j, src, dst = self.mpi_rank(), tag, "tile recv");
        Ok(())
    }

    /// Broadcast tile (i, j) from its owner to every rank in `ranks`
    ///
    /// Ranks outside `ranks` return immediately. Receivers get a host copy in
    /// `layout`.
    pub fn tile_bcast_to_set(
        &self,
        i: usize,
        j: usize,
        ranks: BTreeSet<usize>,
        radix: usize,
        layout: Layout,
        tag: i32,
    ) -> Result<()> {
        let root = self.tile_rank(i, j);
        let Some(group) = Participants::new(ranks, root, self.mpi_rank()) else {
            return Ok(());
        };
        let pattern = cube_bcast_pattern(group.size(), group.relative(), radix);
        debug!(
            i,
            j,
            root,
            participants = group.size(),
            recv_from = ?pattern.recv_from,
            send_to = ?pattern.send_to,
            "bcast schedule"
        );
        for &src in &pattern.recv_from {
            self.tile_recv(i, j, group.real(src), layout, tag)?;
        }
        for &dst in &pattern.send_to {
            self.tile_send(i, j, group.real(dst), tag)?;
        }
        Ok(())
    }

    /// Broadcast each source tile to the ranks that own tiles of its destination views
    ///
    /// For each entry the participants are the tile's owner plus every rank
    /// holding a tile of a destination view. A receiving rank sets the tile's
    /// life to its number of local destination tiles times `life_factor`
    /// (added to any life left from an earlier receive) and counts the
    /// receive. For [`Target::Devices`] the tile is then copied to every
    /// device that holds a local destination tile.
    ///
    /// Every rank must call this with the same list.
    pub fn list_bcast(
        &self,
        target: Target,
        list: &BcastList<T, R>,
        layout: Layout,
        tag: i32,
        life_factor: i64,
    ) -> Result<()> {
        self.list_bcast_with_radix(target, list, layout, tag, life_factor, DEFAULT_RADIX)
    }

    /// [`Matrix::list_bcast`] over a radix-`radix` hypercube
    pub fn list_bcast_with_radix(
        &self,
        target: Target,
        list: &BcastList<T, R>,
        layout: Layout,
        tag: i32,
        life_factor: i64,
        radix: usize,
    ) -> Result<()> {
        let me = self.mpi_rank();
        for (i, j, views) in list {
            let (i, j) = (*i, *j);
            let root = self.tile_rank(i, j);
            let mut ranks: BTreeSet<usize> = views.iter().flat_map(|v| v.get_ranks()).collect();
            ranks.insert(root);
            if !ranks.contains(&me) {
                continue;
            }

            if root != me {
                let local: i64 = views.iter().map(|v| v.num_local_tiles() as i64).sum();
                let life = self.tile_life(i, j) + local * life_factor;
                self.tile_insert_workspace(i, j, Location::Host, layout)?;
                self.tile_increment_receive_count(i, j);
                self.tile_life_set(i, j, life);
            }

            self.tile_bcast_to_set(i, j, ranks, radix, layout, tag)?;

            if target == Target::Devices {
                let devices: BTreeSet<usize> = views
                    .iter()
                    .flat_map(|v| {
                        v.local_tiles()
                            .into_iter()
                            .map(move |(ii, jj)| v.tile_device(ii, jj))
                    })
                    .collect();
                for d in devices {
                    self.tile_get_for_reading(i, j, Location::Device(d), layout.into())?;
                }
            }
        }
        Ok(())
    }

    /// Sum partial copies of each tile into its owner
    ///
    /// For each entry the participants are the tile's owner plus every rank
    /// holding a tile of the listed views; each participant must hold a host
    /// instance of (i, j) with its partial sum. Partial sums travel up the
    /// hypercube and are added on the way, so the owner ends with the total
    /// and the Modified copy. Non-owners keep their partial tiles.
    pub fn list_reduce(&self, list: &ReduceList<T, R>, layout: Layout, tag: i32) -> Result<()> {
        let me = self.mpi_rank();
        for (i, j, views) in list {
            let (i, j) = (*i, *j);
            let root = self.tile_rank(i, j);
            let mut ranks: BTreeSet<usize> = views.iter().flat_map(|v| v.get_ranks()).collect();
            ranks.insert(root);
            let Some(group) = Participants::new(ranks, root, me) else {
                continue;
            };
            let pattern = cube_reduce_pattern(group.size(), group.relative(), DEFAULT_RADIX);
            debug!(
                i,
                j,
                root,
                recv_from = ?pattern.recv_from,
                send_to = ?pattern.send_to,
                "reduce schedule"
            );

            let acc = self.tile_get_for_writing(i, j, Location::Host, layout.into())?;
            for &src in &pattern.recv_from {
                let bytes = self.storage.comm.recv(group.real(src), tag)?;
                let (sent_layout, data) = self.decode_tile(i, j, &bytes)?;
                let (mb, nb) = self.storage_dims(i, j);
                let stride = match sent_layout {
                    Layout::ColMajor => mb.max(1),
                    Layout::RowMajor => nb.max(1),
                };
                // SAFETY: `data` holds mb * nb elements and outlives `part`
                let part = unsafe {
                    Tile::from_raw_parts(
                        data.as_ptr() as u64,
                        mb,
                        nb,
                        stride,
                        sent_layout,
                        Location::Host,
                        TileKind::Workspace,
                    )
                };
                kernels::add(&self.view_tile(part), &acc)?;
                debug!(i, j, src = group.real(src), dst = me, "reduce level");
            }
            for &dst in &pattern.send_to {
                self.tile_send(i, j, group.real(dst), tag)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;

    #[test]
    fn test_participants_shift() {
        let set: BTreeSet<usize> = [1, 3, 4, 7].into_iter().collect();
        let group = Participants::new(set, 4, 1).unwrap();
        assert_eq!(group.relative(), 2);
        assert_eq!(group.real(0), 4);
        assert_eq!(group.real(3), 3);
    }

    #[test]
    fn test_send_recv_checks_shape() {
        LocalCluster::run(2, |comm| {
            let a = Matrix::<f64>::new(4, 3, 2, 2, 1, comm).unwrap();
            a.insert_local_tiles(Target::HostTask).unwrap();
            if a.mpi_rank() == 0 {
                let t = a.tile(0, 0).unwrap();
                t.set(1, 1, 3.5);
                a.tile_send(0, 0, 1, 7).unwrap();
                a.tile_send(0, 0, 1, 8).unwrap();
            } else {
                a.tile_recv(0, 0, 0, Layout::ColMajor, 7).unwrap();
                assert_eq!(a.tile(0, 0).unwrap().at(1, 1), 3.5);
                // tile (1, 1) is 2x1, (0, 0) is 2x2
                let r = a.tile_recv(1, 1, 0, Layout::ColMajor, 8);
                assert!(matches!(r, Err(Error::ShapeMismatch { .. })));
            }
        });
    }

    #[test]
    fn test_list_reduce_sums_partials() {
        LocalCluster::run(3, |comm| {
            let a = Matrix::<f64>::new(2, 6, 2, 1, 3, comm).unwrap();
            a.insert_local_tiles(Target::HostTask).unwrap();
            let me = a.mpi_rank();
            // every rank accumulates a partial of tile (0, 0)
            let part = if a.tile_is_local(0, 0) {
                a.tile(0, 0).unwrap()
            } else {
                a.tile_insert_workspace(0, 0, Location::Host, Layout::ColMajor).unwrap();
                a.tile_modified(0, 0, Location::Host, false).unwrap();
                a.tile(0, 0).unwrap()
            };
            kernels::set(0.0, (me + 1) as f64, &part);
            let list: ReduceList<f64, _> = vec![(0, 0, vec![a.clone()])];
            a.list_reduce(&list, Layout::ColMajor, 3).unwrap();
            if me == 0 {
                let t = a.tile(0, 0).unwrap();
                assert_eq!(t.at(0, 0), 6.0);
                assert_eq!(t.at(1, 0), 0.0);
            }
        });
    }
}
