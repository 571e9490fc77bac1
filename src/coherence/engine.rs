//! Coherence operations on a matrix: fetch, write, hold, update origin, release
//!
//! Every fetch locks the tile's node for the duration of the operation, so
//! two tasks fetching the same tile to the same location cannot both copy.
//! Data moves only on a transition out of Invalid: the destination is filled
//! from the Modified copy if there is one, else from the host, else from any
//! valid device copy, and a Modified source drops to Shared.

use super::node::{Mosi, MosiState, TileNode};
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::matrix::Matrix;
use crate::runtime::{Queue, Runtime};
use crate::tile::{Layout, LayoutConvert, Location, Tile, TileKind};
use tracing::{trace, warn};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Access {
    Read,
    Write,
    Hold,
}

/// Reinterpret `src` (mb x nb contiguous in `from`) as contiguous in `to`
fn relayout<T: Copy>(src: &[T], mb: usize, nb: usize, from: Layout, to: Layout) -> Vec<T> {
    if from == to {
        return src.to_vec();
    }
    let mut out = Vec::with_capacity(src.len());
    match to {
        Layout::ColMajor => {
            for j in 0..nb {
                for i in 0..mb {
                    out.push(src[i * nb + j]);
                }
            }
        }
        Layout::RowMajor => {
            for i in 0..mb {
                for j in 0..nb {
                    out.push(src[i + j * mb]);
                }
            }
        }
    }
    out
}

impl<T: Scalar, R: Runtime> Matrix<T, R> {
    /// Allocate a contiguous instance buffer, evicting device workspace under pressure
    pub(crate) fn alloc_instance(
        &self,
        location: Location,
        mb: usize,
        nb: usize,
        layout: Layout,
        kind: TileKind,
    ) -> Result<Tile<T>> {
        let bytes = mb * nb * std::mem::size_of::<T>();
        let ptr = loop {
            match self.storage.memory.alloc(location, bytes) {
                Ok(ptr) => break ptr,
                Err(Error::OutOfMemory { .. })
                    if !location.is_host() && self.evict_one(location) =>
                {
                    continue;
                }
                Err(e) => {
                    if matches!(e, Error::OutOfMemory { .. }) {
                        warn!(%location, bytes, "workspace exhausted and nothing left to evict");
                    }
                    return Err(e);
                }
            }
        };
        let stride = match layout {
            Layout::ColMajor => mb.max(1),
            Layout::RowMajor => nb.max(1),
        };
        // SAFETY: the block holds mb * nb elements and lives until free_tile
        Ok(unsafe { Tile::from_raw_parts(ptr, mb, nb, stride, layout, location, kind) })
    }

    /// Free the least recently used evictable instance at `location`
    ///
    /// Candidates are Shared, unheld workspace instances whose data is valid
    /// elsewhere. Nodes locked by other threads are skipped.
    fn evict_one(&self, location: Location) -> bool {
        let mut best: Option<(u64, (usize, usize))> = None;
        for (key, node) in self.storage.all_nodes() {
            let Some(node) = node.try_lock() else {
                continue;
            };
            if let Some(inst) = node.instance(location)
                && Self::evictable(&node, location)
                && best.is_none_or(|(stamp, _)| inst.stamp < stamp)
            {
                best = Some((inst.stamp, key));
            }
        }
        let Some((_, (gi, gj))) = best else {
            return false;
        };
        let Some(node) = self.storage.node(gi, gj) else {
            return false;
        };
        let Some(mut node) = node.try_lock() else {
            return false;
        };
        if !Self::evictable(&node, location) {
            return false;
        }
        match node.remove(location) {
            Some(inst) => {
                trace!(i = gi, j = gj, %location, "evicted workspace tile");
                self.storage.free_tile(&inst.tile);
                true
            }
            None => false,
        }
    }

    fn evictable(node: &TileNode<T>, location: Location) -> bool {
        node.instance(location).is_some_and(|inst| {
            inst.tile.kind() == TileKind::Workspace
                && inst.state == Mosi::Shared
                && !inst.on_hold
                && node.valid_elsewhere(location)
        })
    }

    /// Copy stored elements between two instances of the same tile
    fn copy_instance(&self, src: &Tile<T>, dst: &Tile<T>) -> Result<()> {
        let (mb, nb) = (src.mb(), src.nb());
        match (src.location(), dst.location()) {
            (Location::Host, Location::Host) => src.copy_data_to(dst),
            (Location::Host, Location::Device(d)) => {
                let packed = src.pack(dst.layout());
                R::copy_to_device(bytemuck::cast_slice(&packed), dst.data(), &R::device(d))
            }
            (Location::Device(d), Location::Host) => {
                let mut staged = vec![T::zero(); mb * nb];
                R::copy_from_device(
                    src.data(),
                    bytemuck::cast_slice_mut(&mut staged),
                    &R::device(d),
                )?;
                dst.unpack(&staged, src.layout())
            }
            (Location::Device(s), Location::Device(d)) => {
                let mut staged = vec![T::zero(); mb * nb];
                R::copy_from_device(
                    src.data(),
                    bytemuck::cast_slice_mut(&mut staged),
                    &R::device(s),
                )?;
                let packed = relayout(&staged, mb, nb, src.layout(), dst.layout());
                R::copy_to_device(bytemuck::cast_slice(&packed), dst.data(), &R::device(d))
            }
        }
    }

    /// Flip an instance between row- and column-major
    fn convert_instance(&self, tile: Tile<T>) -> Result<Tile<T>> {
        match tile.location() {
            Location::Host => {
                let mut tile = tile;
                tile.layout_convert()?;
                Ok(tile)
            }
            Location::Device(d) => {
                let target = tile.layout().flip();
                // as column-major, a row-major mb x nb tile is nb x mb
                let (rows, cols) = match tile.layout() {
                    Layout::ColMajor => (tile.mb(), tile.nb()),
                    Layout::RowMajor => (tile.nb(), tile.mb()),
                };
                let queue = R::queue(&R::device(d), 0);
                if rows == cols {
                    R::transpose::<T>(rows, cols, tile.data(), rows, tile.data(), rows, &queue)?;
                    queue.sync()?;
                    return Ok(tile.relabel(target, rows));
                }
                let fresh = self.alloc_instance(
                    tile.location(),
                    tile.mb(),
                    tile.nb(),
                    target,
                    tile.kind(),
                )?;
                R::transpose::<T>(rows, cols, tile.data(), rows, fresh.data(), cols, &queue)?;
                queue.sync()?;
                self.storage.free_tile(&tile);
                Ok(fresh)
            }
        }
    }

    /// Core coherence transition on arena tile (gi, gj); returns the raw instance
    fn acquire(
        &self,
        gi: usize,
        gj: usize,
        location: Location,
        layout: LayoutConvert,
        access: Access,
    ) -> Result<Tile<T>> {
        let node = self.storage.node(gi, gj).ok_or_else(|| {
            if self.storage.is_local(gi, gj) {
                Error::TileNotFound { i: gi, j: gj, location }
            } else {
                Error::TileNotLocal {
                    i: gi,
                    j: gj,
                    rank: self.mpi_rank(),
                }
            }
        })?;
        let mut node = node.lock();

        if !node.exists(location) {
            let source_layout = node
                .valid_source(location)
                .and_then(|src| node.instance(src))
                .map(|inst| inst.tile.layout())
                .unwrap_or_default();
            let new_layout = layout.layout().unwrap_or(source_layout);
            let tile = self.alloc_instance(
                location,
                node.mb(),
                node.nb(),
                new_layout,
                TileKind::Workspace,
            )?;
            node.insert(tile, Mosi::Invalid, self.storage.tick());
        }

        let state = node.instance(location).map(|inst| inst.state).unwrap_or(Mosi::Invalid);
        if !state.is_valid() {
            let Some(src) = node.valid_source(location) else {
                panic!("tile ({}, {}) has no valid instance to copy to {}", gi, gj, location);
            };
            let (src_tile, dst_tile) = match (node.instance(src), node.instance(location)) {
                (Some(s), Some(d)) => (s.tile, d.tile),
                _ => return Err(Error::Internal("instance vanished under lock".into())),
            };
            self.copy_instance(&src_tile, &dst_tile)?;
            if let Some(s) = node.instance_mut(src)
                && s.state == Mosi::Modified
            {
                s.state = Mosi::Shared;
            }
            if let Some(d) = node.instance_mut(location) {
                d.state = Mosi::Shared;
            }
            trace!(i = gi, j = gj, from = %src, to = %location, "tile copied");
        }

        if let Some(want) = layout.layout() {
            let current = node.instance(location).map(|inst| inst.tile);
            if let Some(tile) = current
                && tile.layout() != want
            {
                let converted = self.convert_instance(tile)?;
                if let Some(inst) = node.instance_mut(location) {
                    inst.tile = converted;
                }
                trace!(i = gi, j = gj, %location, layout = ?want, "layout converted");
            }
        }

        match access {
            Access::Write => node.set_modified(location),
            Access::Hold => {
                if let Some(inst) = node.instance_mut(location) {
                    inst.on_hold = true;
                }
            }
            Access::Read => {}
        }
        let stamp = self.storage.tick();
        let inst = node
            .instance_mut(location)
            .ok_or_else(|| Error::Internal("instance vanished under lock".into()))?;
        inst.stamp = stamp;
        let tile = inst.tile;
        node.check();
        Ok(tile)
    }

    /// Make tile (i, j) valid at `location` in the requested layout and return it
    ///
    /// Allocates a workspace instance on first use and copies from a valid
    /// instance if the local one is stale.
    ///
    /// # Panics
    ///
    /// Panics if no instance of the tile holds valid data.
    pub fn tile_get_for_reading(
        &self,
        i: usize,
        j: usize,
        location: Location,
        layout: LayoutConvert,
    ) -> Result<Tile<T>> {
        let (gi, gj) = self.global(i, j);
        self.acquire(gi, gj, location, layout, Access::Read).map(|t| self.view_tile(t))
    }

    /// Like [`Matrix::tile_get_for_reading`], then make `location` the single Modified copy
    pub fn tile_get_for_writing(
        &self,
        i: usize,
        j: usize,
        location: Location,
        layout: LayoutConvert,
    ) -> Result<Tile<T>> {
        let (gi, gj) = self.global(i, j);
        self.acquire(gi, gj, location, layout, Access::Write).map(|t| self.view_tile(t))
    }

    /// Like [`Matrix::tile_get_for_reading`], and pin the instance against release and eviction
    pub fn tile_get_and_hold(
        &self,
        i: usize,
        j: usize,
        location: Location,
        layout: LayoutConvert,
    ) -> Result<Tile<T>> {
        let (gi, gj) = self.global(i, j);
        self.acquire(gi, gj, location, layout, Access::Hold).map(|t| self.view_tile(t))
    }

    /// Clear the hold flag on tile (i, j) at `location`
    pub fn tile_unset_hold(&self, i: usize, j: usize, location: Location) {
        let (gi, gj) = self.global(i, j);
        if let Some(node) = self.storage.node(gi, gj)
            && let Some(inst) = node.lock().instance_mut(location)
        {
            inst.on_hold = false;
        }
    }

    /// Fetch a set of tiles for reading
    pub fn tile_get_for_reading_set(
        &self,
        tiles: &[(usize, usize)],
        location: Location,
        layout: LayoutConvert,
    ) -> Result<()> {
        for &(i, j) in tiles {
            self.tile_get_for_reading(i, j, location, layout)?;
        }
        Ok(())
    }

    /// Fetch a set of tiles for writing
    pub fn tile_get_for_writing_set(
        &self,
        tiles: &[(usize, usize)],
        location: Location,
        layout: LayoutConvert,
    ) -> Result<()> {
        for &(i, j) in tiles {
            self.tile_get_for_writing(i, j, location, layout)?;
        }
        Ok(())
    }

    /// Fetch every local tile of the view to `location` for reading
    pub fn tile_get_all_for_reading(
        &self,
        location: Location,
        layout: LayoutConvert,
    ) -> Result<()> {
        self.tile_get_for_reading_set(&self.local_tiles(), location, layout)
    }

    /// Fetch every local tile of the view to `location` for writing
    pub fn tile_get_all_for_writing(
        &self,
        location: Location,
        layout: LayoutConvert,
    ) -> Result<()> {
        self.tile_get_for_writing_set(&self.local_tiles(), location, layout)
    }

    /// Fetch every local tile of the view to its own device for reading
    pub fn tile_get_all_for_reading_on_devices(&self, layout: LayoutConvert) -> Result<()> {
        for (i, j) in self.local_tiles() {
            self.tile_get_for_reading(i, j, Location::Device(self.tile_device(i, j)), layout)?;
        }
        Ok(())
    }

    /// Fetch every local tile of the view to its own device for writing
    pub fn tile_get_all_for_writing_on_devices(&self, layout: LayoutConvert) -> Result<()> {
        for (i, j) in self.local_tiles() {
            self.tile_get_for_writing(i, j, Location::Device(self.tile_device(i, j)), layout)?;
        }
        Ok(())
    }

    /// Mark the instance at `location` Modified and invalidate the rest
    ///
    /// # Panics
    ///
    /// Panics if a different instance is already Modified, unless `permissive`.
    pub fn tile_modified(
        &self,
        i: usize,
        j: usize,
        location: Location,
        permissive: bool,
    ) -> Result<()> {
        let (gi, gj) = self.global(i, j);
        let node = self
            .storage
            .node(gi, gj)
            .ok_or_else(|| self.missing_tile(i, j, location))?;
        let mut node = node.lock();
        if !node.exists(location) {
            return Err(Error::TileNotFound { i, j, location });
        }
        if !permissive {
            let other = node
                .iter()
                .any(|inst| inst.state == Mosi::Modified && inst.tile.location() != location);
            assert!(!other, "tile ({}, {}) is already Modified elsewhere", i, j);
        }
        node.set_modified(location);
        Ok(())
    }

    /// State of tile (i, j) at `location`, if an instance exists there
    pub fn tile_state(&self, i: usize, j: usize, location: Location) -> Option<MosiState> {
        let (gi, gj) = self.global(i, j);
        self.storage.node(gi, gj).and_then(|node| node.lock().state(location))
    }

    /// Number of Modified instances of tile (i, j)
    pub fn tile_modified_count(&self, i: usize, j: usize) -> usize {
        let (gi, gj) = self.global(i, j);
        self.storage
            .node(gi, gj)
            .map_or(0, |node| node.lock().modified_count())
    }

    /// Bring the origin instance of tile (i, j) up to date in its original layout
    pub fn tile_update_origin(&self, i: usize, j: usize) -> Result<()> {
        let (gi, gj) = self.global(i, j);
        let Some(node) = self.storage.node(gi, gj) else {
            return Ok(());
        };
        let (origin, layout) = {
            let node = node.lock();
            match node.origin() {
                Some(origin) => (origin, node.origin_layout),
                None => return Ok(()),
            }
        };
        self.acquire(gi, gj, origin, layout.into(), Access::Read)?;
        Ok(())
    }

    /// [`Matrix::tile_update_origin`] for every local tile of the view
    pub fn tile_update_all_origin(&self) -> Result<()> {
        for (i, j) in self.local_tiles() {
            self.tile_update_origin(i, j)?;
        }
        Ok(())
    }

    // ---- life and receive counts --------------------------------------

    /// Remaining uses of a received tile
    pub fn tile_life(&self, i: usize, j: usize) -> i64 {
        let (gi, gj) = self.global(i, j);
        self.storage.node(gi, gj).map_or(0, |node| node.lock().life)
    }

    /// Set the remaining uses of a received tile
    pub fn tile_life_set(&self, i: usize, j: usize, life: i64) {
        let (gi, gj) = self.global(i, j);
        self.storage.node_or_insert(gi, gj).lock().life = life;
    }

    /// Record one use of a received tile; the last use erases it
    ///
    /// Local tiles are unaffected.
    pub fn tile_tick(&self, i: usize, j: usize) {
        if self.tile_is_local(i, j) {
            return;
        }
        let (gi, gj) = self.global(i, j);
        let Some(node) = self.storage.node(gi, gj) else {
            return;
        };
        let expired = {
            let mut node = node.lock();
            node.life -= 1;
            node.life <= 0
        };
        if expired {
            self.erase_node(gi, gj);
        }
    }

    /// Times tile (i, j) has been received and not yet released
    pub fn tile_receive_count(&self, i: usize, j: usize) -> i64 {
        let (gi, gj) = self.global(i, j);
        self.storage.node(gi, gj).map_or(0, |node| node.lock().receive_count)
    }

    /// Count one more receive of tile (i, j)
    pub fn tile_increment_receive_count(&self, i: usize, j: usize) {
        let (gi, gj) = self.global(i, j);
        self.storage.node_or_insert(gi, gj).lock().receive_count += 1;
    }

    // ---- release ------------------------------------------------------

    fn erase_node(&self, gi: usize, gj: usize) {
        let removed = self.storage.tiles.write().remove(&(gi, gj));
        if let Some(node) = removed {
            let node = node.lock();
            assert!(!node.is_held(), "releasing tile ({}, {}) while it is on hold", gi, gj);
            for inst in node.iter() {
                self.storage.free_tile(&inst.tile);
            }
            trace!(i = gi, j = gj, "tile erased");
        }
    }

    /// Free workspace copies of a local tile, keeping the origin and any Modified copy
    ///
    /// # Panics
    ///
    /// Panics if a copy that would be freed is on hold.
    pub fn release_local_workspace_tile(&self, i: usize, j: usize) {
        self.release_local(i, j, true);
    }

    fn release_local(&self, i: usize, j: usize, strict: bool) {
        if !self.tile_is_local(i, j) {
            return;
        }
        let (gi, gj) = self.global(i, j);
        let Some(node) = self.storage.node(gi, gj) else {
            return;
        };
        let mut node = node.lock();
        for location in node.locations() {
            let Some(inst) = node.instance(location) else {
                continue;
            };
            if inst.tile.kind() != TileKind::Workspace || inst.state == Mosi::Modified {
                continue;
            }
            if inst.on_hold {
                assert!(
                    !strict,
                    "releasing tile ({}, {}) on {} while it is on hold",
                    i, j, location
                );
                continue;
            }
            if let Some(inst) = node.remove(location) {
                self.storage.free_tile(&inst.tile);
            }
        }
    }

    /// Drop one receive of a remote tile; the last one erases every instance
    ///
    /// # Panics
    ///
    /// Panics if the tile is erased while on hold.
    pub fn release_remote_workspace_tile(&self, i: usize, j: usize) {
        if self.tile_is_local(i, j) {
            return;
        }
        let (gi, gj) = self.global(i, j);
        let Some(node) = self.storage.node(gi, gj) else {
            return;
        };
        let done = {
            let mut node = node.lock();
            node.receive_count -= 1;
            node.receive_count <= 0
        };
        if done {
            self.erase_node(gi, gj);
        }
    }

    /// [`Matrix::release_local_workspace_tile`] over the view, skipping held tiles
    pub fn release_local_workspace(&self) {
        for (i, j) in self.local_tiles() {
            self.release_local(i, j, false);
        }
    }

    /// [`Matrix::release_remote_workspace_tile`] over every remote tile in the view
    pub fn release_remote_workspace(&self) {
        for j in 0..self.nt() {
            for i in 0..self.mt() {
                if !self.tile_is_local(i, j) && self.tile_receive_count(i, j) > 0 {
                    let (gi, gj) = self.global(i, j);
                    if self.storage.node(gi, gj).is_some_and(|n| !n.lock().is_held()) {
                        self.release_remote_workspace_tile(i, j);
                    }
                }
            }
        }
    }

    /// Release all workspace in the arena
    ///
    /// Modified workspace copies of local tiles are written back to their
    /// origin first. Remote tiles are erased. Held instances are kept.
    pub fn release_workspace(&self) -> Result<()> {
        let rank = self.mpi_rank();
        for ((gi, gj), node) in self.storage.all_nodes() {
            let local = self.storage.dist.tile_rank(gi, gj) == rank;
            if !local {
                if !node.lock().is_held() {
                    self.erase_node(gi, gj);
                }
                continue;
            }
            let origin = node.lock().origin();
            if let Some(origin) = origin {
                let layout = node.lock().origin_layout;
                self.acquire(gi, gj, origin, layout.into(), Access::Read)?;
            }
            let mut node = node.lock();
            for location in node.locations() {
                let free = node.instance(location).is_some_and(|inst| {
                    inst.tile.kind() == TileKind::Workspace
                        && !inst.on_hold
                        && inst.state != Mosi::Modified
                });
                if free && let Some(inst) = node.remove(location) {
                    self.storage.free_tile(&inst.tile);
                }
            }
        }
        Ok(())
    }

    /// Preallocate one device block per local tile so later fetches do not allocate
    pub fn reserve_device_workspace(&self) -> Result<()> {
        let mut per_device: std::collections::HashMap<(usize, usize), usize> = Default::default();
        for (i, j) in self.local_tiles() {
            let bytes = self.tile_mb(i) * self.tile_nb(j) * std::mem::size_of::<T>();
            *per_device.entry((self.tile_device(i, j), bytes)).or_default() += 1;
        }
        for ((device, bytes), count) in per_device {
            self.storage.memory.reserve(Location::Device(device), bytes, count)?;
        }
        Ok(())
    }

    /// Workspace memory of the arena
    pub fn memory(&self) -> &super::Memory {
        &self.storage.memory
    }

    /// Number of tile nodes present in the arena, local or received
    pub fn tile_count(&self) -> usize {
        self.storage.tiles.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::internal::Target;
    use crate::matrix::MatrixConfig;

    fn matrix(num_devices: usize, capacity: Option<usize>) -> Matrix<f64> {
        let comm = LocalCluster::new(1).comm(0);
        let config = MatrixConfig {
            num_devices,
            device_capacity: capacity,
        };
        let a = Matrix::with_config(4, 4, 2, 1, 1, comm, config).unwrap();
        a.insert_local_tiles(Target::HostTask).unwrap();
        a
    }

    #[test]
    fn test_write_then_read_roundtrip() {
        let a = matrix(2, None);
        let dev = Location::Device(1);
        let t = a.tile(0, 1).unwrap();
        t.set(0, 0, 4.0);
        let w = a.tile_get_for_writing(0, 1, dev, LayoutConvert::ColMajor).unwrap();
        assert_eq!(a.tile_state(0, 1, Location::Host).unwrap().state, Mosi::Invalid);
        assert_eq!(a.tile_state(0, 1, dev).unwrap().state, Mosi::Modified);

        // write on the device through the runtime
        let mut staged = vec![0.0f64; 4];
        let device = crate::runtime::cpu::CpuRuntime::device(1);
        let bytes = bytemuck::cast_slice_mut(&mut staged);
        crate::runtime::cpu::CpuRuntime::copy_from_device(w.data(), bytes, &device).unwrap();
        assert_eq!(staged[0], 4.0);
        staged[3] = 9.0;
        let bytes = bytemuck::cast_slice(&staged);
        crate::runtime::cpu::CpuRuntime::copy_to_device(bytes, w.data(), &device).unwrap();

        let r = a.tile_get_for_reading(0, 1, Location::Host, LayoutConvert::None).unwrap();
        assert_eq!(r.at(1, 1), 9.0);
        assert_eq!(a.tile_state(0, 1, Location::Host).unwrap().state, Mosi::Shared);
        assert_eq!(a.tile_state(0, 1, dev).unwrap().state, Mosi::Shared);
    }

    #[test]
    fn test_update_origin_restores_layout() {
        let a = matrix(1, None);
        a.tile(1, 0).unwrap().set(1, 0, 2.0);
        let w = a.tile_get_for_writing(1, 0, Location::Device(0), LayoutConvert::RowMajor).unwrap();
        assert_eq!(w.layout(), Layout::RowMajor);
        a.tile_update_origin(1, 0).unwrap();
        let origin = a.tile(1, 0).unwrap();
        assert_eq!(origin.layout(), Layout::ColMajor);
        assert_eq!(origin.at(1, 0), 2.0);
    }

    #[test]
    fn test_host_layout_convert_and_back() {
        let a = matrix(0, None);
        a.tile(0, 0).unwrap().set(0, 1, 5.0);
        let t = a.tile_get_for_writing(0, 0, Location::Host, LayoutConvert::RowMajor).unwrap();
        assert_eq!(t.layout(), Layout::RowMajor);
        assert_eq!(t.at(0, 1), 5.0);
        let back = a.tile_get_for_reading(0, 0, Location::Host, LayoutConvert::ColMajor).unwrap();
        assert_eq!(back.layout(), Layout::ColMajor);
        assert_eq!(back.at(0, 1), 5.0);
    }

    #[test]
    fn test_eviction_under_capacity() {
        // room for two 2x2 f64 tiles per device
        let a = matrix(1, Some(64));
        let dev = Location::Device(0);
        a.tile_get_for_reading(0, 0, dev, LayoutConvert::None).unwrap();
        a.tile_get_for_reading(1, 0, dev, LayoutConvert::None).unwrap();
        a.tile_get_for_reading(0, 1, dev, LayoutConvert::None).unwrap();
        // (0, 0) was the oldest Shared copy
        assert!(!a.tile_exists(0, 0, dev));
        assert!(a.tile_exists(0, 1, dev));
    }

    #[test]
    fn test_held_and_modified_block_eviction() {
        let a = matrix(1, Some(64));
        let dev = Location::Device(0);
        a.tile_get_and_hold(0, 0, dev, LayoutConvert::None).unwrap();
        a.tile_get_for_writing(1, 0, dev, LayoutConvert::None).unwrap();
        let r = a.tile_get_for_reading(0, 1, dev, LayoutConvert::None);
        assert!(matches!(r, Err(Error::OutOfMemory { .. })));
        a.tile_unset_hold(0, 0, dev);
        assert!(a.tile_get_for_reading(0, 1, dev, LayoutConvert::None).is_ok());
    }

    #[test]
    #[should_panic(expected = "on hold")]
    fn test_release_held_tile_panics() {
        let a = matrix(1, None);
        a.tile_get_and_hold(0, 0, Location::Device(0), LayoutConvert::None).unwrap();
        a.release_local_workspace_tile(0, 0);
    }

    #[test]
    fn test_release_keeps_origin_and_modified() {
        let a = matrix(2, None);
        a.tile_get_for_reading(0, 0, Location::Device(0), LayoutConvert::None).unwrap();
        a.tile_get_for_writing(1, 1, Location::Device(1), LayoutConvert::None).unwrap();
        a.release_local_workspace();
        assert!(!a.tile_exists(0, 0, Location::Device(0)));
        assert!(a.tile_exists(0, 0, Location::Host));
        assert!(a.tile_exists(1, 1, Location::Device(1)));

        a.release_workspace().unwrap();
        assert!(!a.tile_exists(1, 1, Location::Device(1)));
        assert_eq!(a.tile_state(1, 1, Location::Host).unwrap().state, Mosi::Shared);
    }
}
