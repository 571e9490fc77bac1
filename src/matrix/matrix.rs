//! Distributed tile matrix: shared tile arena plus lightweight views

use super::distribution::{Distribution, TileMapFn, TileSizeFn};
use crate::batch::BatchArrays;
use crate::coherence::{Memory, Mosi, TileNode};
use crate::comm::Communicator;
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::internal::Target;
use crate::runtime::Runtime;
use crate::runtime::cpu::CpuRuntime;
use crate::tile::{Layout, Location, Op, Tile, TileKind};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) type NodeRef<T> = Arc<Mutex<TileNode<T>>>;

/// Per-matrix resources beyond the distribution
#[derive(Clone, Debug, Default)]
pub struct MatrixConfig {
    /// Accelerators per rank
    pub num_devices: usize,
    /// Workspace byte limit on each device; host is unlimited
    pub device_capacity: Option<usize>,
}

/// Tile arena shared by a matrix and all of its views
pub(crate) struct MatrixStorage<T: Scalar, R: Runtime> {
    pub(crate) dist: Distribution,
    pub(crate) comm: Arc<dyn Communicator>,
    pub(crate) tiles: RwLock<HashMap<(usize, usize), NodeRef<T>>>,
    pub(crate) memory: Memory,
    pub(crate) batch: Vec<Mutex<BatchArrays>>,
    pub(crate) config: MatrixConfig,
    clock: AtomicU64,
    _runtime: PhantomData<R>,
}

impl<T: Scalar, R: Runtime> MatrixStorage<T, R> {
    fn new(dist: Distribution, comm: Arc<dyn Communicator>, config: MatrixConfig) -> Self {
        let num_devices = dist.num_devices();
        Self {
            memory: Memory::with_capacity::<R>(num_devices, config.device_capacity),
            batch: (0..num_devices).map(|_| Mutex::new(BatchArrays::default())).collect(),
            dist,
            comm,
            tiles: RwLock::new(HashMap::new()),
            config,
            clock: AtomicU64::new(0),
            _runtime: PhantomData,
        }
    }

    /// Next access stamp
    pub(crate) fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn node(&self, gi: usize, gj: usize) -> Option<NodeRef<T>> {
        self.tiles.read().get(&(gi, gj)).cloned()
    }

    pub(crate) fn node_or_insert(&self, gi: usize, gj: usize) -> NodeRef<T> {
        let mut tiles = self.tiles.write();
        let (mb, nb) = (self.dist.tile_mb(gi), self.dist.tile_nb(gj));
        let slots = self.dist.num_devices() + 1;
        Arc::clone(
            tiles
                .entry((gi, gj))
                .or_insert_with(|| Arc::new(Mutex::new(TileNode::new(mb, nb, slots)))),
        )
    }

    pub(crate) fn all_nodes(&self) -> Vec<((usize, usize), NodeRef<T>)> {
        self.tiles.read().iter().map(|(k, v)| (*k, Arc::clone(v))).collect()
    }

    /// Return an instance's buffer to the pool; caller-owned memory is left alone
    pub(crate) fn free_tile(&self, tile: &Tile<T>) {
        if tile.kind() != TileKind::UserOwned {
            self.memory.release(tile.location(), tile.data(), tile.bytes());
        }
    }

    pub(crate) fn is_local(&self, gi: usize, gj: usize) -> bool {
        self.dist.tile_rank(gi, gj) == self.comm.rank()
    }
}

impl<T: Scalar, R: Runtime> Drop for MatrixStorage<T, R> {
    fn drop(&mut self) {
        let tiles = std::mem::take(&mut *self.tiles.write());
        for node in tiles.into_values() {
            let node = node.lock();
            for inst in node.iter() {
                self.free_tile(&inst.tile);
            }
        }
    }
}

/// A distributed m x n matrix, or a view of one
///
/// Tiles are stored once, in an arena shared by every view. A view is an
/// offset and extent in tile coordinates plus an [`Op`]; slicing and
/// transposing never copy tile data. Tile (i, j) of a view is addressed in
/// the view's own coordinates.
///
/// # Example
///
/// ```
/// use tessel::comm::LocalCluster;
/// use tessel::matrix::Matrix;
///
/// let comm = LocalCluster::new(1).comm(0);
/// let a = Matrix::<f64>::new(10, 6, 4, 1, 1, comm).unwrap();
/// assert_eq!((a.mt(), a.nt()), (3, 2));
/// let panel = a.sub(1, 2, 0, 0);
/// assert_eq!((panel.mt(), panel.m()), (2, 6));
/// assert_eq!(a.transpose().m(), 6);
/// ```
pub struct Matrix<T: Scalar, R: Runtime = CpuRuntime> {
    pub(crate) storage: Arc<MatrixStorage<T, R>>,
    ioffset: usize,
    joffset: usize,
    // extent in storage orientation
    mt: usize,
    nt: usize,
    op: Op,
}

impl<T: Scalar, R: Runtime> Clone for Matrix<T, R> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            ioffset: self.ioffset,
            joffset: self.joffset,
            mt: self.mt,
            nt: self.nt,
            op: self.op,
        }
    }
}

impl<T: Scalar, R: Runtime> fmt::Debug for Matrix<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Matrix")
            .field("mt", &self.mt())
            .field("nt", &self.nt())
            .field("offset", &(self.ioffset, self.joffset))
            .field("op", &self.op)
            .field("rank", &self.mpi_rank())
            .finish()
    }
}

fn check_grid(p: usize, q: usize, comm: &dyn Communicator) -> Result<()> {
    if p * q != comm.size() {
        return Err(Error::invalid_argument(
            "p",
            format!("{}x{} grid does not match {} ranks", p, q, comm.size()),
        ));
    }
    Ok(())
}

/// Rows (or columns) of a block-cyclic dimension held by one grid row (or column)
fn numroc(n: usize, nb: usize, iproc: usize, nprocs: usize) -> usize {
    let nblocks = n / nb;
    let mut count = (nblocks / nprocs) * nb;
    let extra = nblocks % nprocs;
    if iproc < extra {
        count += nb;
    } else if iproc == extra {
        count += n % nb;
    }
    count
}

impl<T: Scalar, R: Runtime> Matrix<T, R> {
    /// Square `nb` tiles, block-cyclic over a column-ordered `p x q` grid
    pub fn new(
        m: usize,
        n: usize,
        nb: usize,
        p: usize,
        q: usize,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        Self::with_config(m, n, nb, p, q, comm, MatrixConfig::default())
    }

    /// Like [`Matrix::new`], with devices and workspace limits
    pub fn with_config(
        m: usize,
        n: usize,
        nb: usize,
        p: usize,
        q: usize,
        comm: Arc<dyn Communicator>,
        config: MatrixConfig,
    ) -> Result<Self> {
        check_grid(p, q, comm.as_ref())?;
        let dist = Distribution::block_cyclic(m, n, nb, p, q, config.num_devices)?;
        Ok(Self::from_distribution(dist, comm, config))
    }

    /// Caller-supplied tile sizes and owner functions
    #[allow(clippy::too_many_arguments)]
    pub fn with_functions(
        m: usize,
        n: usize,
        tile_mb: TileSizeFn,
        tile_nb: TileSizeFn,
        rank_fn: TileMapFn,
        device_fn: TileMapFn,
        comm: Arc<dyn Communicator>,
        config: MatrixConfig,
    ) -> Result<Self> {
        let dist =
            Distribution::new(m, n, tile_mb, tile_nb, rank_fn, device_fn, config.num_devices)?;
        Ok(Self::from_distribution(dist, comm, config))
    }

    /// Matrix over an existing distribution; no tiles are inserted
    pub fn from_distribution(
        dist: Distribution,
        comm: Arc<dyn Communicator>,
        config: MatrixConfig,
    ) -> Self {
        let (mt, nt) = (dist.mt(), dist.nt());
        Self {
            storage: Arc::new(MatrixStorage::new(dist, comm, config)),
            ioffset: 0,
            joffset: 0,
            mt,
            nt,
            op: Op::NoTrans,
        }
    }

    /// Wrap this rank's part of a block-cyclic column-major buffer
    ///
    /// The buffer holds the local rows and columns of a `p x q` column-ordered
    /// grid, `nb x nb` blocks, leading dimension `lld`. Element (i, j) of a local
    /// tile is `data[i + j * lld]` relative to the tile's block, and tiles are
    /// inserted as `UserOwned` host origins that alias the buffer.
    ///
    /// # Safety
    ///
    /// `data` must be valid for reads and writes of `len` elements for the
    /// lifetime of the returned matrix and every view derived from it, and
    /// must not be accessed otherwise while the matrix is in use.
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn from_scalapack(
        m: usize,
        n: usize,
        data: *mut T,
        len: usize,
        lld: usize,
        nb: usize,
        p: usize,
        q: usize,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        check_grid(p, q, comm.as_ref())?;
        if nb == 0 {
            return Err(Error::invalid_argument("nb", "block size must be positive"));
        }
        let rank = comm.rank();
        let (myrow, mycol) = (rank % p, rank / p);
        let local_rows = numroc(m, nb, myrow, p);
        let local_cols = numroc(n, nb, mycol, q);
        if lld < local_rows.max(1) {
            return Err(Error::invalid_argument(
                "lld",
                format!("{} is smaller than the {} local rows", lld, local_rows),
            ));
        }
        if local_cols > 0 && lld * (local_cols - 1) + local_rows > len {
            return Err(Error::invalid_argument(
                "len",
                format!(
                    "{} elements cannot hold {}x{} with lld {}",
                    len, local_rows, local_cols, lld
                ),
            ));
        }
        let dist = Distribution::block_cyclic(m, n, nb, p, q, 0)?;
        let matrix = Self::from_distribution(dist, comm, MatrixConfig::default());
        for j in (mycol..matrix.nt()).step_by(q) {
            for i in (myrow..matrix.mt()).step_by(p) {
                let offset = (i / p) * nb + (j / q) * nb * lld;
                // SAFETY: offset plus the tile extent stays inside len, checked above
                let tile = unsafe {
                    Tile::from_raw_parts(
                        data.add(offset) as u64,
                        matrix.tile_mb(i),
                        matrix.tile_nb(j),
                        lld,
                        Layout::ColMajor,
                        Location::Host,
                        TileKind::UserOwned,
                    )
                };
                let node = matrix.storage.node_or_insert(i, j);
                node.lock().insert(tile, Mosi::Modified, matrix.storage.tick());
            }
        }
        Ok(matrix)
    }

    /// Same distribution and communicator, fresh storage with no tiles
    pub fn empty_like(&self) -> Self {
        let storage = Arc::new(MatrixStorage::new(
            self.storage.dist.clone(),
            Arc::clone(&self.storage.comm),
            self.storage.config.clone(),
        ));
        Self {
            storage,
            ..self.clone()
        }
    }

    /// Allocate a zeroed origin for every local tile in the view
    ///
    /// Origins go on the host, or on each tile's device for [`Target::Devices`].
    pub fn insert_local_tiles(&self, target: Target) -> Result<()> {
        for j in 0..self.nt() {
            for i in 0..self.mt() {
                if self.tile_is_local(i, j) {
                    let location = match target {
                        Target::Devices => Location::Device(self.tile_device(i, j)),
                        _ => Location::Host,
                    };
                    self.tile_insert(i, j, location)?;
                }
            }
        }
        Ok(())
    }

    /// Insert an owned origin instance of tile (i, j) at `location`
    pub fn tile_insert(&self, i: usize, j: usize, location: Location) -> Result<Tile<T>> {
        let (gi, gj) = self.global(i, j);
        let node = self.storage.node_or_insert(gi, gj);
        let mut node = node.lock();
        let tile = self.alloc_instance(
            location,
            node.mb(),
            node.nb(),
            Layout::ColMajor,
            TileKind::Owned,
        )?;
        // fresh blocks may be recycled, so zero them explicitly
        if location.is_host() {
            crate::tile::kernels::set(T::zero(), T::zero(), &tile);
        } else {
            let zeros = vec![0u8; tile.bytes()];
            R::copy_to_device(&zeros, tile.data(), &R::device(self.device_index(location)))?;
        }
        node.insert(tile, Mosi::Modified, self.storage.tick());
        Ok(self.view_tile(tile))
    }

    /// Insert a workspace instance of tile (i, j) at `location`, initially Invalid
    pub fn tile_insert_workspace(
        &self,
        i: usize,
        j: usize,
        location: Location,
        layout: Layout,
    ) -> Result<Tile<T>> {
        let (gi, gj) = self.global(i, j);
        let node = self.storage.node_or_insert(gi, gj);
        let mut node = node.lock();
        if let Some(inst) = node.instance(location) {
            return Ok(self.view_tile(inst.tile));
        }
        let tile =
            self.alloc_instance(location, node.mb(), node.nb(), layout, TileKind::Workspace)?;
        node.insert(tile, Mosi::Invalid, self.storage.tick());
        Ok(self.view_tile(tile))
    }

    pub(crate) fn device_index(&self, location: Location) -> usize {
        match location {
            Location::Device(d) => d,
            Location::Host => 0,
        }
    }

    // ---- view geometry -------------------------------------------------

    /// Map view tile coordinates to arena coordinates
    #[inline]
    pub(crate) fn global(&self, i: usize, j: usize) -> (usize, usize) {
        if self.op.is_transposed() {
            (self.ioffset + j, self.joffset + i)
        } else {
            (self.ioffset + i, self.joffset + j)
        }
    }

    /// Apply the view op to an arena tile
    #[inline]
    pub(crate) fn view_tile(&self, tile: Tile<T>) -> Tile<T> {
        match self.op {
            Op::NoTrans => tile,
            Op::Trans => tile.transpose(),
            Op::ConjTrans => tile.conj_transpose(),
        }
    }

    /// Tile rows in the view
    pub fn mt(&self) -> usize {
        if self.op.is_transposed() { self.nt } else { self.mt }
    }

    /// Tile columns in the view
    pub fn nt(&self) -> usize {
        if self.op.is_transposed() { self.mt } else { self.nt }
    }

    /// Rows in the view
    pub fn m(&self) -> usize {
        (0..self.mt()).map(|i| self.tile_mb(i)).sum()
    }

    /// Columns in the view
    pub fn n(&self) -> usize {
        (0..self.nt()).map(|j| self.tile_nb(j)).sum()
    }

    /// Rows of tile row `i`
    pub fn tile_mb(&self, i: usize) -> usize {
        if self.op.is_transposed() {
            self.storage.dist.tile_nb(self.joffset + i)
        } else {
            self.storage.dist.tile_mb(self.ioffset + i)
        }
    }

    /// Columns of tile column `j`
    pub fn tile_nb(&self, j: usize) -> usize {
        if self.op.is_transposed() {
            self.storage.dist.tile_mb(self.ioffset + j)
        } else {
            self.storage.dist.tile_nb(self.joffset + j)
        }
    }

    /// Rank owning tile (i, j)
    pub fn tile_rank(&self, i: usize, j: usize) -> usize {
        let (gi, gj) = self.global(i, j);
        self.storage.dist.tile_rank(gi, gj)
    }

    /// Device holding tile (i, j) on its rank
    pub fn tile_device(&self, i: usize, j: usize) -> usize {
        let (gi, gj) = self.global(i, j);
        self.storage.dist.tile_device(gi, gj)
    }

    /// Whether this rank owns tile (i, j)
    pub fn tile_is_local(&self, i: usize, j: usize) -> bool {
        self.tile_rank(i, j) == self.mpi_rank()
    }

    /// This process's rank
    pub fn mpi_rank(&self) -> usize {
        self.storage.comm.rank()
    }

    /// Number of ranks
    pub fn mpi_size(&self) -> usize {
        self.storage.comm.size()
    }

    /// Communicator the matrix is distributed over
    pub fn comm(&self) -> &Arc<dyn Communicator> {
        &self.storage.comm
    }

    /// Distribution of the whole arena
    pub fn distribution(&self) -> &Distribution {
        &self.storage.dist
    }

    /// Devices per rank
    pub fn num_devices(&self) -> usize {
        self.storage.dist.num_devices()
    }

    /// View op
    pub fn op(&self) -> Op {
        self.op
    }

    /// Ranks owning at least one tile of the view
    pub fn get_ranks(&self) -> BTreeSet<usize> {
        let mut ranks = BTreeSet::new();
        for j in 0..self.nt() {
            for i in 0..self.mt() {
                ranks.insert(self.tile_rank(i, j));
            }
        }
        ranks
    }

    /// Tiles of the view owned by this rank
    pub fn num_local_tiles(&self) -> usize {
        let mut count = 0;
        for j in 0..self.nt() {
            for i in 0..self.mt() {
                if self.tile_is_local(i, j) {
                    count += 1;
                }
            }
        }
        count
    }

    /// Local tiles of the view, column by column
    pub fn local_tiles(&self) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for j in 0..self.nt() {
            for i in 0..self.mt() {
                if self.tile_is_local(i, j) {
                    out.push((i, j));
                }
            }
        }
        out
    }

    /// View of tile rows `i1..=i2` and tile columns `j1..=j2`
    ///
    /// `i2 + 1 == i1` (or `j2 + 1 == j1`) gives an empty view.
    pub fn sub(&self, i1: usize, i2: usize, j1: usize, j2: usize) -> Self {
        let rows = (i2 + 1).saturating_sub(i1);
        let cols = (j2 + 1).saturating_sub(j1);
        assert!(
            rows == 0 || i2 < self.mt(),
            "sub rows {}..={} outside {} tile rows",
            i1,
            i2,
            self.mt()
        );
        assert!(
            cols == 0 || j2 < self.nt(),
            "sub cols {}..={} outside {} tile columns",
            j1,
            j2,
            self.nt()
        );
        let mut view = self.clone();
        if self.op.is_transposed() {
            view.ioffset += j1;
            view.joffset += i1;
            view.mt = cols;
            view.nt = rows;
        } else {
            view.ioffset += i1;
            view.joffset += j1;
            view.mt = rows;
            view.nt = cols;
        }
        view
    }

    /// Transposed view
    ///
    /// # Panics
    ///
    /// Panics on a conjugate-transposed view, whose transpose is a plain
    /// conjugate and has no view representation.
    pub fn transpose(&self) -> Self {
        assert!(self.op != Op::ConjTrans, "cannot transpose a conjugate-transposed view");
        let mut view = self.clone();
        view.op = self.op.transpose();
        view
    }

    /// Conjugate-transposed view
    pub fn conj_transpose(&self) -> Self {
        assert!(self.op != Op::Trans, "cannot conjugate-transpose a transposed view");
        let mut view = self.clone();
        view.op = self.op.conj_transpose();
        view
    }

    // ---- direct access -------------------------------------------------

    /// Host instance of tile (i, j), without any coherence action
    pub fn tile(&self, i: usize, j: usize) -> Result<Tile<T>> {
        self.tile_on(i, j, Location::Host)
    }

    /// Instance of tile (i, j) at `location`, without any coherence action
    ///
    /// Fails with `TileNotLocal` for a tile this rank neither owns nor has received.
    pub fn tile_on(&self, i: usize, j: usize, location: Location) -> Result<Tile<T>> {
        let (gi, gj) = self.global(i, j);
        let Some(node) = self.storage.node(gi, gj) else {
            return Err(self.missing_tile(i, j, location));
        };
        let node = node.lock();
        match node.instance(location) {
            Some(inst) => Ok(self.view_tile(inst.tile)),
            None => Err(self.missing_tile(i, j, location)),
        }
    }

    pub(crate) fn missing_tile(&self, i: usize, j: usize, location: Location) -> Error {
        if self.tile_is_local(i, j) {
            Error::TileNotFound { i, j, location }
        } else {
            Error::TileNotLocal {
                i,
                j,
                rank: self.mpi_rank(),
            }
        }
    }

    /// Whether an instance of tile (i, j) exists at `location`
    pub fn tile_exists(&self, i: usize, j: usize, location: Location) -> bool {
        let (gi, gj) = self.global(i, j);
        self.storage
            .node(gi, gj)
            .is_some_and(|node| node.lock().exists(location))
    }

    /// Host origin buffer of a local tile as a column-major vector of the op view
    ///
    /// Convenience for tests and small drivers; performs no coherence action.
    pub fn tile_to_vec(&self, i: usize, j: usize) -> Result<Vec<T>> {
        Ok(self.tile(i, j)?.to_vec())
    }

    /// Whether two views share an arena
    pub fn same_storage(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.storage, &other.storage)
    }
}
