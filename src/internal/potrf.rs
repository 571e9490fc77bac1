//! Tile steps of a blocked Cholesky factorization

use super::{for_each_tile, Target};
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::matrix::{HermitianMatrix, Matrix};
use crate::runtime::{Queue, Runtime};
use crate::tile::{kernels, LayoutConvert, Location, Op, Side, Tile, Uplo};
use std::collections::BTreeMap;

/// Attach a logical triangle to a view tile
fn with_logical_uplo<T: Scalar>(t: Tile<T>, uplo: Uplo) -> Tile<T> {
    t.with_uplo(if t.op().is_transposed() { uplo.flip() } else { uplo })
}

/// Factor the single diagonal tile of `a` on the host
pub fn potrf_panel<T: Scalar, R: Runtime>(a: &HermitianMatrix<T, R>) -> Result<()> {
    if (a.mt(), a.nt()) != (1, 1) {
        return Err(Error::shape_mismatch((1, 1), (a.mt(), a.nt())));
    }
    if !a.tile_is_local(0, 0) {
        return Ok(());
    }
    let t = a.tile_get_for_writing(0, 0, Location::Host, LayoutConvert::ColMajor)?;
    kernels::potrf(&with_logical_uplo(t, a.uplo()))
}

/// B = B L^-H for every local tile of column `b`, with L the lower tile of `l`
pub fn trsm_panel<T: Scalar, R: Runtime>(
    target: Target,
    l: &Matrix<T, R>,
    b: &Matrix<T, R>,
) -> Result<()> {
    if b.nt() != 1 {
        return Err(Error::invalid_argument("b", "trsm_panel needs a single tile column"));
    }
    let tiles = b.local_tiles();
    if tiles.is_empty() {
        return Ok(());
    }
    let lkk = l.tile_get_for_reading(0, 0, Location::Host, LayoutConvert::ColMajor)?;
    let lkk = with_logical_uplo(lkk, Uplo::Lower).conj_transpose();
    for_each_tile(target, &tiles, |i, j| {
        let t = b.tile_get_for_writing(i, j, Location::Host, LayoutConvert::ColMajor)?;
        kernels::trsm(Side::Right, T::one(), &lkk, &t)
    })
}

/// Lower triangle of C -= A A^H, with A the single tile column `a`
///
/// Diagonal tiles get a Hermitian rank-k update, the others a general one.
pub fn herk_trailing<T: Scalar, R: Runtime>(
    target: Target,
    a: &Matrix<T, R>,
    c: &HermitianMatrix<T, R>,
) -> Result<()> {
    if c.uplo() != Uplo::Lower {
        return Err(Error::invalid_argument("c", "trailing update expects the lower triangle"));
    }
    if a.nt() != 1 || a.mt() != c.mt() {
        return Err(Error::shape_mismatch((c.mt(), 1), (a.mt(), a.nt())));
    }
    let tiles: Vec<_> = c.local_tiles().into_iter().filter(|&(i, j)| i >= j).collect();
    rank_k_update(target, a, a, c, &tiles, true)
}

/// C -= A B^H, with A and B single tile columns
pub fn gemm_trailing<T: Scalar, R: Runtime>(
    target: Target,
    a: &Matrix<T, R>,
    b: &Matrix<T, R>,
    c: &Matrix<T, R>,
) -> Result<()> {
    if a.nt() != 1 || b.nt() != 1 || a.mt() != c.mt() || b.mt() != c.nt() {
        return Err(Error::shape_mismatch((c.mt(), c.nt()), (a.mt(), b.mt())));
    }
    rank_k_update(target, a, b, c, &c.local_tiles(), false)
}

fn rank_k_update<T: Scalar, R: Runtime>(
    target: Target,
    a: &Matrix<T, R>,
    b: &Matrix<T, R>,
    c: &Matrix<T, R>,
    tiles: &[(usize, usize)],
    hermitian: bool,
) -> Result<()> {
    let minus_one = -T::one();
    match target {
        Target::HostTask | Target::HostNest => for_each_tile(target, tiles, |i, j| {
            let ai = a.tile_get_for_reading(i, 0, Location::Host, LayoutConvert::ColMajor)?;
            let ct = c.tile_get_for_writing(i, j, Location::Host, LayoutConvert::ColMajor)?;
            if hermitian && i == j {
                let one = <T::Real as Scalar>::one();
                kernels::herk(-one, &ai, one, &with_logical_uplo(ct, Uplo::Lower))
            } else {
                let bj = b.tile_get_for_reading(j, 0, Location::Host, LayoutConvert::ColMajor)?;
                kernels::gemm(minus_one, &ai, &bj.conj_transpose(), T::one(), &ct)
            }
        }),
        Target::HostBatch => Err(Error::NotImplemented {
            feature: "trailing update on Target::HostBatch",
        }),
        Target::Devices => {
            if [a.op(), b.op(), c.op()].iter().any(|&op| op != Op::NoTrans) {
                return Err(Error::NotImplemented {
                    feature: "transposed views on Target::Devices",
                });
            }
            for device in 0..c.num_devices() {
                let mine: Vec<_> = tiles
                    .iter()
                    .copied()
                    .filter(|&(i, j)| c.tile_device(i, j) == device)
                    .collect();
                if !mine.is_empty() {
                    device_rank_k(device, a, b, c, &mine, hermitian)?;
                }
            }
            Ok(())
        }
    }
}

/// One device's share of a trailing update, as batched gemm and herk launches
fn device_rank_k<T: Scalar, R: Runtime>(
    device: usize,
    a: &Matrix<T, R>,
    b: &Matrix<T, R>,
    c: &Matrix<T, R>,
    tiles: &[(usize, usize)],
    hermitian: bool,
) -> Result<()> {
    let location = Location::Device(device);
    let mut a_tiles = BTreeMap::new();
    let mut b_tiles = BTreeMap::new();
    for &(i, j) in tiles {
        if let std::collections::btree_map::Entry::Vacant(e) = a_tiles.entry(i) {
            e.insert(a.tile_get_for_reading(i, 0, location, LayoutConvert::ColMajor)?);
        }
        if !(hermitian && i == j) && !b_tiles.contains_key(&j) {
            b_tiles.insert(j, b.tile_get_for_reading(j, 0, location, LayoutConvert::ColMajor)?);
        }
    }
    let groups = c.device_groups_for_writing(device, tiles)?;
    let queue = R::queue(&R::device(device), 0);
    let mut arrays = c.batch_arrays(device);
    let k = a.tile_nb(0);
    let one = <T::Real as Scalar>::one();
    for (group, c_ptrs) in groups {
        // split further so each launch has uniform leading dimensions of A and B
        let mut launches: BTreeMap<(usize, usize), Vec<(u64, u64, u64)>> = BTreeMap::new();
        for (&(i, j), c_ptr) in group.tiles.iter().zip(c_ptrs) {
            let ai = &a_tiles[&i];
            let (b_ptr, ldb) = b_tiles.get(&j).map_or((0, 0), |t: &Tile<T>| (t.data(), t.stride()));
            launches
                .entry((ai.stride(), ldb))
                .or_default()
                .push((ai.data(), b_ptr, c_ptr));
        }
        for ((lda, ldb), ptrs) in launches {
            let (aa, bb, cc) = arrays.load_abc(ptrs);
            if hermitian && group.diagonal {
                R::herk_batch::<T>(
                    Uplo::Lower,
                    Op::NoTrans,
                    group.mb,
                    k,
                    -one,
                    aa,
                    lda,
                    one,
                    cc,
                    group.ld,
                    &queue,
                )?;
            } else {
                R::gemm_batch(
                    Op::NoTrans,
                    Op::ConjTrans,
                    group.mb,
                    group.nb,
                    k,
                    -T::one(),
                    aa,
                    lda,
                    bb,
                    ldb,
                    T::one(),
                    cc,
                    group.ld,
                    &queue,
                )?;
            }
        }
    }
    queue.sync()
}
