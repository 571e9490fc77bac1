//! Row interchanges across ranks: general row permutation and symmetric pivoting

use super::pivot::{make_parallel_pivot, Direction, Pivot, PivotMap};
use super::Target;
use crate::comm::decode_pod;
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::matrix::{HermitianMatrix, Matrix};
use crate::runtime::{Queue, Runtime};
use crate::tile::{Layout, LayoutConvert, Location, Op, Tile, Uplo};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

fn check_pivots<T: Scalar, R: Runtime>(a: &Matrix<T, R>, pivot: &[Pivot]) -> Result<()> {
    if a.mt() == 0 {
        return if pivot.is_empty() {
            Ok(())
        } else {
            Err(Error::invalid_argument("pivot", "matrix has no rows"))
        };
    }
    if pivot.len() > a.tile_mb(0) {
        return Err(Error::invalid_argument(
            "pivot",
            format!("{} entries for a first tile of {} rows", pivot.len(), a.tile_mb(0)),
        ));
    }
    for (i, p) in pivot.iter().enumerate() {
        if p.tile_index() >= a.mt() || p.element_offset() >= a.tile_mb(p.tile_index()) {
            return Err(Error::invalid_argument(
                "pivot",
                format!("entry {} points at missing row {}", i, p),
            ));
        }
    }
    Ok(())
}

/// Apply the interchanges of `pivot` to the rows of `a`
///
/// Entry `i` swaps row `i` of tile row 0 with row `pivot[i]`; entries are
/// applied in `direction` order. The pivot vector is first collapsed into a
/// single permutation, so each tile column needs one exchange round however
/// many entries there are. Host targets work on column-major host tiles;
/// `Devices` works on row-major device tiles. Every rank holding part of the
/// matrix must call this.
pub fn permute_rows<T: Scalar, R: Runtime>(
    target: Target,
    direction: Direction,
    a: &Matrix<T, R>,
    pivot: &[Pivot],
    layout: Layout,
    tag: i32,
) -> Result<()> {
    if a.op() != Op::NoTrans {
        return Err(Error::NotImplemented {
            feature: "row permutation of a transposed view",
        });
    }
    check_pivots(a, pivot)?;
    let map = make_parallel_pivot(direction, pivot);
    match target {
        Target::Devices => {
            if layout != Layout::RowMajor {
                return Err(Error::LayoutMismatch {
                    expected: Layout::RowMajor,
                    got: layout,
                });
            }
            permute_rows_devices(a, &map, tag)
        }
        Target::HostTask | Target::HostNest | Target::HostBatch => {
            if layout != Layout::ColMajor {
                return Err(Error::LayoutMismatch {
                    expected: Layout::ColMajor,
                    got: layout,
                });
            }
            a.tile_get_all_for_writing(Location::Host, LayoutConvert::ColMajor)?;
            for j in 0..a.nt() {
                exchange_column(a, &map, j, tag, &HostRows)?;
            }
            Ok(())
        }
    }
}

/// Reads and writes single rows of the local tiles of one tile column
trait RowAccess<T: Scalar, R: Runtime> {
    fn read(&self, a: &Matrix<T, R>, row: Pivot, j: usize) -> Result<Vec<T>>;
    fn write(&self, a: &Matrix<T, R>, row: Pivot, j: usize, data: &[T]) -> Result<()>;
}

struct HostRows;

impl<T: Scalar, R: Runtime> RowAccess<T, R> for HostRows {
    fn read(&self, a: &Matrix<T, R>, row: Pivot, j: usize) -> Result<Vec<T>> {
        let t = a.tile(row.tile_index(), j)?;
        Ok((0..t.nb()).map(|c| t.at(row.element_offset(), c)).collect())
    }

    fn write(&self, a: &Matrix<T, R>, row: Pivot, j: usize, data: &[T]) -> Result<()> {
        let t = a.tile(row.tile_index(), j)?;
        for (c, &v) in data.iter().enumerate() {
            t.set(row.element_offset(), c, v);
        }
        Ok(())
    }
}

/// Rows of row-major device tiles; a row is contiguous
struct DeviceRows;

impl DeviceRows {
    fn row_ptr<T: Scalar, R: Runtime>(
        a: &Matrix<T, R>,
        row: Pivot,
        j: usize,
    ) -> Result<(Tile<T>, u64, usize)> {
        let device = a.tile_device(row.tile_index(), j);
        let t = a.tile_on(row.tile_index(), j, Location::Device(device))?;
        if t.layout() != Layout::RowMajor {
            return Err(Error::LayoutMismatch {
                expected: Layout::RowMajor,
                got: t.layout(),
            });
        }
        let offset = row.element_offset() * t.stride() * std::mem::size_of::<T>();
        Ok((t, t.data() + offset as u64, device))
    }
}

impl<T: Scalar, R: Runtime> RowAccess<T, R> for DeviceRows {
    fn read(&self, a: &Matrix<T, R>, row: Pivot, j: usize) -> Result<Vec<T>> {
        let (t, ptr, device) = Self::row_ptr(a, row, j)?;
        let mut out = vec![T::zero(); t.nb()];
        R::copy_from_device(ptr, bytemuck::cast_slice_mut(&mut out), &R::device(device))?;
        Ok(out)
    }

    fn write(&self, a: &Matrix<T, R>, row: Pivot, j: usize, data: &[T]) -> Result<()> {
        let (_, ptr, device) = Self::row_ptr(a, row, j)?;
        R::copy_to_device(bytemuck::cast_slice(data), ptr, &R::device(device))
    }
}

/// Move every row of `map` within tile column `j`
fn exchange_column<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    map: &PivotMap,
    j: usize,
    tag: i32,
    rows: &dyn RowAccess<T, R>,
) -> Result<()> {
    exchange_column_except(a, map, j, tag, rows, &BTreeSet::new())
}

/// [`exchange_column`], leaving destination rows in `done` alone
fn exchange_column_except<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    map: &PivotMap,
    j: usize,
    tag: i32,
    rows: &dyn RowAccess<T, R>,
    done: &BTreeSet<Pivot>,
) -> Result<()> {
    let me = a.mpi_rank();
    let owner = |p: &Pivot| a.tile_rank(p.tile_index(), j);
    let comm = a.comm();
    let moves: Vec<(Pivot, Pivot)> = map
        .iter()
        .filter(|(dst, _)| !done.contains(dst))
        .map(|(d, s)| (*d, *s))
        .collect();

    // read every outgoing row before anything is overwritten
    let mut src_rows: BTreeMap<Pivot, Vec<T>> = BTreeMap::new();
    for &(_, src) in &moves {
        if owner(&src) == me {
            src_rows.insert(src, rows.read(a, src, j)?);
        }
    }

    let mut sent = 0;
    for &(dst, src) in &moves {
        if owner(&src) == me && owner(&dst) != me {
            let data = bytemuck::cast_slice(&src_rows[&src]).to_vec();
            comm.send(owner(&dst), tag, data)?;
            sent += 1;
        }
    }

    let nb = a.tile_nb(j);
    let mut incoming = Vec::new();
    for &(dst, src) in &moves {
        if owner(&dst) != me {
            continue;
        }
        let data = if owner(&src) == me {
            src_rows[&src].clone()
        } else {
            decode_pod::<T>(&comm.recv(owner(&src), tag)?)?
        };
        if data.len() != nb {
            return Err(Error::shape_mismatch((1, nb), (1, data.len())));
        }
        incoming.push((dst, data));
    }
    let received = incoming.len();
    for (dst, data) in incoming {
        rows.write(a, dst, j, &data)?;
    }
    debug!(j, rank = me, sent, received, "row exchange");
    Ok(())
}

fn permute_rows_devices<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    map: &PivotMap,
    tag: i32,
) -> Result<()> {
    a.tile_get_all_for_writing_on_devices(LayoutConvert::RowMajor)?;
    let me = a.mpi_rank();
    let mut used = BTreeSet::new();
    for j in 0..a.nt() {
        // two-cycles within one device swap in place
        let mut done = BTreeSet::new();
        for (&dst, &src) in map {
            let local = |p: Pivot| a.tile_rank(p.tile_index(), j) == me;
            if dst < src && map.get(&src) == Some(&dst) && local(dst) && local(src) {
                let (t1, p1, d1) = DeviceRows::row_ptr(a, dst, j)?;
                let (_, p2, d2) = DeviceRows::row_ptr(a, src, j)?;
                if d1 == d2 {
                    let queue = R::queue(&R::device(d1), 0);
                    R::swap::<T>(t1.nb(), p1, 1, p2, 1, &queue)?;
                    used.insert(d1);
                    done.insert(dst);
                    done.insert(src);
                }
            }
        }
        exchange_column_except(a, map, j, tag, &DeviceRows, &done)?;
    }
    for device in used {
        R::queue(&R::device(device), 0).sync()?;
    }
    Ok(())
}

// ---- symmetric pivoting -----------------------------------------------

/// Tile (i, j) of `a`, transposed unless `op` is NoTrans
fn oriented<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    op: Op,
    (i, j): (usize, usize),
) -> Result<Tile<T>> {
    let t = a.tile(i, j)?;
    Ok(if op == Op::NoTrans { t } else { t.transpose() })
}

/// Swap columns `j0..j0 + n` of row `r1` of tile `ij1` (seen through `op1`)
/// with those of row `r2` of tile `ij2` (seen through `op2`)
///
/// When exactly one side is transposed both rows are conjugated, since
/// they cross the diagonal of a Hermitian matrix.
#[allow(clippy::too_many_arguments)]
fn swap_row<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    j0: usize,
    n: usize,
    op1: Op,
    ij1: (usize, usize),
    r1: usize,
    op2: Op,
    ij2: (usize, usize),
    r2: usize,
    tag: i32,
) -> Result<()> {
    if n == 0 {
        return Ok(());
    }
    let me = a.mpi_rank();
    let (rank1, rank2) = (a.tile_rank(ij1.0, ij1.1), a.tile_rank(ij2.0, ij2.1));
    let fix = |v: T| if op1 != op2 { v.conj() } else { v };
    if rank1 == me && rank2 == me {
        let (t1, t2) = (oriented(a, op1, ij1)?, oriented(a, op2, ij2)?);
        for c in j0..j0 + n {
            let (x, y) = (fix(t1.at(r1, c)), fix(t2.at(r2, c)));
            t1.set(r1, c, y);
            t2.set(r2, c, x);
        }
        Ok(())
    } else if rank1 == me {
        swap_remote_row(a, &oriented(a, op1, ij1)?, r1, j0, n, rank2, tag, fix)
    } else if rank2 == me {
        swap_remote_row(a, &oriented(a, op2, ij2)?, r2, j0, n, rank1, tag, fix)
    } else {
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
fn swap_remote_row<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    t: &Tile<T>,
    r: usize,
    j0: usize,
    n: usize,
    peer: usize,
    tag: i32,
    fix: impl Fn(T) -> T,
) -> Result<()> {
    let mine: Vec<T> = (j0..j0 + n).map(|c| fix(t.at(r, c))).collect();
    a.comm().send(peer, tag, bytemuck::cast_slice(&mine).to_vec())?;
    let theirs: Vec<T> = decode_pod(&a.comm().recv(peer, tag)?)?;
    if theirs.len() != n {
        return Err(Error::shape_mismatch((1, n), (1, theirs.len())));
    }
    for (c, v) in (j0..j0 + n).zip(theirs) {
        t.set(r, c, v);
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn swap_element<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    ij1: (usize, usize),
    r1: usize,
    c1: usize,
    ij2: (usize, usize),
    r2: usize,
    c2: usize,
    tag: i32,
) -> Result<()> {
    let me = a.mpi_rank();
    let (rank1, rank2) = (a.tile_rank(ij1.0, ij1.1), a.tile_rank(ij2.0, ij2.1));
    if rank1 == me && rank2 == me {
        let (t1, t2) = (a.tile(ij1.0, ij1.1)?, a.tile(ij2.0, ij2.1)?);
        let (x, y) = (t1.at(r1, c1), t2.at(r2, c2));
        t1.set(r1, c1, y);
        t2.set(r2, c2, x);
        Ok(())
    } else if rank1 == me {
        swap_remote_row(a, &a.tile(ij1.0, ij1.1)?, r1, c1, 1, rank2, tag, |v| v)
    } else if rank2 == me {
        swap_remote_row(a, &a.tile(ij2.0, ij2.1)?, r2, c2, 1, rank1, tag, |v| v)
    } else {
        Ok(())
    }
}

/// Apply `pivot` symmetrically to a lower Hermitian matrix: P A P^H
///
/// Only the lower triangle is read and written. Row `i1` of tile row 0 is
/// exchanged with row `pivot[i1]` and the matching columns, which moves
/// elements across the diagonal; those are conjugated, and so is the
/// element where the two swapped rows and columns cross. Tags `tag` through
/// `tag + nt` are used. Every rank holding part of the matrix must call this.
pub fn permute_rows_cols<T: Scalar, R: Runtime>(
    direction: Direction,
    a: &HermitianMatrix<T, R>,
    pivot: &[Pivot],
    tag: i32,
) -> Result<()> {
    if a.uplo() != Uplo::Lower {
        return Err(Error::invalid_argument("a", "symmetric pivoting needs a lower matrix"));
    }
    let a_gen: &Matrix<T, R> = a;
    check_pivots(a_gen, pivot)?;
    for (i, j) in a.local_tiles() {
        if i >= j {
            a.tile_get_for_writing(i, j, Location::Host, LayoutConvert::ColMajor)?;
        }
    }

    let order: Vec<usize> = match direction {
        Direction::Forward => (0..pivot.len()).collect(),
        Direction::Backward => (0..pivot.len()).rev().collect(),
    };
    let (n, t) = (Op::NoTrans, Op::Trans);
    for i1 in order {
        let (t2, i2) = (pivot[i1].tile_index(), pivot[i1].element_offset());
        if t2 == 0 && i2 <= i1 {
            continue;
        }
        // row i1 left of the diagonal against row i2 left of column i1
        swap_row(a_gen, 0, i1, n, (0, 0), i1, n, (t2, 0), i2, tag)?;
        if t2 == 0 {
            swap_row(a_gen, i1 + 1, i2 - i1 - 1, t, (0, 0), i1, n, (0, 0), i2, tag)?;
            swap_row(a_gen, i2 + 1, a.tile_nb(0) - i2 - 1, t, (0, 0), i1, t, (0, 0), i2, tag)?;
        } else {
            swap_row(a_gen, i1 + 1, a.tile_nb(0) - i1 - 1, t, (0, 0), i1, n, (t2, 0), i2, tag)?;
            swap_row(a_gen, 0, i2, t, (t2, 0), i1, n, (t2, t2), i2, tag + 1)?;
            let rest = a.tile_nb(t2) - i2 - 1;
            swap_row(a_gen, i2 + 1, rest, t, (t2, 0), i1, t, (t2, t2), i2, tag + 1)?;
        }

        if a.tile_rank(t2, 0) == a.mpi_rank() {
            let cross = a.tile(t2, 0)?;
            cross.set(i2, i1, cross.at(i2, i1).conj());
        }

        swap_element(a_gen, (0, 0), i1, i1, (t2, t2), i2, i2, tag)?;

        for k in 1..t2 {
            swap_row(a_gen, 0, a.tile_nb(k), t, (k, 0), i1, n, (t2, k), i2, tag + 1 + k as i32)?;
        }
        for k in t2 + 1..a.nt() {
            swap_row(a_gen, 0, a.tile_nb(k), t, (k, 0), i1, t, (k, t2), i2, tag + 1 + k as i32)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::LocalCluster;
    use crate::dtype::Complex128;

    #[test]
    fn test_permute_rows_single_tile() {
        let comm = LocalCluster::new(1).comm(0);
        let a = Matrix::<f64>::new(4, 3, 4, 1, 1, comm).unwrap();
        a.insert_local_tiles(Target::HostTask).unwrap();
        let t = a.tile(0, 0).unwrap();
        for i in 0..4 {
            for j in 0..3 {
                t.set(i, j, (10 * i + j) as f64);
            }
        }
        let pivot = [Pivot::new(0, 3), Pivot::new(0, 2)];
        permute_rows(Target::HostTask, Direction::Forward, &a, &pivot, Layout::ColMajor, 0)
            .unwrap();
        let order: Vec<f64> = (0..4).map(|i| t.at(i, 0) / 10.0).collect();
        assert_eq!(order, vec![3.0, 2.0, 1.0, 0.0]);
        assert_eq!(t.at(0, 2), 32.0);
    }

    #[test]
    fn test_layout_precondition() {
        let comm = LocalCluster::new(1).comm(0);
        let a = Matrix::<f64>::new(4, 4, 2, 1, 1, comm).unwrap();
        a.insert_local_tiles(Target::HostTask).unwrap();
        let r = permute_rows(Target::Devices, Direction::Forward, &a, &[], Layout::ColMajor, 0);
        assert!(matches!(r, Err(Error::LayoutMismatch { .. })));
    }

    #[test]
    fn test_permute_rows_cols_matches_dense() {
        let n = 6;
        let full: Vec<Vec<Complex128>> = (0..n)
            .map(|i| {
                (0..n)
                    .map(|j| match i.cmp(&j) {
                        std::cmp::Ordering::Equal => Complex128::new(i as f64 + 1.0, 0.0),
                        std::cmp::Ordering::Greater => {
                            Complex128::new((i * n + j) as f64, (i + 2 * j) as f64)
                        }
                        std::cmp::Ordering::Less => {
                            Complex128::new((j * n + i) as f64, -((j + 2 * i) as f64))
                        }
                    })
                    .collect()
            })
            .collect();
        let comm = LocalCluster::new(1).comm(0);
        let a = HermitianMatrix::<Complex128>::new(Uplo::Lower, n, 3, 1, 1, comm).unwrap();
        a.insert_local_tiles(Target::HostTask).unwrap();
        for (i, j) in a.local_tiles() {
            let t = a.tile(i, j).unwrap();
            for jj in 0..3 {
                for ii in 0..3 {
                    t.set(ii, jj, full[3 * i + ii][3 * j + jj]);
                }
            }
        }
        let pivot = [Pivot::new(1, 1), Pivot::new(0, 2), Pivot::new(1, 0)];
        permute_rows_cols(Direction::Forward, &a, &pivot, 0).unwrap();

        let mut expected = full.clone();
        for (i1, p) in pivot.iter().enumerate() {
            let i2 = 3 * p.tile_index() + p.element_offset();
            expected.swap(i1, i2);
            for row in expected.iter_mut() {
                row.swap(i1, i2);
            }
        }
        for gi in 0..n {
            for gj in 0..=gi {
                let v = a.tile(gi / 3, gj / 3).unwrap().at(gi % 3, gj % 3);
                assert_eq!(v, expected[gi][gj], "element ({}, {})", gi, gj);
            }
        }
    }
}
