//! Distributed tiled QR factorization

use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::internal::{self, Target};
use crate::matrix::{BcastList, Matrix};
use crate::options::Options;
use crate::runtime::cpu::CpuRuntime;
use crate::runtime::Runtime;
use crate::task::{Dep, LookaheadPlan, StepTask, TaskGraph};
use crate::tile::{Layout, Op};
use std::collections::BTreeSet;
use tracing::{debug, info};

/// Reflector scalars produced by [`geqrf`]
///
/// Both matrices share the factored matrix's distribution. For panel k, each
/// rank's local reflectors keep their scalars in row 0 of `local` at the
/// rank's first tile row of column k. Each tree combine keeps its scalars in
/// row 0 of `reduce` at the lower partner's first tile row.
pub struct TriangularFactors<T: Scalar, R: Runtime = CpuRuntime> {
    /// Scalars of the per-rank panel factorizations
    pub local: Matrix<T, R>,
    /// Scalars of the triangle-triangle reduction tree
    pub reduce: Matrix<T, R>,
}

/// QR factorization A = Q R of a general m x n matrix
///
/// On return the upper trapezoid of `a` holds R and the rest holds the
/// Householder vectors; the vectors' scalars are returned. Each of the
/// min(mt, nt) steps factors block column k in a panel task (local QR on
/// every rank, [`internal::ttqrt_panel`] across ranks, broadcast of the
/// vectors), followed by `opts.lookahead` eager column updates, a bulk
/// trailing update and a release of the column's received tiles.
///
/// Only the host targets `HostTask` and `HostNest` are implemented. Every
/// rank of the matrix's communicator must call this with the same options.
///
/// # Example
///
/// ```
/// use tessel::prelude::*;
///
/// let comm = LocalCluster::new(1).comm(0);
/// let a = Matrix::<f64>::new(4, 2, 2, 1, 1, comm).unwrap();
/// a.insert_local_tiles(Target::HostTask).unwrap();
/// tessel::internal::set(Target::HostTask, 0.0, 2.0, &a).unwrap();
/// let t = geqrf(&a, &Options::default()).unwrap();
/// // already triangular: R = A and every reflector is the identity
/// assert_eq!(a.tile(0, 0).unwrap().at(1, 1), 2.0);
/// assert_eq!(t.local.tile(0, 0).unwrap().at(0, 0), 0.0);
/// ```
pub fn geqrf<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    opts: &Options,
) -> Result<TriangularFactors<T, R>> {
    opts.validate()?;
    let target = opts.target;
    match target {
        Target::HostTask | Target::HostNest => {}
        Target::HostBatch => {
            return Err(Error::NotImplemented {
                feature: "geqrf on Target::HostBatch",
            });
        }
        Target::Devices => {
            return Err(Error::NotImplemented {
                feature: "geqrf on Target::Devices",
            });
        }
    }
    if a.op() != Op::NoTrans {
        return Err(Error::invalid_argument("a", "geqrf needs an untransposed matrix"));
    }

    let factors = TriangularFactors {
        local: a.empty_like(),
        reduce: a.empty_like(),
    };
    factors.local.insert_local_tiles(Target::HostTask)?;
    factors.reduce.insert_local_tiles(Target::HostTask)?;

    let (mt, nt) = (a.mt(), a.nt());
    let steps = mt.min(nt);
    info!(
        m = a.m(),
        n = a.n(),
        mt,
        nt,
        rank = a.mpi_rank(),
        %target,
        lookahead = opts.lookahead,
        "geqrf start"
    );

    // token nt orders every task that talks to other ranks, so all ranks
    // enter their collectives in submission order
    let comm = Dep::InOut(nt);
    let plan = LookaheadPlan::new(nt, opts.lookahead).with_steps(steps);
    let t = &factors;
    TaskGraph::run(opts.num_threads, |scope| {
        for planned in plan.tasks() {
            let k = planned.k;
            let mut deps = planned.deps.clone();
            if planned.task != StepTask::Release {
                deps.push(comm);
            }
            match planned.task {
                StepTask::Panel => {
                    scope.spawn(&deps, planned.priority, move || panel(a, t, k, opts))
                }
                StepTask::Lookahead { j } => scope.spawn(&deps, planned.priority, move || {
                    update(a, t, k, j, j, steps, opts)
                }),
                StepTask::Trailing { first } => scope.spawn(&deps, planned.priority, move || {
                    update(a, t, k, first, nt - 1, steps, opts)
                }),
                StepTask::Release => scope.spawn(&deps, planned.priority, move || {
                    release_column(a, t, k);
                    Ok(())
                }),
            }
        }
        Ok(())
    })?;

    a.tile_update_all_origin()?;
    factors.local.tile_update_all_origin()?;
    factors.reduce.tile_update_all_origin()?;
    info!(rank = a.mpi_rank(), "geqrf done");
    Ok(factors)
}

/// First tile row at or below k of each rank owning part of column k
fn first_rows<T: Scalar, R: Runtime>(a: &Matrix<T, R>, k: usize) -> Vec<usize> {
    let mut seen = BTreeSet::new();
    (k..a.mt()).filter(|&i| seen.insert(a.tile_rank(i, k))).collect()
}

/// Factor block column k and send the reflectors to every rank that applies them
fn panel<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    t: &TriangularFactors<T, R>,
    k: usize,
    opts: &Options,
) -> Result<()> {
    let (mt, nt) = (a.mt(), a.nt());
    let tag = opts.tag_base + 4 * k as i32;
    let column = a.sub(k, mt - 1, k, k);
    internal::geqrf_panel(&column, &t.local.sub(k, mt - 1, k, k))?;
    internal::ttqrt_panel(&column, &t.reduce.sub(k, mt - 1, k, k), tag + 3)?;
    if k + 1 == nt {
        return Ok(());
    }

    // row i of the panel is applied to row i of the trailing matrix
    let row = |m: &Matrix<T, R>, i: usize| (i, k, vec![m.sub(i, i, k + 1, nt - 1)]);
    let firsts = first_rows(a, k);
    let vectors: BcastList<T, R> = (k..mt).map(|i| row(a, i)).collect();
    let local: BcastList<T, R> = firsts.iter().map(|&i| row(&t.local, i)).collect();
    let reduce: BcastList<T, R> = firsts
        .iter()
        .filter(|&&i| i != k)
        .map(|&i| row(&t.reduce, i))
        .collect();
    debug!(k, tiles = vectors.len(), ranks = firsts.len(), "panel broadcast");

    let radix = opts.bcast_radix;
    a.list_bcast_with_radix(Target::HostTask, &vectors, Layout::ColMajor, tag, 1, radix)?;
    t.local
        .list_bcast_with_radix(Target::HostTask, &local, Layout::ColMajor, tag + 1, 1, radix)?;
    t.reduce
        .list_bcast_with_radix(Target::HostTask, &reduce, Layout::ColMajor, tag + 2, 1, radix)
}

/// Apply Q^H of panel k to block columns j1..=j2
fn update<T: Scalar, R: Runtime>(
    a: &Matrix<T, R>,
    t: &TriangularFactors<T, R>,
    k: usize,
    j1: usize,
    j2: usize,
    steps: usize,
    opts: &Options,
) -> Result<()> {
    let mt = a.mt();
    let panel = a.sub(k, mt - 1, k, k);
    let c = a.sub(k, mt - 1, j1, j2);
    internal::unmqr_trailing(opts.target, &panel, &t.local.sub(k, mt - 1, k, k), &c)?;
    let tag = opts.tag_base + (4 * steps + j1) as i32;
    internal::ttmqr_trailing(&panel, &t.reduce.sub(k, mt - 1, k, k), &c, tag)
}

fn release_column<T: Scalar, R: Runtime>(a: &Matrix<T, R>, t: &TriangularFactors<T, R>, k: usize) {
    let mt = a.mt();
    for m in [a, &t.local, &t.reduce] {
        m.sub(k, mt - 1, k, k).release_remote_workspace();
    }
}
