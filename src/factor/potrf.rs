//! Distributed tiled Cholesky factorization

use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::internal::{self, Target};
use crate::matrix::{BcastList, HermitianMatrix, Matrix};
use crate::options::Options;
use crate::runtime::Runtime;
use crate::task::{LookaheadPlan, StepTask, TaskGraph};
use crate::tile::{Layout, Op, Uplo};
use tracing::{debug, info};

/// Cholesky factorization A = L L^H (or U^H U) of a Hermitian positive definite matrix
///
/// The stored triangle of `a` is overwritten with the factor. Every rank of
/// the matrix's communicator must call this with the same options. Each
/// block column k is one panel task (factor, triangular solve, broadcast)
/// followed by `opts.lookahead` high-priority column updates, one bulk
/// trailing update and a release of the column's received tiles. On return
/// the origin copies hold the result.
///
/// An upper matrix is factored through its conjugate transpose; this is only
/// available on the host targets. `Target::HostBatch` is not implemented.
///
/// # Example
///
/// ```
/// use tessel::prelude::*;
///
/// let comm = LocalCluster::new(1).comm(0);
/// let a = HermitianMatrix::<f64>::new(Uplo::Lower, 4, 2, 1, 1, comm).unwrap();
/// a.insert_local_tiles(Target::HostTask).unwrap();
/// tessel::internal::set(Target::HostTask, 0.0, 4.0, &a).unwrap();
/// potrf(&a, &Options::default().with_num_threads(2)).unwrap();
/// assert_eq!(a.tile(1, 1).unwrap().at(0, 0), 2.0);
/// ```
pub fn potrf<T: Scalar, R: Runtime>(a: &HermitianMatrix<T, R>, opts: &Options) -> Result<()> {
    opts.validate()?;
    let target = opts.target;
    if target == Target::HostBatch {
        return Err(Error::NotImplemented {
            feature: "potrf on Target::HostBatch",
        });
    }
    if target == Target::Devices && a.num_devices() == 0 {
        return Err(Error::invalid_argument(
            "target",
            "Target::Devices on a matrix without devices",
        ));
    }

    let a = match a.uplo() {
        Uplo::Upper => a.conj_transpose(),
        _ => a.clone(),
    };
    if target == Target::Devices && a.op() != Op::NoTrans {
        return Err(Error::NotImplemented {
            feature: "upper potrf on Target::Devices",
        });
    }

    let nt = a.nt();
    info!(
        n = a.n(),
        nt,
        rank = a.mpi_rank(),
        %target,
        lookahead = opts.lookahead,
        "potrf start"
    );
    if target == Target::Devices {
        a.allocate_batch_arrays(a.max_device_batch(), 1);
    }

    let plan = LookaheadPlan::new(nt, opts.lookahead);
    let a = &a;
    TaskGraph::run(opts.num_threads, |scope| {
        for planned in plan.tasks() {
            let k = planned.k;
            match planned.task {
                StepTask::Panel => {
                    scope.spawn(&planned.deps, planned.priority, move || panel(a, k, opts))
                }
                StepTask::Lookahead { j } => scope.spawn(&planned.deps, planned.priority, move || {
                    update_column(a, k, j, target)
                }),
                StepTask::Trailing { first } => {
                    scope.spawn(&planned.deps, planned.priority, move || {
                        let column = a.as_matrix().sub(first, nt - 1, k, k);
                        internal::herk_trailing(target, &column, &a.sub(first, nt - 1))
                    })
                }
                StepTask::Release => scope.spawn(&planned.deps, planned.priority, move || {
                    release_column(a.as_matrix(), k, target);
                    Ok(())
                }),
            }
        }
        Ok(())
    })?;

    a.tile_update_all_origin()?;
    info!(rank = a.mpi_rank(), "potrf done");
    Ok(())
}

/// Factor the diagonal tile, solve the column below it, and send the column
/// to every rank that updates with it
fn panel<T: Scalar, R: Runtime>(a: &HermitianMatrix<T, R>, k: usize, opts: &Options) -> Result<()> {
    let nt = a.nt();
    let m = a.as_matrix();
    internal::potrf_panel(&a.sub(k, k))?;
    if k + 1 == nt {
        return Ok(());
    }

    let tag = opts.tag_base + 2 * k as i32;
    let below = m.sub(k + 1, nt - 1, k, k);
    let diag: BcastList<T, R> = vec![(k, k, vec![below.clone()])];
    m.list_bcast_with_radix(Target::HostTask, &diag, Layout::ColMajor, tag, 1, opts.bcast_radix)?;

    let host = if opts.target.is_host() { opts.target } else { Target::HostTask };
    internal::trsm_panel(host, &m.sub(k, k, k, k), &below)?;

    // A(i, k) feeds row i of the trailing matrix and, as the right factor,
    // column i
    let column: BcastList<T, R> = (k + 1..nt)
        .map(|i| (i, k, vec![m.sub(i, i, k + 1, i), m.sub(i, nt - 1, i, i)]))
        .collect();
    debug!(k, tiles = column.len(), "panel broadcast");
    m.list_bcast_with_radix(opts.target, &column, Layout::ColMajor, tag + 1, 1, opts.bcast_radix)
}

/// Apply panel k to block column j
fn update_column<T: Scalar, R: Runtime>(
    a: &HermitianMatrix<T, R>,
    k: usize,
    j: usize,
    target: Target,
) -> Result<()> {
    let nt = a.nt();
    let m = a.as_matrix();
    internal::herk_trailing(target, &m.sub(j, j, k, k), &a.sub(j, j))?;
    if j + 1 < nt {
        let (below, row) = (m.sub(j + 1, nt - 1, k, k), m.sub(j, j, k, k));
        internal::gemm_trailing(target, &below, &row, &m.sub(j + 1, nt - 1, j, j))?;
    }
    Ok(())
}

fn release_column<T: Scalar, R: Runtime>(m: &Matrix<T, R>, k: usize, target: Target) {
    let column = m.sub(k, m.nt() - 1, k, k);
    column.release_remote_workspace();
    if target == Target::Devices {
        column.release_local_workspace();
    }
}
