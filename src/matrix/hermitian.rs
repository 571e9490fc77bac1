//! Hermitian matrices stored as one triangle

use super::Matrix;
use crate::comm::Communicator;
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use crate::runtime::Runtime;
use crate::runtime::cpu::CpuRuntime;
use crate::tile::Uplo;
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A square [`Matrix`] of which only the `uplo` triangle is referenced
///
/// Tiles outside the stored triangle may exist but their contents are
/// ignored. Transposing a view flips the stored triangle.
pub struct HermitianMatrix<T: Scalar, R: Runtime = CpuRuntime> {
    matrix: Matrix<T, R>,
    uplo: Uplo,
}

impl<T: Scalar, R: Runtime> HermitianMatrix<T, R> {
    /// n x n Hermitian matrix with square nb tiles on a p x q grid
    pub fn new(
        uplo: Uplo,
        n: usize,
        nb: usize,
        p: usize,
        q: usize,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        Self::from_matrix(uplo, Matrix::new(n, n, nb, p, q, comm)?)
    }

    /// Tag an existing square matrix as Hermitian
    pub fn from_matrix(uplo: Uplo, matrix: Matrix<T, R>) -> Result<Self> {
        if uplo == Uplo::General {
            return Err(Error::invalid_argument("uplo", "a Hermitian matrix stores Lower or Upper"));
        }
        if matrix.m() != matrix.n() || matrix.mt() != matrix.nt() {
            return Err(Error::shape_mismatch((matrix.n(), matrix.n()), (matrix.m(), matrix.n())));
        }
        Ok(Self { matrix, uplo })
    }

    /// Stored triangle, as seen through this view
    pub fn uplo(&self) -> Uplo {
        self.uplo
    }

    /// Whether tile (i, j) lies in the stored triangle
    pub fn tile_in_triangle(&self, i: usize, j: usize) -> bool {
        match self.uplo {
            Uplo::Lower => i >= j,
            _ => i <= j,
        }
    }

    /// Conjugate-transposed view: same data, opposite triangle
    pub fn conj_transpose(&self) -> Self {
        Self {
            matrix: self.matrix.conj_transpose(),
            uplo: self.uplo.flip(),
        }
    }

    /// Diagonal block of tiles k1..=k2
    pub fn sub(&self, k1: usize, k2: usize) -> Self {
        Self {
            matrix: self.matrix.sub(k1, k2, k1, k2),
            uplo: self.uplo,
        }
    }

    /// The underlying general matrix view
    pub fn as_matrix(&self) -> &Matrix<T, R> {
        &self.matrix
    }
}

impl<T: Scalar, R: Runtime> Clone for HermitianMatrix<T, R> {
    fn clone(&self) -> Self {
        Self {
            matrix: self.matrix.clone(),
            uplo: self.uplo,
        }
    }
}

impl<T: Scalar, R: Runtime> fmt::Debug for HermitianMatrix<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HermitianMatrix")
            .field("uplo", &self.uplo)
            .field("matrix", &self.matrix)
            .finish()
    }
}

impl<T: Scalar, R: Runtime> Deref for HermitianMatrix<T, R> {
    type Target = Matrix<T, R>;

    fn deref(&self) -> &Self::Target {
        &self.matrix
    }
}
