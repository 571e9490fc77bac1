//! Tile handle: a dense mb x nb block addressed by raw pointer
//!
//! A `Tile` does not own its memory. Origin and workspace buffers are owned by
//! the matrix arena (or by the caller, for wrapped buffers) and handed out as
//! `Tile` handles by the coherence engine. Element access through [`Tile::at`]
//! and [`Tile::set`] honors both the storage layout and the view [`Op`].

use super::{Layout, Location, Op, Uplo};
use crate::dtype::Scalar;
use crate::error::{Error, Result};
use std::marker::PhantomData;

/// Who owns a tile's buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TileKind {
    /// Caller-supplied memory wrapped by the matrix
    UserOwned,
    /// Origin buffer allocated by the matrix
    Owned,
    /// Transient copy, released when its life reaches zero
    Workspace,
}

impl TileKind {
    /// Origin instances are never evicted or released
    #[inline]
    pub fn is_origin(self) -> bool {
        self != TileKind::Workspace
    }
}

/// Handle to one instance of a tile at one location
#[derive(Debug)]
pub struct Tile<T> {
    data: u64,
    // physical extents, before op
    mb: usize,
    nb: usize,
    stride: usize,
    layout: Layout,
    location: Location,
    kind: TileKind,
    op: Op,
    uplo: Uplo,
    _marker: PhantomData<T>,
}

impl<T> Clone for Tile<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Tile<T> {}

// SAFETY: a Tile is a pointer plus shape; concurrent access to the memory it
// names is serialized by the task graph and the coherence engine.
unsafe impl<T: Send> Send for Tile<T> {}
unsafe impl<T: Sync> Sync for Tile<T> {}

impl<T: Scalar> Tile<T> {
    /// Create a tile handle over existing memory
    ///
    /// # Safety
    ///
    /// `data` must point to at least [`Tile::storage_len`] elements of `T` that
    /// stay valid for as long as the handle is used. For column-major tiles
    /// `stride >= mb`, for row-major tiles `stride >= nb`.
    pub unsafe fn from_raw_parts(
        data: u64,
        mb: usize,
        nb: usize,
        stride: usize,
        layout: Layout,
        location: Location,
        kind: TileKind,
    ) -> Self {
        debug_assert!(match layout {
            Layout::ColMajor => stride >= mb.max(1),
            Layout::RowMajor => stride >= nb.max(1),
        });
        Self {
            data,
            mb,
            nb,
            stride,
            layout,
            location,
            kind,
            op: Op::NoTrans,
            uplo: Uplo::General,
            _marker: PhantomData,
        }
    }

    /// Rows as seen through the op
    #[inline]
    pub fn mb(&self) -> usize {
        if self.op.is_transposed() { self.nb } else { self.mb }
    }

    /// Columns as seen through the op
    #[inline]
    pub fn nb(&self) -> usize {
        if self.op.is_transposed() { self.mb } else { self.nb }
    }

    /// Leading dimension of the buffer, in elements
    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Storage layout
    #[inline]
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Where this instance lives
    #[inline]
    pub fn location(&self) -> Location {
        self.location
    }

    /// Buffer ownership
    #[inline]
    pub fn kind(&self) -> TileKind {
        self.kind
    }

    /// View op
    #[inline]
    pub fn op(&self) -> Op {
        self.op
    }

    /// Raw buffer address
    #[inline]
    pub fn data(&self) -> u64 {
        self.data
    }

    /// Stored triangle
    #[inline]
    pub fn uplo(&self) -> Uplo {
        self.uplo
    }

    /// Triangle as seen through the op
    #[inline]
    pub fn uplo_logical(&self) -> Uplo {
        if self.op.is_transposed() { self.uplo.flip() } else { self.uplo }
    }

    /// Same tile with a stored triangle attached
    #[inline]
    pub fn with_uplo(mut self, uplo: Uplo) -> Self {
        self.uplo = uplo;
        self
    }

    /// Transposed view of the same memory
    #[inline]
    pub fn transpose(mut self) -> Self {
        self.op = self.op.transpose();
        self
    }

    /// Conjugate-transposed view of the same memory
    #[inline]
    pub fn conj_transpose(mut self) -> Self {
        self.op = self.op.conj_transpose();
        self
    }

    /// Number of elements spanned by the buffer
    #[inline]
    pub fn storage_len(&self) -> usize {
        match self.layout {
            Layout::ColMajor => self.stride * self.nb,
            Layout::RowMajor => self.stride * self.mb,
        }
    }

    /// Bytes spanned by the buffer
    #[inline]
    pub fn bytes(&self) -> usize {
        self.storage_len() * std::mem::size_of::<T>()
    }

    /// Whether the buffer has no padding between columns (or rows)
    #[inline]
    pub fn is_contiguous(&self) -> bool {
        match self.layout {
            Layout::ColMajor => self.stride == self.mb.max(1),
            Layout::RowMajor => self.stride == self.nb.max(1),
        }
    }

    /// Element step between (i, j) and (i + 1, j) in the op view
    #[inline]
    pub fn col_increment(&self) -> usize {
        let (down, across) = self.physical_steps();
        if self.op.is_transposed() { across } else { down }
    }

    /// Element step between (i, j) and (i, j + 1) in the op view
    #[inline]
    pub fn row_increment(&self) -> usize {
        let (down, across) = self.physical_steps();
        if self.op.is_transposed() { down } else { across }
    }

    #[inline]
    fn physical_steps(&self) -> (usize, usize) {
        match self.layout {
            Layout::ColMajor => (1, self.stride),
            Layout::RowMajor => (self.stride, 1),
        }
    }

    #[inline]
    fn physical_offset(&self, i: usize, j: usize) -> usize {
        debug_assert!(i < self.mb && j < self.nb);
        let (down, across) = self.physical_steps();
        i * down + j * across
    }

    /// Read stored element (i, j), ignoring the op
    #[inline]
    pub fn raw_at(&self, i: usize, j: usize) -> T {
        debug_assert!(self.location.is_host());
        // SAFETY: offset is within storage_len per from_raw_parts contract
        unsafe { *(self.data as *const T).add(self.physical_offset(i, j)) }
    }

    /// Write stored element (i, j), ignoring the op
    #[inline]
    pub fn raw_set(&self, i: usize, j: usize, value: T) {
        debug_assert!(self.location.is_host());
        // SAFETY: offset is within storage_len per from_raw_parts contract
        unsafe { *(self.data as *mut T).add(self.physical_offset(i, j)) = value }
    }

    /// Read element (i, j) of the op view
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> T {
        match self.op {
            Op::NoTrans => self.raw_at(i, j),
            Op::Trans => self.raw_at(j, i),
            Op::ConjTrans => self.raw_at(j, i).conj(),
        }
    }

    /// Write element (i, j) of the op view
    #[inline]
    pub fn set(&self, i: usize, j: usize, value: T) {
        match self.op {
            Op::NoTrans => self.raw_set(i, j, value),
            Op::Trans => self.raw_set(j, i, value),
            Op::ConjTrans => self.raw_set(j, i, value.conj()),
        }
    }

    /// Copy the stored elements into a contiguous buffer in `layout`
    pub fn pack(&self, layout: Layout) -> Vec<T> {
        let mut out = Vec::with_capacity(self.mb * self.nb);
        match layout {
            Layout::ColMajor => {
                for j in 0..self.nb {
                    for i in 0..self.mb {
                        out.push(self.raw_at(i, j));
                    }
                }
            }
            Layout::RowMajor => {
                for i in 0..self.mb {
                    for j in 0..self.nb {
                        out.push(self.raw_at(i, j));
                    }
                }
            }
        }
        out
    }

    /// Overwrite the stored elements from a contiguous buffer in `layout`
    pub fn unpack(&self, src: &[T], layout: Layout) -> Result<()> {
        if src.len() != self.mb * self.nb {
            return Err(Error::invalid_argument(
                "src",
                format!("expected {} elements, got {}", self.mb * self.nb, src.len()),
            ));
        }
        match layout {
            Layout::ColMajor => {
                for j in 0..self.nb {
                    for i in 0..self.mb {
                        self.raw_set(i, j, src[i + j * self.mb]);
                    }
                }
            }
            Layout::RowMajor => {
                for i in 0..self.mb {
                    for j in 0..self.nb {
                        self.raw_set(i, j, src[i * self.nb + j]);
                    }
                }
            }
        }
        Ok(())
    }

    /// Copy stored elements into `dst`, converting layout as needed
    pub fn copy_data_to(&self, dst: &Tile<T>) -> Result<()> {
        if (self.mb, self.nb) != (dst.mb, dst.nb) {
            return Err(Error::shape_mismatch((dst.mb, dst.nb), (self.mb, self.nb)));
        }
        for j in 0..self.nb {
            for i in 0..self.mb {
                dst.raw_set(i, j, self.raw_at(i, j));
            }
        }
        Ok(())
    }

    /// Convert a host tile between row- and column-major in place
    ///
    /// Contiguous tiles are transposed through a scratch buffer and become
    /// contiguous in the new layout. Square tiles with padding are transposed
    /// element by element and keep their stride. Anything else cannot be
    /// converted without a separate buffer.
    pub fn layout_convert(&mut self) -> Result<()> {
        debug_assert!(self.location.is_host());
        let target = self.layout.flip();
        if self.is_contiguous() {
            let packed = self.pack(target);
            self.layout = target;
            self.stride = match target {
                Layout::ColMajor => self.mb.max(1),
                Layout::RowMajor => self.nb.max(1),
            };
            self.unpack(&packed, target)
        } else if self.mb == self.nb {
            for j in 0..self.nb {
                for i in (j + 1)..self.mb {
                    let a = self.raw_at(i, j);
                    let b = self.raw_at(j, i);
                    self.raw_set(i, j, b);
                    self.raw_set(j, i, a);
                }
            }
            self.layout = target;
            Ok(())
        } else {
            Err(Error::UnsupportedLayout {
                mb: self.mb,
                nb: self.nb,
                stride: self.stride,
            })
        }
    }

    /// Same handle with a different layout and stride; used after a device-side conversion
    pub(crate) fn relabel(mut self, layout: Layout, stride: usize) -> Self {
        self.layout = layout;
        self.stride = stride;
        self
    }

    /// Elements of the op view in column-major order
    pub fn to_vec(&self) -> Vec<T> {
        let (m, n) = (self.mb(), self.nb());
        let mut out = Vec::with_capacity(m * n);
        for j in 0..n {
            for i in 0..m {
                out.push(self.at(i, j));
            }
        }
        out
    }
}
