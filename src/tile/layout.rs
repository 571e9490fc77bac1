//! Small enums describing how a tile is stored and viewed

use std::fmt;

/// Element order within a tile buffer
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum Layout {
    /// Element (i, j) at `data[i + j * stride]`
    #[default]
    ColMajor = 0,
    /// Element (i, j) at `data[i * stride + j]`
    RowMajor = 1,
}

impl Layout {
    /// The other layout
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Layout::ColMajor => Layout::RowMajor,
            Layout::RowMajor => Layout::ColMajor,
        }
    }

    /// Decode a tag written by `self as u8`
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            0 => Some(Layout::ColMajor),
            1 => Some(Layout::RowMajor),
            _ => None,
        }
    }
}

/// Requested layout on a coherence fetch
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LayoutConvert {
    /// Convert to column-major if needed
    ColMajor,
    /// Convert to row-major if needed
    RowMajor,
    /// Keep whatever layout the valid copy has
    None,
}

impl LayoutConvert {
    /// The layout this request forces, if any
    #[inline]
    pub fn layout(self) -> Option<Layout> {
        match self {
            LayoutConvert::ColMajor => Some(Layout::ColMajor),
            LayoutConvert::RowMajor => Some(Layout::RowMajor),
            LayoutConvert::None => None,
        }
    }
}

impl From<Layout> for LayoutConvert {
    fn from(layout: Layout) -> Self {
        match layout {
            Layout::ColMajor => LayoutConvert::ColMajor,
            Layout::RowMajor => LayoutConvert::RowMajor,
        }
    }
}

/// Transposition applied to a tile or matrix view
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Op {
    /// As stored
    #[default]
    NoTrans,
    /// Transposed
    Trans,
    /// Conjugate transposed
    ConjTrans,
}

impl Op {
    /// Compose a transpose on top of this op
    #[inline]
    pub fn transpose(self) -> Self {
        match self {
            Op::NoTrans => Op::Trans,
            Op::Trans => Op::NoTrans,
            // transpose(conj_transpose(A)) = conj(A), which has no Op; callers reject it
            Op::ConjTrans => Op::ConjTrans,
        }
    }

    /// Compose a conjugate transpose on top of this op
    #[inline]
    pub fn conj_transpose(self) -> Self {
        match self {
            Op::NoTrans => Op::ConjTrans,
            Op::ConjTrans => Op::NoTrans,
            Op::Trans => Op::Trans,
        }
    }

    /// Whether rows and columns are swapped
    #[inline]
    pub fn is_transposed(self) -> bool {
        self != Op::NoTrans
    }
}

/// Triangle of a Hermitian or trapezoidal matrix
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Uplo {
    /// Lower triangle
    #[default]
    Lower,
    /// Upper triangle
    Upper,
    /// Whole matrix
    General,
}

impl Uplo {
    /// Triangle seen through a transposed view
    #[inline]
    pub fn flip(self) -> Self {
        match self {
            Uplo::Lower => Uplo::Upper,
            Uplo::Upper => Uplo::Lower,
            Uplo::General => Uplo::General,
        }
    }
}

/// Side an operator is applied from
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    /// Applied from the left: op(Q) * C
    Left,
    /// Applied from the right: C * op(Q)
    Right,
}

/// Where a tile instance lives
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Location {
    /// Host memory
    Host,
    /// Accelerator with the given index
    Device(usize),
}

impl Location {
    /// Dense slot index: host is 0, device d is d + 1
    #[inline]
    pub fn slot(self) -> usize {
        match self {
            Location::Host => 0,
            Location::Device(d) => d + 1,
        }
    }

    /// Inverse of [`Location::slot`]
    #[inline]
    pub fn from_slot(slot: usize) -> Self {
        match slot {
            0 => Location::Host,
            s => Location::Device(s - 1),
        }
    }

    /// Whether this is host memory
    #[inline]
    pub fn is_host(self) -> bool {
        self == Location::Host
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Host => f.write_str("host"),
            Location::Device(d) => write!(f, "device {}", d),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_op_composition() {
        assert_eq!(Op::NoTrans.transpose(), Op::Trans);
        assert_eq!(Op::Trans.transpose(), Op::NoTrans);
        assert_eq!(Op::NoTrans.conj_transpose(), Op::ConjTrans);
        assert_eq!(Op::ConjTrans.conj_transpose(), Op::NoTrans);
    }

    #[test]
    fn test_location_slots() {
        for loc in [Location::Host, Location::Device(0), Location::Device(3)] {
            assert_eq!(Location::from_slot(loc.slot()), loc);
        }
        assert_eq!(Location::Device(2).to_string(), "device 2");
    }
}
