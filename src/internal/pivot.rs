//! Pivot vectors and their conversion to independent row moves

use std::collections::BTreeMap;
use std::fmt;

/// A row of the matrix, as tile row index plus row offset within that tile
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pivot {
    tile_index: usize,
    element_offset: usize,
}

impl Pivot {
    /// Row `element_offset` of tile row `tile_index`
    pub fn new(tile_index: usize, element_offset: usize) -> Self {
        Self {
            tile_index,
            element_offset,
        }
    }

    /// Tile row index
    pub fn tile_index(&self) -> usize {
        self.tile_index
    }

    /// Row within the tile
    pub fn element_offset(&self) -> usize {
        self.element_offset
    }
}

impl fmt::Display for Pivot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.tile_index, self.element_offset)
    }
}

/// Order in which a pivot vector's interchanges are applied
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Entries 0, 1, ..., k-1
    #[default]
    Forward,
    /// Entries k-1, ..., 1, 0
    Backward,
}

/// Destination row to the source row whose data it receives
pub type PivotMap = BTreeMap<Pivot, Pivot>;

/// Collapse a sequential pivot vector into one simultaneous row permutation
///
/// Entry `i` of `pivot` interchanges row `i` of tile row 0 with row
/// `pivot[i]`. Applying the entries one after another in `direction` order
/// leaves row `dst` holding what was originally in row `map[dst]`. Only rows
/// touched by some interchange appear in the map.
///
/// # Example
///
/// ```
/// use tessel::internal::{make_parallel_pivot, Direction, Pivot};
///
/// // swap rows 0 and 3, then rows 1 and 2
/// let pivot = [Pivot::new(0, 3), Pivot::new(0, 2)];
/// let map = make_parallel_pivot(Direction::Forward, &pivot);
/// assert_eq!(map[&Pivot::new(0, 0)], Pivot::new(0, 3));
/// assert_eq!(map[&Pivot::new(0, 2)], Pivot::new(0, 1));
/// ```
pub fn make_parallel_pivot(direction: Direction, pivot: &[Pivot]) -> PivotMap {
    let order: Box<dyn Iterator<Item = usize>> = match direction {
        Direction::Forward => Box::new(0..pivot.len()),
        Direction::Backward => Box::new((0..pivot.len()).rev()),
    };
    let mut map = PivotMap::new();
    for i in order {
        let row = Pivot::new(0, i);
        let other = pivot[i];
        if other == row {
            continue;
        }
        let a = *map.entry(row).or_insert(row);
        let b = *map.entry(other).or_insert(other);
        map.insert(row, b);
        map.insert(other, a);
    }
    // a row swapped away and back again stays put
    map.retain(|dst, src| dst != src);
    map
}
