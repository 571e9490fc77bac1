//! Per-tile residency record: one instance slot per location

use crate::tile::{Layout, Location, Tile};
use std::fmt;

/// Coherence state of one tile instance
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Mosi {
    /// The only valid copy; all other instances are Invalid
    Modified,
    /// Valid, possibly alongside other Shared copies
    Shared,
    /// Stale; must be refreshed before use
    Invalid,
}

impl Mosi {
    /// Whether the data can be read
    #[inline]
    pub fn is_valid(self) -> bool {
        self != Mosi::Invalid
    }
}

/// State of an instance plus its hold flag
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct MosiState {
    /// Coherence state
    pub state: Mosi,
    /// Held instances are never released or evicted
    pub on_hold: bool,
}

impl fmt::Display for MosiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = match self.state {
            Mosi::Modified => 'M',
            Mosi::Shared => 'S',
            Mosi::Invalid => 'I',
        };
        if self.on_hold { write!(f, "{}+O", c) } else { write!(f, "{}", c) }
    }
}

/// One instance of a tile at one location
#[derive(Debug)]
pub(crate) struct Instance<T> {
    pub tile: Tile<T>,
    pub state: Mosi,
    pub on_hold: bool,
    /// Last access, for eviction order
    pub stamp: u64,
}

/// All instances of one logical tile
#[derive(Debug)]
pub struct TileNode<T> {
    mb: usize,
    nb: usize,
    instances: Vec<Option<Instance<T>>>,
    /// Layout the origin instance must be restored to before the caller sees it
    pub(crate) origin_layout: Layout,
    pub(crate) life: i64,
    pub(crate) receive_count: i64,
}

impl<T: crate::dtype::Scalar> TileNode<T> {
    pub(crate) fn new(mb: usize, nb: usize, num_locations: usize) -> Self {
        Self {
            mb,
            nb,
            instances: (0..num_locations).map(|_| None).collect(),
            origin_layout: Layout::ColMajor,
            life: 0,
            receive_count: 0,
        }
    }

    /// Tile rows
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Tile columns
    pub fn nb(&self) -> usize {
        self.nb
    }

    pub(crate) fn instance(&self, location: Location) -> Option<&Instance<T>> {
        self.instances.get(location.slot()).and_then(Option::as_ref)
    }

    pub(crate) fn instance_mut(&mut self, location: Location) -> Option<&mut Instance<T>> {
        self.instances.get_mut(location.slot()).and_then(Option::as_mut)
    }

    pub(crate) fn insert(&mut self, tile: Tile<T>, state: Mosi, stamp: u64) {
        let slot = tile.location().slot();
        assert!(
            self.instances[slot].is_none(),
            "tile instance already exists on {}",
            tile.location()
        );
        if state == Mosi::Modified {
            self.invalidate_all();
        }
        self.instances[slot] = Some(Instance {
            tile,
            state,
            on_hold: false,
            stamp,
        });
        self.check();
    }

    pub(crate) fn remove(&mut self, location: Location) -> Option<Instance<T>> {
        self.instances.get_mut(location.slot()).and_then(Option::take)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Instance<T>> {
        self.instances.iter().flatten()
    }

    pub(crate) fn locations(&self) -> Vec<Location> {
        self.iter().map(|inst| inst.tile.location()).collect()
    }

    /// Whether an instance exists at `location`
    pub fn exists(&self, location: Location) -> bool {
        self.instance(location).is_some()
    }

    /// State at `location`, if an instance exists there
    pub fn state(&self, location: Location) -> Option<MosiState> {
        self.instance(location).map(|inst| MosiState {
            state: inst.state,
            on_hold: inst.on_hold,
        })
    }

    /// Location of the origin instance
    pub fn origin(&self) -> Option<Location> {
        self.iter()
            .find(|inst| inst.tile.kind().is_origin())
            .map(|inst| inst.tile.location())
    }

    /// Number of Modified instances
    pub fn modified_count(&self) -> usize {
        self.iter().filter(|inst| inst.state == Mosi::Modified).count()
    }

    /// Best location to copy valid data from: the Modified copy, else host, else any
    pub(crate) fn valid_source(&self, exclude: Location) -> Option<Location> {
        let valid = || {
            self.iter()
                .filter(|inst| inst.state.is_valid() && inst.tile.location() != exclude)
        };
        valid()
            .find(|inst| inst.state == Mosi::Modified)
            .or_else(|| valid().find(|inst| inst.tile.location().is_host()))
            .or_else(|| valid().next())
            .map(|inst| inst.tile.location())
    }

    /// Whether some instance other than `location` holds valid data
    pub(crate) fn valid_elsewhere(&self, location: Location) -> bool {
        self.valid_source(location).is_some()
    }

    fn invalidate_all(&mut self) {
        for inst in self.instances.iter_mut().flatten() {
            inst.state = Mosi::Invalid;
        }
    }

    /// Make `location` the single Modified instance
    pub(crate) fn set_modified(&mut self, location: Location) {
        for inst in self.instances.iter_mut().flatten() {
            inst.state = if inst.tile.location() == location {
                Mosi::Modified
            } else {
                Mosi::Invalid
            };
        }
        self.check();
    }

    /// Whether any instance is on hold
    pub fn is_held(&self) -> bool {
        self.iter().any(|inst| inst.on_hold)
    }

    /// Panics if the single-writer invariant is broken
    pub(crate) fn check(&self) {
        let modified = self.modified_count();
        assert!(modified <= 1, "tile has {} Modified instances", modified);
        if modified == 1 {
            assert!(
                self.iter().all(|inst| inst.state != Mosi::Shared),
                "tile has a Shared instance next to a Modified one"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileKind;

    fn tile_at(buf: &mut [f64], location: Location, kind: TileKind) -> Tile<f64> {
        let data = buf.as_mut_ptr() as u64;
        unsafe { Tile::from_raw_parts(data, 2, 2, 2, Layout::ColMajor, location, kind) }
    }

    #[test]
    fn test_modified_insert_invalidates_others() {
        let (mut a, mut b) = (vec![0.0; 4], vec![0.0; 4]);
        let mut node = TileNode::new(2, 2, 3);
        node.insert(tile_at(&mut a, Location::Host, TileKind::Owned), Mosi::Modified, 0);
        node.insert(tile_at(&mut b, Location::Device(1), TileKind::Workspace), Mosi::Modified, 1);
        assert_eq!(node.state(Location::Host).unwrap().state, Mosi::Invalid);
        assert_eq!(node.valid_source(Location::Host), Some(Location::Device(1)));
        assert_eq!(node.origin(), Some(Location::Host));
        node.set_modified(Location::Host);
        assert_eq!(node.modified_count(), 1);
        assert_eq!(node.state(Location::Device(1)).unwrap().to_string(), "I");
    }

    #[test]
    #[should_panic(expected = "already exists")]
    fn test_double_insert_panics() {
        let mut a = vec![0.0; 4];
        let mut node = TileNode::new(2, 2, 1);
        node.insert(tile_at(&mut a, Location::Host, TileKind::Owned), Mosi::Shared, 0);
        node.insert(tile_at(&mut a, Location::Host, TileKind::Owned), Mosi::Shared, 0);
    }
}
