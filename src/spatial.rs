//! H3-based spatial index for radius queries and surge bucket keys.
//!
//! Rows are bucketed by their resolution-7 cell (~1.4 km edge). A radius query expands
//! to a grid disk around the query cell and returns every id in those cells; callers
//! apply the exact haversine filter. Locations h3o refuses to index are kept in a
//! fallback list that every query scans.

use std::collections::{BTreeSet, HashMap};

use h3o::{CellIndex, LatLng, Resolution};

use crate::types::Location;

/// Resolution of the row index.
pub const INDEX_RESOLUTION: Resolution = Resolution::Seven;

/// Resolution of the surge cache buckets (~3.7 km edge).
pub const BUCKET_RESOLUTION: Resolution = Resolution::Six;

/// Lower bound on the center spacing of neighbouring resolution-7 cells, in meters.
const MIN_RING_STEP_M: f64 = 1000.0;

/// Beyond this ring count a grid disk costs more than scanning every row.
const MAX_RING: u32 = 60;

pub fn cell_at(location: Location, resolution: Resolution) -> Option<CellIndex> {
    LatLng::new(location.lat, location.lon)
        .ok()
        .map(|ll| ll.to_cell(resolution))
}

/// Cache key for the demand/supply bucket containing `location`.
pub fn bucket_key(location: Location) -> String {
    match cell_at(location, BUCKET_RESOLUTION) {
        Some(cell) => format!("surge:{}", cell),
        None => format!("surge:{:.2}:{:.2}", location.lat, location.lon),
    }
}

/// Cell-to-ids map with a reverse entry per id for moves and removals.
#[derive(Debug)]
pub struct SpatialIndex<K> {
    by_cell: HashMap<CellIndex, BTreeSet<K>>,
    cell_of: HashMap<K, Option<CellIndex>>,
    unindexed: BTreeSet<K>,
}

impl<K> Default for SpatialIndex<K> {
    fn default() -> Self {
        Self {
            by_cell: HashMap::new(),
            cell_of: HashMap::new(),
            unindexed: BTreeSet::new(),
        }
    }
}

impl<K: Copy + Ord + std::hash::Hash> SpatialIndex<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cell_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cell_of.is_empty()
    }

    /// Inserts or moves `id` to `location`.
    pub fn insert(&mut self, id: K, location: Location) {
        self.remove(id);
        let cell = cell_at(location, INDEX_RESOLUTION);
        match cell {
            Some(cell) => {
                self.by_cell.entry(cell).or_default().insert(id);
            }
            None => {
                self.unindexed.insert(id);
            }
        }
        self.cell_of.insert(id, cell);
    }

    pub fn remove(&mut self, id: K) {
        match self.cell_of.remove(&id) {
            Some(Some(cell)) => {
                if let Some(ids) = self.by_cell.get_mut(&cell) {
                    ids.remove(&id);
                    if ids.is_empty() {
                        self.by_cell.remove(&cell);
                    }
                }
            }
            Some(None) => {
                self.unindexed.remove(&id);
            }
            None => {}
        }
    }

    /// Ids whose cell may lie within `radius_m` of `center`, in ascending id order.
    ///
    /// A superset: callers must still check the exact distance.
    pub fn candidates_within(&self, center: Location, radius_m: f64) -> Vec<K> {
        let ring = ring_for_radius(radius_m);
        let origin = match (ring, cell_at(center, INDEX_RESOLUTION)) {
            (Some(k), Some(origin)) => Some((k, origin)),
            _ => None,
        };
        let mut out: BTreeSet<K> = self.unindexed.iter().copied().collect();
        match origin {
            Some((k, origin)) => {
                for cell in origin.grid_disk::<Vec<_>>(k) {
                    if let Some(ids) = self.by_cell.get(&cell) {
                        out.extend(ids.iter().copied());
                    }
                }
            }
            None => out.extend(self.cell_of.keys().copied()),
        }
        out.into_iter().collect()
    }
}

/// Grid-disk size covering `radius_m`; `None` means scan everything.
fn ring_for_radius(radius_m: f64) -> Option<u32> {
    if !radius_m.is_finite() || radius_m < 0.0 {
        return None;
    }
    let k = (radius_m / MIN_RING_STEP_M).ceil() as u32 + 1;
    (k <= MAX_RING).then_some(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::haversine_m;

    #[test]
    fn finds_points_inside_radius() {
        let mut index = SpatialIndex::new();
        let center = Location::new(12.97, 77.59);
        index.insert(1u64, Location::new(12.975, 77.595));
        index.insert(2u64, Location::new(13.20, 77.70));
        let found = index.candidates_within(center, 2000.0);
        assert!(found.contains(&1));
        assert!(!found.contains(&2));
    }

    #[test]
    fn covers_every_point_in_radius() {
        let mut index = SpatialIndex::new();
        let center = Location::new(48.85, 2.35);
        let mut inside = Vec::new();
        for i in 0..40u64 {
            let loc = Location::new(48.85 + (i as f64 - 20.0) * 0.002, 2.35 + (i as f64 % 7.0) * 0.004);
            index.insert(i, loc);
            if haversine_m(center, loc) <= 3000.0 {
                inside.push(i);
            }
        }
        let found = index.candidates_within(center, 3000.0);
        for id in inside {
            assert!(found.contains(&id), "missing id {}", id);
        }
    }

    #[test]
    fn move_and_remove() {
        let mut index = SpatialIndex::new();
        index.insert(7u64, Location::new(0.0, 0.0));
        index.insert(7u64, Location::new(10.0, 10.0));
        assert_eq!(index.len(), 1);
        assert!(index.candidates_within(Location::new(0.0, 0.0), 500.0).is_empty());
        index.remove(7);
        assert!(index.is_empty());
    }

    #[test]
    fn huge_radius_scans_everything() {
        let mut index = SpatialIndex::new();
        index.insert(1u64, Location::new(0.0, 0.0));
        index.insert(2u64, Location::new(45.0, 90.0));
        assert_eq!(index.candidates_within(Location::new(0.0, 0.0), 1.0e7), vec![1, 2]);
    }

    #[test]
    fn bucket_key_is_stable_within_a_cell() {
        let a = bucket_key(Location::new(12.9716, 77.5946));
        let b = bucket_key(Location::new(12.9717, 77.5947));
        assert_eq!(a, b);
        assert!(a.starts_with("surge:"));
        assert_eq!(bucket_key(Location::new(f64::NAN, 1.0)), "surge:NaN:1.00");
    }

    #[test]
    fn bucket_cells_are_a_few_kilometres_across() {
        let edge_km = BUCKET_RESOLUTION.edge_length_km();
        assert!((3.6..3.8).contains(&edge_km), "edge_km={}", edge_km);
    }
}
