//! Historical crime records near a point, for drawing hotspots on the map.

use std::path::Path;

use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, RiskError};
use crate::spatial::Coordinate;

pub const DEFAULT_HOTSPOT_RADIUS_KM: f64 = 2.0;
/// Most records returned by one lookup.
pub const MAX_HOTSPOTS: usize = 500;

/// One geolocated crime from the historical dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrimeRecord {
    pub latitude: f64,
    pub longitude: f64,
    pub crime_type: String,
}

type IndexedCrime = GeomWithData<[f64; 2], CrimeRecord>;

/// Read-only R-tree over the crime records file.
pub struct HotspotStore {
    index: RTree<IndexedCrime>,
}

impl HotspotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RiskError::config(format!("cannot read crime records {}: {e}", path.display()))
        })?;
        let records: Vec<CrimeRecord> = serde_json::from_str(&raw).map_err(|e| {
            RiskError::config(format!("malformed crime records {}: {e}", path.display()))
        })?;
        let store = Self::from_records(records);
        info!(records = store.len(), path = %path.display(), "loaded crime records");
        Ok(store)
    }

    pub fn from_records(records: Vec<CrimeRecord>) -> Self {
        let points = records
            .into_iter()
            .filter(|r| {
                let ok = Coordinate::new(r.latitude, r.longitude).is_ok();
                if !ok {
                    warn!(lat = r.latitude, lon = r.longitude, "dropping crime record with invalid coordinates");
                }
                ok
            })
            .map(|r| IndexedCrime::new([r.longitude, r.latitude], r))
            .collect();
        Self {
            index: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.index.size() == 0
    }

    /// Records within `radius_m` of `center`, nearest first, at most `limit`.
    pub fn within(&self, center: &Coordinate, radius_m: f64, limit: usize) -> Vec<&CrimeRecord> {
        let mut hits: Vec<(f64, &CrimeRecord)> = center
            .bounding_boxes(radius_m)
            .into_iter()
            .flat_map(|(lower, upper)| self.index.locate_in_envelope(&AABB::from_corners(lower, upper)))
            .filter_map(|c| {
                let distance = Coordinate::new(c.data.latitude, c.data.longitude)
                    .ok()?
                    .distance_to(center);
                (distance <= radius_m).then_some((distance, &c.data))
            })
            .collect();

        hits.sort_by(|a, b| a.0.total_cmp(&b.0));
        hits.truncate(limit);
        hits.into_iter().map(|(_, record)| record).collect()
    }
}
