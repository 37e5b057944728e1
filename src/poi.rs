//! Point-of-interest sources for the environmental signal.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use osmpbf::{Element, ElementReader};
use reqwest::Client;
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{Result, RiskError, SourceError};
use crate::spatial::Coordinate;

/// Venue types whose density correlates with street crime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VenueCategory {
    Bar,
    Nightclub,
    Atm,
    Bank,
}

impl VenueCategory {
    pub const ALL: [VenueCategory; 4] = [
        VenueCategory::Bar,
        VenueCategory::Nightclub,
        VenueCategory::Atm,
        VenueCategory::Bank,
    ];

    /// OSM `amenity=*` value.
    pub fn osm_tag(&self) -> &'static str {
        match self {
            VenueCategory::Bar => "bar",
            VenueCategory::Nightclub => "nightclub",
            VenueCategory::Atm => "atm",
            VenueCategory::Bank => "bank",
        }
    }

    pub fn from_osm_tag(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.osm_tag() == value)
    }

    pub fn weight(&self) -> f64 {
        match self {
            VenueCategory::Bar => 1.0,
            VenueCategory::Nightclub => 1.5,
            VenueCategory::Atm | VenueCategory::Bank => 0.5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VenueCounts(HashMap<VenueCategory, u32>);

impl VenueCounts {
    pub fn add(&mut self, category: VenueCategory) {
        *self.0.entry(category).or_insert(0) += 1;
    }

    pub fn get(&self, category: VenueCategory) -> u32 {
        self.0.get(&category).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.0.values().sum()
    }

    pub fn weighted_total(&self) -> f64 {
        self.0.iter().map(|(c, n)| c.weight() * *n as f64).sum()
    }
}

impl FromIterator<VenueCategory> for VenueCounts {
    fn from_iter<I: IntoIterator<Item = VenueCategory>>(iter: I) -> Self {
        let mut counts = VenueCounts::default();
        for category in iter {
            counts.add(category);
        }
        counts
    }
}

#[async_trait]
pub trait PoiSource: Send + Sync {
    async fn count_venues(
        &self,
        center: &Coordinate,
        radius_m: f64,
        categories: &[VenueCategory],
    ) -> std::result::Result<VenueCounts, SourceError>;
}

// --- Overpass API ---

#[derive(Debug, Deserialize)]
struct OverpassResponse {
    elements: Vec<OverpassElement>,
}

#[derive(Debug, Deserialize)]
struct OverpassElement {
    tags: Option<HashMap<String, String>>,
}

/// Live lookups against an Overpass API endpoint.
pub struct OverpassPoiSource {
    client: Client,
    url: String,
    retries: u32,
    backoff: Duration,
}

impl OverpassPoiSource {
    pub fn new(url: impl Into<String>, retries: u32, backoff: Duration) -> Self {
        Self {
            client: Client::new(),
            url: url.into(),
            retries,
            backoff,
        }
    }

    fn query(center: &Coordinate, radius_m: f64, categories: &[VenueCategory]) -> String {
        let pattern = categories.iter().map(|c| c.osm_tag()).collect::<Vec<_>>().join("|");
        let around = format!("(around:{:.0},{},{})", radius_m, center.lat(), center.lon());
        format!(
            "[out:json][timeout:10];\n(\n  node[\"amenity\"~\"^({pattern})$\"]{around};\n  way[\"amenity\"~\"^({pattern})$\"]{around};\n);\nout tags;"
        )
    }

    async fn fetch(&self, query: &str) -> std::result::Result<OverpassResponse, SourceError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "text/plain")
            .body(query.to_owned())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SourceError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }
}

fn classify(elements: &[OverpassElement], categories: &[VenueCategory]) -> VenueCounts {
    elements
        .iter()
        .filter_map(|e| e.tags.as_ref()?.get("amenity"))
        .filter_map(|v| VenueCategory::from_osm_tag(v))
        .filter(|c| categories.contains(c))
        .collect()
}

#[async_trait]
impl PoiSource for OverpassPoiSource {
    async fn count_venues(
        &self,
        center: &Coordinate,
        radius_m: f64,
        categories: &[VenueCategory],
    ) -> std::result::Result<VenueCounts, SourceError> {
        let query = Self::query(center, radius_m, categories);
        let mut attempt = 0;
        loop {
            match self.fetch(&query).await {
                Ok(payload) => return Ok(classify(&payload.elements, categories)),
                Err(err) if attempt < self.retries => {
                    attempt += 1;
                    debug!(%err, attempt, "overpass lookup failed, retrying");
                    tokio::time::sleep(self.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

// --- Local OSM extract ---

type VenuePoint = GeomWithData<[f64; 2], VenueCategory>;

/// Venues read once from an `.osm.pbf` extract and queried in memory.
pub struct PbfPoiSource {
    venues: RTree<VenuePoint>,
}

impl PbfPoiSource {
    pub fn from_pbf(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "reading venues from OSM extract");

        let reader = ElementReader::from_path(path)
            .map_err(|e| RiskError::config(format!("cannot open {}: {e}", path.display())))?;

        let mut points = Vec::new();
        reader
            .for_each(|element| {
                // Venues mapped as building outlines carry no coordinates of
                // their own here and are skipped.
                let (lat, lon, category) = match element {
                    Element::Node(node) => {
                        let tag = node.tags().find(|(k, _)| *k == "amenity");
                        (node.lat(), node.lon(), tag.and_then(|(_, v)| VenueCategory::from_osm_tag(v)))
                    }
                    Element::DenseNode(node) => {
                        let tag = node.tags().find(|(k, _)| *k == "amenity");
                        (node.lat(), node.lon(), tag.and_then(|(_, v)| VenueCategory::from_osm_tag(v)))
                    }
                    _ => return,
                };
                if let Some(category) = category {
                    points.push(VenuePoint::new([lon, lat], category));
                }
            })
            .map_err(|e| RiskError::config(format!("cannot read {}: {e}", path.display())))?;

        info!(venues = points.len(), "venue index built");
        Ok(Self::from_venues(points))
    }

    fn from_venues(points: Vec<VenuePoint>) -> Self {
        Self {
            venues: RTree::bulk_load(points),
        }
    }

    pub fn len(&self) -> usize {
        self.venues.size()
    }

    pub fn is_empty(&self) -> bool {
        self.venues.size() == 0
    }
}

#[async_trait]
impl PoiSource for PbfPoiSource {
    async fn count_venues(
        &self,
        center: &Coordinate,
        radius_m: f64,
        categories: &[VenueCategory],
    ) -> std::result::Result<VenueCounts, SourceError> {
        let counts = center
            .bounding_boxes(radius_m)
            .into_iter()
            .flat_map(|(lower, upper)| self.venues.locate_in_envelope(&AABB::from_corners(lower, upper)))
            .filter(|v| categories.contains(&v.data))
            .filter(|v| {
                let [lon, lat] = *v.geom();
                Coordinate::new(lat, lon).is_ok_and(|p| p.distance_to(center) <= radius_m)
            })
            .map(|v| v.data)
            .collect();
        Ok(counts)
    }
}
