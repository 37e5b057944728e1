//! Geolocated, timestamped event corpus for the contextual signal.
//!
//! The corpus is written by the news ingestion worker as a JSON array; this
//! side only reads it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rstar::primitives::GeomWithData;
use rstar::{RTree, AABB};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Result, RiskError, SourceError};
use crate::spatial::Coordinate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub location_name: String,
    pub latitude: f64,
    pub longitude: f64,
    pub published_at: DateTime<Utc>,
}

#[async_trait]
pub trait EventSource: Send + Sync {
    /// Events within `radius_m` of `center` published in `[since, until]`.
    async fn events_within(
        &self,
        center: &Coordinate,
        radius_m: f64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> std::result::Result<Vec<EventRecord>, SourceError>;
}

type IndexedEvent = GeomWithData<[f64; 2], EventRecord>;

/// In-memory R-tree over the corpus file. Reloadable without blocking readers.
pub struct EventStore {
    path: Option<PathBuf>,
    index: RwLock<Arc<RTree<IndexedEvent>>>,
}

impl EventStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let tree = Self::read_index(&path)?;
        info!(events = tree.size(), path = %path.display(), "loaded event corpus");
        Ok(Self {
            path: Some(path),
            index: RwLock::new(Arc::new(tree)),
        })
    }

    pub fn from_records(records: Vec<EventRecord>) -> Self {
        Self {
            path: None,
            index: RwLock::new(Arc::new(build_index(records))),
        }
    }

    /// Re-reads the backing file. On failure the previous corpus stays live.
    pub fn reload(&self) -> Result<usize> {
        let Some(path) = &self.path else {
            return Ok(self.len());
        };
        let tree = Self::read_index(path)?;
        let size = tree.size();
        match self.index.write() {
            Ok(mut guard) => *guard = Arc::new(tree),
            Err(poisoned) => *poisoned.into_inner() = Arc::new(tree),
        }
        Ok(size)
    }

    /// Reloads every `every` on the blocking pool until the handle is
    /// aborted. Failed reloads keep the previous corpus.
    pub fn spawn_reloader(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let task = store.clone();
                match tokio::task::spawn_blocking(move || task.reload()).await {
                    Ok(Ok(count)) => info!(events = count, "event corpus reloaded"),
                    Ok(Err(err)) => warn!(%err, "event corpus reload failed, keeping previous corpus"),
                    Err(err) => warn!(%err, "event corpus reload task died"),
                }
            }
        })
    }

    pub fn len(&self) -> usize {
        self.snapshot().size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Arc<RTree<IndexedEvent>> {
        match self.index.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn read_index(path: &Path) -> Result<RTree<IndexedEvent>> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            RiskError::config(format!("cannot read event corpus {}: {e}", path.display()))
        })?;
        let records: Vec<EventRecord> = serde_json::from_str(&raw)?;
        Ok(build_index(records))
    }
}

fn build_index(records: Vec<EventRecord>) -> RTree<IndexedEvent> {
    let points = records
        .into_iter()
        .filter(|r| {
            let ok = Coordinate::new(r.latitude, r.longitude).is_ok();
            if !ok {
                warn!(url = %r.url, "dropping event with invalid coordinates");
            }
            ok
        })
        .map(|r| IndexedEvent::new([r.longitude, r.latitude], r))
        .collect();
    RTree::bulk_load(points)
}

#[async_trait]
impl EventSource for EventStore {
    async fn events_within(
        &self,
        center: &Coordinate,
        radius_m: f64,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    ) -> std::result::Result<Vec<EventRecord>, SourceError> {
        let tree = self.snapshot();
        let matches = center
            .bounding_boxes(radius_m)
            .into_iter()
            .flat_map(|(lower, upper)| tree.locate_in_envelope(&AABB::from_corners(lower, upper)))
            .map(|e| &e.data)
            .filter(|r| r.published_at >= since && r.published_at <= until)
            .filter(|r| {
                Coordinate::new(r.latitude, r.longitude)
                    .is_ok_and(|p| p.distance_to(center) <= radius_m)
            })
            .cloned()
            .collect();
        Ok(matches)
    }
}
