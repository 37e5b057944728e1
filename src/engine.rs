//! Point scoring: index, run the three signals concurrently, fuse, cache.

use std::sync::Arc;

use chrono::{Datelike, Local, Utc, Weekday};
use h3o::CellIndex;
use tracing::debug;

use crate::cache::{CacheKey, ResultCache};
use crate::collectors::{
    context_window, ContextualCollector, EnvironmentalCollector, CONTEXT_RADIUS_M, POINT_RADIUS_M,
};
use crate::error::Result;
use crate::fusion::{FusedResult, Fusion};
use crate::model::RiskModel;
use crate::route::{self, Segment};
use crate::signal::{Degradation, Provenance, SignalScore};
use crate::spatial::{Coordinate, SpatialIndexer};

pub struct RiskEngine {
    indexer: SpatialIndexer,
    model: Arc<RiskModel>,
    environmental: EnvironmentalCollector,
    contextual: ContextualCollector,
    fusion: Fusion,
    cache: Arc<dyn ResultCache>,
    route_concurrency: usize,
}

impl RiskEngine {
    pub fn new(
        indexer: SpatialIndexer,
        model: Arc<RiskModel>,
        environmental: EnvironmentalCollector,
        contextual: ContextualCollector,
        fusion: Fusion,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        Self {
            indexer,
            model,
            environmental,
            contextual,
            fusion,
            cache,
            route_concurrency: route::DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_route_concurrency(mut self, limit: usize) -> Self {
        self.route_concurrency = limit.max(1);
        self
    }

    pub fn indexer(&self) -> &SpatialIndexer {
        &self.indexer
    }

    pub fn cell_of(&self, coordinate: &Coordinate) -> CellIndex {
        self.indexer.cell_of(coordinate)
    }

    /// Cached fused score for one point.
    pub async fn score_point(
        &self,
        coordinate: Coordinate,
        day: Weekday,
        fast_mode: bool,
    ) -> FusedResult {
        let key = CacheKey::new(&coordinate, day, fast_mode);
        self.cache
            .get_or_compute(key, Box::pin(self.compute(coordinate, day, fast_mode)))
            .await
    }

    /// Uncached computation. The two collectors run concurrently; the model
    /// lookup is local and cheap.
    pub async fn compute(&self, coordinate: Coordinate, day: Weekday, fast_mode: bool) -> FusedResult {
        let cell = self.indexer.cell_of(&coordinate);
        let historical = self.model.predict(cell, day);

        let (environmental, (contextual, reports)) = if fast_mode {
            (
                SignalScore::neutral(Provenance::Environmental, Degradation::Skipped),
                (SignalScore::neutral(Provenance::Contextual, Degradation::Skipped), Vec::new()),
            )
        } else {
            tokio::join!(
                self.environmental.query(&coordinate, POINT_RADIUS_M),
                self.contextual.query(&coordinate, CONTEXT_RADIUS_M, context_window(), Utc::now()),
            )
        };

        let mut fused = self.fusion.fuse(historical, environmental, contextual);
        fused.context = reports;
        debug!(%cell, ?day, fast_mode, score = fused.score, band = fused.band.as_str(), "fused");
        fused
    }

    /// Segments for `path`, scored for the current local weekday.
    pub async fn score_route(self: &Arc<Self>, path: &[Coordinate], fast_mode: bool) -> Result<Vec<Segment>> {
        self.score_route_on(path, Local::now().weekday(), fast_mode).await
    }

    pub async fn score_route_on(
        self: &Arc<Self>,
        path: &[Coordinate],
        day: Weekday,
        fast_mode: bool,
    ) -> Result<Vec<Segment>> {
        route::analyze_route(self, path, day, fast_mode, self.route_concurrency).await
    }
}
