//! Network-bound signal collectors. Both degrade to a neutral score on any
//! failure or timeout; neither ever returns an error.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::events::{EventRecord, EventSource};
use crate::poi::{PoiSource, VenueCategory};
use crate::signal::{saturate, Degradation, Provenance, SignalScore};
use crate::spatial::Coordinate;

pub const POINT_RADIUS_M: f64 = 500.0;
pub const CONTEXT_RADIUS_M: f64 = 1500.0;
pub const CONTEXT_WINDOW_HOURS: i64 = 48;
/// Matched events kept alongside the contextual score for display.
pub const MAX_CONTEXT_REPORTS: usize = 5;

pub fn context_window() -> chrono::Duration {
    chrono::Duration::hours(CONTEXT_WINDOW_HOURS)
}

#[derive(Clone)]
pub struct EnvironmentalCollector {
    source: Arc<dyn PoiSource>,
    timeout: Duration,
    ceiling: f64,
}

impl EnvironmentalCollector {
    pub fn new(source: Arc<dyn PoiSource>, timeout: Duration, ceiling: f64) -> Self {
        Self { source, timeout, ceiling }
    }

    pub async fn query(&self, coordinate: &Coordinate, radius_m: f64) -> SignalScore {
        let lookup = self.source.count_venues(coordinate, radius_m, &VenueCategory::ALL);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(counts)) => {
                let value = saturate(counts.weighted_total(), self.ceiling);
                debug!(venues = counts.total(), value, "environmental signal");
                SignalScore::valid(Provenance::Environmental, value, counts.total())
            }
            Ok(Err(err)) => {
                warn!(%err, "POI source failed, using neutral environmental signal");
                SignalScore::neutral(Provenance::Environmental, Degradation::Unavailable)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "POI source timed out");
                SignalScore::neutral(Provenance::Environmental, Degradation::Unavailable)
            }
        }
    }
}

#[derive(Clone)]
pub struct ContextualCollector {
    source: Arc<dyn EventSource>,
    timeout: Duration,
    ceiling: f64,
}

impl ContextualCollector {
    pub fn new(source: Arc<dyn EventSource>, timeout: Duration, ceiling: f64) -> Self {
        Self { source, timeout, ceiling }
    }

    /// The contextual score and up to [`MAX_CONTEXT_REPORTS`] of the matched
    /// events, newest first.
    pub async fn query(
        &self,
        coordinate: &Coordinate,
        radius_m: f64,
        window: chrono::Duration,
        now: DateTime<Utc>,
    ) -> (SignalScore, Vec<EventRecord>) {
        let lookup = self.source.events_within(coordinate, radius_m, now - window, now);
        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(mut events)) => {
                let weighted: f64 = events.iter().map(|e| recency_weight(e, window, now)).sum();
                let value = saturate(weighted, self.ceiling);
                debug!(events = events.len(), value, "contextual signal");
                let score = SignalScore::valid(Provenance::Contextual, value, events.len() as u32);

                events.sort_by(|a, b| b.published_at.cmp(&a.published_at));
                events.truncate(MAX_CONTEXT_REPORTS);
                (score, events)
            }
            Ok(Err(err)) => {
                warn!(%err, "event corpus failed, using neutral contextual signal");
                (SignalScore::neutral(Provenance::Contextual, Degradation::Unavailable), Vec::new())
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "event corpus timed out");
                (SignalScore::neutral(Provenance::Contextual, Degradation::Unavailable), Vec::new())
            }
        }
    }
}

/// 1.0 for an event published at `now`, falling linearly to 0.5 at the edge
/// of the window.
pub fn recency_weight(event: &EventRecord, window: chrono::Duration, now: DateTime<Utc>) -> f64 {
    let window_s = window.num_seconds().max(1) as f64;
    let age_s = (now - event.published_at).num_seconds() as f64;
    if age_s < 0.0 || age_s > window_s {
        return 0.0;
    }
    0.5 + 0.5 * (1.0 - age_s / window_s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::events::tests::record;
    use crate::events::EventStore;
    use crate::poi::VenueCounts;
    use async_trait::async_trait;

    struct FixedPoi(VenueCounts);

    #[async_trait]
    impl PoiSource for FixedPoi {
        async fn count_venues(
            &self,
            _: &Coordinate,
            _: f64,
            _: &[VenueCategory],
        ) -> Result<VenueCounts, SourceError> {
            Ok(self.0.clone())
        }
    }

    struct FailingPoi;

    #[async_trait]
    impl PoiSource for FailingPoi {
        async fn count_venues(
            &self,
            _: &Coordinate,
            _: f64,
            _: &[VenueCategory],
        ) -> Result<VenueCounts, SourceError> {
            Err(SourceError::Unavailable("connection reset".into()))
        }
    }

    struct SlowPoi;

    #[async_trait]
    impl PoiSource for SlowPoi {
        async fn count_venues(
            &self,
            _: &Coordinate,
            _: f64,
            _: &[VenueCategory],
        ) -> Result<VenueCounts, SourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(VenueCounts::default())
        }
    }

    struct FailingEvents;

    #[async_trait]
    impl EventSource for FailingEvents {
        async fn events_within(
            &self,
            _: &Coordinate,
            _: f64,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<Vec<EventRecord>, SourceError> {
            Err(SourceError::Unavailable("corpus missing".into()))
        }
    }

    struct SlowEvents;

    #[async_trait]
    impl EventSource for SlowEvents {
        async fn events_within(
            &self,
            _: &Coordinate,
            _: f64,
            _: DateTime<Utc>,
            _: DateTime<Utc>,
        ) -> Result<Vec<EventRecord>, SourceError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Vec::new())
        }
    }

    fn here() -> Coordinate {
        Coordinate::new(12.9716, 77.5946).unwrap()
    }

    #[tokio::test]
    async fn more_venues_means_more_risk() {
        let few: VenueCounts = [VenueCategory::Atm].into_iter().collect();
        let many: VenueCounts =
            [VenueCategory::Bar, VenueCategory::Bar, VenueCategory::Nightclub].into_iter().collect();

        let low = EnvironmentalCollector::new(Arc::new(FixedPoi(few)), Duration::from_secs(1), 20.0)
            .query(&here(), POINT_RADIUS_M)
            .await;
        let high = EnvironmentalCollector::new(Arc::new(FixedPoi(many)), Duration::from_secs(1), 20.0)
            .query(&here(), POINT_RADIUS_M)
            .await;

        assert!(low.valid && high.valid);
        assert!(high.value > low.value);
        assert_eq!(high.evidence, 3);
    }

    #[tokio::test]
    async fn source_failure_degrades_to_neutral() {
        let score = EnvironmentalCollector::new(Arc::new(FailingPoi), Duration::from_secs(1), 20.0)
            .query(&here(), POINT_RADIUS_M)
            .await;
        assert!(!score.valid);
        assert_eq!(score.degraded, Some(Degradation::Unavailable));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_degrades_to_neutral() {
        let score = EnvironmentalCollector::new(Arc::new(SlowPoi), Duration::from_millis(100), 20.0)
            .query(&here(), POINT_RADIUS_M)
            .await;
        assert!(!score.valid);
        assert_eq!(score.value, crate::signal::NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn recent_events_weigh_more() {
        let now = Utc::now();
        let recent = EventStore::from_records(vec![record("a", 12.9720, 77.5946, now - chrono::Duration::hours(1))]);
        let older = EventStore::from_records(vec![record("b", 12.9720, 77.5946, now - chrono::Duration::hours(40))]);

        let (recent, _) = ContextualCollector::new(Arc::new(recent), Duration::from_secs(1), 5.0)
            .query(&here(), CONTEXT_RADIUS_M, context_window(), now)
            .await;
        let (older, _) = ContextualCollector::new(Arc::new(older), Duration::from_secs(1), 5.0)
            .query(&here(), CONTEXT_RADIUS_M, context_window(), now)
            .await;

        assert!(recent.valid && older.valid);
        assert!(recent.value > older.value);
        assert_eq!(recent.evidence, 1);
    }

    #[tokio::test]
    async fn empty_corpus_is_a_valid_zero() {
        let (score, reports) = ContextualCollector::new(
            Arc::new(EventStore::from_records(vec![])),
            Duration::from_secs(1),
            5.0,
        )
        .query(&here(), CONTEXT_RADIUS_M, context_window(), Utc::now())
        .await;
        assert!(score.valid);
        assert_eq!(score.value, 0.0);
        assert!(reports.is_empty());
    }

    #[tokio::test]
    async fn keeps_the_newest_reports() {
        let now = Utc::now();
        let records = (0..8)
            .map(|i| record(&format!("r{i}"), 12.9720, 77.5946, now - chrono::Duration::hours(i)))
            .rev()
            .collect();
        let (score, reports) = ContextualCollector::new(
            Arc::new(EventStore::from_records(records)),
            Duration::from_secs(1),
            5.0,
        )
        .query(&here(), CONTEXT_RADIUS_M, context_window(), now)
        .await;

        assert_eq!(score.evidence, 8);
        let urls: Vec<_> = reports.iter().map(|r| r.url.as_str()).collect();
        assert_eq!(urls, vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[tokio::test]
    async fn event_source_failure_degrades_to_neutral() {
        let (score, reports) = ContextualCollector::new(Arc::new(FailingEvents), Duration::from_secs(1), 5.0)
            .query(&here(), CONTEXT_RADIUS_M, context_window(), Utc::now())
            .await;
        assert!(!score.valid);
        assert_eq!(score.value, crate::signal::NEUTRAL_SCORE);
        assert_eq!(score.degraded, Some(Degradation::Unavailable));
        assert!(reports.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn event_source_timeout_degrades_to_neutral() {
        let (score, reports) = ContextualCollector::new(Arc::new(SlowEvents), Duration::from_millis(100), 5.0)
            .query(&here(), CONTEXT_RADIUS_M, context_window(), Utc::now())
            .await;
        assert!(!score.valid);
        assert_eq!(score.degraded, Some(Degradation::Unavailable));
        assert!(reports.is_empty());
    }

    #[test]
    fn recency_weight_spans_half_to_one() {
        let now = Utc::now();
        let fresh = record("a", 0.0, 0.0, now);
        let window = context_window();
        let edge = record("b", 0.0, 0.0, now - window);
        let stale = record("c", 0.0, 0.0, now - window - chrono::Duration::hours(1));
        assert_eq!(recency_weight(&fresh, window, now), 1.0);
        assert_eq!(recency_weight(&edge, window, now), 0.5);
        assert_eq!(recency_weight(&stale, window, now), 0.0);
    }
}
