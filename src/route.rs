//! Route risk: sample a polyline by distance, score each sample, merge
//! same-band runs into colored segments.

use std::sync::Arc;

use chrono::Weekday;
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::engine::RiskEngine;
use crate::error::{Result, RiskError};
use crate::fusion::{FusedResult, RiskBand};
use crate::spatial::Coordinate;

/// Scored points per route, whatever the density of the input polyline.
pub const MAX_SAMPLES: usize = 15;
pub const DEFAULT_CONCURRENCY: usize = 4;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouteSample {
    pub coordinate: Coordinate,
    pub result: FusedResult,
}

/// A maximal run of consecutive samples in the same band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub start: Coordinate,
    pub end: Coordinate,
    pub band: RiskBand,
    pub mean_score: f64,
    pub samples: usize,
}

/// `samples` points spaced evenly by cumulative distance along `path`,
/// including both ends. The count does not depend on how many vertices the
/// path has, so sparse and dense drawings of one line sample alike.
pub fn sample_points(path: &[Coordinate], samples: usize) -> Result<Vec<Coordinate>> {
    let (first, last) = match path {
        [first, .., last] => (*first, *last),
        _ => {
            return Err(RiskError::invalid(format!(
                "a route needs at least two points, got {}",
                path.len()
            )))
        }
    };

    let legs: Vec<f64> = path.iter().tuple_windows().map(|(a, b)| a.distance_to(b)).collect();
    let total: f64 = legs.iter().sum();
    if total <= 0.0 {
        return Err(RiskError::invalid("route has zero length"));
    }

    let n = samples.max(2);
    let mut points = Vec::with_capacity(n);
    points.push(first);

    let mut leg = 0;
    let mut leg_start = 0.0;
    for i in 1..n - 1 {
        let target = total * i as f64 / (n - 1) as f64;
        while leg < legs.len() - 1 && leg_start + legs[leg] < target {
            leg_start += legs[leg];
            leg += 1;
        }
        let t = if legs[leg] > 0.0 { (target - leg_start) / legs[leg] } else { 0.0 };
        points.push(path[leg].lerp(&path[leg + 1], t));
    }

    points.push(last);
    Ok(points)
}

/// Merges consecutive same-band samples. Each segment ends where the next
/// one starts, so together they cover the sampled route without gaps.
pub fn merge_segments(samples: &[RouteSample]) -> Vec<Segment> {
    let runs: Vec<Vec<&RouteSample>> = samples
        .iter()
        .group_by(|s| s.result.band)
        .into_iter()
        .map(|(_, run)| run.collect())
        .collect();

    let mut segments = Vec::with_capacity(runs.len());
    for (i, run) in runs.iter().enumerate() {
        let end = match runs.get(i + 1) {
            Some(next) => next[0].coordinate,
            None => run[run.len() - 1].coordinate,
        };
        let mean_score = run.iter().map(|s| s.result.score).sum::<f64>() / run.len() as f64;
        segments.push(Segment {
            start: run[0].coordinate,
            end,
            band: run[0].result.band,
            mean_score: (mean_score * 10_000.0).round() / 10_000.0,
            samples: run.len(),
        });
    }
    segments
}

/// Scores the route samples with at most `concurrency` in flight and
/// returns them in path order. Dropping the future aborts pending samples.
pub async fn score_samples(
    engine: &Arc<RiskEngine>,
    points: Vec<Coordinate>,
    day: Weekday,
    fast_mode: bool,
    concurrency: usize,
) -> Result<Vec<RouteSample>> {
    let permits = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, coordinate) in points.iter().copied().enumerate() {
        let engine = engine.clone();
        let permits = permits.clone();
        tasks.spawn(async move {
            // The semaphore is never closed.
            let _permit = permits.acquire_owned().await.ok();
            (index, engine.score_point(coordinate, day, fast_mode).await)
        });
    }

    let results = join_in_order(tasks, points.len()).await?;
    Ok(points
        .into_iter()
        .zip(results)
        .map(|(coordinate, result)| RouteSample { coordinate, result })
        .collect())
}

/// Drains `tasks` and puts each output back at its index. A task that was
/// cancelled would leave a hole in the route, so it fails the whole call.
async fn join_in_order<T: Send + 'static>(mut tasks: JoinSet<(usize, T)>, len: usize) -> Result<Vec<T>> {
    let mut slots: Vec<Option<T>> = (0..len).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, value)) => slots[index] = Some(value),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => {
                warn!(%err, "route sample task cancelled");
                return Err(RiskError::Interrupted(err.to_string()));
            }
        }
    }

    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.ok_or_else(|| RiskError::Interrupted(format!("sample {index} produced no result")))
        })
        .collect()
}

pub async fn analyze_route(
    engine: &Arc<RiskEngine>,
    path: &[Coordinate],
    day: Weekday,
    fast_mode: bool,
    concurrency: usize,
) -> Result<Vec<Segment>> {
    let points = sample_points(path, MAX_SAMPLES)?;
    let samples = score_samples(engine, points, day, fast_mode, concurrency).await?;
    let segments = merge_segments(&samples);
    debug!(
        path_points = path.len(),
        samples = samples.len(),
        segments = segments.len(),
        fast_mode,
        "route analyzed"
    );
    Ok(segments)
}
